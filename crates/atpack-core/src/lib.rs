//! Canonical device model: memory tree, registers, configuration words,
//! interrupts and signatures, built from the dialect-neutral IR.

pub mod bitfield;
pub mod memory;
pub mod register;
pub mod specs;

use std::collections::BTreeMap;

use atpack_xml::{Family, IrDevice, IrInterrupt, IrModule, ParseError};
use thiserror::Error;
use tracing::debug;

pub use bitfield::{mask_for, Bitfield, BitfieldError, EnumValue};
pub use memory::{
    assemble, AddressOverlapError, ClassificationTable, MemoryNode, MemorySegment, MemorySpace,
    Warning, COMMON_BANK,
};
pub use register::{Fuse, Register};
pub use specs::{DeviceSpecs, GprSector};

/// Failure to construct one device's model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// Missing or malformed declarations, or invalid bitfield geometry.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Two non-shadow segments of one space overlap.
    #[error(transparent)]
    Overlap(#[from] AddressOverlapError),
}

impl ModelError {
    /// Device whose construction failed.
    pub fn device(&self) -> &str {
        match self {
            ModelError::Parse(err) => &err.device,
            ModelError::Overlap(err) => &err.device,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RegisterGroup {
    pub name: String,
    pub caption: Option<String>,
    pub registers: Vec<Register>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Module {
    pub name: String,
    pub caption: Option<String>,
    pub groups: Vec<RegisterGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Interrupt {
    pub index: u64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Signature {
    pub name: String,
    pub address: u64,
    pub value: u64,
    pub mask: Option<u64>,
}

/// Immutable model of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Device {
    name: String,
    family: Family,
    architecture: String,
    series: String,
    memory: MemorySpace,
    modules: Vec<Module>,
    fuses: Vec<Fuse>,
    interrupts: Vec<Interrupt>,
    signatures: Vec<Signature>,
    warnings: Vec<Warning>,
}

impl Device {
    /// Assemble and normalize adapter output into the canonical model.
    pub fn from_ir(ir: IrDevice, table: &ClassificationTable) -> Result<Device, ModelError> {
        let (memory, warnings) = assemble(&ir.name, &ir.segments, &ir.spaces, table)?;
        let device = ir.name.as_str();

        let modules = ir
            .modules
            .into_iter()
            .map(|module| normalize_module(device, module))
            .collect::<Result<Vec<_>, _>>()?;
        let fuses = ir
            .fuses
            .into_iter()
            .map(|fuse| register::normalize_fuse(device, fuse))
            .collect::<Result<Vec<_>, _>>()?;
        let interrupts = normalize_interrupts(device, ir.interrupts)?;
        let signatures = ir
            .signatures
            .into_iter()
            .map(|sig| Signature {
                name: sig.name,
                address: sig.address,
                value: sig.value,
                mask: sig.mask,
            })
            .collect();

        debug!(
            device,
            modules = modules.len(),
            fuses = fuses.len(),
            interrupts = interrupts.len(),
            warnings = warnings.len(),
            "built device model"
        );
        Ok(Device {
            name: ir.name,
            family: ir.family,
            architecture: ir.architecture,
            series: ir.series,
            memory,
            modules,
            fuses,
            interrupts,
            signatures,
            warnings,
        })
    }

    /// Name exactly as declared by the document.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    pub fn series(&self) -> &str {
        &self.series
    }

    /// Root of the memory tree; a virtual space named after the device.
    pub fn memory(&self) -> &MemorySpace {
        &self.memory
    }

    /// Top-level address space by name.
    pub fn space(&self, name: &str) -> Option<&MemorySpace> {
        self.memory.space(name)
    }

    /// All leaf segments in tree order.
    pub fn segments(&self) -> Vec<&MemorySegment> {
        self.memory.segments()
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Every register of every module, ordered by offset (declaration order on ties).
    pub fn registers(&self) -> Vec<&Register> {
        let mut registers: Vec<&Register> = self
            .modules
            .iter()
            .flat_map(|module| module.groups.iter())
            .flat_map(|group| group.registers.iter())
            .collect();
        registers.sort_by_key(|register| register.offset);
        registers
    }

    /// First register with the given name, case-insensitively.
    pub fn register(&self, name: &str) -> Option<&Register> {
        self.modules
            .iter()
            .flat_map(|module| module.groups.iter())
            .flat_map(|group| group.registers.iter())
            .find(|register| register.name.eq_ignore_ascii_case(name))
    }

    pub fn fuses(&self) -> &[Fuse] {
        &self.fuses
    }

    /// Interrupts sorted by index.
    pub fn interrupts(&self) -> &[Interrupt] {
        &self.interrupts
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// Non-fatal findings recorded while assembling the memory tree.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Capacity figures, recomputed from the memory tree.
    pub fn specs(&self) -> DeviceSpecs {
        DeviceSpecs::compute(
            &self.name,
            self.family,
            &self.architecture,
            &self.series,
            &self.memory,
        )
    }
}

fn normalize_module(device: &str, module: IrModule) -> Result<Module, ParseError> {
    let mut groups = Vec::with_capacity(module.groups.len());
    for group in module.groups {
        let registers = group
            .registers
            .into_iter()
            .map(|register| register::normalize_register(device, register))
            .collect::<Result<Vec<_>, _>>()?;
        groups.push(RegisterGroup {
            name: group.name,
            caption: group.caption,
            registers,
        });
    }
    Ok(Module {
        name: module.name,
        caption: module.caption,
        groups,
    })
}

fn normalize_interrupts(
    device: &str,
    interrupts: Vec<IrInterrupt>,
) -> Result<Vec<Interrupt>, ParseError> {
    let mut by_index: BTreeMap<u64, Interrupt> = BTreeMap::new();
    for interrupt in interrupts {
        if let Some(existing) = by_index.get(&interrupt.index) {
            return Err(ParseError::new(
                device,
                interrupt.path,
                Some(&interrupt.index.to_string()),
                format!(
                    "interrupt {} reuses index {} of {}",
                    interrupt.name, interrupt.index, existing.name
                ),
            ));
        }
        by_index.insert(
            interrupt.index,
            Interrupt {
                index: interrupt.index,
                name: interrupt.name,
                description: interrupt.caption,
            },
        );
    }
    Ok(by_index.into_values().collect())
}
