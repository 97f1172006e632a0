//! Adapter for EDC (`edc:PIC`) documents.
//!
//! One document describes exactly one device. Memory is declared as sector
//! elements with exclusive `beginaddr`/`endaddr` bounds; a sector may mirror
//! another one through `shadowidref`. Register fields are laid out
//! sequentially inside `SFRMode`/`DCRMode` elements, with `AdjustPoint`
//! gaps.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::ir::{
    Access, Family, IrBitfield, IrDevice, IrFuse, IrInterrupt, IrModule, IrRegister,
    IrRegisterGroup, IrSegment, IrSignature, IrValue, SegmentKind,
};
use crate::reader::ElementReader;
use crate::{parse_int, Element, ParseError};

const MEMORY_CONTAINERS: [&str; 3] = ["ProgramSpace", "DataSpace", "EEDataSpace"];

/// Wrappers whose sectors only exist in an alternate operating mode.
const SKIPPED_WRAPPERS: [&str; 1] = ["ExtendedModeOnly"];

/// The single device declared by the document.
pub fn device_names(root: &Element) -> Vec<String> {
    root.attr("name").map(str::to_string).into_iter().collect()
}

/// Classification hint for a sector element.
pub fn sector_kind(local: &str) -> SegmentKind {
    match local {
        "CodeSector" => SegmentKind::Program,
        "UserIDSector" => SegmentKind::UserId,
        "ConfigFuseSector" => SegmentKind::Config,
        "DeviceIDSector" | "RevisionIDSector" => SegmentKind::DeviceId,
        "EEDataSector" => SegmentKind::Eeprom,
        "TestZone" | "TestSector" => SegmentKind::Test,
        "DebugZone" | "BACKBUGVectorSector" => SegmentKind::Debug,
        "SFRDataSector" | "DPRDataSector" => SegmentKind::Sfr,
        "GPRDataSector" => SegmentKind::Gpr,
        _ => SegmentKind::Other,
    }
}

/// Series label derived from the `arch` attribute.
pub fn series_for(arch: &str) -> String {
    ["16", "18", "12", "10"]
        .into_iter()
        .find(|prefix| arch.starts_with(prefix))
        .map(|prefix| format!("PIC{prefix}"))
        .unwrap_or_else(|| format!("PIC{arch}"))
}

fn is_sector(local: &str) -> bool {
    local.ends_with("Sector") || local.ends_with("Zone")
}

/// Convert the document's `PIC` root into IR.
pub fn parse(root: &Element, device: &str) -> Result<IrDevice, ParseError> {
    let reader = ElementReader::root(device, format!("PIC[{device}]"), root);
    let declared = reader.required("name")?;
    if declared != device {
        return Err(reader.error(Some(declared), "document declares a different device"));
    }

    let mut ir = IrDevice::new(device, Family::DialectB);
    let arch = reader.optional("arch").unwrap_or_default();
    ir.architecture = "PIC".to_string();
    ir.series = series_for(arch);

    let mut sectors = Vec::new();
    for container in root.children() {
        if MEMORY_CONTAINERS.contains(&container.local_name()) {
            collect_sectors(&reader.child(container), &mut sectors);
        }
    }

    let mut modules = ModuleSet::default();
    for sector in &sectors {
        let local = sector.element().local_name();
        if let Some(segment) = parse_sector(sector)? {
            ir.segments.push(segment);
        }
        match local {
            "SFRDataSector" | "DPRDataSector" => {
                let name = match sector.optional("bank") {
                    Some(bank) => format!("BANK{bank}"),
                    None => sector_id(sector)?,
                };
                for def in sector.element().descendants_named("SFRDef") {
                    modules.push(&name, parse_sfr(&sector.child(def))?);
                }
            }
            "ConfigFuseSector" => {
                for def in sector.element().descendants_named("DCRDef") {
                    ir.fuses.push(parse_dcr(&sector.child(def))?);
                }
            }
            "DeviceIDSector" => {
                if let Some(value) = sector.optional_hex("value")? {
                    ir.signatures.push(IrSignature {
                        name: "DEVID".to_string(),
                        address: sector.required_hex("beginaddr")?,
                        value,
                        mask: sector.optional_hex("mask")?,
                    });
                }
            }
            _ => {}
        }
    }

    for place in root.descendants_named("NMMRPlace") {
        let place = reader.child(place);
        for def in place.element().descendants_named("SFRDef") {
            modules.push("CORE", parse_sfr(&place.child(def))?);
        }
    }
    ir.modules = modules.into_modules();

    for list in root.descendants_named("InterruptList") {
        let list = reader.child(list);
        for interrupt in list.element().children_named("Interrupt") {
            let interrupt = list.child(interrupt);
            ir.interrupts.push(IrInterrupt {
                index: interrupt.required_int("irq")?,
                name: field_name(&interrupt)?,
                caption: interrupt.optional("desc").map(str::to_string),
                path: interrupt.path().to_string(),
            });
        }
    }

    debug!(
        device,
        segments = ir.segments.len(),
        modules = ir.modules.len(),
        fuses = ir.fuses.len(),
        "adapted EDC device"
    );
    Ok(ir)
}

fn collect_sectors<'a>(container: &ElementReader<'a>, sectors: &mut Vec<ElementReader<'a>>) {
    for child in container.element().children() {
        let local = child.local_name();
        if SKIPPED_WRAPPERS.contains(&local) {
            continue;
        }
        let child = container.child(child);
        if is_sector(local) {
            sectors.push(child);
        } else {
            collect_sectors(&child, sectors);
        }
    }
}

fn sector_id(sector: &ElementReader<'_>) -> Result<String, ParseError> {
    if let Some(id) = sector.optional("regionid") {
        return Ok(id.to_string());
    }
    let begin = sector.required_hex("beginaddr")?;
    Ok(format!("{}@{begin:#x}", sector.element().local_name()))
}

fn parse_sector(sector: &ElementReader<'_>) -> Result<Option<IrSegment>, ParseError> {
    let begin = sector.required_hex("beginaddr")?;
    let end = sector.required_hex("endaddr")?;
    if end < begin {
        return Err(sector.error(
            sector.optional("endaddr"),
            format!("endaddr lies before beginaddr {begin:#x}"),
        ));
    }
    if end == begin {
        trace!(path = sector.path(), "skipping empty sector");
        return Ok(None);
    }

    let id = sector_id(sector)?;
    let name = sector
        .optional("regionid")
        .or_else(|| sector.optional("sectionname"))
        .map(str::to_string)
        .unwrap_or_else(|| id.clone());
    let shadow_of = if sector.has_namespaced("shadowidref") {
        sector.optional("shadowidref").map(str::to_string)
    } else {
        None
    };

    Ok(Some(IrSegment {
        id,
        name,
        path: sector.path().to_string(),
        start: begin,
        size: end - begin,
        kind: sector_kind(sector.element().local_name()),
        page_size: None,
        bank: sector.optional("bank").map(str::to_string),
        space: None,
        shadow_of,
    }))
}

/// Modules keyed by name, kept in order of first appearance.
#[derive(Default)]
struct ModuleSet {
    order: Vec<String>,
    registers: HashMap<String, Vec<IrRegister>>,
}

impl ModuleSet {
    fn push(&mut self, module: &str, register: IrRegister) {
        if !self.registers.contains_key(module) {
            self.order.push(module.to_string());
        }
        self.registers
            .entry(module.to_string())
            .or_default()
            .push(register);
    }

    fn into_modules(mut self) -> Vec<IrModule> {
        self.order
            .iter()
            .map(|name| IrModule {
                name: name.clone(),
                caption: None,
                groups: vec![IrRegisterGroup {
                    name: name.clone(),
                    caption: None,
                    registers: self.registers.remove(name).unwrap_or_default(),
                }],
            })
            .collect()
    }
}

fn field_name(reader: &ElementReader<'_>) -> Result<String, ParseError> {
    reader
        .optional("cname")
        .map(str::to_string)
        .map_or_else(|| reader.required("name").map(str::to_string), Ok)
}

fn width_bits(reader: &ElementReader<'_>, default: u64) -> Result<u64, ParseError> {
    Ok(reader.optional_int("nzwidth")?.unwrap_or(default))
}

fn bytes_for(bits: u64) -> u64 {
    bits.div_ceil(8).max(1)
}

fn parse_sfr(def: &ElementReader<'_>) -> Result<IrRegister, ParseError> {
    let bits = width_bits(def, 8)?;
    let access = def.optional("access");
    let mask = match def.optional_hex("impl")? {
        Some(mask) => Some(mask),
        None => access.map(implemented_mask),
    };
    Ok(IrRegister {
        name: def.required("name")?.to_string(),
        caption: def.optional("desc").map(str::to_string),
        path: def.path().to_string(),
        offset: def.required_hex("_addr")?,
        size: bytes_for(bits),
        access: access.and_then(|bits| range_access(bits, 0, bits.chars().count() as u32)),
        mask,
        initial_value: parse_por(def)?,
        fields: parse_modes(def, "SFRMode", "SFRFieldDef", access)?,
    })
}

fn parse_dcr(def: &ElementReader<'_>) -> Result<IrFuse, ParseError> {
    let bits = width_bits(def, 8)?;
    Ok(IrFuse {
        name: field_name(def)?,
        caption: def.optional("desc").map(str::to_string),
        path: def.path().to_string(),
        address: def.required_hex("_addr")?,
        size: bytes_for(bits),
        default_value: def.optional_int("default")?,
        mask: def.optional_int("impl")?,
        fields: parse_modes(def, "DCRMode", "DCRFieldDef", None)?,
    })
}

/// Bits whose access character marks them as implemented.
fn implemented_mask(access: &str) -> u64 {
    access
        .chars()
        .rev()
        .enumerate()
        .filter(|(bit, ch)| *bit < 64 && Access::from_bit_char(*ch).is_some())
        .fold(0, |mask, (bit, _)| mask | (1u64 << bit))
}

/// Combined access over `[offset, offset + width)` of an MSB-first access string.
fn range_access(access: &str, offset: u32, width: u32) -> Option<Access> {
    let chars: Vec<char> = access.chars().rev().collect();
    let mut combined: Option<Access> = None;
    for bit in offset..offset.saturating_add(width) {
        let Some(bit_access) = chars.get(bit as usize).copied().and_then(Access::from_bit_char)
        else {
            continue;
        };
        combined = Some(match combined {
            Some(current) if current != bit_access => Access::READ_WRITE,
            _ => bit_access,
        });
    }
    combined
}

/// Power-on value: `0x` hex, or an MSB-first bit string where unknown bits read as 0.
fn parse_por(def: &ElementReader<'_>) -> Result<Option<u64>, ParseError> {
    let Some(raw) = def.optional("por") else {
        return Ok(None);
    };
    if raw.starts_with("0x") || raw.starts_with("0X") {
        return def.optional_hex("por");
    }
    if raw.len() > 64 || !raw.chars().all(|ch| "01xuq-".contains(ch)) {
        return Err(def.error(Some(raw), "invalid power-on reset value"));
    }
    Ok(Some(raw.chars().fold(0, |value, ch| {
        (value << 1) | u64::from(ch == '1')
    })))
}

/// Lay out the fields of every mode; the first mode is primary and later
/// modes contribute aliases.
fn parse_modes(
    def: &ElementReader<'_>,
    mode_name: &str,
    field_element: &str,
    access: Option<&str>,
) -> Result<Vec<IrBitfield>, ParseError> {
    let modes = def.element().descendants_named(mode_name);
    let mut fields: Vec<IrBitfield> = Vec::new();

    for (index, mode) in modes.into_iter().enumerate() {
        let mode = def.child(mode);
        let laid_out = lay_out_mode(&mode, field_element, access)?;
        if index == 0 {
            fields.extend(laid_out.into_iter().map(|(field, _)| field));
            continue;
        }
        for (alias, parent) in laid_out {
            attach_alias(&mode, &mut fields, alias, parent)?;
        }
    }
    Ok(fields)
}

type LaidOutField = (IrBitfield, Option<String>);

fn lay_out_mode(
    mode: &ElementReader<'_>,
    field_element: &str,
    access: Option<&str>,
) -> Result<Vec<LaidOutField>, ParseError> {
    let mut position: u64 = 0;
    let mut laid_out = Vec::new();
    for child in mode.element().children() {
        let local = child.local_name();
        let child = mode.child(child);
        if local == "AdjustPoint" {
            position = position
                .checked_add(child.optional_int("offset")?.unwrap_or(0))
                .ok_or_else(|| {
                    child.error(child.optional("offset"), "field position out of range")
                })?;
        } else if local == field_element {
            let width = child.optional_int("nzwidth")?.unwrap_or(1);
            let bit_offset = u32::try_from(position)
                .map_err(|_| child.error(None, "field position out of range"))?;
            let bit_width = u32::try_from(width)
                .map_err(|_| child.error(child.optional("nzwidth"), "field width out of range"))?;
            let field = IrBitfield {
                name: field_name(&child)?,
                caption: child.optional("desc").map(str::to_string),
                path: child.path().to_string(),
                bit_offset,
                bit_width,
                access: access.and_then(|bits| range_access(bits, bit_offset, bit_width)),
                values: parse_semantics(&child)?,
                subfields: Vec::new(),
            };
            laid_out.push((field, child.optional("parentidref").map(str::to_string)));
            position = position.checked_add(width).ok_or_else(|| {
                child.error(child.optional("nzwidth"), "field position out of range")
            })?;
        }
    }
    Ok(laid_out)
}

fn contains(outer: &IrBitfield, inner: &IrBitfield) -> bool {
    let outer_end = u64::from(outer.bit_offset) + u64::from(outer.bit_width);
    let inner_end = u64::from(inner.bit_offset) + u64::from(inner.bit_width);
    inner.bit_offset >= outer.bit_offset && inner_end <= outer_end
}

fn overlaps(a: &IrBitfield, b: &IrBitfield) -> bool {
    let a_end = u64::from(a.bit_offset) + u64::from(a.bit_width);
    let b_end = u64::from(b.bit_offset) + u64::from(b.bit_width);
    u64::from(a.bit_offset) < b_end && u64::from(b.bit_offset) < a_end
}

fn attach_alias(
    mode: &ElementReader<'_>,
    fields: &mut Vec<IrBitfield>,
    alias: IrBitfield,
    parent: Option<String>,
) -> Result<(), ParseError> {
    let target = match parent.as_deref() {
        Some(parent_name) => Some(
            fields
                .iter()
                .position(|field| field.name == parent_name)
                .ok_or_else(|| {
                    mode.error(Some(parent_name), "parentidref names an unknown field")
                })?,
        ),
        None => {
            if fields.iter().any(|field| field.name == alias.name) {
                return Ok(());
            }
            fields
                .iter()
                .position(|field| field.bit_width > alias.bit_width && contains(field, &alias))
        }
    };

    match target {
        Some(index) => {
            let host = &mut fields[index];
            if host.subfields.iter().any(|sub| overlaps(sub, &alias)) {
                trace!(alias = %alias.name, parent = %host.name, "alias shadowed by earlier mode");
            } else {
                host.subfields.push(alias);
            }
        }
        None => fields.push(alias),
    }
    Ok(())
}

/// Value enumerations from `*FieldSemantic` children with `(field & MASK) == VALUE`
/// conditions; other condition shapes are skipped.
fn parse_semantics(field: &ElementReader<'_>) -> Result<Vec<IrValue>, ParseError> {
    let mut values = Vec::new();
    for semantic in field.element().children() {
        if !semantic.local_name().ends_with("FieldSemantic") {
            continue;
        }
        let semantic = field.child(semantic);
        let Some(value) = semantic.optional("when").and_then(when_value) else {
            continue;
        };
        values.push(IrValue {
            name: field_name(&semantic)?,
            value,
            caption: semantic.optional("desc").map(str::to_string),
        });
    }
    Ok(values)
}

fn when_value(expr: &str) -> Option<u64> {
    let (lhs, rhs) = expr.split_once("==")?;
    let lhs = lhs.trim().strip_prefix('(')?.strip_suffix(')')?;
    let (_, mask) = lhs.split_once('&')?;
    parse_int(mask).ok()?;
    parse_int(rhs).ok()
}
