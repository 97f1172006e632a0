use atpack_xml::{Access, IrFuse, IrRegister, ParseError};

use crate::bitfield::{normalize_field, Bitfield};

/// Peripheral register with its decoded bitfields.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Register {
    pub name: String,
    pub caption: Option<String>,
    pub offset: u64,
    /// Size in bytes.
    pub size: u64,
    pub access: Access,
    pub mask: Option<u64>,
    pub initial_value: Option<u64>,
    pub bitfields: Vec<Bitfield>,
}

impl Register {
    pub fn bits(&self) -> u32 {
        (self.size * 8) as u32
    }

    pub fn field(&self, name: &str) -> Option<&Bitfield> {
        self.bitfields.iter().find(|field| field.name == name)
    }
}

/// Configuration word or fuse byte; decoded like a register.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Fuse {
    pub name: String,
    pub caption: Option<String>,
    pub address: u64,
    /// Size in bytes.
    pub size: u64,
    pub default_value: Option<u64>,
    pub mask: Option<u64>,
    pub bitfields: Vec<Bitfield>,
}

impl Fuse {
    pub fn field(&self, name: &str) -> Option<&Bitfield> {
        self.bitfields.iter().find(|field| field.name == name)
    }

    /// Each top-level field with the value it takes in `default_value`.
    pub fn default_settings(&self) -> Vec<(&Bitfield, u64)> {
        match self.default_value {
            Some(raw) => self
                .bitfields
                .iter()
                .map(|field| (field, field.extract(raw)))
                .collect(),
            None => Vec::new(),
        }
    }
}

fn container_bits(device: &str, path: &str, size: u64) -> Result<u32, ParseError> {
    if size == 0 || size > 8 {
        return Err(ParseError::new(
            device,
            path,
            Some(&size.to_string()),
            "register size must be between 1 and 8 bytes",
        ));
    }
    Ok((size * 8) as u32)
}

/// Register-level access: the common access of all fields when they agree,
/// `RW` when they disagree, the declared access when no field says anything.
fn narrow_access(declared: Option<Access>, fields: &[Bitfield]) -> Access {
    let mut field_access = fields.iter().filter_map(|field| field.access);
    match field_access.next() {
        Some(first) if field_access.all(|access| access == first) => first,
        Some(_) => Access::READ_WRITE,
        None => declared.unwrap_or(Access::READ_WRITE),
    }
}

pub(crate) fn normalize_register(device: &str, register: IrRegister) -> Result<Register, ParseError> {
    let bits = container_bits(device, &register.path, register.size)?;
    let bitfields = register
        .fields
        .into_iter()
        .map(|field| normalize_field(device, field, bits))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Register {
        access: narrow_access(register.access, &bitfields),
        name: register.name,
        caption: register.caption,
        offset: register.offset,
        size: register.size,
        mask: register.mask,
        initial_value: register.initial_value,
        bitfields,
    })
}

pub(crate) fn normalize_fuse(device: &str, fuse: IrFuse) -> Result<Fuse, ParseError> {
    let bits = container_bits(device, &fuse.path, fuse.size)?;
    let bitfields = fuse
        .fields
        .into_iter()
        .map(|field| normalize_field(device, field, bits))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Fuse {
        name: fuse.name,
        caption: fuse.caption,
        address: fuse.address,
        size: fuse.size,
        default_value: fuse.default_value,
        mask: fuse.mask,
        bitfields,
    })
}
