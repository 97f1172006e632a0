use atpack_xml::{Access, IrBitfield, IrValue, ParseError};
use thiserror::Error;
use tracing::debug;

/// Errors produced by the bitfield value helpers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BitfieldError {
    /// Provided value does not fit into the bitfield.
    #[error("value {value:#x} does not fit {bit_width} bits of field {name}")]
    ValueTooWide {
        name: String,
        bit_width: u32,
        value: u64,
    },
}

/// Named value of a bitfield.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EnumValue {
    pub name: String,
    pub value: u64,
    pub description: Option<String>,
}

impl From<IrValue> for EnumValue {
    fn from(value: IrValue) -> Self {
        Self {
            name: value.name,
            value: value.value,
            description: value.caption,
        }
    }
}

/// Contiguous run of bits inside a register or configuration word.
///
/// `mask` always equals `((1 << bit_width) - 1) << bit_offset`. Sub-fields are
/// pairwise disjoint and lie inside the parent's mask.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Bitfield {
    pub name: String,
    pub description: Option<String>,
    pub bit_offset: u32,
    pub bit_width: u32,
    pub mask: u64,
    pub access: Option<Access>,
    pub values: Vec<EnumValue>,
    pub subfields: Vec<Bitfield>,
}

/// Mask covering `bit_width` bits starting at `bit_offset`.
pub fn mask_for(bit_offset: u32, bit_width: u32) -> u64 {
    let low = if bit_width >= 64 {
        u64::MAX
    } else {
        (1u64 << bit_width) - 1
    };
    low.checked_shl(bit_offset).unwrap_or(0)
}

impl Bitfield {
    /// Field value held by a raw register value.
    pub fn extract(&self, raw: u64) -> u64 {
        let value = (raw & self.mask) >> self.bit_offset;
        debug!(field = %self.name, raw, value, "extract bitfield");
        value
    }

    /// Replace this field's bits within `raw`.
    pub fn insert(&self, raw: u64, value: u64) -> Result<u64, BitfieldError> {
        if value > self.mask >> self.bit_offset {
            return Err(BitfieldError::ValueTooWide {
                name: self.name.clone(),
                bit_width: self.bit_width,
                value,
            });
        }
        let updated = (raw & !self.mask) | (value << self.bit_offset);
        debug!(field = %self.name, raw, value, updated, "insert bitfield");
        Ok(updated)
    }

    /// Enumerated meaning of a field value, when one is declared.
    pub fn value_named(&self, value: u64) -> Option<&EnumValue> {
        self.values.iter().find(|candidate| candidate.value == value)
    }

    /// Inclusive range of bit positions covered by this field.
    pub fn bit_range(&self) -> (u32, u32) {
        (self.bit_offset, self.bit_offset + self.bit_width - 1)
    }
}

/// Validate and convert one IR field for a container that is `container_bits` wide.
pub(crate) fn normalize_field(
    device: &str,
    field: IrBitfield,
    container_bits: u32,
) -> Result<Bitfield, ParseError> {
    let error =
        |reason: String| ParseError::new(device, field.path.clone(), None, reason);
    if field.bit_width == 0 {
        return Err(error(format!("bitfield {} has zero width", field.name)));
    }
    let end = u64::from(field.bit_offset) + u64::from(field.bit_width);
    if end > u64::from(container_bits) {
        return Err(error(format!(
            "bitfield {} covers bits {}..{} but the container is {} bits wide",
            field.name,
            field.bit_offset,
            end - 1,
            container_bits
        )));
    }

    let mask = mask_for(field.bit_offset, field.bit_width);
    let mut subfields: Vec<Bitfield> = Vec::with_capacity(field.subfields.len());
    for sub in field.subfields {
        let sub_path = sub.path.clone();
        let sub = normalize_field(device, sub, container_bits)?;
        if sub.mask & !mask != 0 {
            return Err(ParseError::new(
                device,
                sub_path,
                None,
                format!(
                    "sub-field {} (mask {:#x}) is not contained in {} (mask {mask:#x})",
                    sub.name, sub.mask, field.name
                ),
            ));
        }
        if let Some(other) = subfields.iter().find(|other| other.mask & sub.mask != 0) {
            return Err(ParseError::new(
                device,
                sub_path,
                None,
                format!(
                    "sub-field {} (mask {:#x}) overlaps sibling {} (mask {:#x})",
                    sub.name, sub.mask, other.name, other.mask
                ),
            ));
        }
        subfields.push(sub);
    }

    Ok(Bitfield {
        name: field.name,
        description: field.caption,
        bit_offset: field.bit_offset,
        bit_width: field.bit_width,
        mask,
        access: field.access,
        values: field.values.into_iter().map(EnumValue::from).collect(),
        subfields,
    })
}
