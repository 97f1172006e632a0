//! Dialect-neutral intermediate representation emitted by both adapters.
//!
//! The IR is flat: segments are a plain list with classification hints, and
//! registers carry raw bit positions. Assembly into a tree and validation of
//! bit ranges happen downstream.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

/// Which schema a device was declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Family {
    /// ATDF (`avr-tools-device-file`) documents.
    DialectA,
    /// EDC (`edc:PIC`) documents.
    DialectB,
}

impl Family {
    pub const fn as_str(self) -> &'static str {
        match self {
            Family::DialectA => "DialectA",
            Family::DialectB => "DialectB",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification hint carried by every segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SegmentKind {
    Program,
    Sfr,
    Eeprom,
    Config,
    UserId,
    Test,
    Debug,
    DeviceId,
    Gpr,
    Other,
}

impl SegmentKind {
    pub const ALL: [SegmentKind; 10] = [
        SegmentKind::Program,
        SegmentKind::Sfr,
        SegmentKind::Eeprom,
        SegmentKind::Config,
        SegmentKind::UserId,
        SegmentKind::Test,
        SegmentKind::Debug,
        SegmentKind::DeviceId,
        SegmentKind::Gpr,
        SegmentKind::Other,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            SegmentKind::Program => "program",
            SegmentKind::Sfr => "sfr",
            SegmentKind::Eeprom => "eeprom",
            SegmentKind::Config => "config",
            SegmentKind::UserId => "userid",
            SegmentKind::Test => "test",
            SegmentKind::Debug => "debug",
            SegmentKind::DeviceId => "deviceid",
            SegmentKind::Gpr => "gpr",
            SegmentKind::Other => "other",
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SegmentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        SegmentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lower)
            .ok_or_else(|| format!("unknown segment kind `{s}`"))
    }
}

bitflags! {
    /// Read/write capability of a register, field or bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl Access {
    /// Parse an `R`, `W` or `RW` style access string (case-insensitive).
    pub fn parse(raw: &str) -> Option<Access> {
        let mut access = Access::empty();
        for ch in raw.trim().chars() {
            match ch.to_ascii_uppercase() {
                'R' => access |= Access::READ,
                'W' => access |= Access::WRITE,
                _ => return None,
            }
        }
        (!access.is_empty()).then_some(access)
    }

    /// Decode one character of a per-bit access string; `None` for an
    /// unimplemented bit.
    pub fn from_bit_char(ch: char) -> Option<Access> {
        match ch {
            'n' | 'c' | 's' | 'x' | 'u' => Some(Access::READ_WRITE),
            'r' => Some(Access::READ),
            'w' => Some(Access::WRITE),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        if self == Access::READ {
            "R"
        } else if self == Access::WRITE {
            "W"
        } else {
            "RW"
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Access {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Declared top-level address space (Dialect A only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrAddressSpace {
    pub id: String,
    pub name: String,
    pub start: u64,
    pub size: u64,
}

/// One flat memory declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrSegment {
    /// Identifier other segments may reference as their shadow target.
    pub id: String,
    pub name: String,
    pub path: String,
    pub start: u64,
    pub size: u64,
    pub kind: SegmentKind,
    pub page_size: Option<u64>,
    pub bank: Option<String>,
    /// Declared address space name, when the dialect carries one.
    pub space: Option<String>,
    /// Unresolved identifier of the segment this one mirrors.
    pub shadow_of: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrValue {
    pub name: String,
    pub value: u64,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrBitfield {
    pub name: String,
    pub caption: Option<String>,
    pub path: String,
    pub bit_offset: u32,
    pub bit_width: u32,
    pub access: Option<Access>,
    pub values: Vec<IrValue>,
    pub subfields: Vec<IrBitfield>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrRegister {
    pub name: String,
    pub caption: Option<String>,
    pub path: String,
    /// Absolute offset once instance placement has been applied.
    pub offset: u64,
    /// Size in bytes.
    pub size: u64,
    pub access: Option<Access>,
    pub mask: Option<u64>,
    pub initial_value: Option<u64>,
    pub fields: Vec<IrBitfield>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrRegisterGroup {
    pub name: String,
    pub caption: Option<String>,
    pub registers: Vec<IrRegister>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrModule {
    pub name: String,
    pub caption: Option<String>,
    pub groups: Vec<IrRegisterGroup>,
}

/// Configuration word or fuse byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrFuse {
    pub name: String,
    pub caption: Option<String>,
    pub path: String,
    pub address: u64,
    /// Size in bytes.
    pub size: u64,
    pub default_value: Option<u64>,
    pub mask: Option<u64>,
    pub fields: Vec<IrBitfield>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrInterrupt {
    pub index: u64,
    pub name: String,
    pub caption: Option<String>,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrSignature {
    pub name: String,
    pub address: u64,
    pub value: u64,
    pub mask: Option<u64>,
}

/// Everything one adapter call produces for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrDevice {
    pub name: String,
    pub family: Family,
    pub architecture: String,
    pub series: String,
    pub spaces: Vec<IrAddressSpace>,
    pub segments: Vec<IrSegment>,
    pub modules: Vec<IrModule>,
    pub fuses: Vec<IrFuse>,
    pub interrupts: Vec<IrInterrupt>,
    pub signatures: Vec<IrSignature>,
}

impl IrDevice {
    pub fn new(name: impl Into<String>, family: Family) -> Self {
        Self {
            name: name.into(),
            family,
            architecture: String::new(),
            series: String::new(),
            spaces: Vec::new(),
            segments: Vec::new(),
            modules: Vec::new(),
            fuses: Vec::new(),
            interrupts: Vec::new(),
            signatures: Vec::new(),
        }
    }
}
