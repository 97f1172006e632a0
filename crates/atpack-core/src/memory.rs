//! Memory model assembly: flat IR segments in, a de-duplicated tree out.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use atpack_xml::{Family, IrAddressSpace, IrSegment, ParseError, SegmentKind};
use thiserror::Error;
use tracing::debug;

use crate::ModelError;

/// Name of the child space holding unbanked segments of a banked space.
pub const COMMON_BANK: &str = "Common";

/// Maps segment kinds onto top-level address space names.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassificationTable {
    spaces: BTreeMap<SegmentKind, String>,
    honor_declared_space: bool,
}

impl ClassificationTable {
    /// Empty table: nothing is classified.
    pub fn new() -> Self {
        Self::default()
    }

    /// ATDF: segments stay in the address space they are declared in; the
    /// kind mapping only serves segments without a declared space.
    pub fn dialect_a() -> Self {
        Self::new()
            .honor_declared_space(true)
            .with_kind(SegmentKind::Program, "prog")
            .with_kind(SegmentKind::Sfr, "data")
            .with_kind(SegmentKind::Gpr, "data")
            .with_kind(SegmentKind::Eeprom, "eeprom")
            .with_kind(SegmentKind::Config, "fuses")
            .with_kind(SegmentKind::DeviceId, "signatures")
            .with_kind(SegmentKind::UserId, "user_signatures")
    }

    /// EDC: program-side kinds go to `ProgramSpace`, register-file kinds to
    /// `DataSpace`. `other` stays unmapped.
    pub fn dialect_b() -> Self {
        let mut table = Self::new();
        for kind in [
            SegmentKind::Program,
            SegmentKind::UserId,
            SegmentKind::Test,
            SegmentKind::Debug,
            SegmentKind::DeviceId,
            SegmentKind::Config,
            SegmentKind::Eeprom,
        ] {
            table = table.with_kind(kind, "ProgramSpace");
        }
        table
            .with_kind(SegmentKind::Sfr, "DataSpace")
            .with_kind(SegmentKind::Gpr, "DataSpace")
    }

    pub fn for_family(family: Family) -> Self {
        match family {
            Family::DialectA => Self::dialect_a(),
            Family::DialectB => Self::dialect_b(),
        }
    }

    /// Route `kind` to the top-level space `space`.
    pub fn with_kind(mut self, kind: SegmentKind, space: impl Into<String>) -> Self {
        self.spaces.insert(kind, space.into());
        self
    }

    /// Remove the mapping for `kind`; such segments become unclassified.
    pub fn without_kind(mut self, kind: SegmentKind) -> Self {
        self.spaces.remove(&kind);
        self
    }

    /// Prefer the address space a segment declares over the kind mapping.
    pub fn honor_declared_space(mut self, honor: bool) -> Self {
        self.honor_declared_space = honor;
        self
    }

    pub fn space_for_kind(&self, kind: SegmentKind) -> Option<&str> {
        self.spaces.get(&kind).map(String::as_str)
    }

    /// Top-level space a segment belongs to, or `None` when unclassified.
    pub fn space_for<'a>(&'a self, segment: &'a IrSegment) -> Option<&'a str> {
        match segment.space.as_deref() {
            Some(declared) if self.honor_declared_space => Some(declared),
            _ => self.space_for_kind(segment.kind),
        }
    }
}

/// Leaf memory region.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MemorySegment {
    pub name: String,
    pub start: u64,
    pub size: u64,
    /// Inclusive end address.
    pub end: u64,
    pub kind: SegmentKind,
    pub page_size: Option<u64>,
    pub bank: Option<String>,
    pub is_shadow: bool,
    /// Name of the mirrored segment; `None` for an orphaned shadow.
    pub shadow_of: Option<String>,
}

/// Children of a memory space: either nested spaces or segments, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum MemoryNode {
    Spaces(Vec<MemorySpace>),
    Segments(Vec<MemorySegment>),
}

/// Named container in the memory tree. Virtual containers have no range.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MemorySpace {
    pub name: String,
    pub start: Option<u64>,
    pub end: Option<u64>,
    pub children: MemoryNode,
}

impl MemorySpace {
    /// Nested spaces directly below this one.
    pub fn spaces(&self) -> &[MemorySpace] {
        match &self.children {
            MemoryNode::Spaces(spaces) => spaces,
            MemoryNode::Segments(_) => &[],
        }
    }

    /// Direct child space by name.
    pub fn space(&self, name: &str) -> Option<&MemorySpace> {
        self.spaces().iter().find(|space| space.name == name)
    }

    /// Leaf segments below this space, depth first in tree order.
    pub fn segments(&self) -> Vec<&MemorySegment> {
        let mut leaves = Vec::new();
        self.collect_segments(&mut leaves);
        leaves
    }

    fn collect_segments<'a>(&'a self, leaves: &mut Vec<&'a MemorySegment>) {
        match &self.children {
            MemoryNode::Segments(segments) => leaves.extend(segments.iter()),
            MemoryNode::Spaces(spaces) => {
                for space in spaces {
                    space.collect_segments(leaves);
                }
            }
        }
    }
}

/// Non-fatal findings of an assembly run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Warning {
    /// A shadow marker references an identifier no segment of the device declares.
    DanglingShadow { segment: String, reference: String },
    /// The classification table has no space for this segment; it is left out of the tree.
    Unclassified { segment: String, kind: SegmentKind },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::DanglingShadow { segment, reference } => write!(
                f,
                "segment {segment} shadows unknown segment id {reference}; kept as orphaned shadow"
            ),
            Warning::Unclassified { segment, kind } => write!(
                f,
                "segment {segment} of kind {kind} has no address space; omitted"
            ),
        }
    }
}

/// Two non-shadow segments of one space share addresses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "device {device}: segment {segment_a} [{}] overlaps segment {segment_b} [{}] in space {space}",
    hex_range(.range_a),
    hex_range(.range_b)
)]
pub struct AddressOverlapError {
    pub device: String,
    pub space: String,
    pub segment_a: String,
    pub segment_b: String,
    /// Inclusive address range of `segment_a`.
    pub range_a: (u64, u64),
    /// Inclusive address range of `segment_b`.
    pub range_b: (u64, u64),
}

fn hex_range(range: &(u64, u64)) -> String {
    format!("{:#06x}..{:#06x}", range.0, range.1)
}

/// Sort key for bank labels: numeric banks in numeric order, then the rest.
pub(crate) fn bank_order(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Unbanked segments sort after every bank.
pub(crate) fn optional_bank_order(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => bank_order(a, b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Build the memory tree of one device.
///
/// Deterministic: identical input always yields an identical tree and
/// identical warnings.
pub fn assemble(
    device: &str,
    segments: &[IrSegment],
    declared: &[IrAddressSpace],
    table: &ClassificationTable,
) -> Result<(MemorySpace, Vec<Warning>), ModelError> {
    let mut warnings = Vec::new();

    let mut ids: HashMap<&str, &str> = HashMap::with_capacity(segments.len());
    for segment in segments {
        ids.entry(segment.id.as_str()).or_insert(segment.name.as_str());
    }

    let mut groups: Vec<(String, Vec<MemorySegment>)> = declared
        .iter()
        .map(|space| (space.name.clone(), Vec::new()))
        .collect();

    for segment in segments {
        let Some(space) = table.space_for(segment) else {
            warnings.push(Warning::Unclassified {
                segment: segment.name.clone(),
                kind: segment.kind,
            });
            continue;
        };
        let end = segment
            .start
            .checked_add(segment.size.saturating_sub(1))
            .filter(|_| segment.size > 0)
            .ok_or_else(|| {
                ParseError::new(
                    device,
                    segment.path.clone(),
                    None,
                    format!(
                        "segment {} at {:#x} with size {:#x} has no valid address range",
                        segment.name, segment.start, segment.size
                    ),
                )
            })?;

        let shadow_of = match segment.shadow_of.as_deref() {
            Some(reference) => match ids.get(reference) {
                Some(target) => Some((*target).to_string()),
                None => {
                    warnings.push(Warning::DanglingShadow {
                        segment: segment.name.clone(),
                        reference: reference.to_string(),
                    });
                    None
                }
            },
            None => None,
        };

        let leaf = MemorySegment {
            name: segment.name.clone(),
            start: segment.start,
            size: segment.size,
            end,
            kind: segment.kind,
            page_size: segment.page_size,
            bank: segment.bank.clone(),
            is_shadow: segment.shadow_of.is_some(),
            shadow_of,
        };
        match groups.iter_mut().find(|(name, _)| *name == space) {
            Some((_, leaves)) => leaves.push(leaf),
            None => groups.push((space.to_string(), vec![leaf])),
        }
    }

    let mut spaces = Vec::with_capacity(groups.len());
    for (name, mut leaves) in groups {
        leaves.sort_by_key(|leaf| leaf.start);
        check_overlaps(device, &name, &leaves)?;
        let range = declared
            .iter()
            .find(|space| space.name == name)
            .filter(|space| space.size > 0)
            .map(|space| (space.start, space.start.saturating_add(space.size - 1)));
        if let Some((start, end)) = range {
            check_enclosure(device, &name, (start, end), &leaves, segments)?;
        }
        spaces.push(MemorySpace {
            children: split_banks(leaves),
            start: range.map(|(start, _)| start),
            end: range.map(|(_, end)| end),
            name,
        });
    }

    debug!(
        device,
        spaces = spaces.len(),
        segments = segments.len(),
        warnings = warnings.len(),
        "assembled memory map"
    );
    Ok((
        MemorySpace {
            name: device.to_string(),
            start: None,
            end: None,
            children: MemoryNode::Spaces(spaces),
        },
        warnings,
    ))
}

/// Sweep over segments sorted by start; shadows never take part.
fn check_overlaps(
    device: &str,
    space: &str,
    leaves: &[MemorySegment],
) -> Result<(), AddressOverlapError> {
    let mut reach: Option<&MemorySegment> = None;
    for leaf in leaves.iter().filter(|leaf| !leaf.is_shadow) {
        if let Some(previous) = reach {
            if leaf.start <= previous.end {
                return Err(AddressOverlapError {
                    device: device.to_string(),
                    space: space.to_string(),
                    segment_a: previous.name.clone(),
                    segment_b: leaf.name.clone(),
                    range_a: (previous.start, previous.end),
                    range_b: (leaf.start, leaf.end),
                });
            }
        }
        if reach.map_or(true, |previous| leaf.end > previous.end) {
            reach = Some(leaf);
        }
    }
    Ok(())
}

fn check_enclosure(
    device: &str,
    space: &str,
    (start, end): (u64, u64),
    leaves: &[MemorySegment],
    segments: &[IrSegment],
) -> Result<(), ParseError> {
    let Some(outside) = leaves
        .iter()
        .find(|leaf| leaf.start < start || leaf.end > end)
    else {
        return Ok(());
    };
    let path = segments
        .iter()
        .find(|segment| segment.name == outside.name)
        .map(|segment| segment.path.clone())
        .unwrap_or_else(|| space.to_string());
    Err(ParseError::new(
        device,
        path,
        None,
        format!(
            "segment {} [{:#x}..{:#x}] lies outside address space {space} [{start:#x}..{end:#x}]",
            outside.name, outside.start, outside.end
        ),
    ))
}

/// One virtual child space per bank when any segment is banked.
fn split_banks(leaves: Vec<MemorySegment>) -> MemoryNode {
    if leaves.iter().all(|leaf| leaf.bank.is_none()) {
        return MemoryNode::Segments(leaves);
    }
    let mut banks: Vec<(Option<String>, Vec<MemorySegment>)> = Vec::new();
    for leaf in leaves {
        match banks.iter_mut().find(|(bank, _)| *bank == leaf.bank) {
            Some((_, members)) => members.push(leaf),
            None => banks.push((leaf.bank.clone(), vec![leaf])),
        }
    }
    banks.sort_by(|(a, _), (b, _)| optional_bank_order(a.as_deref(), b.as_deref()));
    MemoryNode::Spaces(
        banks
            .into_iter()
            .map(|(bank, members)| MemorySpace {
                name: bank.map_or_else(|| COMMON_BANK.to_string(), |bank| format!("Bank {bank}")),
                start: None,
                end: None,
                children: MemoryNode::Segments(members),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(id: &str, start: u64, size: u64, kind: SegmentKind) -> IrSegment {
        IrSegment {
            id: id.to_string(),
            name: id.to_string(),
            path: format!("PIC/Sector[{id}]"),
            start,
            size,
            kind,
            page_size: None,
            bank: None,
            space: None,
            shadow_of: None,
        }
    }

    fn banked(id: &str, start: u64, size: u64, bank: &str, shadow_of: Option<&str>) -> IrSegment {
        IrSegment {
            bank: Some(bank.to_string()),
            shadow_of: shadow_of.map(str::to_string),
            ..segment(id, start, size, SegmentKind::Gpr)
        }
    }

    #[test]
    fn overlapping_segments_fail_with_both_names() {
        let segments = vec![
            segment("A", 0x0000, 0x20, SegmentKind::Gpr),
            segment("B", 0x0010, 0x20, SegmentKind::Gpr),
        ];
        let err = assemble("PIC16F84A", &segments, &[], &ClassificationTable::dialect_b())
            .unwrap_err();
        let ModelError::Overlap(err) = err else {
            panic!("expected overlap, got {err:?}");
        };
        assert_eq!(err.segment_a, "A");
        assert_eq!(err.segment_b, "B");
        assert_eq!(err.space, "DataSpace");
        assert_eq!(err.range_a, (0x0000, 0x001F));
        assert_eq!(err.range_b, (0x0010, 0x002F));
        let message = err.to_string();
        assert!(message.contains("A") && message.contains("B"));
    }

    #[test]
    fn overlap_hidden_behind_long_segment() {
        let segments = vec![
            segment("LONG", 0x00, 0x100, SegmentKind::Sfr),
            segment("SHORT", 0x10, 0x10, SegmentKind::Sfr),
            segment("LATE", 0x80, 0x10, SegmentKind::Sfr),
        ];
        let err = assemble("PIC16F84A", &segments, &[], &ClassificationTable::dialect_b())
            .unwrap_err();
        assert!(matches!(err, ModelError::Overlap(ref e) if e.segment_a == "LONG" && e.segment_b == "SHORT"));
    }

    #[test]
    fn different_spaces_may_share_addresses() {
        let segments = vec![
            segment("code", 0x0000, 0x800, SegmentKind::Program),
            segment("gpr0", 0x0020, 0x50, SegmentKind::Gpr),
        ];
        let (root, warnings) =
            assemble("PIC16F84A", &segments, &[], &ClassificationTable::dialect_b()).unwrap();
        assert!(warnings.is_empty());
        let names: Vec<_> = root.spaces().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["ProgramSpace", "DataSpace"]);
        assert_eq!(root.name, "PIC16F84A");
        assert_eq!((root.start, root.end), (None, None));
    }

    #[test]
    fn shadow_resolves_and_does_not_overlap() {
        let segments = vec![
            banked("gpr0", 0x20, 80, "0", None),
            banked("mirror", 0x70, 16, "0", Some("gpr0")),
            banked("gpr0_late", 0x70, 16, "0", Some("later")),
            banked("later", 0x100, 16, "2", None),
        ];
        let (root, warnings) =
            assemble("PIC16F628A", &segments, &[], &ClassificationTable::dialect_b()).unwrap();
        assert!(warnings.is_empty());
        let leaves = root.segments();
        let mirror = leaves.iter().find(|s| s.name == "mirror").unwrap();
        assert!(mirror.is_shadow);
        assert_eq!(mirror.shadow_of.as_deref(), Some("gpr0"));
        let forward = leaves.iter().find(|s| s.name == "gpr0_late").unwrap();
        assert_eq!(forward.shadow_of.as_deref(), Some("later"));
    }

    #[test]
    fn dangling_shadow_is_a_warning() {
        let segments = vec![
            banked("gpr0", 0x20, 80, "0", None),
            banked("orphan", 0xF0, 16, "1", Some("missing")),
        ];
        let (root, warnings) =
            assemble("PIC16F628A", &segments, &[], &ClassificationTable::dialect_b()).unwrap();
        assert_eq!(
            warnings,
            vec![Warning::DanglingShadow {
                segment: "orphan".into(),
                reference: "missing".into()
            }]
        );
        let orphan = root
            .segments()
            .into_iter()
            .find(|s| s.name == "orphan")
            .cloned()
            .unwrap();
        assert!(orphan.is_shadow);
        assert_eq!(orphan.shadow_of, None);
    }

    #[test]
    fn unclassified_segments_are_reported() {
        let segments = vec![
            segment("code", 0, 0x100, SegmentKind::Program),
            segment("linear", 0x2000, 0x50, SegmentKind::Other),
        ];
        let (root, warnings) =
            assemble("PIC16F1829", &segments, &[], &ClassificationTable::dialect_b()).unwrap();
        assert_eq!(root.segments().len(), 1);
        assert_eq!(
            warnings,
            vec![Warning::Unclassified {
                segment: "linear".into(),
                kind: SegmentKind::Other
            }]
        );

        let table = ClassificationTable::dialect_b().with_kind(SegmentKind::Other, "DataSpace");
        let (root, warnings) = assemble("PIC16F1829", &segments, &[], &table).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(root.space("DataSpace").unwrap().segments().len(), 1);
    }

    #[test]
    fn banks_become_child_spaces() {
        let segments = vec![
            banked("gpr10", 0x520, 16, "10", None),
            segment("sfr", 0x00, 0x20, SegmentKind::Sfr),
            banked("gpr2", 0x120, 16, "2", None),
            banked("gpr0", 0x20, 16, "0", None),
        ];
        let (root, _) =
            assemble("PIC16F1829", &segments, &[], &ClassificationTable::dialect_b()).unwrap();
        let data = root.space("DataSpace").unwrap();
        let names: Vec<_> = data.spaces().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Bank 0", "Bank 2", "Bank 10", "Common"]);
    }

    #[test]
    fn segments_sorted_by_start_with_stable_ties() {
        let mut shadow = segment("tie_b", 0x10, 0x10, SegmentKind::Gpr);
        shadow.shadow_of = Some("tie_a".into());
        let segments = vec![
            segment("late", 0x40, 0x10, SegmentKind::Gpr),
            segment("tie_a", 0x10, 0x10, SegmentKind::Gpr),
            shadow,
            segment("early", 0x00, 0x10, SegmentKind::Gpr),
        ];
        let (root, _) =
            assemble("PIC16F84A", &segments, &[], &ClassificationTable::dialect_b()).unwrap();
        let names: Vec<_> = root.segments().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["early", "tie_a", "tie_b", "late"]);
    }

    #[test]
    fn declared_spaces_enclose_their_segments() {
        let declared = vec![IrAddressSpace {
            id: "data".into(),
            name: "data".into(),
            start: 0,
            size: 0x60,
        }];
        let mut inside = segment("IRAM", 0x20, 0x40, SegmentKind::Gpr);
        inside.space = Some("data".into());
        let table = ClassificationTable::dialect_a();
        let (root, _) = assemble("ATtiny13A", &[inside.clone()], &declared, &table).unwrap();
        let data = root.space("data").unwrap();
        assert_eq!((data.start, data.end), (Some(0), Some(0x5F)));

        let mut outside = inside;
        outside.size = 0x41;
        let err = assemble("ATtiny13A", &[outside], &declared, &table).unwrap_err();
        assert!(matches!(err, ModelError::Parse(ref e) if e.path == "PIC/Sector[IRAM]"));
    }

    #[test]
    fn declared_empty_space_is_kept() {
        let declared = vec![IrAddressSpace {
            id: "eeprom".into(),
            name: "eeprom".into(),
            start: 0,
            size: 0x40,
        }];
        let (root, _) =
            assemble("ATtiny13A", &[], &declared, &ClassificationTable::dialect_a()).unwrap();
        assert_eq!(root.spaces().len(), 1);
        assert!(root.spaces()[0].segments().is_empty());
    }

    #[test]
    fn property_non_shadow_segments_are_disjoint() {
        let mut rng = fastrand::Rng::with_seed(0x5eed);
        for _ in 0..200 {
            let count = rng.usize(1..24);
            let segments: Vec<IrSegment> = (0..count)
                .map(|i| {
                    let mut seg = segment(
                        &format!("s{i}"),
                        rng.u64(0..0x400),
                        rng.u64(1..0x40),
                        if rng.bool() { SegmentKind::Gpr } else { SegmentKind::Program },
                    );
                    if i > 0 && rng.u8(0..4) == 0 {
                        seg.shadow_of = Some(format!("s{}", rng.usize(0..i)));
                    }
                    seg
                })
                .collect();
            let table = ClassificationTable::dialect_b();
            match assemble("FUZZ", &segments, &[], &table) {
                Ok((root, warnings)) => {
                    assert!(warnings.is_empty());
                    for space in root.spaces() {
                        let leaves: Vec<_> = space
                            .segments()
                            .into_iter()
                            .filter(|s| !s.is_shadow)
                            .collect();
                        for (i, a) in leaves.iter().enumerate() {
                            for b in &leaves[i + 1..] {
                                assert!(a.end < b.start || b.end < a.start);
                            }
                        }
                    }
                    let again = assemble("FUZZ", &segments, &[], &table).unwrap();
                    assert_eq!(again, (root, warnings));
                }
                Err(ModelError::Overlap(err)) => {
                    let (a, b) = (err.range_a, err.range_b);
                    assert!(a.0 <= b.1 && b.0 <= a.1);
                }
                Err(other) => panic!("unexpected error {other}"),
            }
        }
    }
}
