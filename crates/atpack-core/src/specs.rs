//! Aggregated capacity figures, recomputed from the memory tree on demand.

use atpack_xml::{Family, SegmentKind};

use crate::memory::{optional_bank_order, MemorySegment, MemorySpace};

/// One general purpose RAM sector counted into `gpr_total_size`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GprSector {
    pub name: String,
    pub start: u64,
    /// Inclusive end address.
    pub end: u64,
    pub size: u64,
    pub bank: Option<String>,
}

/// Derived device capacities. Only non-shadow segments are counted.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceSpecs {
    pub device_name: String,
    pub family: Family,
    pub architecture: String,
    pub series: String,
    /// Program memory size in address units of the program space.
    pub maximum_size: u64,
    pub maximum_ram_size: u64,
    pub eeprom_addr: Option<u64>,
    pub eeprom_size: u64,
    pub config_addr: Option<u64>,
    pub config_size: u64,
    pub gpr_total_size: u64,
    /// Grouped by bank (numeric banks ascending, unbanked last), then address.
    pub gpr_sectors: Vec<GprSector>,
}

impl DeviceSpecs {
    pub(crate) fn compute(
        device_name: &str,
        family: Family,
        architecture: &str,
        series: &str,
        memory: &MemorySpace,
    ) -> Self {
        let leaves: Vec<&MemorySegment> = memory
            .segments()
            .into_iter()
            .filter(|segment| !segment.is_shadow)
            .collect();
        let total = |kind: SegmentKind| -> u64 {
            leaves
                .iter()
                .filter(|segment| segment.kind == kind)
                .fold(0u64, |sum, segment| sum.saturating_add(segment.size))
        };
        let lowest = |kind: SegmentKind| -> Option<u64> {
            leaves
                .iter()
                .filter(|segment| segment.kind == kind)
                .map(|segment| segment.start)
                .min()
        };

        let mut gpr_sectors: Vec<GprSector> = leaves
            .iter()
            .filter(|segment| segment.kind == SegmentKind::Gpr)
            .map(|segment| GprSector {
                name: segment.name.clone(),
                start: segment.start,
                end: segment.end,
                size: segment.size,
                bank: segment.bank.clone(),
            })
            .collect();
        gpr_sectors.sort_by(|a, b| {
            optional_bank_order(a.bank.as_deref(), b.bank.as_deref())
                .then(a.start.cmp(&b.start))
        });
        let gpr_total_size = gpr_sectors
            .iter()
            .fold(0u64, |sum, sector| sum.saturating_add(sector.size));

        Self {
            device_name: device_name.to_string(),
            family,
            architecture: architecture.to_string(),
            series: series.to_string(),
            maximum_size: total(SegmentKind::Program),
            maximum_ram_size: gpr_total_size,
            eeprom_addr: lowest(SegmentKind::Eeprom),
            eeprom_size: total(SegmentKind::Eeprom),
            config_addr: lowest(SegmentKind::Config),
            config_size: total(SegmentKind::Config),
            gpr_total_size,
            gpr_sectors,
        }
    }

    /// GPR size per bank, in bank order.
    pub fn bank_totals(&self) -> Vec<(Option<&str>, u64)> {
        let mut totals: Vec<(Option<&str>, u64)> = Vec::new();
        for sector in &self.gpr_sectors {
            let bank = sector.bank.as_deref();
            match totals.iter_mut().find(|(existing, _)| *existing == bank) {
                Some((_, size)) => *size = size.saturating_add(sector.size),
                None => totals.push((bank, sector.size)),
            }
        }
        totals
    }

    /// GPR size of one bank; `None` selects the unbanked sectors.
    pub fn bank_size(&self, bank: Option<&str>) -> u64 {
        self.gpr_sectors
            .iter()
            .filter(|sector| sector.bank.as_deref() == bank)
            .fold(0, |sum, sector| sum.saturating_add(sector.size))
    }
}
