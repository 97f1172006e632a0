use std::path::PathBuf;

use anyhow::Result;
use atpack::model::DeviceSpecs;
use tracing::info;

use crate::common::{self, KindOverride};

pub fn run(
    packs: &[PathBuf],
    overrides: &[KindOverride],
    device: &str,
    top: usize,
    json: bool,
) -> Result<()> {
    let pack = common::open_pack(packs, overrides)?;
    let device = common::select_device(&pack, device, top)?;
    let specs = device.specs();
    info!(device = device.name(), "computed device specs");

    if json {
        return common::print_json(&specs);
    }

    for line in render(&specs) {
        println!("{line}");
    }
    Ok(())
}

fn address(value: Option<u64>) -> String {
    value
        .map(|value| common::hex(value, 16))
        .unwrap_or_else(|| "-".to_string())
}

fn render(specs: &DeviceSpecs) -> Vec<String> {
    let mut lines = vec![
        format!("Device:          {}", specs.device_name),
        format!("Family:          {}", specs.family.as_str()),
        format!("Architecture:    {}", specs.architecture),
        format!("Series:          {}", specs.series),
        format!("Program size:    {}", specs.maximum_size),
        format!("RAM size:        {}", specs.maximum_ram_size),
        format!(
            "EEPROM:          {} at {}",
            specs.eeprom_size,
            address(specs.eeprom_addr)
        ),
        format!(
            "Config:          {} at {}",
            specs.config_size,
            address(specs.config_addr)
        ),
        format!("GPR total:       {}", specs.gpr_total_size),
    ];
    for (bank, size) in specs.bank_totals() {
        let label = bank.map_or_else(|| "unbanked".to_string(), |bank| format!("bank {bank}"));
        lines.push(format!("  {label:<12}  {size}"));
        for sector in specs
            .gpr_sectors
            .iter()
            .filter(|sector| sector.bank.as_deref() == bank)
        {
            lines.push(format!(
                "    {:<14} {}..{} {}",
                sector.name,
                common::hex(sector.start, 16),
                common::hex(sector.end, 16),
                sector.size
            ));
        }
    }
    lines
}
