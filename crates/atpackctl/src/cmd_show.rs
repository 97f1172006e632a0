use std::path::PathBuf;

use anyhow::Result;
use atpack::model::{Interrupt, Signature, Warning};
use serde::Serialize;
use tracing::info;

use crate::common::{self, KindOverride};

#[derive(Serialize)]
struct Summary<'a> {
    name: &'a str,
    family: &'static str,
    architecture: &'a str,
    series: &'a str,
    spaces: Vec<&'a str>,
    segments: usize,
    modules: usize,
    registers: usize,
    fuses: usize,
    interrupts: &'a [Interrupt],
    signatures: &'a [Signature],
    warnings: &'a [Warning],
}

pub fn run(
    packs: &[PathBuf],
    overrides: &[KindOverride],
    device: &str,
    top: usize,
    json: bool,
) -> Result<()> {
    let pack = common::open_pack(packs, overrides)?;
    let device = common::select_device(&pack, device, top)?;
    info!(device = device.name(), "showing device");

    let summary = Summary {
        name: device.name(),
        family: device.family().as_str(),
        architecture: device.architecture(),
        series: device.series(),
        spaces: device
            .memory()
            .spaces()
            .iter()
            .map(|space| space.name.as_str())
            .collect(),
        segments: device.segments().len(),
        modules: device.modules().len(),
        registers: device.registers().len(),
        fuses: device.fuses().len(),
        interrupts: device.interrupts(),
        signatures: device.signatures(),
        warnings: device.warnings(),
    };

    if json {
        return common::print_json(&summary);
    }

    println!("Device:       {}", summary.name);
    println!("Family:       {}", summary.family);
    println!("Architecture: {}", summary.architecture);
    println!("Series:       {}", summary.series);
    println!("Spaces:       {}", summary.spaces.join(", "));
    println!("Segments:     {}", summary.segments);
    println!("Modules:      {}", summary.modules);
    println!("Registers:    {}", summary.registers);
    println!("Fuses:        {}", summary.fuses);

    if !summary.signatures.is_empty() {
        println!();
        println!("Signatures:");
        for signature in summary.signatures {
            let mask = signature
                .mask
                .map(|mask| format!(" (mask {mask:#x})"))
                .unwrap_or_default();
            println!(
                "  {:<12} @ {:#06x} = {:#04x}{mask}",
                signature.name, signature.address, signature.value
            );
        }
    }

    if !summary.interrupts.is_empty() {
        println!();
        println!("Interrupts:");
        for interrupt in summary.interrupts {
            println!(
                "  {:>3}  {:<20} {}",
                interrupt.index,
                interrupt.name,
                common::or_dash(interrupt.description.as_deref())
            );
        }
    }

    if !summary.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in summary.warnings {
            println!("  {warning}");
        }
    }

    Ok(())
}
