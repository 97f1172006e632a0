use std::path::PathBuf;

use anyhow::{bail, Result};
use atpack::model::{Device, Register};
use serde::Serialize;
use tracing::info;

use crate::common::{self, KindOverride};

#[derive(Serialize)]
struct RegisterRow<'a> {
    module: &'a str,
    group: &'a str,
    #[serde(flatten)]
    register: &'a Register,
}

pub struct RegistersArgs {
    pub device: String,
    pub module: Option<String>,
    pub fields: bool,
    pub top: usize,
}

pub fn run(
    packs: &[PathBuf],
    overrides: &[KindOverride],
    args: RegistersArgs,
    json: bool,
) -> Result<()> {
    let pack = common::open_pack(packs, overrides)?;
    let device = common::select_device(&pack, &args.device, args.top)?;
    let rows = collect_rows(&device, args.module.as_deref())?;
    info!(device = device.name(), count = rows.len(), "listing registers");

    if json {
        return common::print_json(&rows);
    }

    if rows.is_empty() {
        println!("No registers declared.");
        return Ok(());
    }

    println!(
        "{:<10} {:<12} {:<16} {:<8} {:>4} {:<3} {}",
        "OFFSET", "MODULE", "NAME", "RESET", "SIZE", "RW", "CAPTION"
    );
    for row in &rows {
        let register = row.register;
        let reset = register
            .initial_value
            .map(|value| common::hex(value, register.bits()))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:<12} {:<16} {:<8} {:>4} {:<3} {}",
            common::hex(register.offset, 16),
            row.module,
            register.name,
            reset,
            register.size,
            register.access.as_str(),
            common::or_dash(register.caption.as_deref()),
        );
        if args.fields {
            let mut lines = Vec::new();
            common::render_fields(&register.bitfields, 1, None, &mut lines);
            for line in lines {
                println!("{line}");
            }
        }
    }

    Ok(())
}

/// Registers ordered by offset, optionally restricted to one module (case-insensitive).
fn collect_rows<'a>(device: &'a Device, module: Option<&str>) -> Result<Vec<RegisterRow<'a>>> {
    if let Some(wanted) = module {
        if !device
            .modules()
            .iter()
            .any(|candidate| candidate.name.eq_ignore_ascii_case(wanted))
        {
            bail!("device {} has no module {wanted}", device.name());
        }
    }
    let mut rows: Vec<RegisterRow<'a>> = device
        .modules()
        .iter()
        .filter(|candidate| module.map_or(true, |wanted| candidate.name.eq_ignore_ascii_case(wanted)))
        .flat_map(|module| {
            module.groups.iter().flat_map(move |group| {
                group.registers.iter().map(move |register| RegisterRow {
                    module: &module.name,
                    group: &group.name,
                    register,
                })
            })
        })
        .collect();
    rows.sort_by_key(|row| row.register.offset);
    Ok(rows)
}
