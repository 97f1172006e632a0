use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::common::{self, KindOverride};

#[derive(Serialize)]
struct DeviceEntry<'a> {
    index: usize,
    name: &'a str,
    family: &'static str,
    document: Option<&'a str>,
}

pub fn run(packs: &[PathBuf], overrides: &[KindOverride], json: bool) -> Result<()> {
    let pack = common::open_pack(packs, overrides)?;
    let registry = pack.registry();
    info!(count = registry.len(), "registered devices");

    let entries: Vec<DeviceEntry<'_>> = registry
        .entries()
        .iter()
        .map(|entry| DeviceEntry {
            index: entry.index,
            name: &entry.name,
            family: entry.family.as_str(),
            document: pack.document_label(entry),
        })
        .collect();

    if json {
        return common::print_json(&entries);
    }

    if entries.is_empty() {
        println!("No devices declared.");
        return Ok(());
    }

    println!("{:<6} {:<20} {:<10} {}", "INDEX", "NAME", "FAMILY", "DOCUMENT");
    for entry in &entries {
        println!(
            "{:<6} {:<20} {:<10} {}",
            entry.index,
            entry.name,
            entry.family,
            common::or_dash(entry.document),
        );
    }

    Ok(())
}
