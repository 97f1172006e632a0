use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::info;

use crate::common::{self, KindOverride};

#[derive(Serialize)]
struct CheckResult<'a> {
    index: usize,
    name: &'a str,
    ok: bool,
    warnings: Vec<String>,
    error: Option<String>,
}

/// Build every declared device and report per-device outcomes.
pub fn run(packs: &[PathBuf], overrides: &[KindOverride], json: bool) -> Result<()> {
    let pack = common::open_pack(packs, overrides)?;
    let started = Instant::now();
    let results = pack.parse_all();
    let checked: Vec<CheckResult<'_>> = results
        .iter()
        .map(|(entry, result)| match result {
            Ok(device) => CheckResult {
                index: entry.index,
                name: &entry.name,
                ok: true,
                warnings: device.warnings().iter().map(ToString::to_string).collect(),
                error: None,
            },
            Err(err) => CheckResult {
                index: entry.index,
                name: &entry.name,
                ok: false,
                warnings: Vec::new(),
                error: Some(err.to_string()),
            },
        })
        .collect();
    let failed = checked.iter().filter(|result| !result.ok).count();
    info!(
        devices = checked.len(),
        failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "checked devices"
    );

    if json {
        common::print_json(&checked)?;
    } else {
        for result in &checked {
            let status = if result.ok { "ok" } else { "FAILED" };
            println!("{:<6} {:<20} {status}", result.index, result.name);
            for warning in &result.warnings {
                println!("         warning: {warning}");
            }
            if let Some(error) = &result.error {
                println!("         {error}");
            }
        }
        println!("{} devices, {failed} failed", checked.len());
    }

    if failed > 0 {
        bail!("{failed} of {} devices failed to build", checked.len());
    }
    Ok(())
}
