use std::path::PathBuf;

use anyhow::Result;
use atpack::model::{EnumValue, Fuse};
use serde::Serialize;
use tracing::info;

use crate::common::{self, KindOverride};

#[derive(Serialize)]
struct Setting<'a> {
    field: &'a str,
    value: u64,
    meaning: Option<&'a EnumValue>,
}

#[derive(Serialize)]
struct ConfigWord<'a> {
    #[serde(flatten)]
    fuse: &'a Fuse,
    defaults: Vec<Setting<'a>>,
}

fn defaults(fuse: &Fuse) -> Vec<Setting<'_>> {
    fuse.default_settings()
        .into_iter()
        .map(|(field, value)| Setting {
            field: &field.name,
            value,
            meaning: field.value_named(value),
        })
        .collect()
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
    info!(device = device.name(), count = device.fuses().len(), "listing configuration words");

    if json {
        let words: Vec<ConfigWord<'_>> = device
            .fuses()
            .iter()
            .map(|fuse| ConfigWord {
                fuse,
                defaults: defaults(fuse),
            })
            .collect();
        return common::print_json(&words);
    }

    if device.fuses().is_empty() {
        println!("No configuration words declared.");
        return Ok(());
    }

    for fuse in device.fuses() {
        let bits = (fuse.size * 8) as u32;
        let default = fuse
            .default_value
            .map(|value| common::hex(value, bits))
            .unwrap_or_else(|| "-".to_string());
        let mask = fuse
            .mask
            .map(|value| common::hex(value, bits))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} @ {}  default {default}  mask {mask}  {}",
            fuse.name,
            common::hex(fuse.address, 16),
            common::or_dash(fuse.caption.as_deref()),
        );
        let mut lines = Vec::new();
        common::render_fields(&fuse.bitfields, 1, fuse.default_value, &mut lines);
        for line in lines {
            println!("{line}");
        }
    }

    Ok(())
}
