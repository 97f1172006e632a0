use std::path::PathBuf;

use anyhow::Result;
use atpack::model::{MemoryNode, MemorySegment, MemorySpace};
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
    info!(device = device.name(), "printing memory map");

    if json {
        return common::print_json(device.memory());
    }

    let mut lines = Vec::new();
    render_space(device.memory(), 0, &mut lines);
    for line in lines {
        println!("{line}");
    }
    for warning in device.warnings() {
        println!("warning: {warning}");
    }
    Ok(())
}

fn render_space(space: &MemorySpace, depth: usize, lines: &mut Vec<String>) {
    let indent = "  ".repeat(depth);
    match (space.start, space.end) {
        (Some(start), Some(end)) => {
            lines.push(format!("{indent}{} [{start:#06x}..{end:#06x}]", space.name))
        }
        _ => lines.push(format!("{indent}{}", space.name)),
    }
    match &space.children {
        MemoryNode::Spaces(children) => {
            for child in children {
                render_space(child, depth + 1, lines);
            }
        }
        MemoryNode::Segments(segments) => {
            for segment in segments {
                lines.push(render_segment(segment, depth + 1));
            }
        }
    }
}

fn render_segment(segment: &MemorySegment, depth: usize) -> String {
    let indent = "  ".repeat(depth);
    let mut line = format!(
        "{indent}{:<16} {:#06x}..{:#06x} {:>7} {:<8}",
        segment.name,
        segment.start,
        segment.end,
        segment.size,
        segment.kind.as_str()
    );
    if let Some(page) = segment.page_size {
        line.push_str(&format!(" page={page}"));
    }
    if segment.is_shadow {
        match segment.shadow_of.as_deref() {
            Some(target) => line.push_str(&format!(" shadow of {target}")),
            None => line.push_str(" shadow (unresolved)"),
        }
    }
    line
}
