use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use atpack::model::{Bitfield, ClassificationTable, Device};
use atpack::xml::{Family, SegmentKind};
use atpack::{AtPack, AtPackError};
use serde::Serialize;
use tracing::{debug, info};

pub const DEFAULT_SUGGESTIONS: usize = 5;

/// File extensions picked up when a directory is given as a pack.
const DOCUMENT_EXTENSIONS: [&str; 2] = ["atdf", "pic"];

/// `KIND=SPACE` classification override from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindOverride {
    pub kind: SegmentKind,
    pub space: String,
}

impl FromStr for KindOverride {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (kind, space) = raw
            .split_once('=')
            .ok_or_else(|| format!("expected KIND=SPACE, got `{raw}`"))?;
        let kind = kind.parse::<SegmentKind>()?;
        let space = space.trim();
        if space.is_empty() {
            return Err(format!("empty address space in `{raw}`"));
        }
        Ok(KindOverride {
            kind,
            space: space.to_string(),
        })
    }
}

/// Expand `--pack` arguments into document files; directory contents are sorted by name.
pub fn collect_documents(packs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pack in packs {
        if pack.is_dir() {
            let mut found = Vec::new();
            for entry in
                fs::read_dir(pack).with_context(|| format!("read directory {}", pack.display()))?
            {
                let path = entry
                    .with_context(|| format!("list {}", pack.display()))?
                    .path();
                if path.is_file() && is_document(&path) {
                    found.push(path);
                }
            }
            found.sort();
            debug!(dir = %pack.display(), documents = found.len(), "scanned pack directory");
            files.extend(found);
        } else {
            files.push(pack.clone());
        }
    }
    if files.is_empty() {
        bail!("no device documents given; pass --pack <FILE|DIR>");
    }
    Ok(files)
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            DOCUMENT_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Read every document and open one session over all of them.
pub fn open_pack(packs: &[PathBuf], overrides: &[KindOverride]) -> Result<AtPack> {
    let mut builder = AtPack::builder();
    for family in [Family::DialectA, Family::DialectB] {
        let table = overrides
            .iter()
            .fold(ClassificationTable::for_family(family), |table, o| {
                table.with_kind(o.kind, o.space.clone())
            });
        builder = builder.classification(family, table);
    }
    for path in collect_documents(packs)? {
        let xml = fs::read_to_string(&path)
            .with_context(|| format!("read device document {}", path.display()))?;
        let label = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        builder = builder.document(label, xml);
    }
    let pack = builder.build().context("open device pack")?;
    info!(devices = pack.registry().len(), "opened device pack");
    Ok(pack)
}

/// Resolve a device argument: a 1-based registry index or a name.
///
/// An unknown name fails with the closest registry names appended.
pub fn select_device(pack: &AtPack, selector: &str, top: usize) -> Result<Arc<Device>> {
    if let Ok(index) = selector.parse::<usize>() {
        return pack
            .device_at(index)
            .with_context(|| format!("load device #{index}"));
    }
    match pack.get_device(selector) {
        Ok(device) => Ok(device),
        Err(AtPackError::NotFound(err)) => {
            let suggestions = err.suggestions(top);
            if suggestions.is_empty() {
                bail!("{err}");
            }
            let names = suggestions
                .iter()
                .map(|s| format!("  {:>4}  {}", s.index, s.name))
                .collect::<Vec<_>>()
                .join("\n");
            bail!("{err}; did you mean:\n{names}")
        }
        Err(err) => Err(err).with_context(|| format!("load device {selector}")),
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialise JSON output")?;
    println!("{text}");
    Ok(())
}

/// Zero-padded hex wide enough for `bits`.
pub fn hex(value: u64, bits: u32) -> String {
    let digits = (bits.max(4) as usize).div_ceil(4);
    format!("0x{value:0digits$X}")
}

pub fn or_dash(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

/// Bit range as `[hi:lo]`, or `[n]` for a single bit.
pub fn bit_span(field: &Bitfield) -> String {
    let (lo, hi) = field.bit_range();
    if lo == hi {
        format!("[{lo}]")
    } else {
        format!("[{hi}:{lo}]")
    }
}

/// One line per field and sub-field; with `raw`, each field also shows its
/// value and the matching enumerator, if any.
pub fn render_fields(fields: &[Bitfield], depth: usize, raw: Option<u64>, lines: &mut Vec<String>) {
    let indent = "  ".repeat(depth);
    for field in fields {
        let access = field.access.map(|access| access.as_str()).unwrap_or("");
        let mut line = format!("{indent}{:<10} {:<7} {access:<2}", field.name, bit_span(field));
        if let Some(raw) = raw {
            let value = field.extract(raw);
            line.push_str(&format!(" = {value:#x}"));
            if let Some(named) = field.value_named(value) {
                line.push_str(&format!(" ({})", named.name));
            }
        }
        if let Some(description) = field.description.as_deref() {
            line.push_str(&format!("  {description}"));
        }
        lines.push(line.trim_end().to_string());
        render_fields(&field.subfields, depth + 1, raw, lines);
    }
}
