use std::path::PathBuf;

use anyhow::Result;

use crate::common::{self, KindOverride};

/// Rank registry names against `name`.
pub fn run(
    packs: &[PathBuf],
    overrides: &[KindOverride],
    name: &str,
    top: usize,
    json: bool,
) -> Result<()> {
    let pack = common::open_pack(packs, overrides)?;
    let suggestions = pack.suggest(name, top);

    if json {
        return common::print_json(&suggestions);
    }

    if suggestions.is_empty() {
        println!("No devices declared.");
        return Ok(());
    }

    println!("{:<6} {:<20} {:>6}", "INDEX", "NAME", "SCORE");
    for suggestion in &suggestions {
        let marker = if suggestion.exact { "  (exact)" } else { "" };
        println!(
            "{:<6} {:<20} {:>6.1}{marker}",
            suggestion.index, suggestion.name, suggestion.score
        );
    }

    Ok(())
}
