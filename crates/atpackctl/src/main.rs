use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use atpackctl::cmd_check;
use atpackctl::cmd_config;
use atpackctl::cmd_devices;
use atpackctl::cmd_find;
use atpackctl::cmd_memory;
use atpackctl::cmd_registers::{self, RegistersArgs};
use atpackctl::cmd_show;
use atpackctl::cmd_specs;
use atpackctl::common::{KindOverride, DEFAULT_SUGGESTIONS};

#[derive(Parser, Debug)]
#[command(name = "atpackctl", version, about = "Device pack (ATDF/EDC) inspector")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Output JSON where applicable
    #[arg(long, global = true)]
    json: bool,
    /// Device document or directory of .atdf/.PIC documents (repeatable)
    #[arg(short, long = "pack", global = true)]
    packs: Vec<PathBuf>,
    /// Route a segment kind to an address space, e.g. `other=DataSpace` (repeatable)
    #[arg(long = "kind", value_name = "KIND=SPACE", global = true)]
    kinds: Vec<KindOverride>,
    /// Number of suggestions shown for unknown device names
    #[arg(long, default_value_t = DEFAULT_SUGGESTIONS, global = true)]
    top: usize,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List declared devices in registry order
    Devices,
    /// Rank device names similar to NAME
    Find { name: String },
    /// Device summary: identity, interrupts, signatures, warnings
    Show {
        /// Device name or 1-based registry index
        device: String,
    },
    /// Print the memory tree
    Memory { device: String },
    /// List registers ordered by offset
    Registers {
        device: String,
        /// Only registers of this module
        #[arg(long)]
        module: Option<String>,
        /// Include bitfields
        #[arg(long)]
        fields: bool,
    },
    /// Configuration words with decoded defaults
    Config { device: String },
    /// Capacity figures (program, RAM, EEPROM, config, GPR per bank)
    Specs { device: String },
    /// Build every device and report failures
    Check,
}

fn main() -> Result<()> {
    let Cli {
        verbose,
        json,
        packs,
        kinds,
        top,
        cmd,
    } = Cli::parse();

    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.into()),
        ))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cmd {
        Cmd::Devices => cmd_devices::run(&packs, &kinds, json)?,
        Cmd::Find { name } => cmd_find::run(&packs, &kinds, &name, top, json)?,
        Cmd::Show { device } => cmd_show::run(&packs, &kinds, &device, top, json)?,
        Cmd::Memory { device } => cmd_memory::run(&packs, &kinds, &device, top, json)?,
        Cmd::Registers {
            device,
            module,
            fields,
        } => {
            let args = RegistersArgs {
                device,
                module,
                fields,
                top,
            };
            cmd_registers::run(&packs, &kinds, args, json)?
        }
        Cmd::Config { device } => cmd_config::run(&packs, &kinds, &device, top, json)?,
        Cmd::Specs { device } => cmd_specs::run(&packs, &kinds, &device, top, json)?,
        Cmd::Check => cmd_check::run(&packs, &kinds, json)?,
    };

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "atpackctl",
            "specs",
            "PIC16F628A",
            "-p",
            "packs/pic",
            "--pack",
            "ATtiny13A.atdf",
            "-vv",
            "--json",
        ]);
        assert_eq!(cli.verbose, 2);
        assert!(cli.json);
        assert_eq!(
            cli.packs,
            vec![PathBuf::from("packs/pic"), PathBuf::from("ATtiny13A.atdf")]
        );
        assert_eq!(cli.top, DEFAULT_SUGGESTIONS);
        match cli.cmd {
            Cmd::Specs { device } => assert_eq!(device, "PIC16F628A"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn parse_kind_overrides() {
        let cli = Cli::parse_from([
            "atpackctl",
            "--kind",
            "other=DataSpace",
            "--kind",
            "test=ProgramSpace",
            "--top",
            "3",
            "check",
        ]);
        assert_eq!(cli.top, 3);
        assert_eq!(
            cli.kinds,
            vec![
                "other=DataSpace".parse::<KindOverride>().unwrap(),
                "test=ProgramSpace".parse::<KindOverride>().unwrap(),
            ]
        );
        assert!(Cli::try_parse_from(["atpackctl", "--kind", "bogus=X", "check"]).is_err());
    }

    #[test]
    fn parse_registers_options() {
        let cli = Cli::parse_from(["atpackctl", "registers", "3", "--module", "TC0", "--fields"]);
        match cli.cmd {
            Cmd::Registers {
                device,
                module,
                fields,
            } => {
                assert_eq!(device, "3");
                assert_eq!(module.as_deref(), Some("TC0"));
                assert!(fields);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
