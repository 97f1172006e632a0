//! Subcommands of the `atpackctl` binary.

pub mod cmd_check;
pub mod cmd_config;
pub mod cmd_devices;
pub mod cmd_find;
pub mod cmd_memory;
pub mod cmd_registers;
pub mod cmd_show;
pub mod cmd_specs;
pub mod common;
