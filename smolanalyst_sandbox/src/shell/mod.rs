//! # Shell Module
//!
//! Entry point and command-line handling for the `smolanalyst_sandbox`
//! binary.

pub mod cli;

pub use cli::{Cli, Command, OutputFormat, resolve_config, run};
