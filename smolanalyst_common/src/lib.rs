//! Shared building blocks for the smolanalyst crates.

pub mod state_machine;
