//! Command-line interface for pointflow.
//!
//! Provides commands for one-shot runs, periodic runs, and service health
//! checks.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
