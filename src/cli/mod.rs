//! Command-line interface for evo-forge.
//!
//! Provides the `run` command that drives an experiment definition through
//! the evolving loop, and `knowledge` for inspecting persisted knowledge.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, ExperimentFile};
