//! CLI module for the Strata orchestrator.
//!
//! This module provides the command-line interface for planning and
//! applying deployment documents.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
