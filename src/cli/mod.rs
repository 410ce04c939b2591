//! Command-line interface definitions for the `sshjob` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `sshjob` binary.
#[derive(Debug, Parser)]
#[command(
    name = "sshjob",
    about = "Run job commands on a node over SSH and catalog their output",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Resolve a node, run the job's commands, and catalog the results.
    #[command(
        name = "run",
        about = "Resolve a node, run the job's commands, and catalog the results"
    )]
    Run(RunCommand),
    /// Check a job file without connecting anywhere.
    #[command(name = "validate", about = "Check a job file without connecting anywhere")]
    Validate(ValidateCommand),
}

/// Arguments for the `sshjob run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    /// Identifier of the target node (canonical id or any secondary identifier).
    #[arg(long, value_name = "ID")]
    pub(crate) node: String,
    /// Override the node inventory path from configuration.
    #[arg(long, value_name = "PATH")]
    pub(crate) inventory: Option<String>,
    /// Override the catalog output path from configuration.
    #[arg(long, value_name = "PATH")]
    pub(crate) catalog_output: Option<String>,
    /// JSON file holding the job options (`commands`, `acceptedCodes`).
    #[arg(value_name = "JOB_FILE")]
    pub(crate) job_file: String,
}

/// Arguments for the `sshjob validate` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ValidateCommand {
    /// JSON file holding the job options (`commands`, `acceptedCodes`).
    #[arg(value_name = "JOB_FILE")]
    pub(crate) job_file: String,
}
