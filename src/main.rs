//! Binary entry point for the `sshjob` CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8Path;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use sshjob::{
    CommandRunner, FileNodeResolver, FormatParser, JobConfig, JobError, JsonLinesCatalogStore,
    PassthroughDecryptor, ResponseCataloger, Ssh2Transport, SshJob, SshJobOptions,
};

mod cli;

use cli::{Cli, RunCommand, ValidateCommand};

const DEFAULT_LOG_FILTER: &str = "sshjob=info";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to load job file {path}: {message}")]
    JobFile { path: String, message: String },
    #[error("invalid job: {0}")]
    InvalidJob(#[source] JobError),
    #[error("job failed: {0}")]
    Job(#[from] JobError),
    #[error("failed to render report: {0}")]
    Report(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Run(command) => run_command(command).await,
        Cli::Validate(command) => validate_command(&command).await,
    }
}

async fn run_command(args: RunCommand) -> Result<i32, CliError> {
    let mut config =
        JobConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    if let Some(inventory) = args.inventory {
        config.inventory_path = inventory;
    }
    if let Some(catalog) = args.catalog_output {
        config.catalog_path = catalog;
    }
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;

    let options = load_job_options(Utf8Path::new(&args.job_file)).await?;
    let job = SshJob::new(&options, &args.node)?;

    let resolver = FileNodeResolver::new(config.inventory_path.as_str());
    let mut runner = CommandRunner::new(
        Ssh2Transport::new(config.connect_timeout()),
        PassthroughDecryptor,
    );
    if let Some(limit) = config.command_timeout() {
        runner = runner.with_command_timeout(limit);
    }
    let cataloger = ResponseCataloger::new(
        FormatParser,
        JsonLinesCatalogStore::new(config.catalog_path.as_str()),
    );

    let report = job.run(&resolver, &runner, &cataloger).await?;
    let rendered =
        serde_json::to_string_pretty(&report).map_err(|err| CliError::Report(err.to_string()))?;
    writeln!(io::stdout(), "{rendered}").ok();
    Ok(0)
}

async fn validate_command(args: &ValidateCommand) -> Result<i32, CliError> {
    let options = load_job_options(Utf8Path::new(&args.job_file)).await?;
    let commands = SshJob::commands_from(&options).map_err(CliError::InvalidJob)?;
    writeln!(
        io::stdout(),
        "{}: {} command(s) valid",
        args.job_file,
        commands.len()
    )
    .ok();
    Ok(0)
}

async fn load_job_options(path: &Utf8Path) -> Result<SshJobOptions, CliError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| CliError::JobFile {
            path: path.to_string(),
            message: err.to_string(),
        })?;
    serde_json::from_str(&raw).map_err(|err| CliError::JobFile {
        path: path.to_string(),
        message: err.to_string(),
    })
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
