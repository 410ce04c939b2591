//! The SSH job: a validated command list bound to one target node.
//!
//! Construction normalises the command options so bad definitions fail
//! before any network activity. Running the job resolves the node, executes
//! the commands in order, and catalogs the results that asked for it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::catalog::{CatalogStore, CatalogSummary, OutputParser, ResponseCataloger};
use crate::command::{CommandSpec, CommandSpecBuilder};
use crate::node::{NodeResolver, SecretDecryptor};
use crate::runner::CommandRunner;
use crate::session::ExecutionResult;
use crate::transport::Transport;

mod error;

pub use error::JobError;

/// Job options as supplied by the workflow definition.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SshJobOptions {
    /// A command string, a command object, or a list of either.
    #[serde(default)]
    pub commands: Value,
    /// Extra exit codes accepted for every command (`0` is implied).
    #[serde(default)]
    pub accepted_codes: Vec<i32>,
}

/// Outcome of a successful job run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    /// Identifier assigned to the job at construction.
    pub job_id: Uuid,
    /// Canonical identifier of the node the commands ran on.
    pub node: String,
    /// Results in command order.
    pub results: Vec<ExecutionResult>,
    /// What happened to the results offered for cataloging.
    pub catalog: CatalogSummary,
}

/// A validated SSH job.
#[derive(Clone, Debug)]
pub struct SshJob {
    id: Uuid,
    target: String,
    commands: Vec<CommandSpec>,
}

impl SshJob {
    /// Builds a job for `target` from `options`.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::MissingTarget`] when `target` is blank and
    /// [`JobError::InvalidCommandSpec`] when the command options are
    /// malformed.
    pub fn new(options: &SshJobOptions, target: &str) -> Result<Self, JobError> {
        let trimmed_target = target.trim();
        if trimmed_target.is_empty() {
            return Err(JobError::MissingTarget);
        }
        let commands = Self::commands_from(options)?;

        Ok(Self {
            id: Uuid::new_v4(),
            target: trimmed_target.to_owned(),
            commands,
        })
    }

    /// Normalises the command options exactly as [`SshJob::new`] does,
    /// without requiring a target.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidCommandSpec`] when the command options are
    /// malformed.
    pub fn commands_from(options: &SshJobOptions) -> Result<Vec<CommandSpec>, JobError> {
        let commands = CommandSpecBuilder::new()
            .accepted_codes(options.accepted_codes.iter().copied())
            .build(&options.commands)?;
        Ok(commands)
    }

    /// Identifier used to correlate log output for this job.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Node identifier the job targets.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Normalised commands in execution order.
    #[must_use]
    pub fn commands(&self) -> &[CommandSpec] {
        &self.commands
    }

    /// Resolves the target node, runs every command, and catalogs the
    /// results that carry catalog options.
    ///
    /// # Errors
    ///
    /// Returns [`JobError`] when the node cannot be resolved, a command
    /// fails or exits with an unaccepted status, or cataloging fails as a
    /// whole.
    pub async fn run<R, T, D, P, S>(
        &self,
        resolver: &R,
        runner: &CommandRunner<T, D>,
        cataloger: &ResponseCataloger<P, S>,
    ) -> Result<JobReport, JobError>
    where
        R: NodeResolver,
        T: Transport,
        D: SecretDecryptor,
        P: OutputParser,
        S: CatalogStore,
    {
        info!(
            job = %self.id,
            target = %self.target,
            commands = self.commands.len(),
            "starting ssh job"
        );
        let node = resolver
            .resolve(&self.target)
            .await
            .map_err(|error| JobError::NodeResolution {
                identifier: self.target.clone(),
                error,
            })?;

        let results = runner
            .run(&self.commands, &node.credentials)
            .await
            .inspect_err(|err| error!(job = %self.id, node = %node.id, error = %err, "ssh job failed"))?;
        debug!(job = %self.id, node = %node.id, "received remote command output");

        // Catalog under the registry's canonical id, whichever identifier was targeted.
        let catalog = cataloger
            .catalog(&node.id, &results)
            .await
            .inspect_err(|err| {
                error!(job = %self.id, node = %node.id, error = %err, "error processing catalog output");
            })?;
        info!(
            job = %self.id,
            node = %node.id,
            stored = catalog.stored,
            failed = catalog.failed,
            "ssh job complete"
        );

        Ok(JobReport {
            job_id: self.id,
            node: node.id,
            results,
            catalog,
        })
    }
}
