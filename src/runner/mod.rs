//! Sequential execution of a command list against one node.

use std::time::Duration;

use tokio::time::timeout;
use tracing::info;

use crate::command::CommandSpec;
use crate::node::{ConnectionCredentials, SecretDecryptor};
use crate::session::{ExecutionResult, RemoteSession, SessionError};
use crate::transport::Transport;

/// Runs commands one at a time, each in its own [`RemoteSession`].
///
/// Later commands may depend on side effects of earlier ones, so commands
/// are never reordered or run concurrently. The first failure stops the run.
#[derive(Clone, Debug)]
pub struct CommandRunner<T, D> {
    transport: T,
    decryptor: D,
    command_timeout: Option<Duration>,
}

impl<T, D> CommandRunner<T, D>
where
    T: Transport,
    D: SecretDecryptor,
{
    /// Creates a runner with no command timeout.
    #[must_use]
    pub const fn new(transport: T, decryptor: D) -> Self {
        Self {
            transport,
            decryptor,
            command_timeout: None,
        }
    }

    /// Bounds each command (connect through close) by `limit`.
    ///
    /// Without a timeout a hung remote command stalls the run indefinitely.
    #[must_use]
    pub const fn with_command_timeout(mut self, limit: Duration) -> Self {
        self.command_timeout = Some(limit);
        self
    }

    /// Executes `commands` in order against the host in `credentials`.
    ///
    /// Each result is annotated with its command text and catalog options.
    ///
    /// # Errors
    ///
    /// Returns the first [`SessionError`]; no partial result list is
    /// returned and no further commands run.
    pub async fn run(
        &self,
        commands: &[CommandSpec],
        credentials: &ConnectionCredentials,
    ) -> Result<Vec<ExecutionResult>, SessionError> {
        let mut results = Vec::with_capacity(commands.len());
        for (index, spec) in commands.iter().enumerate() {
            info!(
                host = %credentials.host,
                step = index + 1,
                total = commands.len(),
                command = spec.command(),
                "running remote command"
            );
            let mut result = self.run_one(spec, credentials).await?;
            result.cmd = spec.command().to_owned();
            result.catalog_options = spec.catalog().cloned();
            results.push(result);
        }
        Ok(results)
    }

    async fn run_one(
        &self,
        spec: &CommandSpec,
        credentials: &ConnectionCredentials,
    ) -> Result<ExecutionResult, SessionError> {
        let session = RemoteSession::new(&self.transport, &self.decryptor, spec.accepted_codes());
        let execution = session.execute(spec.command(), credentials);
        let Some(limit) = self.command_timeout else {
            return execution.await;
        };
        timeout(limit, execution)
            .await
            .unwrap_or_else(|_| {
                Err(SessionError::TimedOut {
                    command: spec.command().to_owned(),
                    seconds: limit.as_secs(),
                })
            })
    }
}
