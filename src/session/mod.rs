//! Single-use remote sessions: one connection, one command, then close.
//!
//! A [`RemoteSession`] drives the connection through
//! `Connecting -> Ready -> Executing -> Closing -> {Closed, Failed}`. Output is
//! accumulated per stream in arrival order. Once the connection has fully
//! closed the session judges the exit status against the accepted codes; it
//! is the only place that decision is made.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::command::{AcceptedCodes, CatalogOptions};
use crate::node::{ConnectionCredentials, Secret, SecretDecryptor, ServiceError};
use crate::transport::{ChannelEvent, ChannelEvents, ConnectParams, Transport, TransportError};

/// Protocol state of a [`RemoteSession`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// Opening and authenticating the connection.
    Connecting,
    /// Authenticated; the command has not been issued yet.
    Ready,
    /// The command is running and output is streaming.
    Executing,
    /// The command finished and termination was requested.
    Closing,
    /// The connection closed normally.
    Closed,
    /// A transport failure ended the session.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of one remote command.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Standard output; absent when the command printed nothing.
    pub stdout: Option<String>,
    /// Standard error; absent when the command printed nothing.
    pub stderr: Option<String>,
    /// Exit status reported by the remote, if any.
    pub exit_code: Option<i32>,
    /// Command line that produced this result.
    pub cmd: String,
    /// Catalog intent copied from the originating command.
    pub catalog_options: Option<CatalogOptions>,
}

/// Errors returned by a remote session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Raised when the connection secrets cannot be decrypted.
    #[error("failed to decrypt connection secrets: {0}")]
    Decrypt(#[source] ServiceError),
    /// Raised for connection, authentication, or protocol failures.
    #[error("remote session failed: {0}")]
    Transport(#[from] TransportError),
    /// Raised when the command finished with an exit status outside the
    /// accepted set. Carries the partial result for diagnostics.
    #[error("command `{}` exited with {} (accepted: {accepted})", .result.cmd, describe_exit(.result.exit_code))]
    UnacceptedExitCode {
        /// Output captured before the connection closed.
        result: Box<ExecutionResult>,
        /// Exit codes that would have been accepted.
        accepted: AcceptedCodes,
    },
    /// Raised when a command outlives the configured timeout.
    #[error("command `{command}` did not finish within {seconds} seconds")]
    TimedOut {
        /// Command that was running.
        command: String,
        /// Timeout that elapsed.
        seconds: u64,
    },
}

fn describe_exit(code: Option<i32>) -> String {
    code.map_or_else(|| String::from("no exit status"), |value| format!("status {value}"))
}

#[derive(Debug, Default)]
struct OutputBuffers {
    stdout: Option<Vec<u8>>,
    stderr: Option<Vec<u8>>,
}

impl OutputBuffers {
    fn append(slot: &mut Option<Vec<u8>>, chunk: &[u8]) {
        slot.get_or_insert_with(Vec::new).extend_from_slice(chunk);
    }

    fn into_text(slot: Option<Vec<u8>>) -> Option<String> {
        slot.map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// One connection scoped to exactly one command.
///
/// `execute` consumes the session, so a session can never be reused.
pub struct RemoteSession<'a, T, D> {
    transport: &'a T,
    decryptor: &'a D,
    accepted: &'a AcceptedCodes,
    state: SessionState,
}

impl<'a, T, D> RemoteSession<'a, T, D>
where
    T: Transport,
    D: SecretDecryptor,
{
    /// Creates a session judging exit codes against `accepted`.
    #[must_use]
    pub const fn new(transport: &'a T, decryptor: &'a D, accepted: &'a AcceptedCodes) -> Self {
        Self {
            transport,
            decryptor,
            accepted,
            state: SessionState::Connecting,
        }
    }

    /// Runs `command` on the host described by `credentials`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`] or [`SessionError::Decrypt`] when
    /// the session fails before the command completes, and
    /// [`SessionError::UnacceptedExitCode`] when the command's exit status is
    /// not accepted.
    pub async fn execute(
        mut self,
        command: &str,
        credentials: &ConnectionCredentials,
    ) -> Result<ExecutionResult, SessionError> {
        let result = match self.drive(command, credentials).await {
            Ok(result) => result,
            Err(err) => {
                self.transition(SessionState::Failed);
                warn!(host = %credentials.host, command, error = %err, "remote session failed");
                return Err(err);
            }
        };
        self.transition(SessionState::Closed);

        if result
            .exit_code
            .is_some_and(|code| self.accepted.contains(code))
        {
            return Ok(result);
        }
        Err(SessionError::UnacceptedExitCode {
            result: Box::new(result),
            accepted: self.accepted.clone(),
        })
    }

    async fn drive(
        &mut self,
        command: &str,
        credentials: &ConnectionCredentials,
    ) -> Result<ExecutionResult, SessionError> {
        debug!(host = %credentials.host, port = credentials.port, "opening connection");
        let params = self.connect_params(credentials)?;
        let mut connection = self.transport.connect(&params).await?;
        drop(params);

        self.transition(SessionState::Ready);
        let events = connection.exec(command).await?;
        self.transition(SessionState::Executing);
        let (buffers, exit_code) = collect_output(events).await?;

        self.transition(SessionState::Closing);
        connection.end().await?;

        Ok(ExecutionResult {
            stdout: OutputBuffers::into_text(buffers.stdout),
            stderr: OutputBuffers::into_text(buffers.stderr),
            exit_code,
            cmd: command.to_owned(),
            catalog_options: None,
        })
    }

    fn connect_params(
        &self,
        credentials: &ConnectionCredentials,
    ) -> Result<ConnectParams, SessionError> {
        // Both secrets are always decrypted, even if the first one fails.
        let password = self.decryptor.decrypt(&credentials.password);
        let private_key = self.decryptor.decrypt(&credentials.private_key);

        Ok(ConnectParams {
            host: credentials.host.clone(),
            port: credentials.port,
            username: credentials.username.clone(),
            password: non_blank(password.map_err(SessionError::Decrypt)?),
            private_key: non_blank(private_key.map_err(SessionError::Decrypt)?),
        })
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "session state change");
        self.state = next;
    }
}

fn non_blank(secret: Secret) -> Option<Secret> {
    (!secret.is_blank()).then_some(secret)
}

async fn collect_output(
    mut events: ChannelEvents,
) -> Result<(OutputBuffers, Option<i32>), SessionError> {
    let mut buffers = OutputBuffers::default();
    loop {
        match events.recv().await {
            Some(ChannelEvent::Stdout(chunk)) => OutputBuffers::append(&mut buffers.stdout, &chunk),
            Some(ChannelEvent::Stderr(chunk)) => OutputBuffers::append(&mut buffers.stderr, &chunk),
            Some(ChannelEvent::Closed { exit_code }) => return Ok((buffers, exit_code)),
            Some(ChannelEvent::Failed(err)) => return Err(err.into()),
            None => return Err(TransportError::ChannelClosed.into()),
        }
    }
}

#[cfg(test)]
mod tests;
