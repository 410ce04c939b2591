//! Transport abstraction for remote sessions.
//!
//! A [`Transport`] opens authenticated connections; a [`Connection`] runs a
//! single command and reports its lifecycle as [`ChannelEvent`]s. Handshake
//! and authentication are the transport's business: callers only supply
//! resolved credentials and observe events.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::node::Secret;

mod ssh;

pub use ssh::Ssh2Transport;

/// Future returned by transport operations.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Receiving end of a command's event stream.
pub type ChannelEvents = mpsc::Receiver<ChannelEvent>;

/// Plaintext connection parameters. Built immediately before a connection
/// attempt and dropped as soon as it completes.
#[derive(Clone, Debug)]
pub struct ConnectParams {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Remote user name.
    pub username: String,
    /// Password, when one is configured.
    pub password: Option<Secret>,
    /// Private key in PEM form, when one is configured.
    pub private_key: Option<Secret>,
}

/// Lifecycle event reported while a command runs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChannelEvent {
    /// Bytes received on the primary output stream.
    Stdout(Vec<u8>),
    /// Bytes received on the error stream.
    Stderr(Vec<u8>),
    /// The channel closed; carries the exit status when the remote reported
    /// one.
    Closed {
        /// Process exit status.
        exit_code: Option<i32>,
    },
    /// The transport failed while the command was running.
    Failed(TransportError),
}

/// Connection, authentication, or protocol failure.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TransportError {
    /// Raised when the TCP connection or SSH handshake fails.
    #[error("failed to connect to {host}: {message}")]
    Connect {
        /// Host that could not be reached.
        host: String,
        /// Underlying failure.
        message: String,
    },
    /// Raised when the remote rejects the supplied credentials.
    #[error("authentication failed for {username}: {message}")]
    Authentication {
        /// User the session tried to authenticate as.
        username: String,
        /// Underlying failure.
        message: String,
    },
    /// Raised for channel or protocol failures after authentication.
    #[error("ssh protocol error: {0}")]
    Protocol(String),
    /// Raised when the event stream ends without a close event.
    #[error("channel closed without reporting an exit status")]
    ChannelClosed,
    /// Raised when a background transport task dies.
    #[error("transport task failed: {0}")]
    Task(String),
}

/// Opens connections to remote hosts.
pub trait Transport: Send + Sync {
    /// Connects and authenticates using `params`.
    fn connect<'a>(&'a self, params: &'a ConnectParams) -> TransportFuture<'a, Box<dyn Connection>>;
}

/// An authenticated connection able to run one command.
pub trait Connection: Send {
    /// Starts `command` and returns its event stream.
    fn exec<'a>(&'a mut self, command: &'a str) -> TransportFuture<'a, ChannelEvents>;

    /// Requests termination and resolves once the connection has closed.
    fn end(&mut self) -> TransportFuture<'_, ()>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn connect<'a>(&'a self, params: &'a ConnectParams) -> TransportFuture<'a, Box<dyn Connection>> {
        (**self).connect(params)
    }
}

#[cfg(test)]
mod tests;
