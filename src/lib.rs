//! Core library for the `sshjob` remote command runner.
//!
//! A job normalises a list of command definitions, resolves its target node,
//! runs each command over its own short-lived SSH session, and routes the
//! output of commands that ask for it into the node catalog.

pub mod catalog;
pub mod command;
pub mod config;
pub mod job;
pub mod local;
pub mod node;
pub mod runner;
pub mod session;
pub mod test_support;
pub mod transport;

pub use catalog::{
    CatalogEntry, CatalogError, CatalogStore, CatalogSummary, OutputParser, ParsedRecord,
    ResponseCataloger,
};
pub use command::{AcceptedCodes, CatalogOptions, CommandSpec, CommandSpecBuilder, CommandSpecError};
pub use config::{ConfigError, JobConfig};
pub use job::{JobError, JobReport, SshJob, SshJobOptions};
pub use local::{FileNodeResolver, FormatParser, JsonLinesCatalogStore, PassthroughDecryptor};
pub use node::{
    ConnectionCredentials, EncryptedSecret, Node, NodeResolver, Secret, SecretDecryptor,
    ServiceError,
};
pub use runner::CommandRunner;
pub use session::{ExecutionResult, RemoteSession, SessionError, SessionState};
pub use transport::{Ssh2Transport, Transport, TransportError};
