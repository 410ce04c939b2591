//! Error types for the SSH job.

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::command::CommandSpecError;
use crate::node::ServiceError;
use crate::session::SessionError;

/// Errors raised while constructing or running an SSH job.
#[derive(Debug, Error)]
pub enum JobError {
    /// Raised when the job context does not name a target node.
    #[error("job target must name a node")]
    MissingTarget,
    /// Raised at construction when the command options are malformed.
    #[error("invalid command specification: {0}")]
    InvalidCommandSpec(#[from] CommandSpecError),
    /// Raised when the node registry cannot resolve the target.
    #[error("failed to resolve node {identifier}: {error}")]
    NodeResolution {
        /// Identifier that was looked up.
        identifier: String,
        /// Registry failure.
        #[source]
        error: ServiceError,
    },
    /// Raised when a remote command fails to run or is not accepted.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Raised when the parser or store fails while cataloging output.
    #[error("job error processing catalog output: {0}")]
    Catalog(#[from] CatalogError),
}
