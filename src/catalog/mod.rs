//! Routing of command output into the node catalog.
//!
//! Only results that carry catalog options are handed to the parser. The
//! parser classifies each one; records marked for storage become
//! [`CatalogEntry`] values, per-record parse failures are logged and
//! counted, and anything else is skipped. A failure of the parser or the
//! store as a whole aborts cataloging.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::node::{ServiceError, ServiceFuture};
use crate::session::ExecutionResult;

/// Source recorded for stored entries whose parser output names none.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Parser classification for one execution result.
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedRecord {
    /// Parsing failed; the record is logged and dropped.
    Failed {
        /// Catalog source the record belonged to.
        source: Option<String>,
        /// Parser error detail.
        error: String,
    },
    /// Parsing succeeded and the data should be stored.
    Store {
        /// Catalog source to store the data under.
        source: Option<String>,
        /// Structured data extracted from the output.
        data: Value,
    },
    /// Parsing succeeded but the result is not significant enough to store.
    Insignificant {
        /// Catalog source the record belonged to.
        source: Option<String>,
    },
}

/// A structured record persisted for a node.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CatalogEntry {
    /// Identifier of the node the data describes.
    pub node: String,
    /// Catalog source name.
    pub source: String,
    /// Parsed data.
    pub data: Value,
}

/// Classifies raw command output into catalog records.
pub trait OutputParser: Send + Sync {
    /// Parses `results`, returning one record per input in the same order.
    fn parse<'a>(&'a self, results: &'a [ExecutionResult]) -> ServiceFuture<'a, Vec<ParsedRecord>>;
}

/// Persists catalog entries.
pub trait CatalogStore: Send + Sync {
    /// Stores `entry`.
    fn create(&self, entry: CatalogEntry) -> ServiceFuture<'_, ()>;
}

impl<T: OutputParser + ?Sized> OutputParser for &T {
    fn parse<'a>(&'a self, results: &'a [ExecutionResult]) -> ServiceFuture<'a, Vec<ParsedRecord>> {
        (**self).parse(results)
    }
}

impl<T: CatalogStore + ?Sized> CatalogStore for &T {
    fn create(&self, entry: CatalogEntry) -> ServiceFuture<'_, ()> {
        (**self).create(entry)
    }
}

/// Counts of what happened to the results offered for cataloging.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct CatalogSummary {
    /// Results that carried catalog options and were sent to the parser.
    pub submitted: usize,
    /// Entries written to the store.
    pub stored: usize,
    /// Records the parser could not parse.
    pub failed: usize,
    /// Records the parser did not mark for storage.
    pub skipped: usize,
}

/// Errors that abort cataloging.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Raised when the parsing service call fails.
    #[error("catalog parser failed: {0}")]
    Parser(#[source] ServiceError),
    /// Raised when the parser does not return one record per result.
    #[error("catalog parser returned {actual} records for {expected} results")]
    RecordCountMismatch {
        /// Number of results submitted.
        expected: usize,
        /// Number of records returned.
        actual: usize,
    },
    /// Raised when an entry cannot be stored.
    #[error("failed to store catalog entry for {catalog_source}: {error}")]
    Store {
        /// Catalog source of the entry that failed.
        catalog_source: String,
        /// Store failure.
        #[source]
        error: ServiceError,
    },
}

/// Filters execution results and files parsed output in the catalog.
#[derive(Clone, Debug)]
pub struct ResponseCataloger<P, S> {
    parser: P,
    store: S,
}

impl<P, S> ResponseCataloger<P, S>
where
    P: OutputParser,
    S: CatalogStore,
{
    /// Creates a cataloger over the given parser and store.
    #[must_use]
    pub const fn new(parser: P, store: S) -> Self {
        Self { parser, store }
    }

    /// Catalogs the results for `node` that carry catalog options.
    ///
    /// Entries are keyed by `node` as given. [`crate::job::SshJob`] passes
    /// the canonical id returned by the registry, not the identifier the job
    /// was targeted with, so lookups by a secondary identifier still file
    /// under the canonical node.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the parser or store fails as a whole.
    /// Per-record parse failures are logged and counted instead.
    pub async fn catalog(
        &self,
        node: &str,
        results: &[ExecutionResult],
    ) -> Result<CatalogSummary, CatalogError> {
        let eligible: Vec<ExecutionResult> = results
            .iter()
            .filter(|result| result.catalog_options.is_some())
            .cloned()
            .collect();
        debug!(
            node,
            total = results.len(),
            eligible = eligible.len(),
            "selected results for cataloging"
        );

        let mut summary = CatalogSummary {
            submitted: eligible.len(),
            ..CatalogSummary::default()
        };
        if eligible.is_empty() {
            return Ok(summary);
        }

        let records = self
            .parser
            .parse(&eligible)
            .await
            .map_err(CatalogError::Parser)?;
        if records.len() != eligible.len() {
            return Err(CatalogError::RecordCountMismatch {
                expected: eligible.len(),
                actual: records.len(),
            });
        }

        for record in records {
            match record {
                ParsedRecord::Failed { source, error } => {
                    error!(
                        node,
                        source = source.as_deref().unwrap_or(UNKNOWN_SOURCE),
                        error = %error,
                        "failed to parse catalog data"
                    );
                    summary.failed += 1;
                }
                ParsedRecord::Store { source, data } => {
                    self.store_entry(node, source, data).await?;
                    summary.stored += 1;
                }
                ParsedRecord::Insignificant { source } => {
                    info!(
                        node,
                        source = source.as_deref().unwrap_or(UNKNOWN_SOURCE),
                        "catalog result not marked as significant; not storing"
                    );
                    summary.skipped += 1;
                }
            }
        }

        Ok(summary)
    }

    async fn store_entry(
        &self,
        node: &str,
        source: Option<String>,
        data: Value,
    ) -> Result<(), CatalogError> {
        let catalog_source = source.unwrap_or_else(|| UNKNOWN_SOURCE.to_owned());
        let entry = CatalogEntry {
            node: node.to_owned(),
            source: catalog_source.clone(),
            data,
        };
        self.store
            .create(entry)
            .await
            .map_err(|error| CatalogError::Store {
                catalog_source,
                error,
            })
    }
}
