//! File-backed collaborators for running jobs outside the orchestration
//! platform.
//!
//! Nodes come from a JSON inventory, secrets in that inventory are stored as
//! plaintext, output is parsed according to the command's declared format,
//! and catalog entries are appended to a JSON-lines file.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use serde_json::Value;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::catalog::{CatalogEntry, CatalogStore, OutputParser, ParsedRecord};
use crate::node::{
    EncryptedSecret, Node, NodeResolver, Secret, SecretDecryptor, ServiceError, ServiceFuture,
};
use crate::session::ExecutionResult;

const INVENTORY_SERVICE: &str = "node inventory";
const CATALOG_SERVICE: &str = "catalog file";

#[derive(Debug, Deserialize)]
struct Inventory {
    #[serde(default)]
    nodes: Vec<Node>,
}

/// Resolves nodes from a JSON inventory file.
///
/// The file is re-read on every lookup so edits take effect without a
/// restart.
#[derive(Clone, Debug)]
pub struct FileNodeResolver {
    path: Utf8PathBuf,
}

impl FileNodeResolver {
    /// Creates a resolver over the inventory at `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Inventory location.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    async fn load(&self) -> Result<Inventory, ServiceError> {
        let raw = fs::read_to_string(&self.path).await.map_err(|err| {
            ServiceError::new(INVENTORY_SERVICE, format!("failed to read {}: {err}", self.path))
        })?;
        serde_json::from_str(&raw).map_err(|err| {
            ServiceError::new(INVENTORY_SERVICE, format!("failed to parse {}: {err}", self.path))
        })
    }
}

impl NodeResolver for FileNodeResolver {
    fn resolve<'a>(&'a self, identifier: &'a str) -> ServiceFuture<'a, Node> {
        Box::pin(async move {
            let inventory = self.load().await?;
            debug!(path = %self.path, nodes = inventory.nodes.len(), "loaded node inventory");
            inventory
                .nodes
                .into_iter()
                .find(|node| node.matches(identifier))
                .ok_or_else(|| {
                    ServiceError::new(
                        INVENTORY_SERVICE,
                        format!("no node matches identifier {identifier}"),
                    )
                })
        })
    }
}

/// Treats stored secrets as plaintext.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughDecryptor;

impl SecretDecryptor for PassthroughDecryptor {
    fn decrypt(&self, secret: &EncryptedSecret) -> Result<Secret, ServiceError> {
        Ok(Secret::new(secret.ciphertext()))
    }
}

/// Parses command output according to `catalogOptions.format`.
///
/// `json` parses stdout as JSON; `raw` or no format stores stdout as a
/// string. Every successfully parsed result is marked for storage.
#[derive(Clone, Copy, Debug, Default)]
pub struct FormatParser;

impl FormatParser {
    fn classify(result: &ExecutionResult) -> ParsedRecord {
        let options = result.catalog_options.clone().unwrap_or_default();
        let source = options.source;
        let Some(stdout) = result.stdout.as_deref() else {
            return ParsedRecord::Failed {
                source,
                error: format!("command `{}` produced no output", result.cmd),
            };
        };
        match options.format.as_deref() {
            Some("json") => match serde_json::from_str::<Value>(stdout) {
                Ok(data) => ParsedRecord::Store { source, data },
                Err(err) => ParsedRecord::Failed {
                    source,
                    error: format!("invalid JSON output: {err}"),
                },
            },
            None | Some("raw") => ParsedRecord::Store {
                source,
                data: Value::String(stdout.to_owned()),
            },
            Some(other) => ParsedRecord::Failed {
                source,
                error: format!("unsupported output format {other}"),
            },
        }
    }
}

impl OutputParser for FormatParser {
    fn parse<'a>(&'a self, results: &'a [ExecutionResult]) -> ServiceFuture<'a, Vec<ParsedRecord>> {
        Box::pin(async move { Ok(results.iter().map(Self::classify).collect()) })
    }
}

/// Appends catalog entries to a file, one JSON document per line.
#[derive(Clone, Debug)]
pub struct JsonLinesCatalogStore {
    path: Utf8PathBuf,
}

impl JsonLinesCatalogStore {
    /// Creates a store appending to `path`. The file is created on first
    /// write.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Catalog file location.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl CatalogStore for JsonLinesCatalogStore {
    fn create(&self, entry: CatalogEntry) -> ServiceFuture<'_, ()> {
        Box::pin(async move {
            let mut line = serde_json::to_vec(&entry)
                .map_err(|err| ServiceError::new(CATALOG_SERVICE, err.to_string()))?;
            line.push(b'\n');
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|err| {
                    ServiceError::new(CATALOG_SERVICE, format!("failed to open {}: {err}", self.path))
                })?;
            file.write_all(&line).await.map_err(|err| {
                ServiceError::new(CATALOG_SERVICE, format!("failed to write {}: {err}", self.path))
            })?;
            file.flush()
                .await
                .map_err(|err| ServiceError::new(CATALOG_SERVICE, err.to_string()))
        })
    }
}

#[cfg(test)]
mod tests;
