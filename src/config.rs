//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Default location of the node inventory.
pub const DEFAULT_INVENTORY_PATH: &str = "nodes.json";

/// Default location of the JSON-lines catalog.
pub const DEFAULT_CATALOG_PATH: &str = "catalog.jsonl";

/// Runtime settings for the `sshjob` binary, merged from defaults,
/// configuration files, and environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SSHJOB",
    discovery(
        app_name = "sshjob",
        env_var = "SSHJOB_CONFIG_PATH",
        config_file_name = "sshjob.toml",
        dotfile_name = ".sshjob.toml",
        project_file_name = "sshjob.toml"
    )
)]
pub struct JobConfig {
    /// Path to the JSON node inventory.
    #[ortho_config(default = DEFAULT_INVENTORY_PATH.to_owned())]
    pub inventory_path: String,
    /// Path of the JSON-lines file catalog entries are appended to.
    #[ortho_config(default = DEFAULT_CATALOG_PATH.to_owned())]
    pub catalog_path: String,
    /// Seconds allowed for TCP connect, handshake, and authentication.
    #[ortho_config(default = 30)]
    pub connect_timeout_secs: u64,
    /// Optional per-command limit in seconds. Unset means commands may run
    /// indefinitely.
    pub command_timeout_secs: Option<u64>,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn guidance(&self) -> String {
        format!(
            "{}: set {} or add {} to sshjob.toml",
            self.description, self.env_var, self.toml_key
        )
    }
}

const INVENTORY_PATH: FieldMetadata = FieldMetadata::new(
    "node inventory path",
    "SSHJOB_INVENTORY_PATH",
    "inventory_path",
);
const CATALOG_PATH: FieldMetadata =
    FieldMetadata::new("catalog path", "SSHJOB_CATALOG_PATH", "catalog_path");
const CONNECT_TIMEOUT: FieldMetadata = FieldMetadata::new(
    "connect timeout",
    "SSHJOB_CONNECT_TIMEOUT_SECS",
    "connect_timeout_secs",
);
const COMMAND_TIMEOUT: FieldMetadata = FieldMetadata::new(
    "command timeout",
    "SSHJOB_COMMAND_TIMEOUT_SECS",
    "command_timeout_secs",
);

impl JobConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("sshjob")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply each value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a path is blank and
    /// [`ConfigError::InvalidValue`] when a timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(&self.inventory_path, &INVENTORY_PATH)?;
        Self::require_field(&self.catalog_path, &CATALOG_PATH)?;
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "{} must be greater than zero",
                CONNECT_TIMEOUT.guidance()
            )));
        }
        if self.command_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue(format!(
                "{} must be greater than zero when set",
                COMMAND_TIMEOUT.guidance()
            )));
        }
        Ok(())
    }

    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Per-command timeout, when configured.
    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}",
                metadata.guidance()
            )));
        }
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is out of range.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
