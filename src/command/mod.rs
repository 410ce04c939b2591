//! Normalisation of job command options into [`CommandSpec`] values.
//!
//! Job definitions accept a bare command string, a command object, or a list
//! mixing both. All validation happens here, when the job is constructed, so a
//! malformed definition fails before any connection is attempted.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Exit code that every command accepts as success.
pub const SUCCESS_EXIT_CODE: i32 = 0;

const COMMAND_KEY: &str = "command";
const CATALOG_KEY: &str = "catalog";
const RETRIES_KEY: &str = "retries";
const IGNORED_KEYS: &[&str] = &["source", "format"];
const RESERVED_KEYS: &[&str] = &["downloadUrl", "acceptedResponseCodes"];

/// Set of process exit codes treated as success.
///
/// The set is the caller-supplied codes unioned with `{0}`, so `0` is always
/// a member.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AcceptedCodes(BTreeSet<i32>);

impl AcceptedCodes {
    /// Builds the accepted set from `codes` plus the success code.
    #[must_use]
    pub fn new(codes: impl IntoIterator<Item = i32>) -> Self {
        let mut set: BTreeSet<i32> = codes.into_iter().collect();
        set.insert(SUCCESS_EXIT_CODE);
        Self(set)
    }

    /// Returns `true` when `code` is a member of the set.
    #[must_use]
    pub fn contains(&self, code: i32) -> bool {
        self.0.contains(&code)
    }

    /// Iterates the accepted codes in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.0.iter().copied()
    }
}

impl Default for AcceptedCodes {
    fn default() -> Self {
        Self::new(std::iter::empty())
    }
}

impl FromIterator<i32> for AcceptedCodes {
    fn from_iter<I: IntoIterator<Item = i32>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Display for AcceptedCodes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .iter()
            .map(|code| code.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{{{rendered}}}")
    }
}

/// Catalog intent attached to a command: where its parsed output should be
/// filed and how the raw output is formatted.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CatalogOptions {
    /// Catalog source name the parsed output is stored under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Output format hint for the parser (for example `json`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl CatalogOptions {
    /// Creates catalog options with both a source and a format.
    #[must_use]
    pub fn new(source: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            format: Some(format.into()),
        }
    }
}

/// A normalised remote command. Built once by [`CommandSpecBuilder`] and
/// never mutated afterwards.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandSpec {
    command: String,
    accepted_codes: AcceptedCodes,
    catalog: Option<CatalogOptions>,
    retries: Option<u32>,
}

impl CommandSpec {
    /// Creates a spec for `command` accepting only the success code.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            accepted_codes: AcceptedCodes::default(),
            catalog: None,
            retries: None,
        }
    }

    /// Attaches catalog options to the spec.
    #[must_use]
    pub fn with_catalog(mut self, catalog: CatalogOptions) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Replaces the accepted exit codes (`0` is always retained).
    #[must_use]
    pub fn with_accepted_codes(mut self, codes: AcceptedCodes) -> Self {
        self.accepted_codes = codes;
        self
    }

    /// The command line executed on the remote host.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Exit codes treated as success.
    #[must_use]
    pub const fn accepted_codes(&self) -> &AcceptedCodes {
        &self.accepted_codes
    }

    /// Catalog intent, when the output should be parsed and stored.
    #[must_use]
    pub const fn catalog(&self) -> Option<&CatalogOptions> {
        self.catalog.as_ref()
    }

    /// Retry count supplied by the job definition.
    ///
    /// The value is carried for completeness; the runner never retries.
    #[must_use]
    pub const fn retries(&self) -> Option<u32> {
        self.retries
    }
}

/// Errors raised while normalising command options.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandSpecError {
    /// Raised for options that are reserved but not implemented.
    #[error("{option} option is not supported yet (command {index})")]
    NotYetSupported {
        /// Position of the offending command after flattening.
        index: usize,
        /// Name of the reserved option.
        option: String,
    },
    /// Raised for options outside the supported set.
    #[error("{option} option is not supported (command {index})")]
    UnsupportedOption {
        /// Position of the offending command after flattening.
        index: usize,
        /// Name of the unknown option.
        option: String,
    },
    /// Raised when a command object has no `command` key.
    #[error("command {index} is missing the command option")]
    MissingCommand {
        /// Position of the offending command after flattening.
        index: usize,
    },
    /// Raised when a known option carries a value of the wrong shape.
    #[error("command {index}: {option} must be {expected}")]
    InvalidValue {
        /// Position of the offending command after flattening.
        index: usize,
        /// Name of the option with the bad value.
        option: String,
        /// Description of the expected value.
        expected: &'static str,
    },
    /// Raised when a command entry is neither a string nor an object.
    #[error("command {index} must be a string or an object, found {found}")]
    UnsupportedShape {
        /// Position of the offending command after flattening.
        index: usize,
        /// JSON type that was found instead.
        found: &'static str,
    },
}

/// Turns raw command options into a list of [`CommandSpec`] values.
#[derive(Clone, Debug, Default)]
pub struct CommandSpecBuilder {
    accepted_codes: AcceptedCodes,
}

impl CommandSpecBuilder {
    /// Creates a builder whose specs accept only exit code `0`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the job-level accepted exit codes applied to every spec.
    #[must_use]
    pub fn accepted_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.accepted_codes = AcceptedCodes::new(codes);
        self
    }

    /// Normalises `raw` into command specs, flattening one level of nesting.
    ///
    /// # Errors
    ///
    /// Returns [`CommandSpecError`] when an entry has an unsupported shape,
    /// uses a reserved or unknown option, or carries an invalid value.
    pub fn build(&self, raw: &Value) -> Result<Vec<CommandSpec>, CommandSpecError> {
        let entries: Vec<&Value> = match raw {
            Value::Array(items) => items.iter().collect(),
            single => vec![single],
        };

        entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| self.build_entry(index, entry))
            .collect()
    }

    fn build_entry(&self, index: usize, entry: &Value) -> Result<CommandSpec, CommandSpecError> {
        match entry {
            Value::String(_) => Ok(CommandSpec::new(parse_command(index, entry)?)
                .with_accepted_codes(self.accepted_codes.clone())),
            Value::Object(fields) => self.build_object(index, fields),
            other => Err(CommandSpecError::UnsupportedShape {
                index,
                found: value_kind(other),
            }),
        }
    }

    fn build_object(
        &self,
        index: usize,
        fields: &Map<String, Value>,
    ) -> Result<CommandSpec, CommandSpecError> {
        for key in fields.keys() {
            check_option(index, key)?;
        }

        let command = fields
            .get(COMMAND_KEY)
            .ok_or(CommandSpecError::MissingCommand { index })
            .and_then(|value| parse_command(index, value))?;
        let catalog = fields
            .get(CATALOG_KEY)
            .map(|value| parse_catalog(index, value))
            .transpose()?;
        let retries = fields
            .get(RETRIES_KEY)
            .map(|value| parse_retries(index, value))
            .transpose()?;

        Ok(CommandSpec {
            command,
            accepted_codes: self.accepted_codes.clone(),
            catalog,
            retries,
        })
    }
}

fn check_option(index: usize, key: &str) -> Result<(), CommandSpecError> {
    if RESERVED_KEYS.contains(&key) {
        return Err(CommandSpecError::NotYetSupported {
            index,
            option: key.to_owned(),
        });
    }
    if [COMMAND_KEY, CATALOG_KEY, RETRIES_KEY].contains(&key) || IGNORED_KEYS.contains(&key) {
        return Ok(());
    }
    Err(CommandSpecError::UnsupportedOption {
        index,
        option: key.to_owned(),
    })
}

fn parse_command(index: usize, value: &Value) -> Result<String, CommandSpecError> {
    match value.as_str() {
        Some(command) if !command.trim().is_empty() => Ok(command.to_owned()),
        _ => Err(invalid(index, COMMAND_KEY, "a string that is not empty or only whitespace")),
    }
}

fn parse_catalog(index: usize, value: &Value) -> Result<CatalogOptions, CommandSpecError> {
    let Some(fields) = value.as_object() else {
        return Err(invalid(index, CATALOG_KEY, "an object with source and format"));
    };
    Ok(CatalogOptions {
        source: optional_string(index, fields, "source")?,
        format: optional_string(index, fields, "format")?,
    })
}

fn optional_string(
    index: usize,
    fields: &Map<String, Value>,
    key: &'static str,
) -> Result<Option<String>, CommandSpecError> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(_) => Err(CommandSpecError::InvalidValue {
            index,
            option: format!("{CATALOG_KEY}.{key}"),
            expected: "a string",
        }),
    }
}

fn parse_retries(index: usize, value: &Value) -> Result<u32, CommandSpecError> {
    value
        .as_u64()
        .and_then(|count| u32::try_from(count).ok())
        .ok_or_else(|| invalid(index, RETRIES_KEY, "a non-negative integer"))
}

fn invalid(index: usize, option: &str, expected: &'static str) -> CommandSpecError {
    CommandSpecError::InvalidValue {
        index,
        option: option.to_owned(),
        expected,
    }
}

const fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a nested list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests;
