//! Node credentials and the external collaborator seams used to obtain them.
//!
//! The node registry and the secret decryption service live outside this
//! crate. They are modelled as traits so the job can be wired with real
//! services, the file-backed implementations in [`crate::local`], or
//! scripted doubles in tests.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;
use thiserror::Error;

/// SSH port used for every connection.
pub const SSH_PORT: u16 = 22;

/// Future returned by external collaborator calls.
pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ServiceError>> + Send + 'a>>;

/// Failure reported by an external collaborator (registry, decryption,
/// parser, or catalog store).
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{service} failed: {message}")]
pub struct ServiceError {
    /// Name of the collaborator that failed.
    pub service: &'static str,
    /// Human-readable description of the failure.
    pub message: String,
}

impl ServiceError {
    /// Creates an error for `service` with the given message.
    #[must_use]
    pub fn new(service: &'static str, message: impl Into<String>) -> Self {
        Self {
            service,
            message: message.into(),
        }
    }
}

/// Ciphertext as stored in the node registry.
#[derive(Clone, Default, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct EncryptedSecret(String);

impl EncryptedSecret {
    /// Wraps stored ciphertext.
    #[must_use]
    pub fn new(ciphertext: impl Into<String>) -> Self {
        Self(ciphertext.into())
    }

    /// Returns the stored ciphertext.
    #[must_use]
    pub fn ciphertext(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EncryptedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptedSecret(..)")
    }
}

/// Decrypted secret material. Never printed, only handed to the transport.
#[derive(Clone, Eq, PartialEq)]
pub struct Secret(String);

impl Secret {
    /// Wraps decrypted plaintext.
    #[must_use]
    pub fn new(plaintext: impl Into<String>) -> Self {
        Self(plaintext.into())
    }

    /// Exposes the plaintext to the transport.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns `true` when the plaintext is empty or whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([redacted])")
    }
}

/// SSH settings for a node, as held by the registry.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCredentials {
    /// Host name or address to connect to.
    pub host: String,
    /// TCP port; always [`SSH_PORT`].
    #[serde(skip, default = "ssh_port")]
    pub port: u16,
    /// Remote user name.
    #[serde(alias = "user")]
    pub username: String,
    /// Encrypted password.
    #[serde(default)]
    pub password: EncryptedSecret,
    /// Encrypted private key in PEM form.
    #[serde(default)]
    pub private_key: EncryptedSecret,
}

const fn ssh_port() -> u16 {
    SSH_PORT
}

impl ConnectionCredentials {
    /// Creates credentials for `host` and `username` on the SSH port.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: EncryptedSecret,
        private_key: EncryptedSecret,
    ) -> Self {
        Self {
            host: host.into(),
            port: SSH_PORT,
            username: username.into(),
            password,
            private_key,
        }
    }
}

/// A resolved node and its connection settings.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Canonical node identifier.
    pub id: String,
    /// Secondary identifiers the node can also be looked up by.
    #[serde(default)]
    pub identifiers: Vec<String>,
    /// SSH settings used to reach the node.
    #[serde(rename = "sshSettings")]
    pub credentials: ConnectionCredentials,
}

impl Node {
    /// Returns `true` when `identifier` names this node.
    #[must_use]
    pub fn matches(&self, identifier: &str) -> bool {
        self.id == identifier || self.identifiers.iter().any(|known| known == identifier)
    }
}

/// Looks up nodes by identifier.
pub trait NodeResolver: Send + Sync {
    /// Resolves `identifier` to a node, failing when it is unknown.
    fn resolve<'a>(&'a self, identifier: &'a str) -> ServiceFuture<'a, Node>;
}

/// Decrypts secrets stored in the node registry.
pub trait SecretDecryptor: Send + Sync {
    /// Decrypts `secret`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] when the ciphertext cannot be decrypted.
    fn decrypt(&self, secret: &EncryptedSecret) -> Result<Secret, ServiceError>;
}

impl<T: NodeResolver + ?Sized> NodeResolver for &T {
    fn resolve<'a>(&'a self, identifier: &'a str) -> ServiceFuture<'a, Node> {
        (**self).resolve(identifier)
    }
}

impl<T: SecretDecryptor + ?Sized> SecretDecryptor for &T {
    fn decrypt(&self, secret: &EncryptedSecret) -> Result<Secret, ServiceError> {
        (**self).decrypt(secret)
    }
}
