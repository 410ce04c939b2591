//! Test support utilities shared across unit and integration tests.
//!
//! The doubles here stand in for the SSH transport and the external
//! collaborators (node registry, decryption service, parser, catalog store)
//! so jobs can be driven deterministically without a network.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};

use tokio::sync::{Mutex, MutexGuard, mpsc};

use crate::catalog::{CatalogEntry, CatalogStore, OutputParser, ParsedRecord};
use crate::node::{
    ConnectionCredentials, EncryptedSecret, Node, NodeResolver, Secret, SecretDecryptor,
    ServiceError, ServiceFuture,
};
use crate::session::ExecutionResult;
use crate::transport::{
    ChannelEvent, ChannelEvents, ConnectParams, Connection, Transport, TransportError,
    TransportFuture,
};

fn lock<T>(mutex: &StdMutex<T>) -> StdMutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builds a node whose password and private key ciphertexts are `password`
/// and `key` respectively.
#[must_use]
pub fn sample_node(id: &str, host: &str) -> Node {
    Node {
        id: id.to_owned(),
        identifiers: vec![format!("{id}-alias")],
        credentials: ConnectionCredentials::new(
            host,
            "admin",
            EncryptedSecret::new("password"),
            EncryptedSecret::new("key"),
        ),
    }
}

/// Behaviour of one scripted connection, consumed by one `connect` call.
#[derive(Clone, Debug, Default)]
pub struct SessionScript {
    connect_error: Option<TransportError>,
    exec_error: Option<TransportError>,
    end_error: Option<TransportError>,
    events: Vec<ChannelEvent>,
    hang: bool,
}

impl SessionScript {
    /// Creates an empty script. Without a close event the channel ends
    /// abruptly once the scripted events are drained.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a command that prints nothing and exits with `code`.
    #[must_use]
    pub fn exit(code: i32) -> Self {
        Self::new().close(code)
    }

    /// Emits `text` on stdout.
    #[must_use]
    pub fn stdout(mut self, text: &str) -> Self {
        self.events.push(ChannelEvent::Stdout(text.as_bytes().to_vec()));
        self
    }

    /// Emits `text` on stderr.
    #[must_use]
    pub fn stderr(mut self, text: &str) -> Self {
        self.events.push(ChannelEvent::Stderr(text.as_bytes().to_vec()));
        self
    }

    /// Closes the channel with exit status `code`.
    #[must_use]
    pub fn close(mut self, code: i32) -> Self {
        self.events.push(ChannelEvent::Closed {
            exit_code: Some(code),
        });
        self
    }

    /// Closes the channel without reporting an exit status.
    #[must_use]
    pub fn close_without_status(mut self) -> Self {
        self.events.push(ChannelEvent::Closed { exit_code: None });
        self
    }

    /// Reports a transport failure mid-command.
    #[must_use]
    pub fn fail(mut self, error: TransportError) -> Self {
        self.events.push(ChannelEvent::Failed(error));
        self
    }

    /// Makes `connect` fail with `error`.
    #[must_use]
    pub fn connect_failure(mut self, error: TransportError) -> Self {
        self.connect_error = Some(error);
        self
    }

    /// Makes `exec` fail with `error`.
    #[must_use]
    pub fn exec_failure(mut self, error: TransportError) -> Self {
        self.exec_error = Some(error);
        self
    }

    /// Makes `end` fail with `error`.
    #[must_use]
    pub fn end_failure(mut self, error: TransportError) -> Self {
        self.end_error = Some(error);
        self
    }

    /// Keeps the channel open after the scripted events so the command never
    /// finishes.
    #[must_use]
    pub const fn hang(mut self) -> Self {
        self.hang = true;
        self
    }
}

/// Call observed by [`ScriptedTransport`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransportCall {
    /// A connection attempt with the plaintext parameters supplied.
    Connect {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
        /// Remote user.
        username: String,
        /// Decrypted password, when non-blank.
        password: Option<String>,
        /// Decrypted private key, when non-blank.
        private_key: Option<String>,
    },
    /// A command started on an open connection.
    Exec {
        /// Command text.
        command: String,
    },
    /// A termination request.
    End,
}

#[derive(Debug, Default)]
struct TransportState {
    scripts: VecDeque<SessionScript>,
    calls: Vec<TransportCall>,
}

/// Transport that replays queued [`SessionScript`]s in FIFO order and
/// records every call.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTransport {
    state: Arc<StdMutex<TransportState>>,
}

impl ScriptedTransport {
    /// Creates a transport with no queued sessions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the behaviour for the next connection.
    pub fn push_session(&self, script: SessionScript) {
        lock(&self.state).scripts.push_back(script);
    }

    /// Returns a snapshot of the calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<TransportCall> {
        lock(&self.state).calls.clone()
    }

    /// Returns the commands executed so far, in order.
    #[must_use]
    pub fn executed_commands(&self) -> Vec<String> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Exec { command } => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: TransportCall) {
        lock(&self.state).calls.push(call);
    }
}

impl Transport for ScriptedTransport {
    fn connect<'a>(&'a self, params: &'a ConnectParams) -> TransportFuture<'a, Box<dyn Connection>> {
        Box::pin(async move {
            self.record(TransportCall::Connect {
                host: params.host.clone(),
                port: params.port,
                username: params.username.clone(),
                password: params.password.as_ref().map(|secret| secret.expose().to_owned()),
                private_key: params
                    .private_key
                    .as_ref()
                    .map(|secret| secret.expose().to_owned()),
            });
            let script = lock(&self.state).scripts.pop_front().ok_or_else(|| {
                TransportError::Connect {
                    host: params.host.clone(),
                    message: String::from("no scripted session available"),
                }
            })?;
            if let Some(error) = script.connect_error.clone() {
                return Err(error);
            }
            let connection: Box<dyn Connection> = Box::new(ScriptedConnection {
                transport: self.clone(),
                script,
                held: None,
            });
            Ok(connection)
        })
    }
}

struct ScriptedConnection {
    transport: ScriptedTransport,
    script: SessionScript,
    held: Option<mpsc::Sender<ChannelEvent>>,
}

impl Connection for ScriptedConnection {
    fn exec<'a>(&'a mut self, command: &'a str) -> TransportFuture<'a, ChannelEvents> {
        Box::pin(async move {
            self.transport.record(TransportCall::Exec {
                command: command.to_owned(),
            });
            if let Some(error) = self.script.exec_error.clone() {
                return Err(error);
            }
            let events = std::mem::take(&mut self.script.events);
            let (sender, receiver) = mpsc::channel(events.len().max(1));
            for event in events {
                sender
                    .try_send(event)
                    .map_err(|err| TransportError::Protocol(err.to_string()))?;
            }
            if self.script.hang {
                self.held = Some(sender);
            }
            Ok(receiver)
        })
    }

    fn end(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.transport.record(TransportCall::End);
            self.held = None;
            self.script.end_error.clone().map_or(Ok(()), Err)
        })
    }
}

/// Decryptor that returns ciphertext unchanged and records each call.
#[derive(Clone, Debug, Default)]
pub struct RecordingDecryptor {
    calls: Arc<StdMutex<Vec<String>>>,
    failing: Option<String>,
}

impl RecordingDecryptor {
    /// Creates a passthrough decryptor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a decryptor that fails for `ciphertext`.
    #[must_use]
    pub fn failing_on(ciphertext: &str) -> Self {
        Self {
            calls: Arc::default(),
            failing: Some(ciphertext.to_owned()),
        }
    }

    /// Returns the ciphertexts passed to `decrypt`, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

impl SecretDecryptor for RecordingDecryptor {
    fn decrypt(&self, secret: &EncryptedSecret) -> Result<Secret, ServiceError> {
        let ciphertext = secret.ciphertext();
        lock(&self.calls).push(ciphertext.to_owned());
        if self.failing.as_deref() == Some(ciphertext) {
            return Err(ServiceError::new("decryption", "ciphertext rejected"));
        }
        Ok(Secret::new(ciphertext))
    }
}

/// Resolver over a fixed set of nodes that records each lookup.
#[derive(Clone, Debug, Default)]
pub struct StaticResolver {
    nodes: Vec<Node>,
    lookups: Arc<StdMutex<Vec<String>>>,
}

impl StaticResolver {
    /// Creates a resolver over `nodes`.
    #[must_use]
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes,
            lookups: Arc::default(),
        }
    }

    /// Returns the identifiers looked up so far.
    #[must_use]
    pub fn lookups(&self) -> Vec<String> {
        lock(&self.lookups).clone()
    }
}

impl NodeResolver for StaticResolver {
    fn resolve<'a>(&'a self, identifier: &'a str) -> ServiceFuture<'a, Node> {
        Box::pin(async move {
            lock(&self.lookups).push(identifier.to_owned());
            self.nodes
                .iter()
                .find(|node| node.matches(identifier))
                .cloned()
                .ok_or_else(|| ServiceError::new("node registry", format!("unknown node {identifier}")))
        })
    }
}

#[derive(Debug, Default)]
struct ParserState {
    responses: VecDeque<Result<Vec<ParsedRecord>, ServiceError>>,
    inputs: Vec<Vec<ExecutionResult>>,
}

/// Parser that returns queued responses and records the results it was
/// given.
#[derive(Clone, Debug, Default)]
pub struct ScriptedParser {
    state: Arc<StdMutex<ParserState>>,
}

impl ScriptedParser {
    /// Creates a parser with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues records for the next call.
    pub fn push_records(&self, records: Vec<ParsedRecord>) {
        lock(&self.state).responses.push_back(Ok(records));
    }

    /// Queues a whole-call failure for the next call.
    pub fn push_failure(&self, message: &str) {
        lock(&self.state)
            .responses
            .push_back(Err(ServiceError::new("parser", message)));
    }

    /// Returns the result lists passed to `parse`, one per call.
    #[must_use]
    pub fn inputs(&self) -> Vec<Vec<ExecutionResult>> {
        lock(&self.state).inputs.clone()
    }
}

impl OutputParser for ScriptedParser {
    fn parse<'a>(&'a self, results: &'a [ExecutionResult]) -> ServiceFuture<'a, Vec<ParsedRecord>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.inputs.push(results.to_vec());
            state
                .responses
                .pop_front()
                .unwrap_or_else(|| Err(ServiceError::new("parser", "no scripted response available")))
        })
    }
}

/// Catalog store that keeps entries in memory.
#[derive(Clone, Debug, Default)]
pub struct RecordingStore {
    entries: Arc<StdMutex<Vec<CatalogEntry>>>,
    failure: Option<ServiceError>,
}

impl RecordingStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store whose every write fails with `message`.
    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self {
            entries: Arc::default(),
            failure: Some(ServiceError::new("catalog store", message)),
        }
    }

    /// Returns the entries stored so far.
    #[must_use]
    pub fn entries(&self) -> Vec<CatalogEntry> {
        lock(&self.entries).clone()
    }
}

impl CatalogStore for RecordingStore {
    fn create(&self, entry: CatalogEntry) -> ServiceFuture<'_, ()> {
        Box::pin(async move {
            if let Some(error) = self.failure.clone() {
                return Err(error);
            }
            lock(&self.entries).push(entry);
            Ok(())
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    /// Empty values remove the variable for the guard's lifetime.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                if value.is_empty() {
                    env::remove_var(key);
                } else {
                    env::set_var(key, value);
                }
            }
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
