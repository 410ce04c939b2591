//! Transport backed by `ssh2` (libssh2).
//!
//! libssh2 is blocking, so connection setup and the output pump run on
//! Tokio's blocking pool. The pump polls both streams in non-blocking mode
//! and forwards chunks as they arrive.

use std::fmt::Display;
use std::io::{self, ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use ssh2::{Channel, Session};
use tokio::sync::mpsc;
use tokio::task::{self, JoinError};
use tracing::debug;

use super::{
    ChannelEvent, ChannelEvents, ConnectParams, Connection, Transport, TransportError,
    TransportFuture,
};

/// Connect timeout applied when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const EVENT_BUFFER: usize = 64;
const READ_CHUNK: usize = 8192;
const IDLE_POLL: Duration = Duration::from_millis(20);

/// Production transport connecting with libssh2.
#[derive(Clone, Debug)]
pub struct Ssh2Transport {
    connect_timeout: Duration,
}

impl Ssh2Transport {
    /// Creates a transport bounding TCP connect, handshake, and
    /// authentication by `connect_timeout`.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for Ssh2Transport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl Transport for Ssh2Transport {
    fn connect<'a>(&'a self, params: &'a ConnectParams) -> TransportFuture<'a, Box<dyn Connection>> {
        let owned = params.clone();
        let timeout = self.connect_timeout;
        Box::pin(async move {
            let session = task::spawn_blocking(move || open_session(&owned, timeout))
                .await
                .map_err(task_error)??;
            Ok(Box::new(Ssh2Connection { session }) as Box<dyn Connection>)
        })
    }
}

struct Ssh2Connection {
    session: Session,
}

impl Connection for Ssh2Connection {
    fn exec<'a>(&'a mut self, command: &'a str) -> TransportFuture<'a, ChannelEvents> {
        let session = self.session.clone();
        let owned_command = command.to_owned();
        Box::pin(async move {
            let exec_session = session.clone();
            let channel = task::spawn_blocking(move || start_command(&exec_session, &owned_command))
                .await
                .map_err(task_error)??;

            let (sender, receiver) = mpsc::channel(EVENT_BUFFER);
            drop(task::spawn_blocking(move || {
                pump_channel(&session, channel, &sender);
            }));
            Ok(receiver)
        })
    }

    fn end(&mut self) -> TransportFuture<'_, ()> {
        let session = self.session.clone();
        Box::pin(async move {
            task::spawn_blocking(move || session.disconnect(None, "command complete", None))
                .await
                .map_err(task_error)?
                .map_err(protocol_error)
        })
    }
}

fn open_session(params: &ConnectParams, timeout: Duration) -> Result<Session, TransportError> {
    let connect_error = |message: String| TransportError::Connect {
        host: params.host.clone(),
        message,
    };

    let tcp = connect_tcp(&params.host, params.port, timeout)
        .map_err(|err| connect_error(err.to_string()))?;
    let mut session = Session::new().map_err(|err| connect_error(err.to_string()))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
    session
        .handshake()
        .map_err(|err| connect_error(err.to_string()))?;
    authenticate(&session, params)?;
    // Commands may run for as long as they need once authenticated.
    session.set_timeout(0);
    Ok(session)
}

fn connect_tcp(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_error = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_error = Some(err),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(ErrorKind::NotFound, "host resolved to no addresses")
    }))
}

fn authenticate(session: &Session, params: &ConnectParams) -> Result<(), TransportError> {
    let username = params.username.as_str();
    let mut failures = Vec::new();

    if let Some(key) = &params.private_key
        && let Err(err) = session.userauth_pubkey_memory(username, None, key.expose(), None)
    {
        failures.push(format!("publickey: {err}"));
    }

    if !session.authenticated()
        && let Some(password) = &params.password
        && let Err(err) = session.userauth_password(username, password.expose())
    {
        failures.push(format!("password: {err}"));
    }

    if session.authenticated() {
        return Ok(());
    }

    let message = if failures.is_empty() {
        String::from("no password or private key configured")
    } else {
        failures.join("; ")
    };
    Err(TransportError::Authentication {
        username: username.to_owned(),
        message,
    })
}

fn start_command(session: &Session, command: &str) -> Result<Channel, TransportError> {
    let mut channel = session.channel_session().map_err(protocol_error)?;
    channel.exec(command).map_err(protocol_error)?;
    Ok(channel)
}

enum PumpStop {
    ReceiverGone,
    Failed(TransportError),
}

fn pump_channel(session: &Session, mut channel: Channel, events: &mpsc::Sender<ChannelEvent>) {
    let outcome = read_until_eof(session, &mut channel, events)
        .and_then(|()| wait_for_exit(session, &mut channel));

    let event = match outcome {
        Ok(exit_code) => ChannelEvent::Closed { exit_code },
        Err(PumpStop::Failed(err)) => ChannelEvent::Failed(err),
        Err(PumpStop::ReceiverGone) => {
            debug!("event receiver dropped; abandoning channel");
            return;
        }
    };

    if events.blocking_send(event).is_err() {
        debug!("event receiver dropped before channel close was delivered");
    }
}

fn read_until_eof(
    session: &Session,
    channel: &mut Channel,
    events: &mpsc::Sender<ChannelEvent>,
) -> Result<(), PumpStop> {
    session.set_blocking(false);
    let mut buffer = [0_u8; READ_CHUNK];

    loop {
        if events.is_closed() {
            return Err(PumpStop::ReceiverGone);
        }

        let mut progressed = false;
        if let Some(chunk) = read_chunk(channel, &mut buffer)? {
            forward(events, ChannelEvent::Stdout(chunk))?;
            progressed = true;
        }
        if let Some(chunk) = read_chunk(&mut channel.stderr(), &mut buffer)? {
            forward(events, ChannelEvent::Stderr(chunk))?;
            progressed = true;
        }

        if !progressed {
            if channel.eof() {
                return Ok(());
            }
            thread::sleep(IDLE_POLL);
        }
    }
}

fn read_chunk(reader: &mut impl Read, buffer: &mut [u8]) -> Result<Option<Vec<u8>>, PumpStop> {
    match reader.read(buffer) {
        Ok(0) => Ok(None),
        Ok(count) => Ok(buffer.get(..count).map(<[u8]>::to_vec)),
        Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
        Err(err) => Err(PumpStop::Failed(protocol_error(err))),
    }
}

fn forward(events: &mpsc::Sender<ChannelEvent>, event: ChannelEvent) -> Result<(), PumpStop> {
    events
        .blocking_send(event)
        .map_err(|_| PumpStop::ReceiverGone)
}

fn wait_for_exit(session: &Session, channel: &mut Channel) -> Result<Option<i32>, PumpStop> {
    session.set_blocking(true);
    channel
        .wait_close()
        .map_err(|err| PumpStop::Failed(protocol_error(err)))?;
    let status = channel
        .exit_status()
        .map_err(|err| PumpStop::Failed(protocol_error(err)))?;
    let signal = channel.exit_signal().ok().and_then(|sig| sig.exit_signal);
    if let Some(name) = &signal {
        debug!(signal = %name, "remote command terminated by signal");
    }
    Ok(exit_code(status, signal.as_deref()))
}

/// Maps libssh2's exit information onto a reported exit code.
///
/// libssh2 reports status 0 when no `exit-status` message arrived, which is
/// what happens when the remote process dies from a signal. A signal
/// therefore means no exit status at all.
pub(super) fn exit_code(status: i32, signal: Option<&str>) -> Option<i32> {
    signal.is_none().then_some(status)
}

fn protocol_error(err: impl Display) -> TransportError {
    TransportError::Protocol(err.to_string())
}

fn task_error(err: JoinError) -> TransportError {
    TransportError::Task(err.to_string())
}
