//! Unit tests for the libssh2 transport.

use std::net::TcpListener;
use std::time::Duration;

use rstest::rstest;

use super::*;

fn params(host: &str, port: u16) -> ConnectParams {
    ConnectParams {
        host: host.to_owned(),
        port,
        username: String::from("admin"),
        password: Some(Secret::new("secret")),
        private_key: None,
    }
}

fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local address").port()
}

#[tokio::test]
async fn refused_connection_is_a_connect_error() {
    let port = closed_port();
    let transport = Ssh2Transport::new(Duration::from_secs(2));

    let Err(err) = transport.connect(&params("127.0.0.1", port)).await else {
        panic!("connection to a closed port should fail");
    };

    let TransportError::Connect { host, .. } = err else {
        panic!("expected Connect error, got {err:?}");
    };
    assert_eq!(host, "127.0.0.1");
}

#[rstest]
#[case::connect(
    TransportError::Connect { host: String::from("db-1"), message: String::from("refused") },
    "failed to connect to db-1: refused"
)]
#[case::auth(
    TransportError::Authentication { username: String::from("root"), message: String::from("denied") },
    "authentication failed for root: denied"
)]
#[case::closed(TransportError::ChannelClosed, "channel closed without reporting an exit status")]
fn transport_errors_render_context(#[case] err: TransportError, #[case] expected: &str) {
    assert_eq!(err.to_string(), expected);
}

#[test]
fn default_transport_uses_thirty_second_connect_timeout() {
    let rendered = format!("{:?}", Ssh2Transport::default());

    assert!(rendered.contains("30s"), "unexpected debug output: {rendered}");
}

#[rstest]
#[case::clean_exit(0, None, Some(0))]
#[case::failing_exit(127, None, Some(127))]
#[case::killed(0, Some("KILL"), None)]
#[case::terminated_with_status(1, Some("TERM"), None)]
fn signal_termination_reports_no_exit_status(
    #[case] status: i32,
    #[case] signal: Option<&str>,
    #[case] expected: Option<i32>,
) {
    assert_eq!(ssh::exit_code(status, signal), expected);
}
