//! Unit tests for remote sessions.

use rstest::{fixture, rstest};

use super::*;
use crate::node::EncryptedSecret;
use crate::test_support::{
    RecordingDecryptor, ScriptedTransport, SessionScript, TransportCall, sample_node,
};

#[fixture]
fn credentials() -> ConnectionCredentials {
    sample_node("node-1", "10.0.0.5").credentials
}

async fn run_script(
    script: SessionScript,
    accepted: &AcceptedCodes,
    credentials: &ConnectionCredentials,
) -> (Result<ExecutionResult, SessionError>, ScriptedTransport, RecordingDecryptor) {
    let transport = ScriptedTransport::new();
    transport.push_session(script);
    let decryptor = RecordingDecryptor::new();
    let outcome = RemoteSession::new(&transport, &decryptor, accepted)
        .execute("uname -a", credentials)
        .await;
    (outcome, transport, decryptor)
}

#[rstest]
#[tokio::test]
async fn concatenates_stdout_chunks_in_arrival_order(credentials: ConnectionCredentials) {
    let script = SessionScript::new().stdout("test ").stdout("string").close(0);
    let (outcome, _, _) = run_script(script, &AcceptedCodes::default(), &credentials).await;

    let result = outcome.expect("session should succeed");
    assert_eq!(result.stdout.as_deref(), Some("test string"));
    assert_eq!(result.stderr, None);
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.cmd, "uname -a");
    assert_eq!(result.catalog_options, None);
}

#[rstest]
#[tokio::test]
async fn rejects_unaccepted_exit_code_with_partial_output(credentials: ConnectionCredentials) {
    let script = SessionScript::new().stderr("errData").close(127);
    let (outcome, _, _) = run_script(script, &AcceptedCodes::default(), &credentials).await;

    let Err(SessionError::UnacceptedExitCode { result, accepted }) = outcome else {
        panic!("expected UnacceptedExitCode, got {outcome:?}");
    };
    assert_eq!(result.stderr.as_deref(), Some("errData"));
    assert_eq!(result.stdout, None);
    assert_eq!(result.exit_code, Some(127));
    assert_eq!(accepted, AcceptedCodes::default());
}

#[rstest]
#[tokio::test]
async fn accepts_additional_codes(credentials: ConnectionCredentials) {
    let accepted = AcceptedCodes::new([1, 127]);
    let script = SessionScript::new().stdout("partial").close(127);
    let (outcome, _, _) = run_script(script, &accepted, &credentials).await;

    let result = outcome.expect("127 is accepted");
    assert_eq!(result.exit_code, Some(127));
}

#[rstest]
#[tokio::test]
async fn missing_exit_status_is_not_accepted(credentials: ConnectionCredentials) {
    let script = SessionScript::new().stdout("done").close_without_status();
    let (outcome, _, _) = run_script(script, &AcceptedCodes::default(), &credentials).await;

    let Err(SessionError::UnacceptedExitCode { result, .. }) = outcome else {
        panic!("expected UnacceptedExitCode, got {outcome:?}");
    };
    assert_eq!(result.exit_code, None);
    assert_eq!(result.stdout.as_deref(), Some("done"));
}

#[rstest]
#[tokio::test]
async fn decrypts_both_secrets_before_connecting(credentials: ConnectionCredentials) {
    let (outcome, transport, decryptor) =
        run_script(SessionScript::exit(0), &AcceptedCodes::default(), &credentials).await;

    outcome.expect("session should succeed");
    assert_eq!(decryptor.calls(), vec!["password", "key"]);
    assert_eq!(
        transport.calls().first(),
        Some(&TransportCall::Connect {
            host: String::from("10.0.0.5"),
            port: 22,
            username: String::from("admin"),
            password: Some(String::from("password")),
            private_key: Some(String::from("key")),
        })
    );
}

#[tokio::test]
async fn blank_secrets_are_not_offered_to_the_transport() {
    let credentials = ConnectionCredentials::new(
        "10.0.0.6",
        "root",
        EncryptedSecret::new("hunter2"),
        EncryptedSecret::default(),
    );
    let (outcome, transport, decryptor) =
        run_script(SessionScript::exit(0), &AcceptedCodes::default(), &credentials).await;

    outcome.expect("session should succeed");
    assert_eq!(decryptor.calls().len(), 2);
    let Some(TransportCall::Connect {
        password,
        private_key,
        ..
    }) = transport.calls().into_iter().next()
    else {
        panic!("expected a connect call");
    };
    assert_eq!(password.as_deref(), Some("hunter2"));
    assert_eq!(private_key, None);
}

#[rstest]
#[case::unaccepted_exit(SessionScript::new().stderr("x").close(127))]
#[case::exec_failure(SessionScript::new().exec_failure(TransportError::Protocol(String::from("exec refused"))))]
#[case::missing_status(SessionScript::new().close_without_status())]
#[tokio::test]
async fn failed_commands_still_decrypt_each_secret_once(
    credentials: ConnectionCredentials,
    #[case] script: SessionScript,
) {
    let (outcome, _, decryptor) =
        run_script(script, &AcceptedCodes::default(), &credentials).await;

    assert!(outcome.is_err(), "session should fail, got {outcome:?}");
    assert_eq!(decryptor.calls(), vec!["password", "key"]);
}

#[rstest]
#[tokio::test]
async fn decrypt_failure_still_attempts_both_secrets(credentials: ConnectionCredentials) {
    let transport = ScriptedTransport::new();
    transport.push_session(SessionScript::exit(0));
    let decryptor = RecordingDecryptor::failing_on("password");
    let accepted = AcceptedCodes::default();

    let outcome = RemoteSession::new(&transport, &decryptor, &accepted)
        .execute("true", &credentials)
        .await;

    assert!(matches!(outcome, Err(SessionError::Decrypt(_))));
    assert_eq!(decryptor.calls(), vec!["password", "key"]);
    assert!(transport.calls().is_empty(), "no connection without secrets");
}

#[rstest]
#[case::connect(SessionScript::new().connect_failure(TransportError::Connect {
    host: String::from("10.0.0.5"),
    message: String::from("connection refused"),
}))]
#[case::authentication(SessionScript::new().connect_failure(TransportError::Authentication {
    username: String::from("admin"),
    message: String::from("denied"),
}))]
#[case::exec(SessionScript::new().exec_failure(TransportError::Protocol(String::from("exec refused"))))]
#[case::mid_stream(SessionScript::new().stdout("half").fail(TransportError::Protocol(String::from("reset"))))]
#[case::abrupt_close(SessionScript::new().stdout("half"))]
#[case::end(SessionScript::exit(0).end_failure(TransportError::Protocol(String::from("disconnect failed"))))]
#[tokio::test]
async fn transport_failures_reject_the_session(
    credentials: ConnectionCredentials,
    #[case] script: SessionScript,
) {
    let (outcome, _, _) = run_script(script, &AcceptedCodes::default(), &credentials).await;

    assert!(
        matches!(outcome, Err(SessionError::Transport(_))),
        "expected transport error, got {outcome:?}"
    );
}

#[rstest]
#[tokio::test]
async fn runs_exactly_one_command_and_closes(credentials: ConnectionCredentials) {
    let (outcome, transport, _) =
        run_script(SessionScript::exit(0), &AcceptedCodes::default(), &credentials).await;

    outcome.expect("session should succeed");
    let calls = transport.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(
        calls.get(1),
        Some(&TransportCall::Exec {
            command: String::from("uname -a")
        })
    );
    assert_eq!(calls.get(2), Some(&TransportCall::End));
}

#[test]
fn unaccepted_exit_message_names_command_and_status() {
    let err = SessionError::UnacceptedExitCode {
        result: Box::new(ExecutionResult {
            exit_code: Some(2),
            cmd: String::from("ls /missing"),
            ..ExecutionResult::default()
        }),
        accepted: AcceptedCodes::new([1]),
    };

    assert_eq!(
        err.to_string(),
        "command `ls /missing` exited with status 2 (accepted: {0, 1})"
    );
}

#[test]
fn execution_result_serialises_in_camel_case() {
    let result = ExecutionResult {
        stdout: Some(String::from("ok")),
        exit_code: Some(0),
        cmd: String::from("echo ok"),
        ..ExecutionResult::default()
    };

    let json = serde_json::to_value(&result).expect("serialise result");
    assert_eq!(json["exitCode"], 0);
    assert_eq!(json["catalogOptions"], serde_json::Value::Null);
    assert_eq!(json["stdout"], "ok");
}
