//! Unit tests for the file-backed collaborators.

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use serde_json::json;
use tempfile::TempDir;

use super::*;
use crate::command::CatalogOptions;
use crate::node::SSH_PORT;

const INVENTORY: &str = r#"{
  "nodes": [
    {
      "id": "node-1",
      "identifiers": ["52:54:00:aa:bb:cc", "rack1-slot4"],
      "sshSettings": {
        "host": "10.0.0.5",
        "user": "admin",
        "password": "hunter2",
        "privateKey": ""
      }
    }
  ]
}"#;

#[fixture]
fn workdir() -> (TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp path");
    (dir, path)
}

#[rstest]
#[case::by_id("node-1")]
#[case::by_identifier("rack1-slot4")]
#[tokio::test]
async fn resolves_nodes_by_any_identifier(workdir: (TempDir, Utf8PathBuf), #[case] lookup: &str) {
    let (_guard, dir) = workdir;
    let path = dir.join("nodes.json");
    std::fs::write(&path, INVENTORY).expect("write inventory");

    let node = FileNodeResolver::new(path)
        .resolve(lookup)
        .await
        .expect("node resolves");

    assert_eq!(node.id, "node-1");
    assert_eq!(node.credentials.host, "10.0.0.5");
    assert_eq!(node.credentials.username, "admin");
    assert_eq!(node.credentials.port, SSH_PORT);
    assert_eq!(node.credentials.password.ciphertext(), "hunter2");
}

#[rstest]
#[tokio::test]
async fn unknown_identifier_is_an_error(workdir: (TempDir, Utf8PathBuf)) {
    let (_guard, dir) = workdir;
    let path = dir.join("nodes.json");
    std::fs::write(&path, INVENTORY).expect("write inventory");

    let err = FileNodeResolver::new(path)
        .resolve("ghost")
        .await
        .expect_err("unknown node");

    assert!(err.message.contains("ghost"));
}

#[rstest]
#[tokio::test]
async fn missing_inventory_is_an_error(workdir: (TempDir, Utf8PathBuf)) {
    let (_guard, dir) = workdir;

    let err = FileNodeResolver::new(dir.join("absent.json"))
        .resolve("node-1")
        .await
        .expect_err("inventory is missing");

    assert!(err.message.starts_with("failed to read"));
}

#[test]
fn passthrough_decryptor_returns_ciphertext() {
    let secret = PassthroughDecryptor
        .decrypt(&EncryptedSecret::new("plain"))
        .expect("passthrough never fails");

    assert_eq!(secret.expose(), "plain");
}

fn output(stdout: Option<&str>, format: Option<&str>) -> ExecutionResult {
    ExecutionResult {
        stdout: stdout.map(str::to_owned),
        exit_code: Some(0),
        cmd: String::from("probe"),
        catalog_options: Some(CatalogOptions {
            source: Some(String::from("probe")),
            format: format.map(str::to_owned),
        }),
        ..ExecutionResult::default()
    }
}

#[tokio::test]
async fn format_parser_classifies_each_result() {
    let results = vec![
        output(Some("{\"cpus\":4}"), Some("json")),
        output(Some("plain text"), None),
        output(Some("plain text"), Some("raw")),
        output(Some("{not json"), Some("json")),
        output(None, Some("json")),
        output(Some("a,b"), Some("csv")),
    ];

    let records = FormatParser.parse(&results).await.expect("parse succeeds");

    assert_eq!(records.len(), results.len());
    let source = Some(String::from("probe"));
    assert_eq!(
        records.first(),
        Some(&ParsedRecord::Store {
            source: source.clone(),
            data: json!({"cpus": 4}),
        })
    );
    assert_eq!(
        records.get(1),
        Some(&ParsedRecord::Store {
            source: source.clone(),
            data: json!("plain text"),
        })
    );
    assert_eq!(records.get(1), records.get(2));
    assert!(
        records
            .iter()
            .skip(3)
            .all(|record| matches!(record, ParsedRecord::Failed { .. }))
    );
}

#[rstest]
#[tokio::test]
async fn catalog_store_appends_json_lines(workdir: (TempDir, Utf8PathBuf)) {
    let (_guard, dir) = workdir;
    let path = dir.join("catalog.jsonl");
    let store = JsonLinesCatalogStore::new(path.clone());

    for source in ["ohai", "dmi"] {
        store
            .create(CatalogEntry {
                node: String::from("node-1"),
                source: source.to_owned(),
                data: json!({"source": source}),
            })
            .await
            .expect("append entry");
    }

    let contents = std::fs::read_to_string(&path).expect("read catalog");
    let lines: Vec<serde_json::Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("valid json line"))
        .collect();
    assert_eq!(
        lines,
        vec![
            json!({"node": "node-1", "source": "ohai", "data": {"source": "ohai"}}),
            json!({"node": "node-1", "source": "dmi", "data": {"source": "dmi"}}),
        ]
    );
}
