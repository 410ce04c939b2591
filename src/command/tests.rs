//! Unit tests for command option normalisation.

use super::*;
use rstest::{fixture, rstest};
use serde_json::json;

#[fixture]
fn command_object() -> Value {
    json!({
        "command": "command",
        "retries": 3,
        "catalog": { "format": "json", "source": "test" }
    })
}

#[rstest]
fn build_normalises_strings_and_objects(command_object: Value) {
    let specs = CommandSpecBuilder::new()
        .build(&json!(["stringCommand", command_object]))
        .expect("valid commands should build");

    assert_eq!(specs.len(), 2);
    let first = specs.first().expect("first spec");
    assert_eq!(first.command(), "stringCommand");
    assert_eq!(first.catalog(), None);
    assert_eq!(first.retries(), None);

    let second = specs.get(1).expect("second spec");
    assert_eq!(second.command(), "command");
    assert_eq!(second.retries(), Some(3));
    assert_eq!(second.catalog(), Some(&CatalogOptions::new("test", "json")));
}

#[rstest]
fn build_accepts_a_single_string() {
    let specs = CommandSpecBuilder::new()
        .build(&json!("uname -a"))
        .expect("single string should build");

    assert_eq!(specs, vec![CommandSpec::new("uname -a")]);
}

#[rstest]
fn build_accepts_a_single_object(command_object: Value) {
    let specs = CommandSpecBuilder::new()
        .build(&command_object)
        .expect("single object should build");

    assert_eq!(specs.len(), 1);
}

#[rstest]
#[case(json!([]), 0)]
#[case(json!(["a"]), 1)]
#[case(json!(["a", {"command": "b"}, "c"]), 3)]
fn build_preserves_length_after_flattening(#[case] raw: Value, #[case] expected: usize) {
    let specs = CommandSpecBuilder::new()
        .build(&raw)
        .expect("commands should build");

    assert_eq!(specs.len(), expected);
}

#[rstest]
#[case(&[], &[0])]
#[case(&[1, 127], &[0, 1, 127])]
#[case(&[0, 0, 3], &[0, 3])]
fn accepted_codes_always_contain_zero(#[case] supplied: &[i32], #[case] expected: &[i32]) {
    let specs = CommandSpecBuilder::new()
        .accepted_codes(supplied.iter().copied())
        .build(&json!(["a", {"command": "b"}]))
        .expect("commands should build");

    for spec in specs {
        assert!(spec.accepted_codes().contains(0));
        assert_eq!(spec.accepted_codes().iter().collect::<Vec<_>>(), expected);
    }
}

#[rstest]
#[case("downloadUrl", "not supported yet")]
#[case("acceptedResponseCodes", "not supported yet")]
#[case("junk", "not supported")]
fn build_rejects_unsupported_options(
    command_object: Value,
    #[case] option: &str,
    #[case] fragment: &str,
) {
    let mut raw = command_object;
    raw.as_object_mut()
        .expect("fixture is an object")
        .insert(option.to_owned(), json!("someUnsupportedOptionData"));

    let err = CommandSpecBuilder::new()
        .build(&raw)
        .expect_err("unsupported option should be rejected");

    let message = err.to_string();
    assert!(message.contains(option), "unexpected message: {message}");
    assert!(message.contains(fragment), "unexpected message: {message}");
}

#[rstest]
fn build_reports_reserved_option_before_value_errors() {
    let err = CommandSpecBuilder::new()
        .build(&json!({ "command": "ls", "catalog": 7, "downloadUrl": "http://x" }))
        .expect_err("reserved option should be rejected");

    assert_eq!(
        err,
        CommandSpecError::NotYetSupported {
            index: 0,
            option: String::from("downloadUrl"),
        }
    );
}

#[rstest]
fn build_ignores_top_level_source_and_format() {
    let specs = CommandSpecBuilder::new()
        .build(&json!({ "command": "ls", "source": "s", "format": "raw" }))
        .expect("source and format keys are tolerated");

    assert_eq!(specs, vec![CommandSpec::new("ls")]);
}

#[rstest]
#[case(json!(42), "a number")]
#[case(json!(null), "null")]
#[case(json!([["nested"]]), "a nested list")]
fn build_rejects_unsupported_shapes(#[case] raw: Value, #[case] found: &'static str) {
    let err = CommandSpecBuilder::new()
        .build(&raw)
        .expect_err("shape should be rejected");

    assert_eq!(err, CommandSpecError::UnsupportedShape { index: 0, found });
}

#[rstest]
fn build_reports_index_of_failing_entry() {
    let err = CommandSpecBuilder::new()
        .build(&json!(["ok", { "retries": 1 }]))
        .expect_err("missing command should be rejected");

    assert_eq!(err, CommandSpecError::MissingCommand { index: 1 });
}

#[rstest]
#[case(json!({ "command": "" }), "command")]
#[case(json!({ "command": " \t " }), "command")]
#[case(json!("   "), "command")]
#[case(json!({ "command": 5 }), "command")]
#[case(json!({ "command": "ls", "retries": -1 }), "retries")]
#[case(json!({ "command": "ls", "retries": "3" }), "retries")]
#[case(json!({ "command": "ls", "catalog": "json" }), "catalog")]
#[case(json!({ "command": "ls", "catalog": { "source": 1 } }), "catalog.source")]
fn build_rejects_invalid_values(#[case] raw: Value, #[case] option: &str) {
    let err = CommandSpecBuilder::new()
        .build(&raw)
        .expect_err("invalid value should be rejected");

    let CommandSpecError::InvalidValue {
        option: ref reported,
        ..
    } = err
    else {
        panic!("expected InvalidValue, got {err:?}");
    };
    assert_eq!(reported, option);
}

#[rstest]
fn catalog_without_format_keeps_source_only() {
    let specs = CommandSpecBuilder::new()
        .build(&json!({ "command": "ls", "catalog": { "source": "listing" } }))
        .expect("partial catalog options are accepted");

    let catalog = specs
        .first()
        .and_then(CommandSpec::catalog)
        .expect("catalog options should be present");
    assert_eq!(catalog.source.as_deref(), Some("listing"));
    assert_eq!(catalog.format, None);
}

#[rstest]
fn accepted_codes_render_as_a_set() {
    let codes = AcceptedCodes::new([3, 1]);
    assert_eq!(codes.to_string(), "{0, 1, 3}");
}

#[rstest]
fn blank_command_error_says_whitespace_counts_as_empty() {
    let err = CommandSpecBuilder::new()
        .build(&json!(["uptime", "  "]))
        .expect_err("whitespace-only command should be rejected");

    assert_eq!(
        err.to_string(),
        "command 1: command must be a string that is not empty or only whitespace"
    );
}
