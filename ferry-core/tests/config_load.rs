//! Loading configuration documents from disk.

use assert_fs::prelude::*;
use ferry_core::config::{load_at, KeepRuleConfig};
use ferry_core::ConfigError;
use predicates::prelude::predicate;
use rstest::rstest;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const MINIMAL: &str = "\
clusters:
  main: {}
jobs:
  - id: vms
    cluster: main
    sourcePool: rbd
    destination: tank/backups
";

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn minimal_document_leaves_optionals_unset() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("ferry.yaml");
    file.write_str(MINIMAL).expect("write");
    file.assert(predicate::path::exists());

    let cfg = load_at(file.path()).expect("load");
    let job = &cfg.jobs[0];
    assert!(job.label.is_none());
    assert!(job.max_concurrency.is_none());
    assert!(job.schedule.is_none());
    assert!(job.pruning.is_none());
}

#[test]
fn parse_error_names_the_file() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("broken.yaml");
    file.write_str("jobs: [ { id: a ").expect("write");

    let err = load_at(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("broken.yaml"), "{err}");
}

#[rstest]
#[case("{ type: lastN, count: 3 }", KeepRuleConfig::LastN { count: 3, regex: String::new() })]
#[case(
    "{ type: lastN, count: 2, regex: '^a' }",
    KeepRuleConfig::LastN { count: 2, regex: "^a".into() }
)]
#[case(
    "{ type: regex, regex: '^manual-' }",
    KeepRuleConfig::Regex { regex: "^manual-".into(), negate: false }
)]
#[case(
    "{ type: grid, regex: '.*', grid: '1x10s | 1x10s' }",
    KeepRuleConfig::Grid { regex: ".*".into(), grid: "1x10s | 1x10s".into() }
)]
fn keep_rules_deserialize_by_type(#[case] rule: &str, #[case] expected: KeepRuleConfig) {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("ferry.yaml");
    let doc = format!("{MINIMAL}    pruning:\n      keepDestination:\n        - {rule}\n");
    file.write_str(&doc).expect("write");

    let cfg = load_at(file.path()).expect("load");
    let pruning = cfg.jobs[0].pruning.as_ref().expect("pruning");
    assert!(pruning.keep_source.is_empty());
    assert_eq!(pruning.keep_destination, vec![expected]);
}

#[test]
fn rule_without_type_is_rejected() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("ferry.yaml");
    let doc = format!("{MINIMAL}    pruning:\n      keepSource:\n        - {{ count: 3 }}\n");
    file.write_str(&doc).expect("write");

    assert!(matches!(
        load_at(file.path()).unwrap_err(),
        ConfigError::Parse { .. }
    ));
}
