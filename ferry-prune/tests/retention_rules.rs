//! Table-driven retention cases.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, TimeZone, Utc};
use ferry_core::{Side, Snapshot};
use ferry_prune::{prune, KeepGrid, KeepLastN, KeepRegex, KeepRule, RuleError};
use rstest::rstest;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn at_secs(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().expect("timestamp")
}

fn at_minutes(minutes: i64) -> DateTime<Utc> {
    at_secs(123) + Duration::minutes(minutes)
}

fn snap(name: &str, ts: DateTime<Utc>) -> Snapshot {
    Snapshot::new(name, ts, Side::Destination)
}

fn undated(names: &[&str]) -> Vec<Snapshot> {
    names.iter().map(|n| snap(n, at_secs(0))).collect()
}

/// Names 1..5 at minutes 10, 20, 15, 30, 30.
fn five() -> Vec<Snapshot> {
    vec![
        snap("1", at_minutes(10)),
        snap("2", at_minutes(20)),
        snap("3", at_minutes(15)),
        snap("4", at_minutes(30)),
        snap("5", at_minutes(30)),
    ]
}

fn regex(p: &str) -> KeepRule {
    KeepRegex::new(p, false).expect("regex rule").into()
}

fn last_n(n: i64, p: &str) -> KeepRule {
    KeepLastN::new(n, p).expect("lastN rule").into()
}

fn grid(p: &str, spec: &str) -> KeepRule {
    KeepGrid::from_spec(p, spec).expect("grid rule").into()
}

fn destroyed(snaps: &[Snapshot], rules: &[KeepRule]) -> BTreeSet<String> {
    prune(snaps, rules).into_iter().map(|s| s.name.clone()).collect()
}

fn set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Vote intersection
// ---------------------------------------------------------------------------

#[rstest]
#[case::simple(vec![regex("foo_")], &["bar_123"])]
#[case::multiple_rules(vec![regex("foo_"), regex("bar_")], &[])]
#[case::only_those_removed_by_all(vec![regex("notInSet"), regex("bar_")], &["foo_123", "foo_456"])]
#[case::no_rules_keep_all(vec![], &[])]
fn vote_intersection(#[case] rules: Vec<KeepRule>, #[case] expected: &[&str]) {
    let snaps = undated(&["foo_123", "foo_456", "bar_123"]);
    assert_eq!(destroyed(&snaps, &rules), set(expected));
}

#[test]
fn empty_input_destroys_nothing() {
    assert!(prune(&[], &[regex("foo_")]).is_empty());
}

#[test]
fn disjoint_grids_only_drop_what_neither_keeps() {
    let snaps = vec![
        snap("p1_a", at_secs(4)),
        snap("p2_a", at_secs(5)),
        snap("p1_b", at_secs(14)),
        snap("p2_b", at_secs(15)),
        snap("p1_c", at_secs(29)),
        snap("p2_c", at_secs(30)),
    ];
    let rules = vec![grid("^p1_", "1x10s | 1x10s"), grid("^p2_", "1x10s | 1x10s")];
    assert_eq!(destroyed(&snaps, &rules), set(&["p1_a", "p2_a"]));
}

// ---------------------------------------------------------------------------
// KeepLastN
// ---------------------------------------------------------------------------

#[rstest]
#[case::keep_two(2, &["1", "2", "3"])]
#[case::tie_broken_by_name(1, &["1", "2", "3", "4"])]
#[case::keep_four(4, &["1"])]
#[case::keep_many(100, &[])]
fn last_n_over_five(#[case] n: i64, #[case] expected: &[&str]) {
    assert_eq!(destroyed(&five(), &[last_n(n, "")]), set(expected));
}

#[test]
fn last_n_per_prefix() {
    let snaps = vec![
        snap("a1", at_minutes(10)),
        snap("b1", at_minutes(11)),
        snap("a2", at_minutes(20)),
        snap("b2", at_minutes(21)),
        snap("a3", at_minutes(30)),
        snap("b3", at_minutes(31)),
    ];
    let rules = vec![last_n(2, "^a"), last_n(2, "^b")];
    assert_eq!(destroyed(&snaps, &rules), set(&["a1", "b1"]));
}

#[test]
fn last_n_drops_non_matching_even_when_under_count() {
    let snaps = vec![
        snap("a1", at_minutes(10)),
        snap("b1", at_minutes(11)),
        snap("a2", at_minutes(12)),
    ];
    assert_eq!(destroyed(&snaps, &[last_n(4, "a")]), set(&["b1"]));
}

#[test]
fn last_n_always_drops_the_oldest() {
    let snaps: Vec<Snapshot> = (0..10)
        .map(|i| snap(&format!("s{i}"), at_minutes(i * 7)))
        .collect();
    for n in 1..=12 {
        let gone = destroyed(&snaps, &[last_n(n, "")]);
        let expected_count = 10usize.saturating_sub(n as usize);
        assert_eq!(gone.len(), expected_count, "n = {n}");
        let expected: BTreeSet<String> =
            (0..expected_count).map(|i| format!("s{i}")).collect();
        assert_eq!(gone, expected, "n = {n}");
    }
}

// ---------------------------------------------------------------------------
// KeepGrid
// ---------------------------------------------------------------------------

#[rstest]
#[case("1x10s | 1x5s")]
#[case("2x1h | 1x30m")]
#[case("1x1d(keep=3) | 1x1h")]
fn shrinking_grid_is_rejected(#[case] spec: &str) {
    let err = KeepGrid::from_spec(".*", spec).unwrap_err();
    assert!(matches!(err, RuleError::NonMonotonicGrid { .. }), "{err}");
}

#[test]
fn shrinking_after_keep_all_is_allowed() {
    assert!(KeepGrid::from_spec(".*", "1x1h(keep=all) | 24x1m | 14x1d").is_ok());
}

#[test]
fn grid_drops_non_matching_and_too_old() {
    let now = 10_000;
    let snaps = vec![
        snap("ferry-a", at_secs(now)),
        snap("ferry-b", at_secs(now - 30)),
        snap("ferry-c", at_secs(now - 3_000)),
        snap("ferry-d", at_secs(now - 3_500)),
        snap("ferry-e", at_secs(now - 9_000)),
        snap("manual", at_secs(now - 10)),
    ];
    // bucket 0 keeps everything within 1m, then 1h buckets keep one each
    let rules = vec![grid("^ferry-", "1x1m(keep=all) | 1x1h")];
    assert_eq!(
        destroyed(&snaps, &rules),
        set(&["ferry-d", "ferry-e", "manual"])
    );
}
