//! Keep rules.
//!
//! A rule looks at a whole snapshot collection and returns the snapshots it
//! would destroy. Rules are stateless; the same value is reused every cycle.

use std::cmp::Ordering;

use ferry_core::Snapshot;
use regex::Regex;

use crate::error::RuleError;
use crate::grid::{check_monotonic, fit_entries, parse_grid_spec, GridInterval};

// ---------------------------------------------------------------------------
// KeepRule
// ---------------------------------------------------------------------------

/// A retention policy value.
#[derive(Debug, Clone)]
pub enum KeepRule {
    LastN(KeepLastN),
    Regex(KeepRegex),
    Grid(KeepGrid),
}

impl KeepRule {
    /// Indices into `snaps` that this rule nominates for destruction,
    /// in ascending order.
    pub fn destroy_indices(&self, snaps: &[Snapshot]) -> Vec<usize> {
        let mut out = match self {
            KeepRule::LastN(r) => r.destroy_indices(snaps),
            KeepRule::Regex(r) => r.destroy_indices(snaps),
            KeepRule::Grid(r) => r.destroy_indices(snaps),
        };
        out.sort_unstable();
        out
    }

    /// The snapshots this rule nominates for destruction, in input order.
    pub fn destroy<'a>(&self, snaps: &'a [Snapshot]) -> Vec<&'a Snapshot> {
        self.destroy_indices(snaps)
            .into_iter()
            .map(|i| &snaps[i])
            .collect()
    }
}

impl From<KeepLastN> for KeepRule {
    fn from(r: KeepLastN) -> Self {
        KeepRule::LastN(r)
    }
}

impl From<KeepRegex> for KeepRule {
    fn from(r: KeepRegex) -> Self {
        KeepRule::Regex(r)
    }
}

impl From<KeepGrid> for KeepRule {
    fn from(r: KeepGrid) -> Self {
        KeepRule::Grid(r)
    }
}

fn compile(pattern: &str) -> Result<Regex, RuleError> {
    Regex::new(pattern).map_err(|source| RuleError::InvalidRegex {
        pattern: pattern.to_string(),
        source,
    })
}

/// Split indices into (matching, not matching) by name.
fn partition(snaps: &[Snapshot], re: &Regex) -> (Vec<usize>, Vec<usize>) {
    (0..snaps.len()).partition(|&i| re.is_match(&snaps[i].name))
}

// ---------------------------------------------------------------------------
// KeepLastN
// ---------------------------------------------------------------------------

/// Keeps the `n` newest snapshots whose names match a filter.
///
/// Ties on timestamp are broken by name, descending.
#[derive(Debug, Clone)]
pub struct KeepLastN {
    n: usize,
    re: Regex,
}

impl KeepLastN {
    /// An empty `regex` matches every name.
    pub fn new(n: i64, regex: &str) -> Result<Self, RuleError> {
        if n <= 0 {
            return Err(RuleError::InvalidCount(n));
        }
        let n = usize::try_from(n).map_err(|_| RuleError::InvalidCount(n))?;
        Ok(Self {
            n,
            re: compile(regex)?,
        })
    }

    fn destroy_indices(&self, snaps: &[Snapshot]) -> Vec<usize> {
        let (mut matching, mut destroy) = partition(snaps, &self.re);
        matching.sort_by(|&a, &b| newest_first(&snaps[a], &snaps[b]));
        if matching.len() > self.n {
            destroy.extend_from_slice(&matching[self.n..]);
        }
        destroy
    }
}

fn newest_first(a: &Snapshot, b: &Snapshot) -> Ordering {
    b.timestamp
        .cmp(&a.timestamp)
        .then_with(|| b.name.cmp(&a.name))
}

// ---------------------------------------------------------------------------
// KeepRegex
// ---------------------------------------------------------------------------

/// Keeps snapshots whose names match `pattern` (or do not, when negated).
#[derive(Debug, Clone)]
pub struct KeepRegex {
    re: Regex,
    negate: bool,
}

impl KeepRegex {
    pub fn new(pattern: &str, negate: bool) -> Result<Self, RuleError> {
        Ok(Self {
            re: compile(pattern)?,
            negate,
        })
    }

    fn destroy_indices(&self, snaps: &[Snapshot]) -> Vec<usize> {
        (0..snaps.len())
            .filter(|&i| self.re.is_match(&snaps[i].name) == self.negate)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// KeepGrid
// ---------------------------------------------------------------------------

/// Fits matching snapshots into a retention grid anchored at the newest of
/// them; everything else is destroyed.
#[derive(Debug, Clone)]
pub struct KeepGrid {
    re: Regex,
    intervals: Vec<GridInterval>,
}

impl KeepGrid {
    pub fn new(regex: &str, intervals: Vec<GridInterval>) -> Result<Self, RuleError> {
        if regex.is_empty() {
            return Err(RuleError::EmptyRegex);
        }
        let re = compile(regex)?;
        check_monotonic(&intervals)?;
        Ok(Self { re, intervals })
    }

    /// Build from a grid spec string such as `1x1h(keep=all) | 24x1h`.
    pub fn from_spec(regex: &str, spec: &str) -> Result<Self, RuleError> {
        if regex.is_empty() {
            return Err(RuleError::EmptyRegex);
        }
        Self::new(regex, parse_grid_spec(spec)?)
    }

    pub fn intervals(&self) -> &[GridInterval] {
        &self.intervals
    }

    fn destroy_indices(&self, snaps: &[Snapshot]) -> Vec<usize> {
        let (mut matching, mut destroy) = partition(snaps, &self.re);
        matching.sort_by(|&a, &b| newest_first(&snaps[a], &snaps[b]));
        let entries: Vec<_> = matching
            .into_iter()
            .map(|i| (i, snaps[i].timestamp))
            .collect();
        destroy.extend(fit_entries(&self.intervals, &entries));
        destroy
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ferry_core::Side;

    fn snap(name: &str) -> Snapshot {
        Snapshot::new(name, Utc::now(), Side::Source)
    }

    fn names(v: Vec<&Snapshot>) -> Vec<&str> {
        v.into_iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn regex_negation() {
        let snaps = vec![snap("ferry_foobar"), snap("ferry"), snap("barfoo")];

        let keep = KeepRule::from(KeepRegex::new("^ferry_", false).expect("rule"));
        assert_eq!(names(keep.destroy(&snaps)), vec!["ferry", "barfoo"]);

        let negated = KeepRule::from(KeepRegex::new("^ferry_", true).expect("rule"));
        assert_eq!(names(negated.destroy(&snaps)), vec!["ferry_foobar"]);
    }

    #[test]
    fn last_n_requires_positive_count() {
        assert!(matches!(KeepLastN::new(0, "foo"), Err(RuleError::InvalidCount(0))));
        assert!(matches!(KeepLastN::new(-5, "foo"), Err(RuleError::InvalidCount(-5))));
        assert!(KeepLastN::new(23, "").is_ok());
    }

    #[test]
    fn bad_regex_is_reported() {
        let err = KeepRegex::new("(", false).unwrap_err();
        assert!(matches!(err, RuleError::InvalidRegex { .. }));
        assert!(err.to_string().contains("\"(\""), "{err}");
    }

    #[test]
    fn grid_breaks_timestamp_ties_by_name() {
        let at = Utc::now();
        let a = Snapshot::new("ferry-a", at, Side::Source);
        let b = Snapshot::new("ferry-b", at, Side::Source);
        let rule = KeepRule::from(KeepGrid::from_spec("^ferry-", "1x1h").expect("rule"));

        for snaps in [vec![a.clone(), b.clone()], vec![b.clone(), a.clone()]] {
            assert_eq!(names(rule.destroy(&snaps)), vec!["ferry-a"]);
        }
    }

    #[test]
    fn grid_requires_regex() {
        assert!(matches!(
            KeepGrid::from_spec("", "1x10s"),
            Err(RuleError::EmptyRegex)
        ));
        assert!(matches!(
            KeepGrid::new(".*", Vec::new()),
            Err(RuleError::EmptyGrid)
        ));
    }
}
