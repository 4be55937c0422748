//! Vote intersection and per-side retention policies.

use ferry_core::{KeepRuleConfig, RawPruningConfig, Side, Snapshot};

use crate::error::RuleError;
use crate::rule::{KeepGrid, KeepLastN, KeepRegex, KeepRule};

/// Snapshots nominated for destruction by every rule, in input order.
///
/// With no rules nothing is destroyed. The result only ever contains
/// elements of `snaps`.
pub fn prune<'a>(snaps: &'a [Snapshot], rules: &[KeepRule]) -> Vec<&'a Snapshot> {
    if rules.is_empty() {
        return Vec::new();
    }
    let mut votes = vec![0usize; snaps.len()];
    for rule in rules {
        for i in rule.destroy_indices(snaps) {
            votes[i] += 1;
        }
    }
    snaps
        .iter()
        .zip(votes)
        .filter(|(_, v)| *v == rules.len())
        .map(|(s, _)| s)
        .collect()
}

/// Build one rule from its configuration form.
pub fn rule_from_config(cfg: &KeepRuleConfig) -> Result<KeepRule, RuleError> {
    Ok(match cfg {
        KeepRuleConfig::LastN { count, regex } => KeepLastN::new(*count, regex)?.into(),
        KeepRuleConfig::Regex { regex, negate } => KeepRegex::new(regex, *negate)?.into(),
        KeepRuleConfig::Grid { regex, grid } => KeepGrid::from_spec(regex, grid)?.into(),
    })
}

/// Build a rule list, naming the index of the first rule that fails.
pub fn rules_from_config(cfgs: &[KeepRuleConfig]) -> Result<Vec<KeepRule>, RuleError> {
    cfgs.iter()
        .enumerate()
        .map(|(index, cfg)| {
            rule_from_config(cfg).map_err(|e| RuleError::Rule {
                index,
                source: Box::new(e),
            })
        })
        .collect()
}

/// Independent rule sets for the two sides of a replication pair.
#[derive(Debug, Clone, Default)]
pub struct RetentionPolicy {
    pub source: Vec<KeepRule>,
    pub destination: Vec<KeepRule>,
}

impl RetentionPolicy {
    pub fn new(source: Vec<KeepRule>, destination: Vec<KeepRule>) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// A policy that never destroys anything.
    pub fn noop() -> Self {
        Self::default()
    }

    /// Absent configuration yields the no-op policy.
    pub fn from_config(cfg: Option<&RawPruningConfig>) -> Result<Self, RuleError> {
        match cfg {
            None => Ok(Self::noop()),
            Some(cfg) => Ok(Self::new(
                rules_from_config(&cfg.keep_source)?,
                rules_from_config(&cfg.keep_destination)?,
            )),
        }
    }

    pub fn rules(&self, side: Side) -> &[KeepRule] {
        match side {
            Side::Source => &self.source,
            Side::Destination => &self.destination,
        }
    }

    /// Snapshots on `side` that should be destroyed.
    pub fn destroy<'a>(&self, side: Side, snaps: &'a [Snapshot]) -> Vec<&'a Snapshot> {
        prune(snaps, self.rules(side))
    }

    pub fn is_noop(&self) -> bool {
        self.source.is_empty() && self.destination.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snaps(names: &[&str]) -> Vec<Snapshot> {
        names
            .iter()
            .map(|n| Snapshot::new(*n, Utc::now(), Side::Source))
            .collect()
    }

    #[test]
    fn no_rules_destroys_nothing() {
        let s = snaps(&["a", "b"]);
        assert!(prune(&s, &[]).is_empty());
        assert!(RetentionPolicy::noop().destroy(Side::Source, &s).is_empty());
    }

    #[test]
    fn single_rule_equals_its_vote() {
        let s = snaps(&["foo_1", "bar_1", "foo_2"]);
        let rule = KeepRule::from(KeepRegex::new("^foo_", false).expect("rule"));
        let direct: Vec<_> = rule.destroy(&s);
        assert_eq!(prune(&s, std::slice::from_ref(&rule)), direct);
    }

    #[test]
    fn policy_sides_are_independent() {
        let cfg = RawPruningConfig {
            keep_source: vec![KeepRuleConfig::Regex {
                regex: "^keep".into(),
                negate: false,
            }],
            keep_destination: Vec::new(),
        };
        let policy = RetentionPolicy::from_config(Some(&cfg)).expect("policy");
        let s = snaps(&["keep-1", "drop-1"]);
        assert_eq!(policy.destroy(Side::Source, &s).len(), 1);
        assert!(policy.destroy(Side::Destination, &s).is_empty());
    }

    #[test]
    fn failing_rule_is_named_by_index() {
        let cfgs = vec![
            KeepRuleConfig::Regex {
                regex: ".*".into(),
                negate: false,
            },
            KeepRuleConfig::LastN {
                count: 0,
                regex: String::new(),
            },
        ];
        let err = rules_from_config(&cfgs).unwrap_err();
        assert!(matches!(err, RuleError::Rule { index: 1, .. }));
        assert!(err.to_string().starts_with("cannot build rule #1"), "{err}");
    }
}
