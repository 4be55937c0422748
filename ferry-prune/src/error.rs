//! Error types for ferry-prune.

use thiserror::Error;

/// Errors raised while constructing keep rules.
#[derive(Debug, Error)]
pub enum RuleError {
    /// `lastN` count was zero or negative.
    #[error("must specify positive number as 'keep last count', got {0}")]
    InvalidCount(i64),

    /// The name filter did not compile.
    #[error("invalid regex {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Grid rules need an explicit name filter.
    #[error("grid regex must not be empty")]
    EmptyRegex,

    /// Grid with no intervals.
    #[error("retention grid must specify at least one interval")]
    EmptyGrid,

    /// An interval is shorter than a previous interval that does not keep all.
    #[error("retention grid interval #{index} is shorter than a preceding interval; lengths must increase monotonically")]
    NonMonotonicGrid { index: usize },

    /// A `|`-separated term of a grid spec is malformed.
    #[error("cannot parse interval {term} of {total}: {reason}: {text}")]
    GridSpec {
        term: usize,
        total: usize,
        text: String,
        reason: String,
    },

    /// Wraps the failure of one rule in a list.
    #[error("cannot build rule #{index}: {source}")]
    Rule {
        index: usize,
        #[source]
        source: Box<RuleError>,
    },
}
