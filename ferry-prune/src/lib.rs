//! # ferry-prune
//!
//! Retention engine: decides which snapshots survive.
//!
//! Each [`KeepRule`] nominates snapshots for destruction. [`prune`] destroys
//! a snapshot only when every rule nominated it, so any single rule can keep
//! a snapshot alive. With no rules nothing is destroyed.

pub mod error;
pub mod grid;
pub mod policy;
pub mod rule;

pub use error::RuleError;
pub use grid::{parse_grid_spec, GridInterval, KeepCount};
pub use policy::{prune, rule_from_config, rules_from_config, RetentionPolicy};
pub use rule::{KeepGrid, KeepLastN, KeepRegex, KeepRule};
