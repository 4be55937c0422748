//! Shared domain types and the configuration model for ferry.

pub mod config;
pub mod error;
pub mod status;
pub mod types;

pub use config::{
    ClusterConfig, ConfigDefaults, KeepRuleConfig, RawClusterConfig, RawConfig, RawJobConfig,
    RawPruningConfig,
};
pub use error::{BoxError, ConfigError};
pub use status::{Status, StatusKind};
pub use types::{JobId, Side, Snapshot, VolumeName};
