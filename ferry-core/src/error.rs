//! Error types for ferry-core.

use std::path::PathBuf;

use thiserror::Error;

/// Boxed error used to carry the cause of an invalid configuration field.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// All errors that can arise while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (permission denied, etc.).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load; includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The configuration file did not exist.
    #[error("config not found at {path}")]
    NotFound { path: PathBuf },

    /// Two jobs share the same id.
    #[error("duplicate job id: {0}")]
    DuplicateJob(String),

    /// A job entry has no id at all.
    #[error("job id must be specified (job #{index})")]
    MissingJobId { index: usize },

    /// A job id contains characters outside `[a-zA-Z0-9._-]`.
    #[error("job id must contain only alphanumerics, '.', '-' or '_': '{0}'")]
    InvalidJobId(String),

    /// A job names a cluster that is not configured.
    #[error("job '{job}' wants cluster '{cluster}', but there is no configured cluster of that name")]
    UnknownCluster { job: String, cluster: String },

    /// A required job field is empty.
    #[error("{field} is missing in job config '{job}'")]
    MissingField { job: String, field: &'static str },

    /// `maxConcurrency` was given but is below 1.
    #[error("maxConcurrency '{value}' is invalid in job '{job}' - must be greater than 0")]
    InvalidConcurrency { job: String, value: i64 },

    /// A field failed to compile or validate (regex, schedule, keep rule).
    #[error("job '{job}': invalid {field}: {source}")]
    InvalidField {
        job: String,
        field: &'static str,
        #[source]
        source: BoxError,
    },
}

/// Convenience constructor for [`ConfigError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
