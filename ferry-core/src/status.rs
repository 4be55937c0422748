//! Task status kinds and their fixed facets.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The state a task is in. Each kind carries fixed `terminal`, `active` and
/// `bad` facets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusKind {
    NotStarted,
    Waiting,
    Preparing,
    Ready,
    InProgress,
    /// Long-running work with no natural end (services).
    Active,
    Finishing,
    Success,
    Failed,
    Skipped,
    ChildrenFailed,
}

impl StatusKind {
    pub const ALL: [StatusKind; 11] = [
        StatusKind::NotStarted,
        StatusKind::Waiting,
        StatusKind::Preparing,
        StatusKind::Ready,
        StatusKind::InProgress,
        StatusKind::Active,
        StatusKind::Finishing,
        StatusKind::Success,
        StatusKind::Failed,
        StatusKind::Skipped,
        StatusKind::ChildrenFailed,
    ];

    pub fn label(self) -> &'static str {
        match self {
            StatusKind::NotStarted => "Not Started",
            StatusKind::Waiting => "Waiting",
            StatusKind::Preparing => "Preparing",
            StatusKind::Ready => "Ready",
            StatusKind::InProgress => "In Progress",
            StatusKind::Active => "Active",
            StatusKind::Finishing => "Finishing",
            StatusKind::Success => "Success",
            StatusKind::Failed => "Failed",
            StatusKind::Skipped => "Skipped",
            StatusKind::ChildrenFailed => "Children Failed",
        }
    }

    /// The task will not change state again without a new run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StatusKind::Success
                | StatusKind::Failed
                | StatusKind::Skipped
                | StatusKind::ChildrenFailed
        )
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            StatusKind::Preparing
                | StatusKind::InProgress
                | StatusKind::Active
                | StatusKind::Finishing
        )
    }

    pub fn is_bad(self) -> bool {
        matches!(self, StatusKind::Failed | StatusKind::ChildrenFailed)
    }

    /// Idle tasks may be triggered: never started, prepared, or finished.
    pub fn is_idle(self) -> bool {
        matches!(self, StatusKind::NotStarted | StatusKind::Ready) || self.is_terminal()
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A status kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub kind: StatusKind,
    pub message: String,
}

impl Status {
    pub fn new(kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::new(StatusKind::NotStarted, "")
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_kinds_are_terminal() {
        for kind in StatusKind::ALL {
            if kind.is_bad() {
                assert!(kind.is_terminal(), "{kind} is bad but not terminal");
            }
        }
    }

    #[test]
    fn active_and_terminal_are_disjoint() {
        for kind in StatusKind::ALL {
            assert!(!(kind.is_active() && kind.is_terminal()), "{kind}");
        }
    }

    #[test]
    fn idle_kinds() {
        assert!(StatusKind::Ready.is_idle());
        assert!(StatusKind::Skipped.is_idle());
        assert!(StatusKind::NotStarted.is_idle());
        assert!(!StatusKind::Waiting.is_idle());
        assert!(!StatusKind::InProgress.is_idle());
    }

    #[test]
    fn status_display() {
        assert_eq!(Status::default().to_string(), "Not Started");
        assert_eq!(
            Status::new(StatusKind::Failed, "boom").to_string(),
            "Failed: boom"
        );
    }
}
