use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Outcomes of blocking operations
// =============================================================================

/// Why a wait, consumption or run did not produce the value it was asked for.
///
/// Invariant breaches (a count going negative, a queue over capacity) are not
/// represented here: they are bugs and fail an assertion instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("wait timed out after {waited:?}")]
    TimedOut { waited: Duration },

    #[error("wait was cancelled")]
    Cancelled,

    #[error("no more units can be consumed")]
    Exhausted,

    #[error("cannot add {requested} units: {remaining} of {total} are already available")]
    OverCapacity {
        requested: u64,
        remaining: u64,
        total: u64,
    },

    #[error("a refill must add at least one unit")]
    EmptyRefill,

    #[error("value {0} is reserved as the end-of-stream sentinel")]
    ReservedSentinel(String),

    #[error("worker '{worker}' panicked: {message}")]
    WorkerPanicked { worker: String, message: String },

    #[error("failed to spawn worker '{worker}': {reason}")]
    Spawn { worker: String, reason: String },
}

impl SyncError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SyncError::TimedOut { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

// =============================================================================
// Scenario configuration errors
// =============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse scenario: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("seat '{seat}' refers to unknown fork '{fork}'")]
    UnknownFork { seat: String, fork: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_problem() {
        let err = SyncError::OverCapacity {
            requested: 3,
            remaining: 9,
            total: 10,
        };
        assert_eq!(
            err.to_string(),
            "cannot add 3 units: 9 of 10 are already available"
        );

        let err = ConfigError::UnknownFork {
            seat: "Kant".into(),
            fork: "D".into(),
        };
        assert_eq!(err.to_string(), "seat 'Kant' refers to unknown fork 'D'");
    }

    #[test]
    fn test_classification_helpers() {
        assert!(SyncError::TimedOut {
            waited: Duration::from_millis(5)
        }
        .is_timeout());
        assert!(SyncError::Cancelled.is_cancelled());
        assert!(!SyncError::Exhausted.is_cancelled());
    }
}
