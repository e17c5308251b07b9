//! Error taxonomy for the sync pipeline.
//!
//! Every stage returns [`SyncError`]. The variants split into two classes:
//!
//! | Class | Variants | Effect |
//! |-------|----------|--------|
//! | fatal to the run | `Auth`, `Network`, `Http`, `Protocol`, `Config` | the sync aborts and the message is reported once |
//! | fatal to one item | `Parse`, `GroupMismatch`, `Storage` | the record or article is skipped, the run continues |

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The API rejected the token (HTTP 401/403).
    #[error("{operation}: authorization failed (HTTP {status}); check the API token")]
    Auth { operation: String, status: u16 },

    /// The request never produced a response (DNS, TLS, timeout, reset).
    #[error("{operation}: network error: {source}")]
    Network {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    /// The API answered with an unexpected non-success status.
    #[error("{operation}: HTTP {status}: {body}")]
    Http {
        operation: String,
        status: u16,
        body: String,
    },

    /// The API response broke the pagination or JSON contract.
    #[error("{operation}: protocol violation: {reason}")]
    Protocol { operation: String, reason: String },

    /// A single annotation record could not be converted.
    #[error("annotation {annotation_id}: {reason}")]
    Parse {
        annotation_id: String,
        reason: String,
    },

    /// An annotation references a group id missing from the local group list.
    #[error("annotation {annotation_id} references unknown group '{group}'; refresh groups")]
    GroupMismatch {
        annotation_id: String,
        group: String,
    },

    /// A vault or settings file operation failed.
    #[error("{operation} '{path}': {reason}")]
    Storage {
        operation: String,
        path: String,
        reason: String,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub(crate) fn storage(
        operation: impl Into<String>,
        path: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        SyncError::Storage {
            operation: operation.into(),
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn parse(annotation_id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        SyncError::Parse {
            annotation_id: annotation_id.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn protocol(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        SyncError::Protocol {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error must abort the whole sync run.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            SyncError::Auth { .. }
                | SyncError::Network { .. }
                | SyncError::Http { .. }
                | SyncError::Protocol { .. }
                | SyncError::Config(_)
        )
    }
}
