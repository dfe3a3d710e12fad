// ── Core error types ──
//
// User-facing errors from propflow-core. Consumers never see raw
// transport detail -- the `From<FeedError>` impl translates boundary
// errors into domain-appropriate variants. Store- and engine-level
// failures are contained locally (collection-scoped health states);
// only user-initiated mutations propagate these to the caller.

use thiserror::Error;

use propflow_feed::FeedError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Sync errors ─────────────────────────────────────────────────
    #[error("Change feed unavailable for {collection}: {reason}")]
    FeedUnavailable { collection: String, reason: String },

    #[error("Initial load timed out after {timeout_ms}ms")]
    LoadTimeout { timeout_ms: u64 },

    // ── Mutation errors (caller-visible, never retried) ─────────────
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Entity not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Rejected by backend: {message}")]
    Rejected { message: String },

    // ── Data errors ─────────────────────────────────────────────────
    #[error("Malformed entity in {collection}: {message}")]
    MalformedEntity { collection: String, message: String },

    // ── Local storage ───────────────────────────────────────────────
    #[error("Local storage error: {message}")]
    Storage { message: String },

    // ── Lifecycle ───────────────────────────────────────────────────
    #[error("Hub is not started")]
    NotStarted,

    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from boundary errors ─────────────────────────────────

impl From<FeedError> for CoreError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::Transport(reason) | FeedError::SubscriptionClosed(reason) => {
                CoreError::Rejected { message: reason }
            }
            FeedError::Timeout { timeout_ms } => CoreError::LoadTimeout { timeout_ms },
            FeedError::PermissionDenied(message) => CoreError::PermissionDenied { message },
            FeedError::Malformed {
                collection,
                message,
            } => CoreError::MalformedEntity {
                collection,
                message,
            },
            FeedError::NotFound { collection, id } => CoreError::NotFound { collection, id },
            FeedError::Storage(message) => CoreError::Storage { message },
        }
    }
}
