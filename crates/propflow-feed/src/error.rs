use thiserror::Error;

/// Top-level error type for the `propflow-feed` crate.
///
/// Covers every failure mode at the boundary: transport drops, rejected
/// mutations, malformed payloads, and local storage faults. The engine
/// core maps these into domain-appropriate states (retry, degraded mode,
/// or caller-visible failure) via the classifier methods below.
#[derive(Debug, Error)]
pub enum FeedError {
    // ── Transport / connectivity ────────────────────────────────────
    /// The underlying transport failed (connection refused, reset, DNS).
    #[error("Transport error: {0}")]
    Transport(String),

    /// A remote call did not resolve within the deadline.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The subscription stream ended without an explicit unsubscribe.
    #[error("Subscription closed: {0}")]
    SubscriptionClosed(String),

    // ── Authorization ───────────────────────────────────────────────
    /// The backend rejected the call for access reasons. Never retried.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // ── Data ────────────────────────────────────────────────────────
    /// A payload was missing required fields or failed to parse.
    #[error("Malformed payload in {collection}: {message}")]
    Malformed {
        collection: String,
        message: String,
    },

    /// No entity with the given id exists in the collection.
    #[error("Not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    // ── Local storage ───────────────────────────────────────────────
    /// Durable local storage read/write failed.
    #[error("Local storage error: {0}")]
    Storage(String),
}

impl FeedError {
    /// Returns `true` if this is a transient fault worth retrying
    /// with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout { .. } | Self::SubscriptionClosed(_)
        )
    }

    /// Returns `true` if the call was rejected for access reasons.
    /// Permission failures are surfaced immediately, never retried.
    pub fn is_permission(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

impl From<std::io::Error> for FeedError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_transient() {
        assert!(FeedError::Transport("reset".into()).is_transient());
        assert!(FeedError::Timeout { timeout_ms: 5000 }.is_transient());
        assert!(FeedError::SubscriptionClosed("eof".into()).is_transient());
    }

    #[test]
    fn permission_errors_are_not_transient() {
        let err = FeedError::PermissionDenied("no access to leads".into());
        assert!(!err.is_transient());
        assert!(err.is_permission());
    }

    #[test]
    fn malformed_is_neither_transient_nor_permission() {
        let err = FeedError::Malformed {
            collection: "leads".into(),
            message: "missing id".into(),
        };
        assert!(!err.is_transient());
        assert!(!err.is_permission());
    }
}
