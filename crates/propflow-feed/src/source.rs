// ── Abstract backend interfaces ──
//
// The engine receives these as injected dependencies (never ambient
// singletons) so tests can substitute in-process fakes. Implementations
// live outside the core; `memory.rs` ships the reference one.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::FeedError;
use crate::record::{ChangeRecord, Collection, ScopeFilter};

// ── FeedSubscription ────────────────────────────────────────────────

/// Owning handle for one logical change-feed subscription.
///
/// Delivery stops synchronously when the handle is unsubscribed or
/// dropped; [`unsubscribe`](Self::unsubscribe) is idempotent. Events for
/// one subscription arrive in order through [`recv`](Self::recv).
#[derive(Debug)]
pub struct FeedSubscription {
    rx: mpsc::Receiver<ChangeRecord>,
    cancel: CancellationToken,
}

impl FeedSubscription {
    /// Wrap a delivery channel and its cancellation token.
    ///
    /// The implementation side keeps the sender and the token: it must
    /// stop sending once the token is cancelled.
    pub fn new(rx: mpsc::Receiver<ChangeRecord>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Receive the next change record.
    ///
    /// Returns `None` once the subscription is unsubscribed or the
    /// transport side drops the sender (treated as a disconnect by the
    /// subscriber, which then applies its backoff policy).
    pub async fn recv(&mut self) -> Option<ChangeRecord> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            record = self.rx.recv() => record,
        }
    }

    /// Stop delivery. Idempotent; also cancels any pending work the
    /// source tied to this subscription's token.
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    /// `true` until the subscription has been unsubscribed.
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── ChangeFeedSource ────────────────────────────────────────────────

/// Push side of the backend: per-collection change feeds.
#[async_trait]
pub trait ChangeFeedSource: Send + Sync {
    /// Open one logical subscription for `collection`, filtered to the
    /// given scope. Fails with a transient [`FeedError`] when the
    /// transport cannot be established; callers own retry policy.
    async fn subscribe(
        &self,
        collection: Collection,
        scope: &ScopeFilter,
    ) -> Result<FeedSubscription, FeedError>;
}

// ── EntityRepository ────────────────────────────────────────────────

/// Pull side of the backend: list for loads/polls, CRUD for mutations.
///
/// Entities travel as JSON documents; the engine core parses them into
/// typed domain structs and drops malformed ones. Mutation failures are
/// returned to the caller as-is — the engine never retries them.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Full contents of a collection within the scope.
    async fn list(
        &self,
        collection: Collection,
        scope: &ScopeFilter,
    ) -> Result<Vec<Value>, FeedError>;

    /// Create an entity from a partial document; returns the stored
    /// document (id and timestamps filled in).
    async fn create(&self, collection: Collection, entity: Value) -> Result<Value, FeedError>;

    /// Merge `patch` into the entity with `id`; returns the updated
    /// document.
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
    ) -> Result<Value, FeedError>;

    /// Delete the entity with `id`.
    async fn remove(&self, collection: Collection, id: &str) -> Result<(), FeedError>;
}
