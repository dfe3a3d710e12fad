// ── In-process backend ──
//
// Reference implementation of both boundary interfaces. Used by the
// engine's tests and by embeddings that want a live dashboard without a
// remote store. Mutations publish change records to every live
// subscription, so the push and pull paths stay consistent.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::FeedError;
use crate::record::{ChangeAction, ChangeRecord, Collection, ScopeFilter};
use crate::source::{ChangeFeedSource, EntityRepository, FeedSubscription};

const DELIVERY_CHANNEL_SIZE: usize = 256;

struct FanoutEntry {
    tx: mpsc::Sender<ChangeRecord>,
    scope: ScopeFilter,
    cancel: CancellationToken,
}

/// In-memory change feed + repository with fault injection for tests.
#[derive(Default)]
pub struct MemoryFeed {
    collections: DashMap<Collection, Vec<Value>>,
    subscribers: DashMap<Collection, Vec<FanoutEntry>>,

    /// Fail this many upcoming `list` calls with a transport error.
    fail_lists: AtomicU32,
    /// Reject all mutations with a permission error.
    deny_writes: AtomicBool,
    /// Reject all list calls with a permission error.
    deny_reads: AtomicBool,
    /// Reject new subscriptions with a transport error.
    refuse_subscriptions: AtomicBool,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Seeding and fault injection ─────────────────────────────────

    /// Insert documents directly, without publishing change records.
    /// Used to seed state that pre-dates any subscription.
    pub fn seed(&self, collection: Collection, docs: impl IntoIterator<Item = Value>) {
        self.collections.entry(collection).or_default().extend(docs);
    }

    /// Make the next `n` list calls fail with a transport error.
    pub fn fail_next_lists(&self, n: u32) {
        self.fail_lists.store(n, Ordering::SeqCst);
    }

    /// Reject (or re-allow) all mutations with a permission error.
    pub fn deny_writes(&self, deny: bool) {
        self.deny_writes.store(deny, Ordering::SeqCst);
    }

    /// Reject (or re-allow) all list calls with a permission error.
    pub fn deny_reads(&self, deny: bool) {
        self.deny_reads.store(deny, Ordering::SeqCst);
    }

    /// Refuse (or re-allow) new subscriptions with a transport error.
    pub fn refuse_subscriptions(&self, refuse: bool) {
        self.refuse_subscriptions.store(refuse, Ordering::SeqCst);
    }

    /// Drop every live subscription for `collection`, simulating a
    /// transport failure. Subscribers observe end-of-stream.
    pub fn drop_subscriptions(&self, collection: Collection) {
        if let Some((_, entries)) = self.subscribers.remove(&collection) {
            drop(entries);
        }
    }

    // ── Publishing ──────────────────────────────────────────────────

    /// Publish a raw change record to matching subscriptions.
    ///
    /// Public so tests can inject out-of-order or malformed records
    /// that the repository methods would never produce.
    pub fn publish(&self, record: &ChangeRecord) {
        let Some(mut entries) = self.subscribers.get_mut(&record.collection) else {
            return;
        };
        entries.retain(|entry| {
            if entry.cancel.is_cancelled() {
                return false;
            }
            if let Some(scope_id) = record.scope_id() {
                if scope_id != entry.scope.scope_id {
                    return true;
                }
            }
            // try_send: a full or closed channel means the consumer is
            // gone or hopelessly behind; prune it.
            let delivered = entry.tx.try_send(record.clone()).is_ok();
            if !delivered {
                tracing::debug!(collection = %record.collection, "pruning dead subscription");
            }
            delivered
        });
    }

    fn find_doc(&self, collection: Collection, id: &str) -> Option<Value> {
        self.collections.get(&collection)?.iter().find_map(|doc| {
            (doc.get("id").and_then(Value::as_str) == Some(id)).then(|| doc.clone())
        })
    }

    fn check_writable(&self, collection: Collection) -> Result<(), FeedError> {
        if self.deny_writes.load(Ordering::SeqCst) {
            return Err(FeedError::PermissionDenied(format!(
                "writes to {collection} are not permitted"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ChangeFeedSource for MemoryFeed {
    async fn subscribe(
        &self,
        collection: Collection,
        scope: &ScopeFilter,
    ) -> Result<FeedSubscription, FeedError> {
        if self.refuse_subscriptions.load(Ordering::SeqCst) {
            return Err(FeedError::Transport(format!(
                "subscription to {collection} refused"
            )));
        }

        let (tx, rx) = mpsc::channel(DELIVERY_CHANNEL_SIZE);
        let cancel = CancellationToken::new();
        self.subscribers
            .entry(collection)
            .or_default()
            .push(FanoutEntry {
                tx,
                scope: scope.clone(),
                cancel: cancel.clone(),
            });

        Ok(FeedSubscription::new(rx, cancel))
    }
}

#[async_trait]
impl EntityRepository for MemoryFeed {
    async fn list(
        &self,
        collection: Collection,
        scope: &ScopeFilter,
    ) -> Result<Vec<Value>, FeedError> {
        if self.deny_reads.load(Ordering::SeqCst) {
            return Err(FeedError::PermissionDenied(format!(
                "reads from {collection} are not permitted"
            )));
        }

        let remaining = self.fail_lists.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_lists.store(remaining - 1, Ordering::SeqCst);
            return Err(FeedError::Transport(format!(
                "list {collection} failed (injected)"
            )));
        }

        let docs = self
            .collections
            .get(&collection)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|doc| {
                        doc.get("scopeId")
                            .and_then(Value::as_str)
                            .is_none_or(|s| s == scope.scope_id)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(docs)
    }

    async fn create(&self, collection: Collection, entity: Value) -> Result<Value, FeedError> {
        self.check_writable(collection)?;

        let mut doc = entity;
        let Some(fields) = doc.as_object_mut() else {
            return Err(FeedError::Malformed {
                collection: collection.to_string(),
                message: "entity must be a JSON object".into(),
            });
        };

        let now = Utc::now().to_rfc3339();
        fields
            .entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        fields
            .entry("createdAt")
            .or_insert_with(|| Value::String(now.clone()));
        fields.insert("updatedAt".into(), Value::String(now));

        self.collections
            .entry(collection)
            .or_default()
            .push(doc.clone());

        self.publish(&ChangeRecord::new(
            ChangeAction::Insert,
            collection,
            doc.clone(),
        ));
        Ok(doc)
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
    ) -> Result<Value, FeedError> {
        self.check_writable(collection)?;

        let previous = self
            .find_doc(collection, id)
            .ok_or_else(|| FeedError::NotFound {
                collection: collection.to_string(),
                id: id.to_owned(),
            })?;

        let mut updated = previous.clone();
        if let (Some(doc), Some(fields)) = (updated.as_object_mut(), patch.as_object()) {
            for (key, value) in fields {
                doc.insert(key.clone(), value.clone());
            }
            doc.insert(
                "updatedAt".into(),
                Value::String(Utc::now().to_rfc3339()),
            );
        }

        if let Some(mut docs) = self.collections.get_mut(&collection) {
            for doc in docs.iter_mut() {
                if doc.get("id").and_then(Value::as_str) == Some(id) {
                    *doc = updated.clone();
                }
            }
        }

        self.publish(
            &ChangeRecord::new(ChangeAction::Update, collection, updated.clone())
                .with_previous(previous),
        );
        Ok(updated)
    }

    async fn remove(&self, collection: Collection, id: &str) -> Result<(), FeedError> {
        self.check_writable(collection)?;

        let previous = self
            .find_doc(collection, id)
            .ok_or_else(|| FeedError::NotFound {
                collection: collection.to_string(),
                id: id.to_owned(),
            })?;

        if let Some(mut docs) = self.collections.get_mut(&collection) {
            docs.retain(|doc| doc.get("id").and_then(Value::as_str) != Some(id));
        }

        self.publish(&ChangeRecord::new(
            ChangeAction::Delete,
            collection,
            previous,
        ));
        Ok(())
    }
}
