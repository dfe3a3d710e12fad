// ── Reactive entity stores ──
//
// Five typed collections plus per-collection health, all mutations
// funneled through `apply_event` / `replace_collection` so the
// aggregation engine sees every change exactly once.

mod collection;
mod refresh;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use propflow_feed::{Collection, ScopeFilter};
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

pub use collection::AppliedChange;
use collection::EntityCollection;

use crate::metrics::{DashboardMetrics, MetricsEngine};
use crate::model::{
    AiWorker, ChangeEvent, EntityDoc, Lead, Listing, Message, Workflow,
};
use crate::stream::EntityStream;

/// Per-collection sync health, published alongside the data itself.
#[derive(Debug, Clone)]
pub struct CollectionHealth {
    /// True until the first successful load, and again after a failed
    /// refresh. Stale data is still served.
    pub stale: bool,
    /// True when push delivery has been abandoned for this collection
    /// and polling is the only sync path.
    pub degraded: bool,
    /// Set when the backend rejected a refresh for lack of permission.
    /// Automatic polling pauses until a manual refresh succeeds.
    pub permission_denied: Option<String>,
    pub last_refresh: Option<DateTime<Utc>>,
}

impl Default for CollectionHealth {
    fn default() -> Self {
        Self {
            stale: true,
            degraded: false,
            permission_denied: None,
            last_refresh: None,
        }
    }
}

/// Snapshot of every collection's health, as published by the watch
/// channel behind [`DataStore::subscribe_health`].
pub type HealthMap = Arc<HashMap<Collection, CollectionHealth>>;

pub struct DataStore {
    leads: EntityCollection<Lead>,
    workers: EntityCollection<AiWorker>,
    messages: EntityCollection<Message>,
    workflows: EntityCollection<Workflow>,
    listings: EntityCollection<Listing>,
    metrics: MetricsEngine,
    health: watch::Sender<HealthMap>,
    /// One guard per collection, held across a store mutation and its
    /// metrics update so the two stay a single atomic step.
    funnels: [Mutex<()>; 5],
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStore {
    #[must_use]
    pub fn new() -> Self {
        let initial: HashMap<Collection, CollectionHealth> = Collection::ALL
            .into_iter()
            .map(|c| (c, CollectionHealth::default()))
            .collect();
        let (health, _) = watch::channel(Arc::new(initial));
        Self {
            leads: EntityCollection::new(),
            workers: EntityCollection::new(),
            messages: EntityCollection::new(),
            workflows: EntityCollection::new(),
            listings: EntityCollection::new(),
            metrics: MetricsEngine::new(),
            health,
            funnels: Default::default(),
        }
    }

    fn funnel(&self, collection: Collection) -> MutexGuard<'_, ()> {
        let slot = match collection {
            Collection::Leads => 0,
            Collection::Workers => 1,
            Collection::Messages => 2,
            Collection::Workflows => 3,
            Collection::Listings => 4,
        };
        self.funnels[slot]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one typed change event. Returns `true` when the store
    /// changed (stale and no-op events return `false`).
    pub fn apply_event(&self, event: ChangeEvent) -> bool {
        let _guard = self.funnel(event.doc.collection());
        let action = event.action;
        match event.doc {
            EntityDoc::Lead(lead) => {
                let Some(change) = self.leads.apply(action, lead) else {
                    return false;
                };
                let snapshot = self.leads.snapshot();
                self.metrics
                    .lead_changed(change.before.as_deref(), change.after.as_deref(), &snapshot);
            }
            EntityDoc::Worker(worker) => {
                let Some(change) = self.workers.apply(action, worker) else {
                    return false;
                };
                self.metrics
                    .worker_changed(change.before.as_deref(), change.after.as_deref());
            }
            EntityDoc::Message(message) => {
                let Some(change) = self.messages.apply(action, message) else {
                    return false;
                };
                self.metrics
                    .message_changed(change.before.as_deref(), change.after.as_deref());
            }
            EntityDoc::Workflow(workflow) => {
                let Some(change) = self.workflows.apply(action, workflow) else {
                    return false;
                };
                self.metrics
                    .workflow_changed(change.before.as_deref(), change.after.as_deref());
            }
            EntityDoc::Listing(listing) => {
                let Some(change) = self.listings.apply(action, listing) else {
                    return false;
                };
                self.metrics
                    .listing_changed(change.before.as_deref(), change.after.as_deref());
            }
        }
        true
    }

    /// Replace one collection with an authoritative refresh result.
    /// Parses documents, drops malformed and out-of-scope ones, swaps
    /// the collection contents, rebuilds that collection's metrics and
    /// clears its stale flag.
    pub fn replace_collection(&self, collection: Collection, docs: Vec<Value>, scope: &ScopeFilter) {
        let guard = self.funnel(collection);
        let size = match collection {
            Collection::Leads => {
                let size = self.leads.replace_all(refresh::parse_documents(docs, scope));
                self.metrics.rebuild_leads(&self.leads.snapshot());
                size
            }
            Collection::Workers => {
                let size = self.workers.replace_all(refresh::parse_documents(docs, scope));
                self.metrics.rebuild_workers(&self.workers.snapshot());
                size
            }
            Collection::Messages => {
                let size = self.messages.replace_all(refresh::parse_documents(docs, scope));
                self.metrics.rebuild_messages(&self.messages.snapshot());
                size
            }
            Collection::Workflows => {
                let size = self.workflows.replace_all(refresh::parse_documents(docs, scope));
                self.metrics.rebuild_workflows(&self.workflows.snapshot());
                size
            }
            Collection::Listings => {
                let size = self.listings.replace_all(refresh::parse_documents(docs, scope));
                self.metrics.rebuild_listings(&self.listings.snapshot());
                size
            }
        };
        drop(guard);
        debug!(%collection, size, "collection refreshed");
        self.update_health(collection, |h| {
            h.stale = false;
            h.permission_denied = None;
            h.last_refresh = Some(Utc::now());
        });
    }

    /// Current copy of one entity, as the tagged union.
    #[must_use]
    pub fn find_doc(&self, collection: Collection, id: &str) -> Option<EntityDoc> {
        match collection {
            Collection::Leads => self.leads.get(id).map(|e| EntityDoc::Lead((*e).clone())),
            Collection::Workers => self.workers.get(id).map(|e| EntityDoc::Worker((*e).clone())),
            Collection::Messages => self
                .messages
                .get(id)
                .map(|e| EntityDoc::Message((*e).clone())),
            Collection::Workflows => self
                .workflows
                .get(id)
                .map(|e| EntityDoc::Workflow((*e).clone())),
            Collection::Listings => self
                .listings
                .get(id)
                .map(|e| EntityDoc::Listing((*e).clone())),
        }
    }

    #[must_use]
    pub fn len(&self, collection: Collection) -> usize {
        match collection {
            Collection::Leads => self.leads.len(),
            Collection::Workers => self.workers.len(),
            Collection::Messages => self.messages.len(),
            Collection::Workflows => self.workflows.len(),
            Collection::Listings => self.listings.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self, collection: Collection) -> bool {
        self.len(collection) == 0
    }

    // ── Snapshots and subscriptions ─────────────────────────────────

    #[must_use]
    pub fn leads(&self) -> Arc<Vec<Arc<Lead>>> {
        self.leads.snapshot()
    }

    #[must_use]
    pub fn workers(&self) -> Arc<Vec<Arc<AiWorker>>> {
        self.workers.snapshot()
    }

    #[must_use]
    pub fn messages(&self) -> Arc<Vec<Arc<Message>>> {
        self.messages.snapshot()
    }

    #[must_use]
    pub fn workflows(&self) -> Arc<Vec<Arc<Workflow>>> {
        self.workflows.snapshot()
    }

    #[must_use]
    pub fn listings(&self) -> Arc<Vec<Arc<Listing>>> {
        self.listings.snapshot()
    }

    #[must_use]
    pub fn subscribe_leads(&self) -> EntityStream<Lead> {
        EntityStream::new(self.leads.subscribe())
    }

    #[must_use]
    pub fn subscribe_workers(&self) -> EntityStream<AiWorker> {
        EntityStream::new(self.workers.subscribe())
    }

    #[must_use]
    pub fn subscribe_messages(&self) -> EntityStream<Message> {
        EntityStream::new(self.messages.subscribe())
    }

    #[must_use]
    pub fn subscribe_workflows(&self) -> EntityStream<Workflow> {
        EntityStream::new(self.workflows.subscribe())
    }

    #[must_use]
    pub fn subscribe_listings(&self) -> EntityStream<Listing> {
        EntityStream::new(self.listings.subscribe())
    }

    // ── Metrics ─────────────────────────────────────────────────────

    #[must_use]
    pub fn metrics(&self) -> Arc<DashboardMetrics> {
        self.metrics.current()
    }

    #[must_use]
    pub fn subscribe_metrics(&self) -> watch::Receiver<Arc<DashboardMetrics>> {
        self.metrics.subscribe()
    }

    /// Ground-truth full recompute from current snapshots. The
    /// incrementally maintained [`metrics`](Self::metrics) must always
    /// agree with this.
    #[must_use]
    pub fn compute_metrics(&self) -> DashboardMetrics {
        DashboardMetrics::compute(
            &self.leads.snapshot(),
            &self.workers.snapshot(),
            &self.messages.snapshot(),
            &self.workflows.snapshot(),
            &self.listings.snapshot(),
        )
    }

    // ── Health ──────────────────────────────────────────────────────

    #[must_use]
    pub fn health(&self, collection: Collection) -> CollectionHealth {
        self.health
            .borrow()
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn subscribe_health(&self) -> watch::Receiver<HealthMap> {
        self.health.subscribe()
    }

    pub fn mark_stale(&self, collection: Collection) {
        self.update_health(collection, |h| h.stale = true);
    }

    pub fn set_degraded(&self, collection: Collection, degraded: bool) {
        self.update_health(collection, |h| h.degraded = degraded);
    }

    /// Record a permission rejection from the backend. Cleared by the
    /// next successful [`replace_collection`](Self::replace_collection).
    pub fn set_permission_denied(&self, collection: Collection, message: impl Into<String>) {
        let message = message.into();
        self.update_health(collection, |h| h.permission_denied = Some(message));
    }

    fn update_health(&self, collection: Collection, mutate: impl FnOnce(&mut CollectionHealth)) {
        self.health.send_modify(|map| {
            let mut next: HashMap<Collection, CollectionHealth> = (**map).clone();
            mutate(next.entry(collection).or_default());
            *map = Arc::new(next);
        });
    }
}
