// ── Sync hub ──
//
// The orchestrator: owns the injected backend interfaces, the data
// store, the notification center and search, plus one subscriber task
// and one poll task per collection. Push keeps the store fresh between
// polls; polls are authoritative and reconcile whatever push missed.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use propflow_feed::{
    ChangeAction, ChangeFeedSource, Collection, EntityRepository, LocalStore, ScopeFilter,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::error::CoreError;
use crate::model::{ChangeEvent, EntityDoc};
use crate::notify::NotifyCenter;
use crate::search::{SearchIndex, SearchService};
use crate::store::DataStore;
use crate::subscriber::{FeedStatus, SubscriberHandle, spawn_subscriber};

/// Tasks and signals belonging to one `start()`..`shutdown()` span.
struct RunState {
    cancel: CancellationToken,
    poll_tasks: Vec<JoinHandle<()>>,
    refresh_signals: HashMap<Collection, mpsc::Sender<()>>,
}

struct HubInner {
    config: HubConfig,
    source: Arc<dyn ChangeFeedSource>,
    repo: Arc<dyn EntityRepository>,
    store: Arc<DataStore>,
    notify: NotifyCenter,
    search_index: Arc<SearchIndex>,
    search: SearchService,
    /// Outlives individual runs; cancelled when the hub is dropped.
    lifetime: CancellationToken,
    subscribers: DashMap<Collection, SubscriberHandle>,
    run: tokio::sync::Mutex<Option<RunState>>,
}

impl Drop for HubInner {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}

/// Entity synchronization hub. Cheap to clone; all clones share state.
///
/// Construct with [`new`](Self::new) inside a tokio runtime, then call
/// [`start`](Self::start). [`shutdown`](Self::shutdown) stops all
/// background work and leaves the hub restartable.
#[derive(Clone)]
pub struct SyncHub {
    inner: Arc<HubInner>,
}

impl SyncHub {
    pub fn new(
        source: Arc<dyn ChangeFeedSource>,
        repo: Arc<dyn EntityRepository>,
        storage: Arc<dyn LocalStore>,
        config: HubConfig,
    ) -> Self {
        let lifetime = CancellationToken::new();
        let store = Arc::new(DataStore::new());
        let notify = NotifyCenter::new(Arc::clone(&storage), &config);
        let search_index = Arc::new(SearchIndex::new(Arc::clone(&store), storage, &config));
        let search = SearchService::new(
            Arc::clone(&search_index),
            config.search_debounce,
            &lifetime,
        );

        Self {
            inner: Arc::new(HubInner {
                config,
                source,
                repo,
                store,
                notify,
                search_index,
                search,
                lifetime,
                subscribers: DashMap::new(),
                run: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Load every collection in parallel (bounded by
    /// `initial_load_timeout`, failures proceed empty and stale), then
    /// spawn the per-collection subscriber and poll tasks.
    pub async fn start(&self) -> Result<(), CoreError> {
        let mut run = self.inner.run.lock().await;
        if run.is_some() {
            return Err(CoreError::Rejected {
                message: "hub is already running".into(),
            });
        }

        let cancel = self.inner.lifetime.child_token();
        self.initial_load().await;

        let mut refresh_signals = HashMap::new();
        let mut poll_tasks = Vec::with_capacity(Collection::ALL.len());
        for collection in Collection::ALL {
            self.inner.subscribers.insert(
                collection,
                spawn_subscriber(
                    Arc::clone(&self.inner.source),
                    Arc::clone(&self.inner.store),
                    collection,
                    self.inner.config.scope.clone(),
                    self.inner.config.reconnect.clone(),
                    &cancel,
                ),
            );

            let (reset_tx, reset_rx) = mpsc::channel(1);
            refresh_signals.insert(collection, reset_tx);
            poll_tasks.push(self.spawn_poll_task(collection, reset_rx, &cancel));
        }

        *run = Some(RunState {
            cancel,
            poll_tasks,
            refresh_signals,
        });
        info!(scope = %self.inner.config.scope.scope_id, "sync hub started");
        Ok(())
    }

    /// Cancel and join all background tasks. Idempotent; the hub can
    /// be started again afterwards.
    pub async fn shutdown(&self) {
        let mut run = self.inner.run.lock().await;
        let Some(state) = run.take() else { return };
        state.cancel.cancel();

        let collections: Vec<Collection> = self
            .inner
            .subscribers
            .iter()
            .map(|e| *e.key())
            .collect();
        for collection in collections {
            if let Some((_, handle)) = self.inner.subscribers.remove(&collection) {
                handle.stop().await;
            }
        }
        for task in state.poll_tasks {
            let _ = task.await;
        }
        info!("sync hub stopped");
    }

    /// Manually refresh one collection right now, resetting its poll
    /// timer so the next automatic poll is a full interval away.
    pub async fn refresh(&self, collection: Collection) -> Result<(), CoreError> {
        let signal = {
            let run = self.inner.run.lock().await;
            let Some(state) = run.as_ref() else {
                return Err(CoreError::NotStarted);
            };
            state.refresh_signals.get(&collection).cloned()
        };

        let result = refresh_once(
            &self.inner.repo,
            &self.inner.store,
            collection,
            &self.inner.config.scope,
        )
        .await;

        if let Some(signal) = signal {
            // A full channel already holds a pending reset.
            let _ = signal.try_send(());
        }
        result
    }

    /// Tear down one collection's subscriber (degraded or not) and
    /// spawn a fresh one. The manual way out of degraded mode.
    pub async fn reset_feed(&self, collection: Collection) -> Result<(), CoreError> {
        let run = self.inner.run.lock().await;
        let Some(state) = run.as_ref() else {
            return Err(CoreError::NotStarted);
        };

        if let Some((_, handle)) = self.inner.subscribers.remove(&collection) {
            handle.stop().await;
        }
        info!(%collection, "feed reset requested");
        self.inner.subscribers.insert(
            collection,
            spawn_subscriber(
                Arc::clone(&self.inner.source),
                Arc::clone(&self.inner.store),
                collection,
                self.inner.config.scope.clone(),
                self.inner.config.reconnect.clone(),
                &state.cancel,
            ),
        );
        Ok(())
    }

    // ── Mutations ───────────────────────────────────────────────────
    //
    // Repository errors propagate to the caller untouched (no retry).
    // On success the corresponding event is applied locally so views
    // update before the change feed or the next poll echoes it.

    pub async fn create(&self, collection: Collection, entity: Value) -> Result<EntityDoc, CoreError> {
        let stored = self.inner.repo.create(collection, entity).await?;
        let doc = EntityDoc::from_value(collection, stored)?;
        self.inner
            .store
            .apply_event(ChangeEvent::new(ChangeAction::Insert, doc.clone()));
        Ok(doc)
    }

    pub async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
    ) -> Result<EntityDoc, CoreError> {
        let stored = self.inner.repo.update(collection, id, patch).await?;
        let doc = EntityDoc::from_value(collection, stored)?;
        self.inner
            .store
            .apply_event(ChangeEvent::new(ChangeAction::Update, doc.clone()));
        Ok(doc)
    }

    pub async fn remove(&self, collection: Collection, id: &str) -> Result<(), CoreError> {
        self.inner.repo.remove(collection, id).await?;
        if let Some(doc) = self.inner.store.find_doc(collection, id) {
            self.inner
                .store
                .apply_event(ChangeEvent::new(ChangeAction::Delete, doc));
        }
        Ok(())
    }

    // ── Accessors ───────────────────────────────────────────────────

    #[must_use]
    pub fn store(&self) -> &Arc<DataStore> {
        &self.inner.store
    }

    #[must_use]
    pub fn notifications(&self) -> &NotifyCenter {
        &self.inner.notify
    }

    #[must_use]
    pub fn search(&self) -> &SearchService {
        &self.inner.search
    }

    #[must_use]
    pub fn search_index(&self) -> &Arc<SearchIndex> {
        &self.inner.search_index
    }

    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Push-delivery status for one collection, `None` when the hub is
    /// not running.
    #[must_use]
    pub fn feed_status(&self, collection: Collection) -> Option<FeedStatus> {
        self.inner
            .subscribers
            .get(&collection)
            .map(|handle| handle.status())
    }

    // ── Internal ────────────────────────────────────────────────────

    async fn initial_load(&self) {
        let timeout = self.inner.config.initial_load_timeout;
        let loads = Collection::ALL.into_iter().map(|collection| {
            let repo = Arc::clone(&self.inner.repo);
            let store = Arc::clone(&self.inner.store);
            let scope = self.inner.config.scope.clone();
            async move {
                match tokio::time::timeout(timeout, repo.list(collection, &scope)).await {
                    Ok(Ok(docs)) => {
                        store.replace_collection(collection, docs, &scope);
                    }
                    Ok(Err(e)) => {
                        warn!(%collection, error = %e, "initial load failed, proceeding empty");
                        store.mark_stale(collection);
                    }
                    Err(_) => {
                        warn!(
                            %collection,
                            timeout_ms = timeout.as_millis(),
                            "initial load timed out, proceeding empty"
                        );
                        store.mark_stale(collection);
                    }
                }
            }
        });
        futures_util::future::join_all(loads).await;
    }

    fn spawn_poll_task(
        &self,
        collection: Collection,
        mut reset_rx: mpsc::Receiver<()>,
        cancel: &CancellationToken,
    ) -> JoinHandle<()> {
        let repo = Arc::clone(&self.inner.repo);
        let store = Arc::clone(&self.inner.store);
        let scope = self.inner.config.scope.clone();
        let poll_interval = self.inner.config.poll_interval;
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; the initial load
            // already covered it.
            interval.tick().await;

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        debug!(%collection, "poll task cancelled");
                        return;
                    }
                    reset = reset_rx.recv() => {
                        if reset.is_none() {
                            return;
                        }
                        // A manual refresh just ran; push the next
                        // automatic poll a full interval out.
                        interval.reset();
                    }
                    _ = interval.tick() => {
                        match refresh_once(&repo, &store, collection, &scope).await {
                            Ok(()) => {}
                            Err(e @ CoreError::PermissionDenied { .. }) => {
                                warn!(
                                    %collection,
                                    error = %e,
                                    "poll refresh not permitted, pausing until manual refresh"
                                );
                                // No automatic retry; a denial will not
                                // clear on its own. Wait for a manual
                                // refresh before polling again.
                                tokio::select! {
                                    biased;
                                    () = cancel.cancelled() => {
                                        debug!(%collection, "poll task cancelled");
                                        return;
                                    }
                                    reset = reset_rx.recv() => {
                                        if reset.is_none() {
                                            return;
                                        }
                                        interval.reset();
                                    }
                                }
                            }
                            Err(e) => {
                                warn!(%collection, error = %e, "poll refresh failed");
                            }
                        }
                    }
                }
            }
        })
    }
}

/// One authoritative list-and-replace pass. Failure marks the
/// collection stale; stale data keeps being served. A permission
/// rejection is also recorded in the collection's health.
async fn refresh_once(
    repo: &Arc<dyn EntityRepository>,
    store: &DataStore,
    collection: Collection,
    scope: &ScopeFilter,
) -> Result<(), CoreError> {
    match repo.list(collection, scope).await {
        Ok(docs) => {
            store.replace_collection(collection, docs, scope);
            Ok(())
        }
        Err(e) => {
            if e.is_permission() {
                store.set_permission_denied(collection, e.to_string());
            }
            store.mark_stale(collection);
            Err(e.into())
        }
    }
}
