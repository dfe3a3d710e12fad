// ── Cross-collection search ──
//
// Query-time matching over current store snapshots; nothing is
// pre-indexed, so results can never lag the data. A debounced service
// front coalesces rapid keystrokes, and the query history persists to
// the local store.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use propflow_feed::{Collection, LocalStore};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::HubConfig;
use crate::model::Tracked;
use crate::store::DataStore;

/// One search result row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    pub kind: Collection,
    pub title: String,
    pub description: String,
    /// Static per-entity relevance; see [`Tracked::relevance`].
    pub score: i64,
}

// ── SearchIndex ─────────────────────────────────────────────────────

/// Query-time search over the data store, with persisted history.
pub struct SearchIndex {
    store: Arc<DataStore>,
    storage: Arc<dyn LocalStore>,
    history_key: String,
    history_limit: usize,
    history: Mutex<VecDeque<String>>,
}

impl SearchIndex {
    pub fn new(store: Arc<DataStore>, storage: Arc<dyn LocalStore>, config: &HubConfig) -> Self {
        let history_key = config.search_history_key();
        let history = match storage.get(&history_key) {
            Ok(Some(text)) => match serde_json::from_str::<VecDeque<String>>(&text) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(error = %e, "stored search history unreadable, starting fresh");
                    VecDeque::new()
                }
            },
            Ok(None) => VecDeque::new(),
            Err(e) => {
                warn!(error = %e, "search history storage unavailable, starting fresh");
                VecDeque::new()
            }
        };

        Self {
            store,
            storage,
            history_key,
            history_limit: config.search_history_limit,
            history: Mutex::new(history),
        }
    }

    /// Run a query against current snapshots. Case-insensitive
    /// substring match over title and description; results ordered by
    /// descending relevance, ties broken by title. An empty or
    /// whitespace-only term yields nothing and is not recorded.
    pub fn query(&self, term: &str) -> Vec<SearchHit> {
        let trimmed = term.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        self.record(trimmed);

        let needle = trimmed.to_lowercase();
        let mut hits = Vec::new();
        collect_hits(&self.store.leads(), &needle, &mut hits);
        collect_hits(&self.store.workers(), &needle, &mut hits);
        collect_hits(&self.store.messages(), &needle, &mut hits);
        collect_hits(&self.store.workflows(), &needle, &mut hits);
        collect_hits(&self.store.listings(), &needle, &mut hits);

        hits.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
                .then_with(|| a.id.cmp(&b.id))
        });
        hits
    }

    /// Recent query terms, most recent first.
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.lock_history().iter().cloned().collect()
    }

    pub fn clear_history(&self) {
        self.lock_history().clear();
        self.persist_history();
    }

    fn record(&self, term: &str) {
        {
            let mut history = self.lock_history();
            history.retain(|t| t != term);
            history.push_front(term.to_owned());
            history.truncate(self.history_limit);
        }
        self.persist_history();
    }

    fn persist_history(&self) {
        let serialized = {
            let history = self.lock_history();
            serde_json::to_string(&*history)
        };
        match serialized {
            Ok(text) => {
                if let Err(e) = self.storage.set(&self.history_key, &text) {
                    warn!(error = %e, "failed to persist search history");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize search history"),
        }
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn collect_hits<T: Tracked>(snapshot: &[Arc<T>], needle: &str, hits: &mut Vec<SearchHit>) {
    for entity in snapshot {
        let title = entity.search_title();
        let description = entity.search_description();
        if title.to_lowercase().contains(needle) || description.to_lowercase().contains(needle) {
            hits.push(SearchHit {
                id: entity.id().to_owned(),
                kind: T::COLLECTION,
                title,
                description,
                score: entity.relevance(),
            });
        }
    }
}

// ── SearchService ───────────────────────────────────────────────────

/// Debounced front for [`SearchIndex`]. Rapid successive requests
/// coalesce to the latest term; only that one is executed and
/// recorded.
pub struct SearchService {
    query_tx: watch::Sender<String>,
    results: watch::Receiver<Arc<Vec<SearchHit>>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SearchService {
    pub fn new(index: Arc<SearchIndex>, debounce: Duration, parent: &CancellationToken) -> Self {
        let cancel = parent.child_token();
        let (query_tx, query_rx) = watch::channel(String::new());
        let (results_tx, results) = watch::channel(Arc::new(Vec::new()));

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            debounce_loop(index, debounce, query_rx, results_tx, task_cancel).await;
        });

        Self {
            query_tx,
            results,
            cancel,
            task,
        }
    }

    /// Submit a term. Results arrive through
    /// [`subscribe_results`](Self::subscribe_results) once the
    /// debounce window has passed without newer input.
    pub fn request(&self, term: impl Into<String>) {
        let term = term.into();
        self.query_tx.send_modify(|q| *q = term);
    }

    #[must_use]
    pub fn results(&self) -> Arc<Vec<SearchHit>> {
        self.results.borrow().clone()
    }

    #[must_use]
    pub fn subscribe_results(&self) -> watch::Receiver<Arc<Vec<SearchHit>>> {
        self.results.clone()
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

async fn debounce_loop(
    index: Arc<SearchIndex>,
    debounce: Duration,
    mut query_rx: watch::Receiver<String>,
    results_tx: watch::Sender<Arc<Vec<SearchHit>>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            changed = query_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        // Restart the window while input keeps arriving.
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                changed = query_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                () = tokio::time::sleep(debounce) => break,
            }
        }

        let term = query_rx.borrow_and_update().clone();
        let hits = Arc::new(index.query(&term));
        debug!(term, hits = hits.len(), "search executed");
        results_tx.send_modify(|r| *r = hits);
    }
}
