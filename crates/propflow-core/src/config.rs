// ── Runtime sync configuration ──
//
// Describes *how* the hub synchronizes: scope, intervals, timeouts,
// and reconnect policy. Built by the embedder and handed in -- the
// core never reads config files.

use std::time::Duration;

use propflow_feed::{ReconnectConfig, ScopeFilter};

/// Configuration for a single [`SyncHub`](crate::SyncHub).
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Tenant partition every subscription and list call is scoped to.
    pub scope: ScopeFilter,

    /// Consistency-backstop poll interval per collection.
    pub poll_interval: Duration,

    /// Hard ceiling on the initial load. Past it, the hub proceeds
    /// with an empty snapshot and marks the collection stale rather
    /// than blocking consumers.
    pub initial_load_timeout: Duration,

    /// Backoff policy for change-feed resubscription.
    pub reconnect: ReconnectConfig,

    /// Delay before an `auto_dismiss` notification is marked read.
    pub auto_dismiss_after: Duration,

    /// Debounce window applied by the search service.
    pub search_debounce: Duration,

    /// Maximum retained search-history entries.
    pub search_history_limit: usize,

    /// Prefix for local storage keys (notification list, search
    /// history), namespacing them by application identity.
    pub storage_namespace: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            scope: ScopeFilter::new("default"),
            poll_interval: Duration::from_secs(30),
            initial_load_timeout: Duration::from_secs(5),
            reconnect: ReconnectConfig::default(),
            auto_dismiss_after: Duration::from_secs(8),
            search_debounce: Duration::from_millis(300),
            search_history_limit: 20,
            storage_namespace: "propflow".into(),
        }
    }
}

impl HubConfig {
    /// Storage key for the persisted notification list.
    pub fn notifications_key(&self) -> String {
        format!("{}:notifications", self.storage_namespace)
    }

    /// Storage key for the persisted search history.
    pub fn search_history_key(&self) -> String {
        format!("{}:search-history", self.storage_namespace)
    }
}
