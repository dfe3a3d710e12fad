// ── Change-feed subscriber ──
//
// One task per collection. Records arrive in order through a single
// consumer loop, get parsed into typed events and applied to the
// store. Transport failures trigger bounded exponential resubscription;
// exhaustion (or a permission refusal) parks the task in degraded mode
// until it is cancelled, leaving polling as the only sync path.

use std::sync::Arc;

use propflow_feed::{
    ChangeFeedSource, Collection, FeedSubscription, ReconnectConfig, ScopeFilter, backoff_delay,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::model::ChangeEvent;
use crate::store::DataStore;

/// Push-delivery state for one collection's feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// First subscription attempt in progress.
    Connecting,
    /// Live; records are flowing.
    Subscribed,
    /// Lost the transport; waiting out a backoff delay before attempt
    /// `attempt` (1-based).
    Reconnecting { attempt: u32 },
    /// Push abandoned. Polling keeps the data moving; only a manual
    /// feed reset leaves this state.
    Degraded,
}

/// Handle for one collection's subscriber task.
pub struct SubscriberHandle {
    collection: Collection,
    cancel: CancellationToken,
    status: watch::Receiver<FeedStatus>,
    task: JoinHandle<()>,
}

impl SubscriberHandle {
    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn status(&self) -> FeedStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<FeedStatus> {
        self.status.clone()
    }

    /// Stop delivery. Idempotent; takes effect synchronously (the task
    /// may linger briefly, but no further event is applied).
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Cancel and wait for the task to wind down.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

pub(crate) fn spawn_subscriber(
    source: Arc<dyn ChangeFeedSource>,
    store: Arc<DataStore>,
    collection: Collection,
    scope: ScopeFilter,
    reconnect: ReconnectConfig,
    parent: &CancellationToken,
) -> SubscriberHandle {
    let cancel = parent.child_token();
    let (status_tx, status_rx) = watch::channel(FeedStatus::Connecting);

    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        subscriber_loop(
            source,
            store,
            collection,
            scope,
            reconnect,
            task_cancel,
            status_tx,
        )
        .await;
    });

    SubscriberHandle {
        collection,
        cancel,
        status: status_rx,
        task,
    }
}

#[allow(clippy::too_many_lines)]
async fn subscriber_loop(
    source: Arc<dyn ChangeFeedSource>,
    store: Arc<DataStore>,
    collection: Collection,
    scope: ScopeFilter,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
    status: watch::Sender<FeedStatus>,
) {
    let mut attempt: u32 = 0;

    loop {
        let subscription = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(%collection, "subscriber cancelled");
                return;
            }
            result = source.subscribe(collection, &scope) => result,
        };

        match subscription {
            Ok(sub) => {
                info!(%collection, "feed subscribed");
                status.send_modify(|s| *s = FeedStatus::Subscribed);
                store.set_degraded(collection, false);
                attempt = 0;

                if consume(sub, &store, collection, &scope, &cancel).await == Consumed::Cancelled {
                    return;
                }
                warn!(%collection, "feed disconnected");
            }
            Err(e) if e.is_permission() => {
                warn!(%collection, error = %e, "feed subscription refused, not retrying");
                enter_degraded(&store, collection, &status, &cancel).await;
                return;
            }
            Err(e) => {
                debug!(%collection, error = %e, "feed subscription failed");
            }
        }

        if attempt >= reconnect.max_retries {
            warn!(
                %collection,
                attempts = attempt,
                "resubscription budget exhausted, falling back to polling"
            );
            enter_degraded(&store, collection, &status, &cancel).await;
            return;
        }

        let delay = backoff_delay(attempt, &reconnect);
        attempt += 1;
        status.send_modify(|s| *s = FeedStatus::Reconnecting { attempt });
        debug!(%collection, attempt, delay_ms = delay.as_millis(), "backing off before resubscribe");

        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Consumed {
    Cancelled,
    Disconnected,
}

/// Drain one live subscription until cancellation or end-of-stream.
async fn consume(
    mut sub: FeedSubscription,
    store: &DataStore,
    collection: Collection,
    scope: &ScopeFilter,
    cancel: &CancellationToken,
) -> Consumed {
    loop {
        let record = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                sub.unsubscribe();
                return Consumed::Cancelled;
            }
            record = sub.recv() => record,
        };
        let Some(record) = record else {
            return Consumed::Disconnected;
        };

        match ChangeEvent::from_record(record) {
            Ok(event) => {
                if event.doc.scope_id() != scope.scope_id {
                    debug!(
                        %collection,
                        id = event.doc.id(),
                        "ignoring event outside scope"
                    );
                    continue;
                }
                store.apply_event(event);
            }
            Err(e) => {
                warn!(%collection, error = %e, "dropping malformed change record");
            }
        }
    }
}

async fn enter_degraded(
    store: &DataStore,
    collection: Collection,
    status: &watch::Sender<FeedStatus>,
    cancel: &CancellationToken,
) {
    store.set_degraded(collection, true);
    status.send_modify(|s| *s = FeedStatus::Degraded);
    cancel.cancelled().await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use propflow_feed::{ChangeAction, ChangeRecord, MemoryFeed};
    use serde_json::json;
    use std::time::Duration;

    fn scope() -> ScopeFilter {
        ScopeFilter::new("tenant-a")
    }

    fn fast_reconnect() -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            max_retries: 2,
        }
    }

    fn lead_record(id: &str, status: &str, updated: &str) -> ChangeRecord {
        ChangeRecord::new(
            ChangeAction::Insert,
            Collection::Leads,
            json!({
                "id": id,
                "scopeId": "tenant-a",
                "fullName": "Dana Reyes",
                "status": status,
                "source": "website",
                "updatedAt": updated,
            }),
        )
    }

    async fn wait_for_status(handle: &SubscriberHandle, wanted: FeedStatus) {
        let mut rx = handle.subscribe_status();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if *rx.borrow_and_update() == wanted {
                    return;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn pushed_records_land_in_the_store() {
        let feed = Arc::new(MemoryFeed::new());
        let store = Arc::new(DataStore::new());
        let cancel = CancellationToken::new();

        let handle = spawn_subscriber(
            Arc::clone(&feed) as Arc<dyn ChangeFeedSource>,
            Arc::clone(&store),
            Collection::Leads,
            scope(),
            fast_reconnect(),
            &cancel,
        );
        wait_for_status(&handle, FeedStatus::Subscribed).await;

        feed.publish(&lead_record("l1", "new", "2026-01-01T00:00:00Z"));

        let mut leads = store.subscribe_leads();
        if leads.current().is_empty() {
            leads.changed().await.unwrap();
        }
        assert_eq!(store.leads()[0].id, "l1");

        handle.stop().await;
    }

    #[tokio::test]
    async fn malformed_records_are_skipped_and_flow_continues() {
        let feed = Arc::new(MemoryFeed::new());
        let store = Arc::new(DataStore::new());
        let cancel = CancellationToken::new();

        let handle = spawn_subscriber(
            Arc::clone(&feed) as Arc<dyn ChangeFeedSource>,
            Arc::clone(&store),
            Collection::Leads,
            scope(),
            fast_reconnect(),
            &cancel,
        );
        wait_for_status(&handle, FeedStatus::Subscribed).await;

        feed.publish(&ChangeRecord::new(
            ChangeAction::Insert,
            Collection::Leads,
            json!({ "fullName": "no id" }),
        ));
        feed.publish(&lead_record("l2", "new", "2026-01-01T00:00:00Z"));

        let mut leads = store.subscribe_leads();
        if leads.current().is_empty() {
            leads.changed().await.unwrap();
        }
        assert_eq!(store.len(Collection::Leads), 1);
        assert_eq!(store.leads()[0].id, "l2");

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_enter_degraded_mode() {
        let feed = Arc::new(MemoryFeed::new());
        feed.refuse_subscriptions(true);
        let store = Arc::new(DataStore::new());
        let cancel = CancellationToken::new();

        let handle = spawn_subscriber(
            Arc::clone(&feed) as Arc<dyn ChangeFeedSource>,
            Arc::clone(&store),
            Collection::Workers,
            scope(),
            fast_reconnect(),
            &cancel,
        );

        wait_for_status(&handle, FeedStatus::Degraded).await;
        assert!(store.health(Collection::Workers).degraded);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_transport_reconnects_and_resumes() {
        let feed = Arc::new(MemoryFeed::new());
        let store = Arc::new(DataStore::new());
        let cancel = CancellationToken::new();

        let handle = spawn_subscriber(
            Arc::clone(&feed) as Arc<dyn ChangeFeedSource>,
            Arc::clone(&store),
            Collection::Leads,
            scope(),
            fast_reconnect(),
            &cancel,
        );
        wait_for_status(&handle, FeedStatus::Subscribed).await;

        feed.drop_subscriptions(Collection::Leads);
        // The loop backs off and resubscribes.
        wait_for_status(&handle, FeedStatus::Subscribed).await;
        assert!(!store.health(Collection::Leads).degraded);

        handle.stop().await;
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let feed = Arc::new(MemoryFeed::new());
        let store = Arc::new(DataStore::new());
        let cancel = CancellationToken::new();

        let handle = spawn_subscriber(
            Arc::clone(&feed) as Arc<dyn ChangeFeedSource>,
            store,
            Collection::Leads,
            scope(),
            fast_reconnect(),
            &cancel,
        );
        handle.unsubscribe();
        handle.unsubscribe();
        assert!(!handle.is_active());
        handle.stop().await;
    }
}
