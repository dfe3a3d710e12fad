// End-to-end tests over the full hub: in-memory backend, real
// subscriber/poll tasks, real stores and metrics.

#![allow(clippy::unwrap_used)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use propflow_core::{
    CoreError, FeedStatus, HubConfig, LeadStatus, SyncHub,
};
use propflow_feed::{
    ChangeAction, ChangeFeedSource, ChangeRecord, Collection, EntityRepository, FeedError,
    MemoryFeed, MemoryStore, ReconnectConfig, ScopeFilter,
};
use serde_json::{Value, json};

fn lead_doc(id: &str, name: &str, status: &str, updated: &str) -> Value {
    json!({
        "id": id,
        "scopeId": "tenant-a",
        "fullName": name,
        "status": status,
        "source": "website",
        "createdAt": updated,
        "updatedAt": updated,
    })
}

fn fast_config() -> HubConfig {
    HubConfig {
        scope: ScopeFilter::new("tenant-a"),
        // Long enough that polls never fire mid-test; the poll test
        // overrides it.
        poll_interval: Duration::from_secs(3600),
        initial_load_timeout: Duration::from_secs(1),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            max_retries: 2,
        },
        search_debounce: Duration::from_millis(20),
        ..HubConfig::default()
    }
}

fn hub_over(feed: &Arc<MemoryFeed>, config: HubConfig) -> SyncHub {
    SyncHub::new(
        Arc::clone(feed) as Arc<dyn ChangeFeedSource>,
        Arc::clone(feed) as Arc<dyn EntityRepository>,
        Arc::new(MemoryStore::new()),
        config,
    )
}

async fn wait_until<F, Fut>(what: &str, mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Duration::from_secs(5);
    let result = tokio::time::timeout(deadline, async {
        loop {
            if probe().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn initial_load_populates_stores_and_metrics() {
    let feed = Arc::new(MemoryFeed::new());
    feed.seed(
        Collection::Leads,
        [
            lead_doc("l1", "Dana Reyes", "new", "2026-01-01T00:00:01Z"),
            lead_doc("l2", "Jordan Vale", "converted", "2026-01-01T00:00:02Z"),
        ],
    );
    feed.seed(
        Collection::Listings,
        [json!({
            "id": "p1", "scopeId": "tenant-a", "title": "Marina View Loft",
            "status": "active", "price": 450_000.0,
            "updatedAt": "2026-01-01T00:00:03Z",
        })],
    );

    let hub = hub_over(&feed, fast_config());
    hub.start().await.unwrap();

    let store = hub.store();
    assert_eq!(store.len(Collection::Leads), 2);
    assert_eq!(store.len(Collection::Listings), 1);
    assert!(!store.health(Collection::Leads).stale);

    let metrics = store.metrics();
    assert_eq!(metrics.total_leads, 2);
    assert_eq!(metrics.leads_by_status.get(&LeadStatus::Converted), Some(&1));
    assert!((metrics.conversion_rate - 0.5).abs() < 1e-9);

    hub.shutdown().await;
}

#[tokio::test]
async fn pushed_changes_flow_into_store_and_metrics() {
    let feed = Arc::new(MemoryFeed::new());
    let hub = hub_over(&feed, fast_config());
    hub.start().await.unwrap();

    wait_until("feed subscribed", || async {
        hub.feed_status(Collection::Leads) == Some(FeedStatus::Subscribed)
    })
    .await;

    feed.publish(&ChangeRecord::new(
        ChangeAction::Insert,
        Collection::Leads,
        lead_doc("l1", "Dana Reyes", "new", "2026-01-01T00:00:01Z"),
    ));
    wait_until("insert applied", || async {
        hub.store().len(Collection::Leads) == 1
    })
    .await;

    feed.publish(
        &ChangeRecord::new(
            ChangeAction::Update,
            Collection::Leads,
            json!({
                "id": "l1", "scopeId": "tenant-a", "fullName": "Dana Reyes",
                "status": "converted", "source": "website", "budget": 320_000.0,
                "updatedAt": "2026-01-01T00:00:05Z",
            }),
        )
        .with_previous(lead_doc("l1", "Dana Reyes", "new", "2026-01-01T00:00:01Z")),
    );
    wait_until("update applied", || async {
        hub.store().leads()[0].status == LeadStatus::Converted
    })
    .await;

    let incremental = hub.store().metrics();
    let recomputed = hub.store().compute_metrics();
    assert_eq!(incremental.total_leads, recomputed.total_leads);
    assert_eq!(incremental.leads_by_status, recomputed.leads_by_status);
    assert!((incremental.revenue - 320_000.0).abs() < 1e-6);

    hub.shutdown().await;
}

#[tokio::test]
async fn refresh_supersedes_stale_pushes() {
    let feed = Arc::new(MemoryFeed::new());
    feed.seed(
        Collection::Leads,
        [lead_doc("l1", "Dana Reyes", "new", "2026-01-01T00:00:10Z")],
    );

    let hub = hub_over(&feed, fast_config());
    hub.start().await.unwrap();
    wait_until("feed subscribed", || async {
        hub.feed_status(Collection::Leads) == Some(FeedStatus::Subscribed)
    })
    .await;

    // A push computed before the refresh, arriving after it: its
    // timestamp does not exceed the refresh watermark, so it must not
    // resurrect an entity the authoritative listing does not contain.
    feed.publish(&ChangeRecord::new(
        ChangeAction::Update,
        Collection::Leads,
        lead_doc("ghost", "Ghost Lead", "new", "2026-01-01T00:00:05Z"),
    ));
    // A genuinely newer push must still land.
    feed.publish(&ChangeRecord::new(
        ChangeAction::Insert,
        Collection::Leads,
        lead_doc("fresh", "Fresh Lead", "new", "2026-01-01T00:00:11Z"),
    ));

    wait_until("fresh lead applied", || async {
        hub.store()
            .leads()
            .iter()
            .any(|l| l.id == "fresh")
    })
    .await;

    let ids: Vec<String> = hub.store().leads().iter().map(|l| l.id.clone()).collect();
    assert!(ids.contains(&"l1".to_owned()));
    assert!(!ids.contains(&"ghost".to_owned()));

    hub.shutdown().await;
}

#[tokio::test]
async fn poll_reconciles_changes_that_bypassed_the_feed() {
    let feed = Arc::new(MemoryFeed::new());
    let mut config = fast_config();
    config.poll_interval = Duration::from_millis(100);
    let hub = hub_over(&feed, config);
    hub.start().await.unwrap();
    assert_eq!(hub.store().len(Collection::Workers), 0);

    // Entity appears in the backend without a change record.
    feed.seed(
        Collection::Workers,
        [json!({
            "id": "w1", "scopeId": "tenant-a", "name": "Listing writer",
            "status": "active", "completedTasks": 12,
            "updatedAt": "2026-01-01T00:00:01Z",
        })],
    );

    wait_until("poll picked up the worker", || async {
        hub.store().len(Collection::Workers) == 1
    })
    .await;
    assert_eq!(hub.store().metrics().total_workers, 1);

    hub.shutdown().await;
}

#[tokio::test]
async fn degraded_feed_falls_back_to_polling_and_resets() {
    let feed = Arc::new(MemoryFeed::new());
    feed.refuse_subscriptions(true);

    let hub = hub_over(&feed, fast_config());
    hub.start().await.unwrap();

    wait_until("feed degraded", || async {
        hub.feed_status(Collection::Leads) == Some(FeedStatus::Degraded)
    })
    .await;
    assert!(hub.store().health(Collection::Leads).degraded);

    // Data still moves through the pull path.
    feed.seed(
        Collection::Leads,
        [lead_doc("l1", "Dana Reyes", "new", "2026-01-01T00:00:01Z")],
    );
    hub.refresh(Collection::Leads).await.unwrap();
    assert_eq!(hub.store().len(Collection::Leads), 1);

    // Manual reset after the transport recovers.
    feed.refuse_subscriptions(false);
    hub.reset_feed(Collection::Leads).await.unwrap();
    wait_until("feed resubscribed", || async {
        hub.feed_status(Collection::Leads) == Some(FeedStatus::Subscribed)
    })
    .await;
    assert!(!hub.store().health(Collection::Leads).degraded);

    feed.publish(&ChangeRecord::new(
        ChangeAction::Insert,
        Collection::Leads,
        lead_doc("l2", "Jordan Vale", "new", "2026-01-01T00:00:02Z"),
    ));
    wait_until("push flows again", || async {
        hub.store().len(Collection::Leads) == 2
    })
    .await;

    hub.shutdown().await;
}

#[tokio::test]
async fn denied_mutations_propagate_and_leave_state_untouched() {
    let feed = Arc::new(MemoryFeed::new());
    let hub = hub_over(&feed, fast_config());
    hub.start().await.unwrap();

    feed.deny_writes(true);
    let err = hub
        .create(
            Collection::Leads,
            json!({ "scopeId": "tenant-a", "fullName": "Dana Reyes",
                    "status": "new", "source": "website" }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::PermissionDenied { .. }));
    assert_eq!(hub.store().len(Collection::Leads), 0);

    let err = hub
        .update(Collection::Leads, "nope", json!({ "status": "contacted" }))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::PermissionDenied { .. }));

    feed.deny_writes(false);
    let err = hub
        .update(Collection::Leads, "nope", json!({ "status": "contacted" }))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));

    hub.shutdown().await;
}

#[tokio::test]
async fn denied_polls_surface_through_health_and_pause_until_refresh() {
    let feed = Arc::new(MemoryFeed::new());
    let mut config = fast_config();
    config.poll_interval = Duration::from_millis(50);
    let hub = hub_over(&feed, config);
    hub.start().await.unwrap();

    feed.deny_reads(true);
    wait_until("denial reaches health", || async {
        hub.store()
            .health(Collection::Leads)
            .permission_denied
            .is_some()
    })
    .await;
    assert!(hub.store().health(Collection::Leads).stale);

    // Access comes back and data appears, but a denied collection is
    // not polled again on its own.
    feed.deny_reads(false);
    feed.seed(
        Collection::Leads,
        [lead_doc("l1", "Dana Reyes", "new", "2026-01-01T00:00:01Z")],
    );
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(hub.store().len(Collection::Leads), 0);

    // A manual refresh clears the denial and resumes polling.
    hub.refresh(Collection::Leads).await.unwrap();
    let health = hub.store().health(Collection::Leads);
    assert!(health.permission_denied.is_none());
    assert!(!health.stale);
    assert_eq!(hub.store().len(Collection::Leads), 1);

    feed.seed(
        Collection::Leads,
        [lead_doc("l2", "Jordan Vale", "new", "2026-01-01T00:00:02Z")],
    );
    wait_until("automatic polling resumed", || async {
        hub.store().len(Collection::Leads) == 2
    })
    .await;

    hub.shutdown().await;
}

#[tokio::test]
async fn successful_mutations_apply_locally_before_the_next_poll() {
    let feed = Arc::new(MemoryFeed::new());
    let hub = hub_over(&feed, fast_config());
    hub.start().await.unwrap();

    let doc = hub
        .create(
            Collection::Leads,
            json!({ "scopeId": "tenant-a", "fullName": "Dana Reyes",
                    "status": "new", "source": "website" }),
        )
        .await
        .unwrap();
    assert_eq!(hub.store().len(Collection::Leads), 1);

    hub.update(
        Collection::Leads,
        doc.id(),
        json!({ "status": "qualified" }),
    )
    .await
    .unwrap();
    wait_until("local update visible", || async {
        hub.store().leads()[0].status == LeadStatus::Qualified
    })
    .await;

    hub.remove(Collection::Leads, doc.id()).await.unwrap();
    wait_until("local delete visible", || async {
        hub.store().is_empty(Collection::Leads)
    })
    .await;
    assert_eq!(hub.store().metrics().total_leads, 0);

    hub.shutdown().await;
}

#[tokio::test]
async fn failed_initial_load_proceeds_empty_and_stale() {
    let feed = Arc::new(MemoryFeed::new());
    feed.seed(
        Collection::Leads,
        [lead_doc("l1", "Dana Reyes", "new", "2026-01-01T00:00:01Z")],
    );
    // One injected failure per collection's initial load.
    feed.fail_next_lists(5);

    let hub = hub_over(&feed, fast_config());
    hub.start().await.unwrap();

    assert!(hub.store().is_empty(Collection::Leads));
    assert!(hub.store().health(Collection::Leads).stale);

    // The next successful refresh clears the flag.
    hub.refresh(Collection::Leads).await.unwrap();
    assert_eq!(hub.store().len(Collection::Leads), 1);
    assert!(!hub.store().health(Collection::Leads).stale);

    hub.shutdown().await;
}

/// A repository whose `list` never answers, to exercise the hard
/// initial-load timeout.
struct HangingRepo;

#[async_trait]
impl EntityRepository for HangingRepo {
    async fn list(
        &self,
        _collection: Collection,
        _scope: &ScopeFilter,
    ) -> Result<Vec<Value>, FeedError> {
        std::future::pending().await
    }

    async fn create(&self, collection: Collection, _entity: Value) -> Result<Value, FeedError> {
        Err(FeedError::Transport(format!("create {collection} unsupported")))
    }

    async fn update(
        &self,
        collection: Collection,
        _id: &str,
        _patch: Value,
    ) -> Result<Value, FeedError> {
        Err(FeedError::Transport(format!("update {collection} unsupported")))
    }

    async fn remove(&self, collection: Collection, _id: &str) -> Result<(), FeedError> {
        Err(FeedError::Transport(format!("remove {collection} unsupported")))
    }
}

#[tokio::test(start_paused = true)]
async fn hung_initial_load_hits_the_timeout_and_marks_stale() {
    let feed = Arc::new(MemoryFeed::new());
    let hub = SyncHub::new(
        Arc::clone(&feed) as Arc<dyn ChangeFeedSource>,
        Arc::new(HangingRepo),
        Arc::new(MemoryStore::new()),
        fast_config(),
    );

    hub.start().await.unwrap();
    for collection in Collection::ALL {
        assert!(hub.store().is_empty(collection));
        assert!(hub.store().health(collection).stale);
    }

    hub.shutdown().await;
}

#[tokio::test]
async fn search_sees_synced_entities_after_debounce() {
    let feed = Arc::new(MemoryFeed::new());
    feed.seed(
        Collection::Leads,
        [lead_doc("l1", "Dana Harborview", "new", "2026-01-01T00:00:01Z")],
    );

    let hub = hub_over(&feed, fast_config());
    hub.start().await.unwrap();

    let mut results = hub.search().subscribe_results();
    hub.search().request("harbor");
    tokio::time::timeout(Duration::from_secs(5), results.changed())
        .await
        .unwrap()
        .unwrap();

    let hits = results.borrow_and_update().clone();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "l1");
    assert_eq!(hub.search_index().history(), ["harbor"]);

    hub.shutdown().await;
}
