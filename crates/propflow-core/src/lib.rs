// propflow-core: Reactive sync engine between propflow-feed and consumers.

pub mod config;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod search;
pub mod store;
pub mod stream;
pub mod subscriber;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::HubConfig;
pub use error::CoreError;
pub use hub::SyncHub;
pub use metrics::DashboardMetrics;
pub use notify::{Notification, NotificationKind, NotifyCenter};
pub use search::{SearchHit, SearchIndex, SearchService};
pub use store::{AppliedChange, CollectionHealth, DataStore, HealthMap};
pub use stream::EntityStream;
pub use subscriber::{FeedStatus, SubscriberHandle};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    // Core entities
    AiWorker, Lead, Listing, Message, Workflow,
    // Status enums
    LeadSource, LeadStatus, ListingStatus, MessageStatus, WorkerStatus, WorkflowStatus,
    // Supporting types
    ChangeEvent, EntityDoc, Priority, Tracked,
};
