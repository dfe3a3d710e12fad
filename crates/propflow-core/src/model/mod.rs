// ── Domain model ──
//
// Canonical typed entities for the five tracked collections, plus the
// typed change event the stores consume. Wire documents are camelCase
// JSON; everything here parses strictly enough that a document missing
// its id never reaches a store.

mod common;
mod event;
mod lead;
mod listing;
mod message;
mod wflow;
mod worker;

use chrono::{DateTime, Utc};
use propflow_feed::Collection;

pub use common::Priority;
pub use event::{ChangeEvent, EntityDoc};
pub use lead::{Lead, LeadSource, LeadStatus};
pub use listing::{Listing, ListingStatus};
pub use message::{Message, MessageStatus};
pub use wflow::{Workflow, WorkflowStatus};
pub use worker::{AiWorker, WorkerStatus};

/// Shared shape of every tracked entity.
///
/// `relevance` is the static score search uses as a tie-break: leads
/// expose their (opaque, source-supplied) lead score, workers their
/// completed-task count, listings a price band; kinds without a natural
/// score return 0.
pub trait Tracked: Clone + Send + Sync + 'static {
    /// The collection this entity kind belongs to.
    const COLLECTION: Collection;

    fn id(&self) -> &str;
    fn scope_id(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
    fn updated_at(&self) -> DateTime<Utc>;

    // ── Search projection ───────────────────────────────────────────
    fn search_title(&self) -> String;
    fn search_description(&self) -> String;
    fn relevance(&self) -> i64 {
        0
    }
}

pub(crate) fn default_timestamp() -> DateTime<Utc> {
    Utc::now()
}
