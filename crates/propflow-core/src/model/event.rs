// ── Typed change events ──
//
// The boundary delivers loosely-typed JSON records; this is where they
// become typed or get dropped. A document that fails to match its
// collection's shape (missing id, unknown status) never reaches a
// store -- it is logged and skipped, and processing of subsequent
// records continues unaffected.

use chrono::{DateTime, Utc};
use propflow_feed::{ChangeAction, ChangeRecord, Collection};
use serde_json::Value;
use tracing::debug;

use super::lead::Lead;
use super::listing::Listing;
use super::message::Message;
use super::wflow::Workflow;
use super::worker::AiWorker;
use crate::error::CoreError;

// ── EntityDoc ───────────────────────────────────────────────────────

/// Tagged union over the five entity kinds, keyed by [`Collection`].
#[derive(Debug, Clone)]
pub enum EntityDoc {
    Lead(Lead),
    Worker(AiWorker),
    Message(Message),
    Workflow(Workflow),
    Listing(Listing),
}

impl EntityDoc {
    /// Parse a wire document into the typed shape for `collection`.
    pub fn from_value(collection: Collection, value: Value) -> Result<Self, CoreError> {
        let malformed = |e: serde_json::Error| CoreError::MalformedEntity {
            collection: collection.to_string(),
            message: e.to_string(),
        };
        match collection {
            Collection::Leads => serde_json::from_value(value).map(Self::Lead).map_err(malformed),
            Collection::Workers => serde_json::from_value(value)
                .map(Self::Worker)
                .map_err(malformed),
            Collection::Messages => serde_json::from_value(value)
                .map(Self::Message)
                .map_err(malformed),
            Collection::Workflows => serde_json::from_value(value)
                .map(Self::Workflow)
                .map_err(malformed),
            Collection::Listings => serde_json::from_value(value)
                .map(Self::Listing)
                .map_err(malformed),
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            Self::Lead(_) => Collection::Leads,
            Self::Worker(_) => Collection::Workers,
            Self::Message(_) => Collection::Messages,
            Self::Workflow(_) => Collection::Workflows,
            Self::Listing(_) => Collection::Listings,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Lead(e) => &e.id,
            Self::Worker(e) => &e.id,
            Self::Message(e) => &e.id,
            Self::Workflow(e) => &e.id,
            Self::Listing(e) => &e.id,
        }
    }

    pub fn scope_id(&self) -> &str {
        match self {
            Self::Lead(e) => &e.scope_id,
            Self::Worker(e) => &e.scope_id,
            Self::Message(e) => &e.scope_id,
            Self::Workflow(e) => &e.scope_id,
            Self::Listing(e) => &e.scope_id,
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Self::Lead(e) => e.updated_at,
            Self::Worker(e) => e.updated_at,
            Self::Message(e) => e.updated_at,
            Self::Workflow(e) => e.updated_at,
            Self::Listing(e) => e.updated_at,
        }
    }
}

// ── ChangeEvent ─────────────────────────────────────────────────────

/// A typed change notification, ready to apply to a store. Transient.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub action: ChangeAction,
    pub doc: EntityDoc,
    /// Pre-change document when the source supplied one; used by the
    /// aggregation engine to decrement the old categorical buckets.
    pub previous: Option<EntityDoc>,
}

impl ChangeEvent {
    pub fn new(action: ChangeAction, doc: EntityDoc) -> Self {
        Self {
            action,
            doc,
            previous: None,
        }
    }

    /// Parse a wire record. The main document must match its
    /// collection's shape; a `previous` that doesn't parse is dropped
    /// (it only improves aggregation, it is not required).
    pub fn from_record(record: ChangeRecord) -> Result<Self, CoreError> {
        let collection = record.collection;
        let doc = EntityDoc::from_value(collection, record.entity)?;
        let previous = record.previous.and_then(|value| {
            match EntityDoc::from_value(collection, value) {
                Ok(prev) => Some(prev),
                Err(e) => {
                    debug!(%collection, error = %e, "ignoring unparseable previous document");
                    None
                }
            }
        });
        Ok(Self {
            action: record.action,
            doc,
            previous,
        })
    }
}
