// ── Wire-level record types ──
//
// What a change feed actually delivers: loosely-typed JSON entities
// tagged with a collection and an action. The engine core parses these
// into typed domain structs; nothing here validates beyond JSON shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter, EnumString};

// ── Collection ──────────────────────────────────────────────────────

/// One logical category of tracked entities.
///
/// Wire names are lowercase (`"leads"`, `"workers"`, ...) and stable —
/// they key change-feed subscriptions and repository calls.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Collection {
    Leads,
    Workers,
    Messages,
    Workflows,
    Listings,
}

impl Collection {
    /// All tracked collections, in dashboard display order.
    pub const ALL: [Self; 5] = [
        Self::Leads,
        Self::Workers,
        Self::Messages,
        Self::Workflows,
        Self::Listings,
    ];
}

// ── ScopeFilter ─────────────────────────────────────────────────────

/// Tenant/client partition applied to every subscription and list call.
///
/// Entities whose `scopeId` does not match are never delivered to the
/// engine; a well-behaved source filters server-side, but the subscriber
/// re-checks on arrival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeFilter {
    pub scope_id: String,
}

impl ScopeFilter {
    pub fn new(scope_id: impl Into<String>) -> Self {
        Self {
            scope_id: scope_id.into(),
        }
    }
}

// ── ChangeAction / ChangeRecord ─────────────────────────────────────

/// The kind of mutation a change record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

/// A single change-feed notification. Transient — never persisted.
///
/// `entity` carries the post-change document; `previous` carries the
/// pre-change document when the source can supply it (used by the
/// aggregation engine to decrement the old categorical bucket).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub action: ChangeAction,
    pub collection: Collection,
    pub entity: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<Value>,
}

impl ChangeRecord {
    pub fn new(action: ChangeAction, collection: Collection, entity: Value) -> Self {
        Self {
            action,
            collection,
            entity,
            previous: None,
        }
    }

    pub fn with_previous(mut self, previous: Value) -> Self {
        self.previous = Some(previous);
        self
    }

    /// The entity's `id` field, if present. Records without one are
    /// malformed and get dropped downstream.
    pub fn entity_id(&self) -> Option<&str> {
        self.entity.get("id").and_then(Value::as_str)
    }

    /// The entity's `scopeId` field, if present.
    pub fn scope_id(&self) -> Option<&str> {
        self.entity.get("scopeId").and_then(Value::as_str)
    }
}
