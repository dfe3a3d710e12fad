// ── Message domain types ──

use chrono::{DateTime, Utc};
use propflow_feed::Collection;
use serde::{Deserialize, Serialize};
use strum::Display;

use super::{Tracked, default_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[non_exhaustive]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
    Failed,
}

/// One outbound or inbound message tied to a lead conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub scope_id: String,
    #[serde(default)]
    pub lead_id: Option<String>,
    /// Delivery channel name as the source reports it ("sms", "email",
    /// "whatsapp", ...). Opaque to the engine.
    #[serde(default)]
    pub channel: Option<String>,
    pub status: MessageStatus,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Time from outbound send to first reply, where the source tracks
    /// it. Feeds the average-response-time aggregate.
    #[serde(default)]
    pub response_time_ms: Option<u64>,
    #[serde(default = "default_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Tracked for Message {
    const COLLECTION: Collection = Collection::Messages;

    fn id(&self) -> &str {
        &self.id
    }

    fn scope_id(&self) -> &str {
        &self.scope_id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn search_title(&self) -> String {
        self.subject
            .clone()
            .or_else(|| self.body.as_ref().map(|b| b.chars().take(60).collect()))
            .unwrap_or_default()
    }

    fn search_description(&self) -> String {
        self.body.clone().unwrap_or_default()
    }
}
