// ── Marketing workflow domain types ──

use chrono::{DateTime, Utc};
use propflow_feed::Collection;
use serde::{Deserialize, Serialize};
use strum::Display;

use super::common::Priority;
use super::{Tracked, default_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[non_exhaustive]
pub enum WorkflowStatus {
    Draft,
    Active,
    Paused,
    Completed,
}

/// A marketing automation workflow (drip campaign, nurture sequence).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub scope_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub runs: u64,
    #[serde(default = "default_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Tracked for Workflow {
    const COLLECTION: Collection = Collection::Workflows;

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
        self.name.clone()
    }

    fn search_description(&self) -> String {
        self.description.clone().unwrap_or_default()
    }
}
