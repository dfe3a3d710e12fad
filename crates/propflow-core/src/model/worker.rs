// ── AI worker domain types ──

use chrono::{DateTime, Utc};
use propflow_feed::Collection;
use serde::{Deserialize, Serialize};
use strum::Display;

use super::{Tracked, default_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[non_exhaustive]
pub enum WorkerStatus {
    Active,
    Idle,
    Paused,
    Error,
}

/// An autonomous worker handling CRM tasks (follow-ups, enrichment,
/// campaign steps). Task counters feed the success-rate aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiWorker {
    pub id: String,
    pub scope_id: String,
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    pub status: WorkerStatus,
    #[serde(default)]
    pub completed_tasks: u64,
    #[serde(default)]
    pub failed_tasks: u64,
    #[serde(default = "default_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Tracked for AiWorker {
    const COLLECTION: Collection = Collection::Workers;

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
        self.role.clone().unwrap_or_default()
    }

    #[allow(clippy::cast_possible_wrap, clippy::as_conversions)]
    fn relevance(&self) -> i64 {
        self.completed_tasks.min(i64::MAX as u64) as i64
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_defaulted_counters() {
        let worker: AiWorker = serde_json::from_value(serde_json::json!({
            "id": "worker-1",
            "scopeId": "tenant-a",
            "name": "Follow-up Agent",
            "status": "active"
        }))
        .unwrap();

        assert_eq!(worker.completed_tasks, 0);
        assert_eq!(worker.failed_tasks, 0);
        assert_eq!(worker.status, WorkerStatus::Active);
    }
}
