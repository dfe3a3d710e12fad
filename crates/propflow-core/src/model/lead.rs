// ── Lead domain types ──

use chrono::{DateTime, Utc};
use propflow_feed::Collection;
use serde::{Deserialize, Serialize};
use strum::Display;

use super::common::Priority;
use super::{Tracked, default_timestamp};

/// Pipeline stage of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[non_exhaustive]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Converted,
    Lost,
}

/// Acquisition channel a lead came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[non_exhaustive]
pub enum LeadSource {
    Website,
    Referral,
    Social,
    Portal,
    WalkIn,
}

/// A prospective buyer or renter in the pipeline.
///
/// `lead_score` is opaque — supplied by the data source, never computed
/// here. `budget` feeds the revenue aggregate once the lead converts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub scope_id: String,
    pub full_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub status: LeadStatus,
    pub source: LeadSource,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub lead_score: i64,
    #[serde(default)]
    pub budget: Option<f64>,
    #[serde(default)]
    pub property_interest: Option<String>,
    #[serde(default = "default_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Budget counted toward revenue: only converted leads contribute.
    pub fn converted_budget(&self) -> f64 {
        if self.status == LeadStatus::Converted {
            self.budget.unwrap_or(0.0)
        } else {
            0.0
        }
    }
}

impl Tracked for Lead {
    const COLLECTION: Collection = Collection::Leads;

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
        self.full_name.clone()
    }

    fn search_description(&self) -> String {
        self.property_interest.clone().unwrap_or_default()
    }

    fn relevance(&self) -> i64 {
        self.lead_score
    }
}
