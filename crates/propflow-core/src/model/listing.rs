// ── Property listing domain types ──

use chrono::{DateTime, Utc};
use propflow_feed::Collection;
use serde::{Deserialize, Serialize};
use strum::Display;

use super::{Tracked, default_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[non_exhaustive]
pub enum ListingStatus {
    Active,
    Pending,
    Sold,
    Withdrawn,
}

/// A property listing on the market.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: String,
    pub scope_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    pub status: ListingStatus,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub bedrooms: Option<u32>,
    #[serde(default = "default_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Tracked for Listing {
    const COLLECTION: Collection = Collection::Listings;

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
        self.title.clone()
    }

    fn search_description(&self) -> String {
        match (&self.address, &self.description) {
            (Some(addr), Some(desc)) => format!("{addr} {desc}"),
            (Some(addr), None) => addr.clone(),
            (None, Some(desc)) => desc.clone(),
            (None, None) => String::new(),
        }
    }

    /// Price band in thousands, so expensive listings rank above cheap
    /// ones when titles tie.
    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
    fn relevance(&self) -> i64 {
        (self.price.unwrap_or(0.0) / 1000.0) as i64
    }
}
