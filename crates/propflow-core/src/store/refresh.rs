// ── Refresh document parsing ──
//
// A repository `list` answers loosely-typed JSON. Documents that fail
// to parse or belong to another tenant are logged and skipped; one bad
// document never fails a refresh.

use serde::de::DeserializeOwned;
use propflow_feed::ScopeFilter;
use serde_json::Value;
use tracing::{debug, warn};

use crate::model::Tracked;

pub(crate) fn parse_documents<T>(docs: Vec<Value>, scope: &ScopeFilter) -> Vec<T>
where
    T: Tracked + DeserializeOwned,
{
    let mut parsed = Vec::with_capacity(docs.len());
    for doc in docs {
        match serde_json::from_value::<T>(doc) {
            Ok(entity) => {
                if entity.scope_id() == scope.scope_id {
                    parsed.push(entity);
                } else {
                    debug!(
                        collection = %T::COLLECTION,
                        id = entity.id(),
                        entity_scope = entity.scope_id(),
                        "skipping document outside scope"
                    );
                }
            }
            Err(e) => {
                warn!(
                    collection = %T::COLLECTION,
                    error = %e,
                    "skipping malformed document in refresh"
                );
            }
        }
    }
    parsed
}
