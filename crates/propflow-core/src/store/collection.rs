// ── Ordered reactive entity collection ──
//
// One per tracked collection. Insertion-ordered, unique by id, with
// push-based change notification via `watch` channels. Conflicts
// resolve last-write-wins by `updated_at`; ties apply in arrival
// order. A refresh watermark makes poll results authoritative over
// late push events (see `replace_all`).

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use propflow_feed::ChangeAction;
use tokio::sync::watch;
use tracing::debug;

use crate::model::Tracked;

/// Before/after pair for one applied mutation, reported to the
/// aggregation engine so it can decrement old buckets and increment
/// new ones.
#[derive(Debug, Clone)]
pub struct AppliedChange<T> {
    pub before: Option<Arc<T>>,
    pub after: Option<Arc<T>>,
}

pub(crate) struct EntityCollection<T: Tracked> {
    /// Primary storage, in first-seen order. `IndexMap::insert` keeps
    /// an existing key's position, which is what gives `replace_all`
    /// its UI stability.
    entities: RwLock<IndexMap<String, Arc<T>>>,

    /// High-water mark of the last authoritative refresh. Push events
    /// for unknown ids at or below it are stale and dropped.
    watermark: RwLock<Option<DateTime<Utc>>>,

    /// Version counter, bumped on every effective mutation.
    version: watch::Sender<u64>,

    /// Full snapshot, rebuilt on mutation for cheap subscription.
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<T: Tracked> EntityCollection<T> {
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            entities: RwLock::new(IndexMap::new()),
            watermark: RwLock::new(None),
            version,
            snapshot,
        }
    }

    /// Apply one change event. Returns the before/after pair when the
    /// store actually changed, `None` when the event was a no-op
    /// (stale write, delete of an unknown id).
    ///
    /// Insert on an existing id degrades to Update; Update on an
    /// absent id degrades to Insert; Delete on an absent id is a
    /// no-op. This path never panics.
    pub(crate) fn apply(&self, action: ChangeAction, entity: T) -> Option<AppliedChange<T>> {
        let change = match action {
            ChangeAction::Insert | ChangeAction::Update => self.upsert(entity),
            ChangeAction::Delete => self.remove(entity.id()),
        }?;
        self.rebuild_snapshot();
        self.bump_version();
        Some(change)
    }

    fn upsert(&self, entity: T) -> Option<AppliedChange<T>> {
        let mut entities = lock_write(&self.entities);
        let id = entity.id().to_owned();

        if let Some(existing) = entities.get(&id) {
            // Last-write-wins by timestamp; ties go to the newcomer
            // (arrival order).
            if entity.updated_at() < existing.updated_at() {
                debug!(
                    collection = %T::COLLECTION,
                    id,
                    "skipping stale update (older than stored copy)"
                );
                return None;
            }
            let before = Arc::clone(existing);
            let after = Arc::new(entity);
            entities.insert(id, Arc::clone(&after));
            Some(AppliedChange {
                before: Some(before),
                after: Some(after),
            })
        } else {
            // Unknown id: an authoritative refresh may have already
            // superseded this push. Only admit it if it is genuinely
            // newer than the last refresh.
            if let Some(mark) = *lock_read(&self.watermark) {
                if entity.updated_at() <= mark {
                    debug!(
                        collection = %T::COLLECTION,
                        id,
                        "dropping push for unknown id at or below refresh watermark"
                    );
                    return None;
                }
            }
            let after = Arc::new(entity);
            entities.insert(id, Arc::clone(&after));
            Some(AppliedChange {
                before: None,
                after: Some(after),
            })
        }
    }

    fn remove(&self, id: &str) -> Option<AppliedChange<T>> {
        let mut entities = lock_write(&self.entities);
        let before = entities.shift_remove(id)?;
        Some(AppliedChange {
            before: Some(before),
            after: None,
        })
    }

    /// Replace the full contents with an authoritative snapshot.
    ///
    /// Upsert-then-prune: surviving entities keep their position (no
    /// reorder, no transient empty state), new ones append in incoming
    /// order, absent ones are removed. Advances the refresh watermark
    /// so stale in-flight push events get dropped afterwards.
    /// Returns the resulting collection size.
    pub(crate) fn replace_all(&self, incoming: Vec<T>) -> usize {
        let size;
        {
            let mut entities = lock_write(&self.entities);
            let incoming_ids: HashSet<String> =
                incoming.iter().map(|e| e.id().to_owned()).collect();

            let mut mark = lock_read(&self.watermark).unwrap_or_default();
            for entity in incoming {
                mark = mark.max(entity.updated_at());
                entities.insert(entity.id().to_owned(), Arc::new(entity));
            }
            entities.retain(|id, _| incoming_ids.contains(id));
            size = entities.len();

            *lock_write(&self.watermark) = Some(mark);
        }
        self.rebuild_snapshot();
        self.bump_version();
        size
    }

    pub(crate) fn get(&self, id: &str) -> Option<Arc<T>> {
        lock_read(&self.entities).get(id).cloned()
    }

    /// Current snapshot (cheap `Arc` clone), in insertion order.
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn len(&self) -> usize {
        lock_read(&self.entities).len()
    }

    // ── Private helpers ─────────────────────────────────────────────

    fn rebuild_snapshot(&self) {
        let values: Vec<Arc<T>> = lock_read(&self.entities).values().cloned().collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

/// Poison recovery: a panicked writer can only have been one of our
/// own short non-panicking sections, so the data is intact.
fn lock_read<'a, U>(lock: &'a RwLock<U>) -> std::sync::RwLockReadGuard<'a, U> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn lock_write<'a, U>(lock: &'a RwLock<U>) -> std::sync::RwLockWriteGuard<'a, U> {
    lock.write()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{Lead, LeadSource, LeadStatus, Priority};
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    fn lead(id: &str, status: LeadStatus, updated: i64) -> Lead {
        Lead {
            id: id.to_owned(),
            scope_id: "tenant-a".into(),
            full_name: format!("Lead {id}"),
            email: None,
            phone: None,
            status,
            source: LeadSource::Website,
            priority: Priority::Medium,
            lead_score: 0,
            budget: None,
            property_interest: None,
            created_at: ts(0),
            updated_at: ts(updated),
        }
    }

    fn ids(col: &EntityCollection<Lead>) -> Vec<String> {
        col.snapshot().iter().map(|l| l.id.clone()).collect()
    }

    #[test]
    fn insert_appends_in_arrival_order() {
        let col = EntityCollection::new();
        col.apply(ChangeAction::Insert, lead("a", LeadStatus::New, 1));
        col.apply(ChangeAction::Insert, lead("b", LeadStatus::New, 2));
        assert_eq!(ids(&col), ["a", "b"]);
    }

    #[test]
    fn insert_on_existing_id_degrades_to_update() {
        let col = EntityCollection::new();
        col.apply(ChangeAction::Insert, lead("a", LeadStatus::New, 1));
        let change = col
            .apply(ChangeAction::Insert, lead("a", LeadStatus::Contacted, 2))
            .unwrap();

        assert_eq!(col.len(), 1);
        assert_eq!(change.before.unwrap().status, LeadStatus::New);
        assert_eq!(col.get("a").unwrap().status, LeadStatus::Contacted);
    }

    #[test]
    fn update_on_absent_id_degrades_to_insert() {
        let col = EntityCollection::new();
        let change = col
            .apply(ChangeAction::Update, lead("ghost", LeadStatus::New, 1))
            .unwrap();
        assert!(change.before.is_none());
        assert_eq!(col.len(), 1);
    }

    #[test]
    fn delete_of_unknown_id_is_a_noop() {
        let col: EntityCollection<Lead> = EntityCollection::new();
        assert!(col.apply(ChangeAction::Delete, lead("ghost", LeadStatus::New, 1)).is_none());
        assert_eq!(col.len(), 0);
    }

    #[test]
    fn applying_same_update_twice_is_idempotent() {
        let col = EntityCollection::new();
        col.apply(ChangeAction::Insert, lead("a", LeadStatus::New, 1));

        col.apply(ChangeAction::Update, lead("a", LeadStatus::Qualified, 5));
        let first: Vec<_> = col.snapshot().iter().map(|l| l.status).collect();
        col.apply(ChangeAction::Update, lead("a", LeadStatus::Qualified, 5));
        let second: Vec<_> = col.snapshot().iter().map(|l| l.status).collect();

        assert_eq!(first, second);
        assert_eq!(col.len(), 1);
    }

    #[test]
    fn last_write_wins_in_either_arrival_order() {
        let older = lead("a", LeadStatus::Contacted, 10);
        let newer = lead("a", LeadStatus::Converted, 20);

        let forward = EntityCollection::new();
        forward.apply(ChangeAction::Update, older.clone());
        forward.apply(ChangeAction::Update, newer.clone());

        let reverse = EntityCollection::new();
        reverse.apply(ChangeAction::Update, newer);
        reverse.apply(ChangeAction::Update, older);

        assert_eq!(forward.get("a").unwrap().status, LeadStatus::Converted);
        assert_eq!(reverse.get("a").unwrap().status, LeadStatus::Converted);
    }

    #[test]
    fn disjoint_ids_converge_regardless_of_order() {
        let events = [
            lead("a", LeadStatus::New, 1),
            lead("b", LeadStatus::Contacted, 2),
            lead("c", LeadStatus::Lost, 3),
        ];

        let forward = EntityCollection::new();
        for e in events.iter().cloned() {
            forward.apply(ChangeAction::Insert, e);
        }
        let reverse = EntityCollection::new();
        for e in events.iter().rev().cloned() {
            reverse.apply(ChangeAction::Insert, e);
        }

        let mut f: Vec<_> = ids(&forward);
        let mut r: Vec<_> = ids(&reverse);
        f.sort();
        r.sort();
        assert_eq!(f, r);
        for e in &events {
            assert_eq!(
                forward.get(&e.id).unwrap().status,
                reverse.get(&e.id).unwrap().status
            );
        }
    }

    #[test]
    fn replace_all_keeps_positions_of_survivors() {
        let col = EntityCollection::new();
        for id in ["a", "b", "c"] {
            col.apply(ChangeAction::Insert, lead(id, LeadStatus::New, 1));
        }

        // b removed, d added; a and c must keep their relative order.
        col.replace_all(vec![
            lead("c", LeadStatus::New, 1),
            lead("a", LeadStatus::New, 1),
            lead("d", LeadStatus::New, 2),
        ]);

        assert_eq!(ids(&col), ["a", "c", "d"]);
    }

    #[test]
    fn stale_push_after_replace_all_is_dropped() {
        let col = EntityCollection::new();
        // Authoritative poll result with three entities.
        col.replace_all(vec![
            lead("a", LeadStatus::New, 10),
            lead("b", LeadStatus::New, 10),
            lead("c", LeadStatus::New, 10),
        ]);

        // A push update for an id the poll didn't include, no newer
        // than the refresh: superseded, dropped.
        assert!(col.apply(ChangeAction::Update, lead("zombie", LeadStatus::New, 5)).is_none());
        assert_eq!(ids(&col), ["a", "b", "c"]);

        // A genuinely newer push still lands.
        assert!(col.apply(ChangeAction::Insert, lead("fresh", LeadStatus::New, 11)).is_some());
        assert_eq!(col.len(), 4);
    }

    #[test]
    fn snapshot_subscription_sees_changes() {
        let col = EntityCollection::new();
        let mut rx = col.subscribe();
        assert!(rx.borrow_and_update().is_empty());

        col.apply(ChangeAction::Insert, lead("a", LeadStatus::New, 1));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 1);
    }
}
