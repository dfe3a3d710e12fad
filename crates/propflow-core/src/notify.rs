// ── Notification center ──
//
// Independent of the sync pipeline: its own storage key, its own
// lifecycle. Every mutation persists the full list to the local store
// and publishes a fresh snapshot; storage failures log and continue.
// Auto-dismiss notifications carry a per-notification timer that marks
// them read after a fixed delay unless deleted or read first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use propflow_feed::LocalStore;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::HubConfig;
use crate::model::Priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NotificationKind {
    Lead,
    Message,
    Workflow,
    Listing,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
    #[serde(default)]
    pub priority: Priority,
    /// When set, the center marks this read after a fixed delay unless
    /// it is deleted or read manually first.
    #[serde(default)]
    pub auto_dismiss: bool,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            title: title.into(),
            message: message.into(),
            created_at: Utc::now(),
            read: false,
            priority: Priority::default(),
            auto_dismiss: false,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_auto_dismiss(mut self) -> Self {
        self.auto_dismiss = true;
        self
    }
}

struct NotifyInner {
    auto_dismiss_after: Duration,
    storage: Arc<dyn LocalStore>,
    storage_key: String,
    state: Mutex<Vec<Notification>>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    tx: watch::Sender<Arc<Vec<Notification>>>,
}

/// Notification center. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct NotifyCenter {
    inner: Arc<NotifyInner>,
}

impl NotifyCenter {
    /// Rehydrate from the local store, seeding a default set when the
    /// key is absent or unreadable. Must be called within a tokio
    /// runtime (dismiss timers are spawned tasks).
    pub fn new(storage: Arc<dyn LocalStore>, config: &HubConfig) -> Self {
        let storage_key = config.notifications_key();
        let notifications = match storage.get(&storage_key) {
            Ok(Some(text)) => match serde_json::from_str::<Vec<Notification>>(&text) {
                Ok(list) => list,
                Err(e) => {
                    warn!(error = %e, "stored notifications unreadable, reseeding");
                    default_notifications()
                }
            },
            Ok(None) => default_notifications(),
            Err(e) => {
                warn!(error = %e, "notification storage unavailable, reseeding");
                default_notifications()
            }
        };

        let (tx, _) = watch::channel(Arc::new(notifications.clone()));
        let center = Self {
            inner: Arc::new(NotifyInner {
                auto_dismiss_after: config.auto_dismiss_after,
                storage,
                storage_key,
                state: Mutex::new(notifications.clone()),
                timers: Mutex::new(HashMap::new()),
                tx,
            }),
        };

        // Pending dismissals survive a restart.
        for n in &notifications {
            if n.auto_dismiss && !n.read {
                center.schedule_dismiss(&n.id);
            }
        }
        center.persist();
        center
    }

    /// Add a notification (newest first) and schedule its dismiss
    /// timer when requested.
    pub fn push(&self, notification: Notification) {
        let id = notification.id.clone();
        let auto_dismiss = notification.auto_dismiss;
        self.mutate(|list| {
            list.insert(0, notification);
            true
        });
        if auto_dismiss {
            self.schedule_dismiss(&id);
        }
    }

    /// Returns `false` when no notification has that id.
    pub fn mark_read(&self, id: &str) -> bool {
        self.cancel_timer(id);
        self.mutate(|list| set_read(list, id, true))
    }

    pub fn mark_unread(&self, id: &str) -> bool {
        self.mutate(|list| set_read(list, id, false))
    }

    pub fn delete(&self, id: &str) -> bool {
        self.cancel_timer(id);
        self.mutate(|list| {
            let before = list.len();
            list.retain(|n| n.id != id);
            list.len() != before
        })
    }

    pub fn mark_all_read(&self) {
        let ids: Vec<String> = self
            .lock_state()
            .iter()
            .filter(|n| !n.read)
            .map(|n| n.id.clone())
            .collect();
        for id in &ids {
            self.cancel_timer(id);
        }
        self.mutate(|list| {
            let mut changed = false;
            for n in list.iter_mut() {
                if !n.read {
                    n.read = true;
                    changed = true;
                }
            }
            changed
        });
    }

    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.lock_state().iter().filter(|n| !n.read).count()
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<Notification>> {
        self.inner.tx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Notification>>> {
        self.inner.tx.subscribe()
    }

    // ── Internal ────────────────────────────────────────────────────

    fn mutate(&self, apply: impl FnOnce(&mut Vec<Notification>) -> bool) -> bool {
        let changed = {
            let mut state = self.lock_state();
            if !apply(&mut state) {
                return false;
            }
            let snapshot = Arc::new(state.clone());
            self.inner.tx.send_modify(|s| *s = snapshot);
            true
        };
        self.persist();
        changed
    }

    fn persist(&self) {
        let serialized = {
            let state = self.lock_state();
            serde_json::to_string(&*state)
        };
        match serialized {
            Ok(text) => {
                if let Err(e) = self.inner.storage.set(&self.inner.storage_key, &text) {
                    warn!(error = %e, "failed to persist notifications");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize notifications"),
        }
    }

    fn schedule_dismiss(&self, id: &str) {
        let weak: Weak<NotifyInner> = Arc::downgrade(&self.inner);
        let delay = self.inner.auto_dismiss_after;
        let timer_id = id.to_owned();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            let center = NotifyCenter { inner };
            center
                .inner
                .timers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .remove(&timer_id);
            if center.mutate(|list| set_read(list, &timer_id, true)) {
                debug!(id = timer_id, "notification auto-dismissed");
            }
        });

        let mut timers = self
            .inner
            .timers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(previous) = timers.insert(id.to_owned(), handle) {
            previous.abort();
        }
    }

    fn cancel_timer(&self, id: &str) {
        let handle = self
            .inner
            .timers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(id);
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, Vec<Notification>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for NotifyInner {
    fn drop(&mut self) {
        let timers = self
            .timers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for handle in timers.values() {
            handle.abort();
        }
    }
}

fn set_read(list: &mut [Notification], id: &str, read: bool) -> bool {
    list.iter_mut()
        .find(|n| n.id == id)
        .is_some_and(|n| {
            if n.read == read {
                false
            } else {
                n.read = read;
                true
            }
        })
}

fn default_notifications() -> Vec<Notification> {
    vec![
        Notification::new(
            NotificationKind::System,
            "Workspace ready",
            "Live sync is active for this workspace.",
        ),
        Notification::new(
            NotificationKind::Lead,
            "Lead pipeline connected",
            "New leads will appear on the dashboard as they arrive.",
        )
        .with_priority(Priority::High),
    ]
}
