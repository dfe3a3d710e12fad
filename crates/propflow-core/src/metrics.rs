// ── Incremental dashboard aggregation ──
//
// Running counters updated from the before/after pairs the stores
// report, published through a `watch` channel after every applied
// change. `DashboardMetrics::compute` is the ground-truth full
// recompute over snapshots; the incremental state must always equal
// it, and the tests here check exactly that.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;

use crate::model::{
    AiWorker, Lead, LeadSource, LeadStatus, Listing, ListingStatus, Message, MessageStatus,
    Priority, Workflow, WorkflowStatus, WorkerStatus,
};

/// How many leads `recent_leads` keeps, newest first.
const RECENT_LEADS: usize = 5;

/// Fully derived dashboard state. Rebuilt into a fresh `Arc` on every
/// publish so readers never observe a half-updated view.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetrics {
    pub total_leads: usize,
    pub leads_by_status: HashMap<LeadStatus, usize>,
    pub leads_by_source: HashMap<LeadSource, usize>,
    pub leads_by_priority: HashMap<Priority, usize>,
    /// Converted / total, in `[0, 1]`. Zero when there are no leads.
    pub conversion_rate: f64,
    /// Sum of `budget` over converted leads.
    pub revenue: f64,
    /// Most recently created leads, newest first, capped at five.
    pub recent_leads: Vec<Lead>,

    pub total_workers: usize,
    pub workers_by_status: HashMap<WorkerStatus, usize>,
    /// Completed / (completed + failed) over all workers. Zero when
    /// no tasks have run.
    pub success_rate: f64,

    pub total_messages: usize,
    pub messages_by_status: HashMap<MessageStatus, usize>,
    /// Mean over messages that carry a response time.
    pub avg_response_time_ms: Option<f64>,

    pub total_workflows: usize,
    pub workflows_by_status: HashMap<WorkflowStatus, usize>,

    pub total_listings: usize,
    pub listings_by_status: HashMap<ListingStatus, usize>,
}

impl DashboardMetrics {
    /// Ground-truth recompute from full snapshots.
    #[must_use]
    pub fn compute(
        leads: &[Arc<Lead>],
        workers: &[Arc<AiWorker>],
        messages: &[Arc<Message>],
        workflows: &[Arc<Workflow>],
        listings: &[Arc<Listing>],
    ) -> Self {
        let mut counters = Counters::default();
        for lead in leads {
            counters.lead_changed(None, Some(lead));
        }
        counters.recent_leads = pick_recent(leads);
        for worker in workers {
            counters.worker_changed(None, Some(worker));
        }
        for message in messages {
            counters.message_changed(None, Some(message));
        }
        for workflow in workflows {
            counters.workflow_changed(None, Some(workflow));
        }
        for listing in listings {
            counters.listing_changed(None, Some(listing));
        }
        counters.render()
    }
}

// ── Engine ──────────────────────────────────────────────────────────

pub(crate) struct MetricsEngine {
    counters: Mutex<Counters>,
    tx: watch::Sender<Arc<DashboardMetrics>>,
}

impl MetricsEngine {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(DashboardMetrics::default()));
        Self {
            counters: Mutex::new(Counters::default()),
            tx,
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<DashboardMetrics>> {
        self.tx.subscribe()
    }

    pub(crate) fn current(&self) -> Arc<DashboardMetrics> {
        self.tx.borrow().clone()
    }

    pub(crate) fn lead_changed(
        &self,
        before: Option<&Lead>,
        after: Option<&Lead>,
        snapshot: &[Arc<Lead>],
    ) {
        let mut counters = self.lock();
        counters.lead_changed(before, after);
        counters.recent_leads = pick_recent(snapshot);
        self.publish(&counters);
    }

    pub(crate) fn worker_changed(&self, before: Option<&AiWorker>, after: Option<&AiWorker>) {
        let mut counters = self.lock();
        counters.worker_changed(before, after);
        self.publish(&counters);
    }

    pub(crate) fn message_changed(&self, before: Option<&Message>, after: Option<&Message>) {
        let mut counters = self.lock();
        counters.message_changed(before, after);
        self.publish(&counters);
    }

    pub(crate) fn workflow_changed(&self, before: Option<&Workflow>, after: Option<&Workflow>) {
        let mut counters = self.lock();
        counters.workflow_changed(before, after);
        self.publish(&counters);
    }

    pub(crate) fn listing_changed(&self, before: Option<&Listing>, after: Option<&Listing>) {
        let mut counters = self.lock();
        counters.listing_changed(before, after);
        self.publish(&counters);
    }

    /// Rebuild one collection's contribution from an authoritative
    /// snapshot (used after `replace_all`, where a diff is not
    /// available).
    pub(crate) fn rebuild_leads(&self, snapshot: &[Arc<Lead>]) {
        let mut counters = self.lock();
        counters.reset_leads();
        for lead in snapshot {
            counters.lead_changed(None, Some(lead));
        }
        counters.recent_leads = pick_recent(snapshot);
        self.publish(&counters);
    }

    pub(crate) fn rebuild_workers(&self, snapshot: &[Arc<AiWorker>]) {
        let mut counters = self.lock();
        counters.reset_workers();
        for worker in snapshot {
            counters.worker_changed(None, Some(worker));
        }
        self.publish(&counters);
    }

    pub(crate) fn rebuild_messages(&self, snapshot: &[Arc<Message>]) {
        let mut counters = self.lock();
        counters.reset_messages();
        for message in snapshot {
            counters.message_changed(None, Some(message));
        }
        self.publish(&counters);
    }

    pub(crate) fn rebuild_workflows(&self, snapshot: &[Arc<Workflow>]) {
        let mut counters = self.lock();
        counters.reset_workflows();
        for workflow in snapshot {
            counters.workflow_changed(None, Some(workflow));
        }
        self.publish(&counters);
    }

    pub(crate) fn rebuild_listings(&self, snapshot: &[Arc<Listing>]) {
        let mut counters = self.lock();
        counters.reset_listings();
        for listing in snapshot {
            counters.listing_changed(None, Some(listing));
        }
        self.publish(&counters);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn publish(&self, counters: &Counters) {
        let rendered = Arc::new(counters.render());
        self.tx.send_modify(|m| *m = rendered);
    }
}

// ── Counters ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Counters {
    total_leads: usize,
    leads_by_status: HashMap<LeadStatus, usize>,
    leads_by_source: HashMap<LeadSource, usize>,
    leads_by_priority: HashMap<Priority, usize>,
    converted_leads: usize,
    revenue: f64,
    recent_leads: Vec<Lead>,

    total_workers: usize,
    workers_by_status: HashMap<WorkerStatus, usize>,
    completed_tasks: u64,
    failed_tasks: u64,

    total_messages: usize,
    messages_by_status: HashMap<MessageStatus, usize>,
    response_time_sum: f64,
    response_time_count: usize,

    total_workflows: usize,
    workflows_by_status: HashMap<WorkflowStatus, usize>,

    total_listings: usize,
    listings_by_status: HashMap<ListingStatus, usize>,
}

impl Counters {
    fn lead_changed(&mut self, before: Option<&Lead>, after: Option<&Lead>) {
        if let Some(lead) = before {
            self.total_leads -= 1;
            dec(&mut self.leads_by_status, lead.status);
            dec(&mut self.leads_by_source, lead.source);
            dec(&mut self.leads_by_priority, lead.priority);
            if lead.status == LeadStatus::Converted {
                self.converted_leads -= 1;
                self.revenue -= lead.budget.unwrap_or(0.0);
            }
        }
        if let Some(lead) = after {
            self.total_leads += 1;
            inc(&mut self.leads_by_status, lead.status);
            inc(&mut self.leads_by_source, lead.source);
            inc(&mut self.leads_by_priority, lead.priority);
            if lead.status == LeadStatus::Converted {
                self.converted_leads += 1;
                self.revenue += lead.budget.unwrap_or(0.0);
            }
        }
    }

    fn worker_changed(&mut self, before: Option<&AiWorker>, after: Option<&AiWorker>) {
        if let Some(worker) = before {
            self.total_workers -= 1;
            dec(&mut self.workers_by_status, worker.status);
            self.completed_tasks -= worker.completed_tasks;
            self.failed_tasks -= worker.failed_tasks;
        }
        if let Some(worker) = after {
            self.total_workers += 1;
            inc(&mut self.workers_by_status, worker.status);
            self.completed_tasks += worker.completed_tasks;
            self.failed_tasks += worker.failed_tasks;
        }
    }

    fn message_changed(&mut self, before: Option<&Message>, after: Option<&Message>) {
        if let Some(message) = before {
            self.total_messages -= 1;
            dec(&mut self.messages_by_status, message.status);
            if let Some(ms) = message.response_time_ms {
                self.response_time_sum -= to_f64(ms);
                self.response_time_count -= 1;
            }
        }
        if let Some(message) = after {
            self.total_messages += 1;
            inc(&mut self.messages_by_status, message.status);
            if let Some(ms) = message.response_time_ms {
                self.response_time_sum += to_f64(ms);
                self.response_time_count += 1;
            }
        }
    }

    fn workflow_changed(&mut self, before: Option<&Workflow>, after: Option<&Workflow>) {
        if let Some(workflow) = before {
            self.total_workflows -= 1;
            dec(&mut self.workflows_by_status, workflow.status);
        }
        if let Some(workflow) = after {
            self.total_workflows += 1;
            inc(&mut self.workflows_by_status, workflow.status);
        }
    }

    fn listing_changed(&mut self, before: Option<&Listing>, after: Option<&Listing>) {
        if let Some(listing) = before {
            self.total_listings -= 1;
            dec(&mut self.listings_by_status, listing.status);
        }
        if let Some(listing) = after {
            self.total_listings += 1;
            inc(&mut self.listings_by_status, listing.status);
        }
    }

    fn reset_leads(&mut self) {
        self.total_leads = 0;
        self.leads_by_status.clear();
        self.leads_by_source.clear();
        self.leads_by_priority.clear();
        self.converted_leads = 0;
        self.revenue = 0.0;
        self.recent_leads.clear();
    }

    fn reset_workers(&mut self) {
        self.total_workers = 0;
        self.workers_by_status.clear();
        self.completed_tasks = 0;
        self.failed_tasks = 0;
    }

    fn reset_messages(&mut self) {
        self.total_messages = 0;
        self.messages_by_status.clear();
        self.response_time_sum = 0.0;
        self.response_time_count = 0;
    }

    fn reset_workflows(&mut self) {
        self.total_workflows = 0;
        self.workflows_by_status.clear();
    }

    fn reset_listings(&mut self) {
        self.total_listings = 0;
        self.listings_by_status.clear();
    }

    fn render(&self) -> DashboardMetrics {
        let conversion_rate = if self.total_leads == 0 {
            0.0
        } else {
            to_f64_usize(self.converted_leads) / to_f64_usize(self.total_leads)
        };
        let attempted = self.completed_tasks + self.failed_tasks;
        let success_rate = if attempted == 0 {
            0.0
        } else {
            to_f64(self.completed_tasks) / to_f64(attempted)
        };
        let avg_response_time_ms = if self.response_time_count == 0 {
            None
        } else {
            Some(self.response_time_sum / to_f64_usize(self.response_time_count))
        };

        DashboardMetrics {
            total_leads: self.total_leads,
            leads_by_status: self.leads_by_status.clone(),
            leads_by_source: self.leads_by_source.clone(),
            leads_by_priority: self.leads_by_priority.clone(),
            conversion_rate,
            revenue: self.revenue,
            recent_leads: self.recent_leads.clone(),
            total_workers: self.total_workers,
            workers_by_status: self.workers_by_status.clone(),
            success_rate,
            total_messages: self.total_messages,
            messages_by_status: self.messages_by_status.clone(),
            avg_response_time_ms,
            total_workflows: self.total_workflows,
            workflows_by_status: self.workflows_by_status.clone(),
            total_listings: self.total_listings,
            listings_by_status: self.listings_by_status.clone(),
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn inc<K: Eq + Hash>(map: &mut HashMap<K, usize>, key: K) {
    *map.entry(key).or_insert(0) += 1;
}

/// Decrement, removing the bucket at zero so incremental state stays
/// structurally equal to a fresh recompute.
fn dec<K: Eq + Hash>(map: &mut HashMap<K, usize>, key: K) {
    if let Some(count) = map.get_mut(&key) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            map.remove(&key);
        }
    }
}

fn pick_recent(snapshot: &[Arc<Lead>]) -> Vec<Lead> {
    let mut leads: Vec<&Arc<Lead>> = snapshot.iter().collect();
    leads.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    leads
        .into_iter()
        .take(RECENT_LEADS)
        .map(|l| (**l).clone())
        .collect()
}

#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn to_f64(value: u64) -> f64 {
    value as f64
}

#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn to_f64_usize(value: usize) -> f64 {
    value as f64
}
