//! Queue manager: pending workloads grouped by target cluster queue.
//!
//! Pending workloads are routed through their local queue into one pending
//! bucket per cluster queue. [`QueueManager::heads`] yields one candidate
//! per non-empty bucket without removing it; removal is driven by
//! admission events from the store. Workloads that cannot be routed yet
//! wait in side buckets and are re-examined when the missing object
//! arrives.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sluice_api::{ClusterQueue, LocalQueue, QueueingStrategy, Workload};

use crate::error::{PendReason, Result, SchedulerError};
use crate::workload::WorkloadInfo;

/// A scheduling candidate: the head of one pending bucket.
#[derive(Debug, Clone)]
pub struct Head {
    /// Cluster queue the candidate targets.
    pub cluster_queue: String,
    /// The candidate workload.
    pub info: WorkloadInfo,
}

/// Ordering key for pending buckets: FIFO by creation time, then key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    created_at: DateTime<Utc>,
    key: String,
}

impl OrderKey {
    fn of(workload: &Workload) -> Self {
        Self {
            created_at: workload.created_at,
            key: workload.key(),
        }
    }
}

#[derive(Debug)]
struct PendingBucket {
    strategy: QueueingStrategy,
    entries: BTreeMap<OrderKey, WorkloadInfo>,
    /// Keys the best-effort head skips until the next change.
    inadmissible: HashSet<String>,
    /// Last pend reason per workload, kept for observability.
    reasons: HashMap<String, PendReason>,
}

impl PendingBucket {
    fn new(strategy: QueueingStrategy) -> Self {
        Self {
            strategy,
            entries: BTreeMap::new(),
            inadmissible: HashSet::new(),
            reasons: HashMap::new(),
        }
    }

    fn head(&self) -> Option<&WorkloadInfo> {
        match self.strategy {
            QueueingStrategy::StrictFifo => self.entries.values().next(),
            QueueingStrategy::BestEffortFifo => self
                .entries
                .iter()
                .find(|(order, _)| !self.inadmissible.contains(&order.key))
                .map(|(_, info)| info),
        }
    }

    fn insert(&mut self, info: WorkloadInfo) {
        let key = info.key();
        self.remove(&key);
        // A fresh arrival may unblock previously inadmissible heads.
        self.inadmissible.clear();
        self.entries.insert(OrderKey::of(&info.workload), info);
        self.reasons.remove(&key);
    }

    fn remove(&mut self, key: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|order, _| order.key != key);
        self.inadmissible.remove(key);
        self.reasons.remove(key);
        self.entries.len() != before
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.keys().any(|order| order.key == key)
    }
}

#[derive(Debug, Default)]
struct ManagerState {
    /// Local-queue key to cluster-queue name.
    local_queues: HashMap<String, String>,
    cluster_queues: HashMap<String, PendingBucket>,
    /// Workloads whose local queue does not exist yet, by local-queue key.
    awaiting_local_queue: HashMap<String, Vec<Workload>>,
    /// Workloads whose cluster queue is not known yet, by cluster-queue
    /// name.
    awaiting_cluster_queue: HashMap<String, Vec<Workload>>,
    generation: u64,
}

impl ManagerState {
    /// Places a pending workload into its bucket, or a side bucket when
    /// the route is incomplete.
    fn route(&mut self, workload: Workload) {
        let local_key = format!("{}/{}", workload.namespace, workload.queue_name);
        let Some(cluster_queue) = self.local_queues.get(&local_key).cloned() else {
            debug!(workload = %workload.key(), queue = %local_key, "No local queue yet, parking workload");
            self.park_awaiting_local(local_key, workload);
            return;
        };
        match self.cluster_queues.get_mut(&cluster_queue) {
            Some(bucket) => bucket.insert(WorkloadInfo::new(workload)),
            None => {
                debug!(workload = %workload.key(), cluster_queue = %cluster_queue, "Cluster queue not known yet, parking workload");
                self.park_awaiting_cluster(cluster_queue, workload);
            }
        }
    }

    fn park_awaiting_local(&mut self, local_key: String, workload: Workload) {
        let parked = self.awaiting_local_queue.entry(local_key).or_default();
        parked.retain(|w| w.key() != workload.key());
        parked.push(workload);
    }

    fn park_awaiting_cluster(&mut self, cluster_queue: String, workload: Workload) {
        let parked = self.awaiting_cluster_queue.entry(cluster_queue).or_default();
        parked.retain(|w| w.key() != workload.key());
        parked.push(workload);
    }

    fn forget(&mut self, key: &str) {
        for bucket in self.cluster_queues.values_mut() {
            bucket.remove(key);
        }
        for parked in self.awaiting_local_queue.values_mut() {
            parked.retain(|w| w.key() != key);
        }
        for parked in self.awaiting_cluster_queue.values_mut() {
            parked.retain(|w| w.key() != key);
        }
    }
}

/// The queue manager.
#[derive(Debug, Default)]
pub struct QueueManager {
    state: Mutex<ManagerState>,
    notify: Notify,
}

impl QueueManager {
    /// Create a new empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a local queue and routes workloads that were waiting for
    /// it.
    pub fn add_local_queue(&self, queue: &LocalQueue) {
        let mut state = self.state.lock();
        state
            .local_queues
            .insert(queue.key(), queue.cluster_queue.clone());
        if let Some(parked) = state.awaiting_local_queue.remove(&queue.key()) {
            for workload in parked {
                state.route(workload);
            }
        }
        self.bump(state);
    }

    /// Unregisters a local queue, orphaning its routed workloads into the
    /// unroutable side bucket.
    pub fn delete_local_queue(&self, queue: &LocalQueue) {
        let mut state = self.state.lock();
        state.local_queues.remove(&queue.key());
        let orphaned: Vec<Workload> = match state.cluster_queues.get_mut(&queue.cluster_queue) {
            Some(bucket) => {
                let orphaned: Vec<Workload> = bucket
                    .entries
                    .values()
                    .filter(|info| {
                        info.workload.namespace == queue.namespace
                            && info.workload.queue_name == queue.name
                    })
                    .map(|info| info.workload.clone())
                    .collect();
                for workload in &orphaned {
                    bucket.remove(&workload.key());
                }
                orphaned
            }
            None => Vec::new(),
        };
        for workload in orphaned {
            state.park_awaiting_local(queue.key(), workload);
        }
        self.bump(state);
    }

    /// Registers a cluster queue and routes workloads that were waiting
    /// for it.
    pub fn add_cluster_queue(&self, spec: &ClusterQueue) -> Result<()> {
        let mut state = self.state.lock();
        if state.cluster_queues.contains_key(&spec.name) {
            return Err(SchedulerError::ClusterQueueExists(spec.name.clone()));
        }
        state
            .cluster_queues
            .insert(spec.name.clone(), PendingBucket::new(spec.queueing_strategy));
        if let Some(parked) = state.awaiting_cluster_queue.remove(&spec.name) {
            for workload in parked {
                state.route(workload);
            }
        }
        self.bump(state);
        Ok(())
    }

    /// Applies an updated cluster-queue spec, preserving pending entries.
    pub fn update_cluster_queue(&self, spec: &ClusterQueue) {
        let mut state = self.state.lock();
        if let Some(bucket) = state.cluster_queues.get_mut(&spec.name) {
            bucket.strategy = spec.queueing_strategy;
            bucket.inadmissible.clear();
        }
        self.bump(state);
    }

    /// Unregisters a cluster queue; its pending workloads wait for it to
    /// come back.
    pub fn delete_cluster_queue(&self, name: &str) {
        let mut state = self.state.lock();
        if let Some(bucket) = state.cluster_queues.remove(name) {
            for info in bucket.entries.into_values() {
                state.park_awaiting_cluster(name.to_owned(), info.workload);
            }
        }
        self.bump(state);
    }

    /// Buffers a pending workload, or removes an admitted one.
    pub fn add_or_update(&self, workload: &Workload) {
        let mut state = self.state.lock();
        state.forget(&workload.key());
        if workload.is_pending() {
            state.route(workload.clone());
        }
        self.bump(state);
    }

    /// Drops a workload from every bucket.
    pub fn delete(&self, workload: &Workload) {
        let mut state = self.state.lock();
        state.forget(&workload.key());
        self.bump(state);
    }

    /// Keeps a workload pending after a failed pass, recording why.
    ///
    /// Commit failures re-notify the scheduler so the next pass retries
    /// with a fresh snapshot; scheduling rejections wait for a change and
    /// mark the entry inadmissible for best-effort head selection.
    pub fn requeue(&self, cluster_queue: &str, key: &str, reason: PendReason) {
        let mut state = self.state.lock();
        let Some(bucket) = state.cluster_queues.get_mut(cluster_queue) else {
            return;
        };
        if !bucket.contains(key) {
            return;
        }
        debug!(workload = %key, cluster_queue = %cluster_queue, reason = reason.as_str(), "Workload kept pending");
        if reason.is_commit_failure() {
            bucket.reasons.insert(key.to_owned(), reason);
            self.bump(state);
        } else {
            bucket.inadmissible.insert(key.to_owned());
            bucket.reasons.insert(key.to_owned(), reason);
        }
    }

    /// The last recorded pend reason for a workload, if any.
    #[must_use]
    pub fn pend_reason(&self, cluster_queue: &str, key: &str) -> Option<PendReason> {
        let state = self.state.lock();
        state
            .cluster_queues
            .get(cluster_queue)
            .and_then(|bucket| bucket.reasons.get(key))
            .cloned()
    }

    /// Wakes the scheduler after an external (cache) mutation.
    pub fn poke(&self) {
        let state = self.state.lock();
        self.bump(state);
    }

    /// Change counter used by the scheduler to park between passes.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Blocks until the generation moves past `seen` or the token is
    /// cancelled.
    pub async fn wait_for_change(&self, seen: u64, token: &CancellationToken) {
        loop {
            let notified = self.notify.notified();
            if self.state.lock().generation != seen {
                return;
            }
            tokio::select! {
                () = notified => {}
                () = token.cancelled() => return,
            }
        }
    }

    /// Blocks until at least one bucket is non-empty, then returns one
    /// candidate per non-empty bucket. Candidates are not removed.
    /// Cancellation returns an empty list.
    pub async fn heads(&self, token: &CancellationToken) -> Vec<Head> {
        loop {
            let notified = self.notify.notified();
            {
                let state = self.state.lock();
                let heads: Vec<Head> = state
                    .cluster_queues
                    .iter()
                    .filter_map(|(name, bucket)| {
                        bucket.head().map(|info| Head {
                            cluster_queue: name.clone(),
                            info: info.clone(),
                        })
                    })
                    .collect();
                if !heads.is_empty() {
                    return heads;
                }
            }
            tokio::select! {
                () = notified => {}
                () = token.cancelled() => return Vec::new(),
            }
        }
    }

    /// Pending workload keys per cluster queue. For tests and debugging
    /// only; side buckets are not included.
    #[must_use]
    pub fn dump(&self) -> BTreeMap<String, BTreeSet<String>> {
        let state = self.state.lock();
        state
            .cluster_queues
            .iter()
            .filter(|(_, bucket)| !bucket.entries.is_empty())
            .map(|(name, bucket)| {
                (
                    name.clone(),
                    bucket.entries.keys().map(|order| order.key.clone()).collect(),
                )
            })
            .collect()
    }

    fn bump(&self, mut state: parking_lot::MutexGuard<'_, ManagerState>) {
        state.generation = state.generation.wrapping_add(1);
        drop(state);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use sluice_api::{Admission, Container, PodSet, PodTemplate};
    use std::time::Duration;

    fn local_queue(namespace: &str, name: &str, cluster_queue: &str) -> LocalQueue {
        LocalQueue {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            cluster_queue: cluster_queue.to_owned(),
        }
    }

    fn cluster_queue(name: &str, strategy: QueueingStrategy) -> ClusterQueue {
        ClusterQueue {
            name: name.to_owned(),
            namespace_selector: None,
            queueing_strategy: strategy,
            cohort: None,
            resources: vec![],
        }
    }

    fn workload(namespace: &str, name: &str, age_secs: i64) -> Workload {
        Workload {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            created_at: Utc::now() - ChronoDuration::seconds(age_secs),
            queue_name: "main".to_owned(),
            pod_sets: vec![PodSet {
                name: "one".to_owned(),
                count: 1,
                template: PodTemplate {
                    containers: vec![Container {
                        requests: [("cpu".to_owned(), "1".parse().expect("quantity"))].into(),
                    }],
                    ..PodTemplate::default()
                },
            }],
            admission: None,
        }
    }

    fn strict_manager() -> QueueManager {
        let manager = QueueManager::new();
        manager.add_local_queue(&local_queue("sales", "main", "sales"));
        manager
            .add_cluster_queue(&cluster_queue("sales", QueueingStrategy::StrictFifo))
            .expect("add cluster queue");
        manager
    }

    #[tokio::test]
    async fn heads_returns_oldest_per_bucket() {
        let manager = strict_manager();
        manager.add_or_update(&workload("sales", "young", 10));
        manager.add_or_update(&workload("sales", "old", 60));

        let token = CancellationToken::new();
        let heads = manager.heads(&token).await;
        assert_eq!(heads.len(), 1);
        assert_eq!(heads[0].cluster_queue, "sales");
        assert_eq!(heads[0].info.key(), "sales/old");

        // Heads does not remove.
        assert_eq!(manager.dump()["sales"].len(), 2);
    }

    #[tokio::test]
    async fn heads_unblocks_on_arrival() {
        let manager = std::sync::Arc::new(strict_manager());
        let token = CancellationToken::new();

        let waiter = {
            let manager = manager.clone();
            let token = token.clone();
            tokio::spawn(async move { manager.heads(&token).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.add_or_update(&workload("sales", "foo", 0));

        let heads = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("heads should unblock")
            .expect("task should not panic");
        assert_eq!(heads[0].info.key(), "sales/foo");
    }

    #[tokio::test]
    async fn cancellation_unblocks_heads() {
        let manager = strict_manager();
        let token = CancellationToken::new();
        token.cancel();
        assert!(manager.heads(&token).await.is_empty());
    }

    #[tokio::test]
    async fn strict_fifo_never_skips_requeued_head() {
        let manager = strict_manager();
        manager.add_or_update(&workload("sales", "old", 60));
        manager.add_or_update(&workload("sales", "young", 10));

        manager.requeue("sales", "sales/old", PendReason::NamespaceMismatch);

        let token = CancellationToken::new();
        let heads = manager.heads(&token).await;
        assert_eq!(heads[0].info.key(), "sales/old");
        assert_eq!(
            manager.pend_reason("sales", "sales/old"),
            Some(PendReason::NamespaceMismatch)
        );
    }

    #[tokio::test]
    async fn best_effort_fifo_skips_inadmissible_head() {
        let manager = QueueManager::new();
        manager.add_local_queue(&local_queue("sales", "main", "sales"));
        manager
            .add_cluster_queue(&cluster_queue("sales", QueueingStrategy::BestEffortFifo))
            .expect("add cluster queue");
        manager.add_or_update(&workload("sales", "old", 60));
        manager.add_or_update(&workload("sales", "young", 10));

        manager.requeue(
            "sales",
            "sales/old",
            PendReason::QuotaExceeded {
                pod_set: "one".to_owned(),
                resource: "cpu".to_owned(),
            },
        );

        let token = CancellationToken::new();
        let heads = manager.heads(&token).await;
        assert_eq!(heads[0].info.key(), "sales/young");

        // A new arrival clears the mark and the head reverts to FIFO.
        manager.add_or_update(&workload("sales", "newer", 0));
        let heads = manager.heads(&token).await;
        assert_eq!(heads[0].info.key(), "sales/old");
    }

    #[tokio::test]
    async fn admitted_workload_is_removed() {
        let manager = strict_manager();
        let mut w = workload("sales", "foo", 0);
        manager.add_or_update(&w);
        assert!(manager.dump().contains_key("sales"));

        w.admission = Some(Admission {
            cluster_queue: "sales".to_owned(),
            pod_set_flavors: vec![],
        });
        manager.add_or_update(&w);
        assert!(manager.dump().is_empty());
    }

    #[tokio::test]
    async fn missing_local_queue_parks_until_added() {
        let manager = QueueManager::new();
        manager
            .add_cluster_queue(&cluster_queue("sales", QueueingStrategy::StrictFifo))
            .expect("add cluster queue");

        manager.add_or_update(&workload("sales", "foo", 0));
        assert!(manager.dump().is_empty());

        manager.add_local_queue(&local_queue("sales", "main", "sales"));
        assert_eq!(manager.dump()["sales"].len(), 1);
    }

    #[tokio::test]
    async fn missing_cluster_queue_parks_until_added() {
        let manager = QueueManager::new();
        manager.add_local_queue(&local_queue("sales", "main", "sales"));

        manager.add_or_update(&workload("sales", "foo", 0));
        assert!(manager.dump().is_empty());

        manager
            .add_cluster_queue(&cluster_queue("sales", QueueingStrategy::StrictFifo))
            .expect("add cluster queue");
        assert_eq!(manager.dump()["sales"].len(), 1);
    }

    #[tokio::test]
    async fn deleting_local_queue_orphans_workloads() {
        let manager = strict_manager();
        manager.add_or_update(&workload("sales", "foo", 0));

        manager.delete_local_queue(&local_queue("sales", "main", "sales"));
        assert!(manager.dump().is_empty());

        // Re-creating the route brings the workload back.
        manager.add_local_queue(&local_queue("sales", "main", "sales"));
        assert_eq!(manager.dump()["sales"].len(), 1);
    }

    #[tokio::test]
    async fn generation_moves_on_mutation() {
        let manager = strict_manager();
        let seen = manager.generation();
        manager.add_or_update(&workload("sales", "foo", 0));
        assert_ne!(manager.generation(), seen);

        let token = CancellationToken::new();
        // Should return immediately: the generation already moved.
        tokio::time::timeout(Duration::from_secs(1), manager.wait_for_change(seen, &token))
            .await
            .expect("wait_for_change should return");
    }
}
