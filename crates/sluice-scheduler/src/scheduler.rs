//! The scheduling loop: snapshot, nominate, order, resolve, commit.
//!
//! One pass runs end-to-end before the next begins. A pass takes a cache
//! snapshot and the queue heads, computes a feasible flavor assignment per
//! candidate, orders candidates (non-borrowing first, then FIFO), resolves
//! intra-pass conflicts so a cohort receives at most one borrowing
//! admission per pass, and persists admissions asynchronously through a
//! bounded worker pool. The in-memory cache is updated by the store-event
//! sync when the commit lands, never by the commit task itself.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sluice_api::{StoreError, WorkloadStore};

use crate::cache::{Cache, ClusterQueueSnapshot, CohortSnapshot, Snapshot};
use crate::config::SchedulerConfig;
use crate::error::PendReason;
use crate::events::EventRecorder;
use crate::queue::{Head, QueueManager};
use crate::resources::{self, Resources};
use crate::workload::WorkloadInfo;

/// Hooks run around every asynchronous admission task, so tests can await
/// the drain of in-flight commits.
#[derive(Clone, Default)]
pub struct RoutineWrapper {
    hooks: Option<Arc<RoutineHooks>>,
}

struct RoutineHooks {
    on_start: Box<dyn Fn() + Send + Sync>,
    on_finish: Box<dyn Fn() + Send + Sync>,
}

impl RoutineWrapper {
    /// Wraps admission tasks with the given hooks. `on_start` runs
    /// synchronously when the task is dispatched, `on_finish` when it
    /// completes.
    #[must_use]
    pub fn new(
        on_start: impl Fn() + Send + Sync + 'static,
        on_finish: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            hooks: Some(Arc::new(RoutineHooks {
                on_start: Box::new(on_start),
                on_finish: Box::new(on_finish),
            })),
        }
    }

    fn start(&self) {
        if let Some(hooks) = &self.hooks {
            (hooks.on_start)();
        }
    }

    fn finish(&self) {
        if let Some(hooks) = &self.hooks {
            (hooks.on_finish)();
        }
    }
}

impl std::fmt::Debug for RoutineWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutineWrapper").finish_non_exhaustive()
    }
}

/// A candidate that found a feasible flavor assignment.
#[derive(Debug, Clone)]
struct Entry {
    cluster_queue: String,
    cohort: Option<String>,
    info: WorkloadInfo,
    /// Amounts above the queue's guarantee, per (resource, flavor).
    borrows: Resources,
}

/// Non-borrowing entries first, then FIFO by creation time, then key.
fn entry_ordering(a: &Entry, b: &Entry) -> Ordering {
    let a_borrows = !a.borrows.is_empty();
    let b_borrows = !b.borrows.is_empty();
    a_borrows
        .cmp(&b_borrows)
        .then_with(|| a.info.workload.created_at.cmp(&b.info.workload.created_at))
        .then_with(|| a.info.key().cmp(&b.info.key()))
}

/// Walks the flavors of every requested resource in declared order and
/// picks the first that admits the pod set within quota, borrowing from
/// the cohort when the guarantee alone does not suffice.
///
/// On success the chosen flavors are recorded on `info` and the borrowed
/// amounts are returned; on failure the first blocking reason is returned
/// and the candidate stays pending.
fn assign_flavors(
    info: &mut WorkloadInfo,
    cq: &ClusterQueueSnapshot,
    cohort: Option<&CohortSnapshot>,
) -> Result<Resources, PendReason> {
    let empty_keys = BTreeSet::new();
    // Usage assigned to earlier pod sets of this workload; later pod sets
    // must see it to keep the sum-check honest.
    let mut assigned = Resources::new();
    let mut borrows = Resources::new();

    let templates: Vec<_> = info
        .workload
        .pod_sets
        .iter()
        .map(|pod_set| pod_set.template.clone())
        .collect();

    for (pod_set, template) in info.total_requests.iter_mut().zip(&templates) {
        for (resource, need) in &pod_set.requests {
            let Some(flavors) = cq.requestable.get(resource) else {
                return Err(PendReason::FlavorUnmatched {
                    pod_set: pod_set.name.clone(),
                    resource: resource.clone(),
                });
            };
            let label_keys = cq.label_keys.get(resource).unwrap_or(&empty_keys);

            let mut matched_any = false;
            let mut chosen: Option<(String, i64)> = None;
            for flavor in flavors {
                if !resources::flavor_matches(&flavor.labels, &flavor.taints, template, label_keys)
                {
                    continue;
                }
                matched_any = true;

                let used = resources::get(&cq.used, resource, &flavor.name)
                    + resources::get(&assigned, resource, &flavor.name);
                if used + need > flavor.ceiling {
                    continue;
                }
                let borrow = used + need - flavor.guaranteed;
                if borrow > 0 {
                    let Some(cohort) = cohort else {
                        continue;
                    };
                    let cohort_used = resources::get(&cohort.used, resource, &flavor.name)
                        + resources::get(&assigned, resource, &flavor.name);
                    let cohort_requestable =
                        resources::get(&cohort.requestable, resource, &flavor.name);
                    if cohort_used + need > cohort_requestable {
                        continue;
                    }
                }
                chosen = Some((flavor.name.clone(), borrow.max(0)));
                break;
            }

            match chosen {
                Some((flavor, borrow)) => {
                    resources::add(&mut assigned, resource, &flavor, *need);
                    if borrow > 0 {
                        // Cumulative across pod sets: `borrow` already
                        // accounts for earlier assignments.
                        borrows
                            .entry(resource.clone())
                            .or_default()
                            .insert(flavor.clone(), borrow);
                    }
                    pod_set.flavors.insert(resource.clone(), flavor);
                }
                None => {
                    let reason = if matched_any {
                        PendReason::QuotaExceeded {
                            pod_set: pod_set.name.clone(),
                            resource: resource.clone(),
                        }
                    } else {
                        PendReason::FlavorUnmatched {
                            pod_set: pod_set.name.clone(),
                            resource: resource.clone(),
                        }
                    };
                    return Err(reason);
                }
            }
        }
    }

    Ok(borrows)
}

/// The admission scheduler.
pub struct Scheduler {
    queues: Arc<QueueManager>,
    cache: Arc<Cache>,
    store: Arc<dyn WorkloadStore>,
    recorder: Arc<dyn EventRecorder>,
    config: SchedulerConfig,
    commit_permits: Arc<Semaphore>,
    routine: RoutineWrapper,
}

impl Scheduler {
    /// Create a scheduler over the given queue manager, cache, and store.
    #[must_use]
    pub fn new(
        queues: Arc<QueueManager>,
        cache: Arc<Cache>,
        store: Arc<dyn WorkloadStore>,
        recorder: Arc<dyn EventRecorder>,
        config: SchedulerConfig,
    ) -> Self {
        let commit_permits = Arc::new(Semaphore::new(config.worker_count.max(1)));
        Self {
            queues,
            cache,
            store,
            recorder,
            config,
            commit_permits,
            routine: RoutineWrapper::default(),
        }
    }

    /// Installs hooks observing the start and end of every asynchronous
    /// admission task. Intended for tests awaiting commit drain.
    pub fn set_admission_routine_wrapper(&mut self, wrapper: RoutineWrapper) {
        self.routine = wrapper;
    }

    /// Runs scheduling passes until cancellation. Parks between passes
    /// that admit nothing, waking on queue or cache changes, or after
    /// `queue_scan_period` at the latest.
    pub async fn run(&self, token: CancellationToken) {
        info!(manager = %self.config.manager_name, "Scheduler started");
        while !token.is_cancelled() {
            let seen = self.queues.generation();
            let admitted = self.schedule_once(&token).await;
            if admitted == 0 && !token.is_cancelled() {
                let _ = tokio::time::timeout(
                    self.config.queue_scan_period,
                    self.queues.wait_for_change(seen, &token),
                )
                .await;
            }
        }
        info!("Scheduler stopped");
    }

    /// Runs one scheduling pass and returns the number of admissions
    /// dispatched.
    pub async fn schedule_once(&self, token: &CancellationToken) -> usize {
        let heads = self.queues.heads(token).await;
        if heads.is_empty() {
            return 0;
        }
        let mut snapshot = self.cache.snapshot();

        let mut entries = self.nominate(heads, &snapshot);
        entries.sort_by(entry_ordering);

        // At most one borrowing admission per cohort per pass: the
        // snapshot's cohort headroom goes stale as soon as any member is
        // assigned, so further borrowers wait for a fresh snapshot.
        let mut assigned_cohorts = HashSet::new();
        let mut admitted = 0;
        for entry in entries {
            if !entry.borrows.is_empty() {
                if let Some(cohort) = &entry.cohort {
                    if assigned_cohorts.contains(cohort.as_str()) {
                        debug!(
                            workload = %entry.info.key(),
                            cohort = %cohort,
                            "Deferring borrowing admission, cohort already assigned this pass"
                        );
                        continue;
                    }
                }
            }
            snapshot.apply(&entry.cluster_queue, &entry.info);
            if let Some(cohort) = entry.cohort.clone() {
                assigned_cohorts.insert(cohort);
            }
            self.dispatch_commit(entry).await;
            admitted += 1;
        }
        admitted
    }

    /// Stage 2: computes a flavor assignment for every candidate against
    /// the snapshot, dropping candidates that cannot be admitted.
    fn nominate(&self, heads: Vec<Head>, snapshot: &Snapshot) -> Vec<Entry> {
        let mut entries = Vec::with_capacity(heads.len());
        for head in heads {
            let key = head.info.key();
            let Some(cq) = snapshot.cluster_queues.get(&head.cluster_queue) else {
                self.recorder.record(
                    &key,
                    PendReason::MissingRoute.as_str(),
                    &PendReason::MissingRoute.to_string(),
                );
                self.queues
                    .requeue(&head.cluster_queue, &key, PendReason::MissingRoute);
                continue;
            };
            if cq.workloads.contains_key(&key) {
                // Already counted; the queue entry is removed when the
                // admission event arrives.
                continue;
            }

            if let Some(selector) = &cq.namespace_selector {
                let empty = sluice_api::Labels::new();
                let labels = snapshot
                    .namespaces
                    .get(&head.info.workload.namespace)
                    .unwrap_or(&empty);
                if !selector.matches(labels) {
                    self.recorder.record(
                        &key,
                        PendReason::NamespaceMismatch.as_str(),
                        &PendReason::NamespaceMismatch.to_string(),
                    );
                    self.queues
                        .requeue(&head.cluster_queue, &key, PendReason::NamespaceMismatch);
                    continue;
                }
            }

            let mut info = head.info;
            match assign_flavors(&mut info, cq, snapshot.cohort_of(&head.cluster_queue)) {
                Ok(borrows) => entries.push(Entry {
                    cluster_queue: head.cluster_queue,
                    cohort: cq.cohort.clone(),
                    info,
                    borrows,
                }),
                Err(reason) => {
                    debug!(workload = %key, reason = reason.as_str(), "Workload does not fit");
                    self.recorder
                        .record(&key, reason.as_str(), &reason.to_string());
                    self.queues.requeue(&head.cluster_queue, &key, reason);
                }
            }
        }
        entries
    }

    /// Stage 5: persists one admission asynchronously. The worker pool
    /// bounds concurrency; failures requeue the workload.
    async fn dispatch_commit(&self, entry: Entry) {
        let Ok(permit) = Arc::clone(&self.commit_permits).acquire_owned().await else {
            return;
        };
        self.routine.start();

        let store = Arc::clone(&self.store);
        let queues = Arc::clone(&self.queues);
        let recorder = Arc::clone(&self.recorder);
        let routine = self.routine.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let key = entry.info.key();
            let workload = &entry.info.workload;
            let admission = entry.info.admission(&entry.cluster_queue);

            match store
                .set_admission(&workload.namespace, &workload.name, admission)
                .await
            {
                Ok(()) => {
                    info!(
                        workload = %key,
                        cluster_queue = %entry.cluster_queue,
                        "Admitted workload"
                    );
                    recorder.record(
                        &key,
                        "Admitted",
                        &format!("admitted to cluster queue {}", entry.cluster_queue),
                    );
                }
                Err(error) => {
                    let reason = match &error {
                        StoreError::Conflict(_) | StoreError::NotFound(_) => {
                            PendReason::CommitConflict
                        }
                        StoreError::Transport(_) | StoreError::Internal(_) => {
                            PendReason::CommitTransport
                        }
                    };
                    warn!(workload = %key, error = %error, "Failed to persist admission");
                    recorder.record(&key, reason.as_str(), &reason.to_string());
                    queues.requeue(&entry.cluster_queue, &key, reason);
                }
            }
            routine.finish();
        });
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}
