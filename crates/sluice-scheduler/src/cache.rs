//! Cluster-queue cache: the process-wide mirror of quota pools and usage.
//!
//! The cache is the source of truth for quota accounting between
//! persistence events. Writers are the store-event sync and nothing else;
//! the scheduler only takes snapshots. A single read-write lock guards the
//! whole cache so usage adjustments are atomic and no reader ever observes
//! a workload counted in two cluster queues.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use parking_lot::RwLock;

use sluice_api::{
    ClusterQueue, LabelSelector, Labels, Namespace, QueueingStrategy, ResourceName, Taint,
    Workload,
};

use crate::error::{Result, SchedulerError};
use crate::resources::{self, Resources};
use crate::workload::WorkloadInfo;

/// Per-flavor quota limits rebuilt from a cluster-queue spec, with
/// quantities canonicalised to integers.
#[derive(Debug, Clone, PartialEq)]
pub struct FlavorLimits {
    /// Flavor name.
    pub name: String,
    /// Node labels characterising the flavor.
    pub labels: Labels,
    /// Taints carried by the flavor's nodes.
    pub taints: Vec<Taint>,
    /// Capacity the queue may always use.
    pub guaranteed: i64,
    /// Hard cap including borrowed capacity.
    pub ceiling: i64,
}

#[derive(Debug, Clone)]
struct ClusterQueueState {
    cohort: Option<String>,
    namespace_selector: Option<LabelSelector>,
    queueing_strategy: QueueingStrategy,
    requestable: BTreeMap<ResourceName, Vec<FlavorLimits>>,
    label_keys: BTreeMap<ResourceName, BTreeSet<String>>,
    used: Resources,
    workloads: HashMap<String, WorkloadInfo>,
}

impl ClusterQueueState {
    fn from_spec(spec: &ClusterQueue) -> Self {
        let mut requestable = BTreeMap::new();
        let mut label_keys: BTreeMap<ResourceName, BTreeSet<String>> = BTreeMap::new();
        for resource in &spec.resources {
            let flavors: Vec<FlavorLimits> = resource
                .flavors
                .iter()
                .map(|flavor| FlavorLimits {
                    name: flavor.name.clone(),
                    labels: flavor.labels.clone(),
                    taints: flavor.taints.clone(),
                    guaranteed: flavor.quota.guaranteed.canonical(&resource.name),
                    ceiling: flavor.quota.ceiling.canonical(&resource.name),
                })
                .collect();
            let keys = label_keys.entry(resource.name.clone()).or_default();
            for flavor in &flavors {
                keys.extend(flavor.labels.keys().cloned());
            }
            requestable.insert(resource.name.clone(), flavors);
        }
        Self {
            cohort: spec.cohort.clone(),
            namespace_selector: spec.namespace_selector.clone(),
            queueing_strategy: spec.queueing_strategy,
            requestable,
            label_keys,
            used: Resources::new(),
            workloads: HashMap::new(),
        }
    }

    fn add_workload(&mut self, info: WorkloadInfo) {
        resources::merge(&mut self.used, &info.flavored_usage());
        self.workloads.insert(info.key(), info);
    }

    fn remove_workload(&mut self, key: &str) -> Result<()> {
        let Some(info) = self.workloads.remove(key) else {
            return Ok(());
        };
        if !resources::subtract(&mut self.used, &info.flavored_usage()) {
            return Err(SchedulerError::InvariantViolation(format!(
                "usage underflow removing workload {key}"
            )));
        }
        Ok(())
    }
}

/// Point-in-time copy of one cluster queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterQueueSnapshot {
    /// Cluster-queue name.
    pub name: String,
    /// Cohort membership, as a key into [`Snapshot::cohorts`].
    pub cohort: Option<String>,
    /// Selector over namespace labels.
    pub namespace_selector: Option<LabelSelector>,
    /// Ordering strategy.
    pub queueing_strategy: QueueingStrategy,
    /// Flavors per resource, in declared order.
    pub requestable: BTreeMap<ResourceName, Vec<FlavorLimits>>,
    /// Label keys declared by any flavor, per resource.
    pub label_keys: BTreeMap<ResourceName, BTreeSet<String>>,
    /// Current usage per (resource, flavor).
    pub used: Resources,
    /// Admitted workloads held by the queue, by key.
    pub workloads: HashMap<String, WorkloadInfo>,
}

/// Aggregate quota of a cohort, summed across its members.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CohortSnapshot {
    /// Total guaranteed capacity of the members.
    pub requestable: Resources,
    /// Total usage of the members.
    pub used: Resources,
}

/// An immutable point-in-time copy of the cache, used for one scheduling
/// pass. The pass owns its snapshot and may update it as a working copy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Cluster queues by name.
    pub cluster_queues: HashMap<String, ClusterQueueSnapshot>,
    /// Cohort aggregates by name.
    pub cohorts: HashMap<String, CohortSnapshot>,
    /// Namespace labels by namespace name.
    pub namespaces: HashMap<String, Labels>,
}

impl Snapshot {
    /// The cohort aggregate of a cluster queue, if it has one.
    #[must_use]
    pub fn cohort_of(&self, cluster_queue: &str) -> Option<&CohortSnapshot> {
        let cohort = self.cluster_queues.get(cluster_queue)?.cohort.as_ref()?;
        self.cohorts.get(cohort)
    }

    /// Applies an admission to the working copy so later entries of the
    /// same pass observe the new usage.
    pub fn apply(&mut self, cluster_queue: &str, info: &WorkloadInfo) {
        let usage = info.flavored_usage();
        let Some(cq) = self.cluster_queues.get_mut(cluster_queue) else {
            return;
        };
        resources::merge(&mut cq.used, &usage);
        cq.workloads.insert(info.key(), info.clone());
        if let Some(cohort) = cq.cohort.clone() {
            if let Some(aggregate) = self.cohorts.get_mut(&cohort) {
                resources::merge(&mut aggregate.used, &usage);
            }
        }
    }
}

#[derive(Default)]
struct CacheInner {
    cluster_queues: HashMap<String, ClusterQueueState>,
    /// Cohort name to member cluster-queue names.
    cohorts: HashMap<String, HashSet<String>>,
    /// Workload key to the cluster queue currently counting it.
    assignments: HashMap<String, String>,
    namespaces: HashMap<String, Labels>,
}

impl CacheInner {
    fn link_cohort(&mut self, cohort: Option<&str>, member: &str) {
        if let Some(cohort) = cohort {
            self.cohorts
                .entry(cohort.to_owned())
                .or_default()
                .insert(member.to_owned());
        }
    }

    fn unlink_cohort(&mut self, cohort: Option<&str>, member: &str) {
        if let Some(cohort) = cohort {
            if let Some(members) = self.cohorts.get_mut(cohort) {
                members.remove(member);
                if members.is_empty() {
                    self.cohorts.remove(cohort);
                }
            }
        }
    }
}

/// The cluster-queue cache.
#[derive(Default)]
pub struct Cache {
    inner: RwLock<CacheInner>,
}

impl Cache {
    /// Create a new empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a cluster queue.
    pub fn add_cluster_queue(&self, spec: &ClusterQueue) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.cluster_queues.contains_key(&spec.name) {
            return Err(SchedulerError::ClusterQueueExists(spec.name.clone()));
        }
        let state = ClusterQueueState::from_spec(spec);
        inner.link_cohort(state.cohort.as_deref(), &spec.name);
        inner.cluster_queues.insert(spec.name.clone(), state);
        Ok(())
    }

    /// Rebuilds a cluster queue's limits from an updated spec, re-linking
    /// cohort membership and re-counting its workloads.
    pub fn update_cluster_queue(&self, spec: &ClusterQueue) -> Result<()> {
        let mut inner = self.inner.write();
        let old = inner
            .cluster_queues
            .remove(&spec.name)
            .ok_or_else(|| SchedulerError::ClusterQueueNotFound(spec.name.clone()))?;
        inner.unlink_cohort(old.cohort.as_deref(), &spec.name);

        let mut state = ClusterQueueState::from_spec(spec);
        for info in old.workloads.into_values() {
            state.add_workload(info);
        }
        inner.link_cohort(state.cohort.as_deref(), &spec.name);
        inner.cluster_queues.insert(spec.name.clone(), state);
        Ok(())
    }

    /// Removes a cluster queue and everything it counted.
    pub fn delete_cluster_queue(&self, name: &str) {
        let mut inner = self.inner.write();
        let Some(state) = inner.cluster_queues.remove(name) else {
            return;
        };
        inner.unlink_cohort(state.cohort.as_deref(), name);
        for key in state.workloads.keys() {
            inner.assignments.remove(key);
        }
    }

    /// Mirrors a namespace's labels.
    pub fn upsert_namespace(&self, namespace: &Namespace) {
        self.inner
            .write()
            .namespaces
            .insert(namespace.name.clone(), namespace.labels.clone());
    }

    /// Drops a namespace.
    pub fn delete_namespace(&self, name: &str) {
        self.inner.write().namespaces.remove(name);
    }

    /// Counts a workload under its admitted cluster queue.
    ///
    /// Idempotent. If the workload was previously counted under a
    /// different cluster queue, usage is moved atomically. A pending
    /// workload is removed from the cache instead.
    pub fn add_or_update_workload(&self, workload: &Workload) -> Result<()> {
        let key = workload.key();
        let mut inner = self.inner.write();

        let Some(admission) = &workload.admission else {
            // Admission was cleared; the workload is pending again.
            if let Some(previous) = inner.assignments.remove(&key) {
                if let Some(state) = inner.cluster_queues.get_mut(&previous) {
                    state.remove_workload(&key)?;
                }
            }
            return Ok(());
        };

        let target = admission.cluster_queue.clone();
        if !inner.cluster_queues.contains_key(&target) {
            return Err(SchedulerError::ClusterQueueNotFound(target));
        }

        if let Some(previous) = inner.assignments.get(&key).cloned() {
            if let Some(state) = inner.cluster_queues.get_mut(&previous) {
                state.remove_workload(&key)?;
            }
        }

        let info = WorkloadInfo::new(workload.clone());
        match inner.cluster_queues.get_mut(&target) {
            Some(state) => state.add_workload(info),
            None => return Err(SchedulerError::ClusterQueueNotFound(target)),
        }
        inner.assignments.insert(key, target);
        Ok(())
    }

    /// Stops counting a workload.
    pub fn delete_workload(&self, workload: &Workload) -> Result<()> {
        let key = workload.key();
        let mut inner = self.inner.write();
        if let Some(previous) = inner.assignments.remove(&key) {
            if let Some(state) = inner.cluster_queues.get_mut(&previous) {
                state.remove_workload(&key)?;
            }
        }
        Ok(())
    }

    /// Takes an immutable point-in-time copy of the whole cache.
    ///
    /// Construction copies under the read lock; scheduling computation
    /// then proceeds without holding it.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read();

        let mut cohorts: HashMap<String, CohortSnapshot> = inner
            .cohorts
            .keys()
            .map(|name| (name.clone(), CohortSnapshot::default()))
            .collect();

        let mut cluster_queues = HashMap::with_capacity(inner.cluster_queues.len());
        for (name, state) in &inner.cluster_queues {
            if let Some(cohort) = &state.cohort {
                if let Some(aggregate) = cohorts.get_mut(cohort) {
                    for (resource, flavors) in &state.requestable {
                        for flavor in flavors {
                            resources::add(
                                &mut aggregate.requestable,
                                resource,
                                &flavor.name,
                                flavor.guaranteed,
                            );
                        }
                    }
                    resources::merge(&mut aggregate.used, &state.used);
                }
            }
            cluster_queues.insert(
                name.clone(),
                ClusterQueueSnapshot {
                    name: name.clone(),
                    cohort: state.cohort.clone(),
                    namespace_selector: state.namespace_selector.clone(),
                    queueing_strategy: state.queueing_strategy,
                    requestable: state.requestable.clone(),
                    label_keys: state.label_keys.clone(),
                    used: state.used.clone(),
                    workloads: state.workloads.clone(),
                },
            );
        }

        Snapshot {
            cluster_queues,
            cohorts,
            namespaces: inner.namespaces.clone(),
        }
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").finish_non_exhaustive()
    }
}
