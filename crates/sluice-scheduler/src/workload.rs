//! Workload metadata helpers: canonical keys and cached request totals.

use std::collections::BTreeMap;

use sluice_api::{Admission, PodSetFlavors, ResourceName, Workload};

use crate::resources::{self, Resources};

/// Canonical `namespace/name` key for a workload.
#[must_use]
pub fn workload_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// A workload with its per-pod-set request totals computed once.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadInfo {
    /// The workload record.
    pub workload: Workload,
    /// Request totals per pod set, in the pod-set order of the spec.
    pub total_requests: Vec<PodSetResources>,
}

/// Cached totals and flavor assignment for one pod set.
#[derive(Debug, Clone, PartialEq)]
pub struct PodSetResources {
    /// Pod-set name.
    pub name: String,
    /// Canonical request totals keyed by resource.
    pub requests: BTreeMap<ResourceName, i64>,
    /// Flavor chosen per resource; filled by flavor assignment, or seeded
    /// from an existing admission.
    pub flavors: BTreeMap<ResourceName, String>,
}

impl WorkloadInfo {
    /// Builds the info, computing totals and seeding flavors from the
    /// workload's admission when present.
    #[must_use]
    pub fn new(workload: Workload) -> Self {
        let mut assigned: BTreeMap<&str, &BTreeMap<ResourceName, String>> = BTreeMap::new();
        if let Some(admission) = &workload.admission {
            for pod_set in &admission.pod_set_flavors {
                assigned.insert(&pod_set.name, &pod_set.flavors);
            }
        }
        let total_requests = workload
            .pod_sets
            .iter()
            .map(|pod_set| PodSetResources {
                name: pod_set.name.clone(),
                requests: resources::pod_set_requests(pod_set),
                flavors: assigned
                    .get(pod_set.name.as_str())
                    .map(|flavors| (*flavors).clone())
                    .unwrap_or_default(),
            })
            .collect();
        Self {
            workload,
            total_requests,
        }
    }

    /// Canonical key of the underlying workload.
    #[must_use]
    pub fn key(&self) -> String {
        self.workload.key()
    }

    /// Usage contributed per (resource, flavor). Only resources with an
    /// assigned flavor are counted.
    #[must_use]
    pub fn flavored_usage(&self) -> Resources {
        let mut usage = Resources::new();
        for pod_set in &self.total_requests {
            for (resource, amount) in &pod_set.requests {
                if let Some(flavor) = pod_set.flavors.get(resource) {
                    resources::add(&mut usage, resource, flavor, *amount);
                }
            }
        }
        usage
    }

    /// Builds the admission record from the assigned flavors.
    #[must_use]
    pub fn admission(&self, cluster_queue: &str) -> Admission {
        Admission {
            cluster_queue: cluster_queue.to_owned(),
            pod_set_flavors: self
                .total_requests
                .iter()
                .map(|pod_set| PodSetFlavors {
                    name: pod_set.name.clone(),
                    flavors: pod_set.flavors.clone(),
                })
                .collect(),
        }
    }
}

/// Whether two workloads have identical pod-set shapes (names and counts).
/// Used by job adapters to decide whether a spec change warrants a requeue.
#[must_use]
pub fn pod_set_counts_equal(a: &Workload, b: &Workload) -> bool {
    a.pod_sets.len() == b.pod_sets.len()
        && a.pod_sets
            .iter()
            .zip(&b.pod_sets)
            .all(|(x, y)| x.name == y.name && x.count == y.count)
}
