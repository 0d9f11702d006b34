//! Queue and quota-pool objects.

use serde::{Deserialize, Serialize};

use crate::labels::{LabelSelector, Labels, Taint};
use crate::quantity::{Quantity, ResourceName};

/// A namespaced routing object pointing at exactly one cluster queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalQueue {
    /// Namespace the queue lives in.
    pub namespace: String,
    /// Queue name, unique within the namespace.
    pub name: String,
    /// Cluster queue workloads of this queue are routed to.
    pub cluster_queue: String,
}

impl LocalQueue {
    /// Canonical `namespace/name` key.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// How a cluster queue orders its pending workloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueingStrategy {
    /// Strictly ordered by creation time; the head is never skipped.
    #[default]
    StrictFifo,
    /// Same ordering, but a head marked inadmissible may be skipped.
    BestEffortFifo,
}

/// An operator-owned quota pool that admits workloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterQueue {
    /// Cluster-scoped name.
    pub name: String,
    /// Selector over namespace labels; `None` admits every namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
    /// Ordering strategy for pending workloads.
    #[serde(default)]
    pub queueing_strategy: QueueingStrategy,
    /// Cohort this queue lends to and borrows from, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cohort: Option<String>,
    /// Requestable resources with their flavors.
    pub resources: Vec<RequestableResource>,
}

/// The flavors offered for one resource, in preference order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestableResource {
    /// Resource name.
    pub name: ResourceName,
    /// Flavors tried in declared order during admission.
    pub flavors: Vec<Flavor>,
}

/// A variant of a resource: node labels and taints plus quota limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flavor {
    /// Flavor name, unique per resource within the cluster queue.
    pub name: String,
    /// Node labels characterising the flavor.
    #[serde(default)]
    pub labels: Labels,
    /// Taints carried by the flavor's nodes.
    #[serde(default)]
    pub taints: Vec<Taint>,
    /// Quota limits for the flavor.
    pub quota: Quota,
}

/// Quota limits of a flavor. Invariant: `guaranteed <= ceiling`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    /// Capacity the queue may always use.
    pub guaranteed: Quantity,
    /// Hard cap including capacity borrowed from the cohort.
    pub ceiling: Quantity,
}
