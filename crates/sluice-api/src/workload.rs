//! Workload objects: the scheduler's unit of admission.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::labels::{Labels, NodeAffinity, Toleration};
use crate::quantity::{Quantity, ResourceName};

/// A batch workload submitted by a tenant.
///
/// A workload is *pending* until the scheduler records an [`Admission`] on
/// it; runtime pod placement is left to the underlying orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    /// Namespace the workload lives in.
    pub namespace: String,
    /// Name, unique within the namespace.
    pub name: String,
    /// Creation timestamp; drives FIFO ordering.
    pub created_at: DateTime<Utc>,
    /// Name of the local queue the workload targets.
    pub queue_name: String,
    /// Homogeneous pod groups making up the workload.
    pub pod_sets: Vec<PodSet>,
    /// The scheduler's durable decision, set at most once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admission: Option<Admission>,
}

impl Workload {
    /// Canonical `namespace/name` key.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// A workload is pending until an admission is recorded.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.admission.is_none()
    }
}

/// A homogeneous group of pods within a workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodSet {
    /// Pod-set name, unique within the workload.
    pub name: String,
    /// Number of pods in the group.
    pub count: u32,
    /// Template shared by every pod in the group.
    pub template: PodTemplate,
}

/// The scheduling-relevant slice of a pod template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodTemplate {
    /// Containers with their resource requests.
    pub containers: Vec<Container>,
    /// Required node labels.
    pub node_selector: Labels,
    /// Required node affinity, if any.
    pub affinity: Option<NodeAffinity>,
    /// Taints the pods tolerate.
    pub tolerations: Vec<Toleration>,
}

/// A container's resource requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    /// Requested amount per resource.
    #[serde(default)]
    pub requests: BTreeMap<ResourceName, Quantity>,
}

/// The scheduler's durable admission decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
    /// Cluster queue the workload was admitted to.
    pub cluster_queue: String,
    /// Chosen flavor per resource, per pod set.
    pub pod_set_flavors: Vec<PodSetFlavors>,
}

/// Flavor assignment for one pod set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSetFlavors {
    /// Pod-set name.
    pub name: String,
    /// Flavor chosen for each requested resource.
    pub flavors: BTreeMap<ResourceName, String>,
}
