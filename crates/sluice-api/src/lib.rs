//! Persisted object schema for the sluice admission scheduler.
//!
//! This crate defines the objects that tenants and operators write
//! (workloads, local queues, cluster queues, namespaces), the quantity and
//! label-selector arithmetic they carry, and the store abstraction through
//! which the scheduler reads and commits them.
//!
//! The scheduler itself lives in `sluice-scheduler`; this crate has no
//! scheduling logic.

pub mod error;
pub mod labels;
pub mod namespace;
pub mod quantity;
pub mod queue;
pub mod store;
pub mod workload;

pub use error::{StoreError, StoreResult};
pub use labels::{
    LabelSelector, LabelSelectorRequirement, Labels, NodeAffinity, NodeSelectorTerm,
    SelectorOperator, Taint, TaintEffect, Toleration, TolerationOperator,
};
pub use namespace::Namespace;
pub use quantity::{Quantity, QuantityError, ResourceName, RESOURCE_CPU, RESOURCE_MEMORY};
pub use queue::{ClusterQueue, Flavor, LocalQueue, QueueingStrategy, Quota, RequestableResource};
pub use store::{EventKind, MemoryStore, WatchEvent, WorkloadStore};
pub use workload::{Admission, Container, PodSet, PodSetFlavors, PodTemplate, Workload};
