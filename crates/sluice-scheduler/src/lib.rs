//! Sluice admission scheduler - quota pools, queueing, and admission.
//!
//! The pipeline decides *when* a batch workload may start running by
//! atomically assigning a resource flavor per requested resource and
//! recording the decision on the workload record. Pod placement is left to
//! the underlying orchestrator.
//!
//! # Architecture
//!
//! - [`cache::Cache`] mirrors every cluster queue, its per-flavor
//!   guarantees and ceilings, its admitted workloads, and its cohort, and
//!   produces atomic read-only snapshots.
//! - [`queue::QueueManager`] buffers pending workloads grouped by the
//!   cluster queue they target and yields one candidate per non-empty
//!   queue.
//! - [`scheduler::Scheduler`] runs one pass at a time: snapshot, flavor
//!   assignment, ordering, intra-pass conflict resolution, asynchronous
//!   commit.
//! - [`sync::StateSync`] is the only writer of cache and queues, applying
//!   store watch events; a committed admission flows back through it.
//!
//! A workload lives in exactly one place: a pending bucket of the queue
//! manager while pending, a cluster-queue bucket of the cache once
//! admitted.

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod queue;
pub mod resources;
pub mod scheduler;
pub mod sync;
pub mod workload;

pub use cache::{Cache, ClusterQueueSnapshot, CohortSnapshot, FlavorLimits, Snapshot};
pub use config::SchedulerConfig;
pub use error::{PendReason, Result, SchedulerError};
pub use events::{EventRecorder, LogRecorder};
pub use queue::{Head, QueueManager};
pub use resources::Resources;
pub use scheduler::{RoutineWrapper, Scheduler};
pub use sync::StateSync;
pub use workload::{workload_key, PodSetResources, WorkloadInfo};
