//! Applies store watch events to the cache and the queue manager.
//!
//! This is the single writer of both structures: an admission event moves
//! the workload from its pending bucket into the cluster-queue cache, a
//! deletion decrements usage, topology events re-link routes. The store's
//! events are the only authoritative input of the pipeline.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sluice_api::{EventKind, WatchEvent, Workload, WorkloadStore};

use crate::cache::Cache;
use crate::error::{Result, SchedulerError};
use crate::queue::QueueManager;

/// Pumps store events into the cache and queue manager.
pub struct StateSync {
    cache: Arc<Cache>,
    queues: Arc<QueueManager>,
    store: Arc<dyn WorkloadStore>,
}

impl StateSync {
    /// Create a sync over the given cache, queue manager, and store.
    #[must_use]
    pub fn new(
        cache: Arc<Cache>,
        queues: Arc<QueueManager>,
        store: Arc<dyn WorkloadStore>,
    ) -> Self {
        Self {
            cache,
            queues,
            store,
        }
    }

    /// Consumes events until the channel closes or the token is
    /// cancelled. Returns an error only on invariant violations, which the
    /// caller must treat as fatal.
    pub async fn run(
        &self,
        mut events: broadcast::Receiver<WatchEvent>,
        token: CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                () = token.cancelled() => return Ok(()),
                event = events.recv() => match event {
                    Ok(event) => self.apply(event).await?,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Watch lagged, resynchronising workloads");
                        self.resync_workloads().await?;
                    }
                    Err(RecvError::Closed) => return Ok(()),
                },
            }
        }
    }

    async fn apply(&self, event: WatchEvent) -> Result<()> {
        match event {
            WatchEvent::Workload(kind, workload) => match kind {
                EventKind::Added | EventKind::Modified => self.apply_workload(&workload)?,
                EventKind::Deleted => {
                    self.cache.delete_workload(&workload)?;
                    self.queues.delete(&workload);
                }
            },
            WatchEvent::LocalQueue(kind, queue) => match kind {
                EventKind::Added | EventKind::Modified => self.queues.add_local_queue(&queue),
                EventKind::Deleted => self.queues.delete_local_queue(&queue),
            },
            WatchEvent::ClusterQueue(kind, spec) => match kind {
                EventKind::Added | EventKind::Modified => {
                    match self.cache.add_cluster_queue(&spec) {
                        Ok(()) => {}
                        Err(SchedulerError::ClusterQueueExists(_)) => {
                            self.cache.update_cluster_queue(&spec)?;
                        }
                        Err(error) => return Err(error),
                    }
                    match self.queues.add_cluster_queue(&spec) {
                        Ok(()) => {}
                        Err(SchedulerError::ClusterQueueExists(_)) => {
                            self.queues.update_cluster_queue(&spec);
                        }
                        Err(error) => return Err(error),
                    }
                    // Workloads admitted to this queue may have arrived
                    // before the queue itself; count them now.
                    self.recount_admitted(&spec.name).await?;
                }
                EventKind::Deleted => {
                    self.cache.delete_cluster_queue(&spec.name);
                    self.queues.delete_cluster_queue(&spec.name);
                }
            },
            WatchEvent::Namespace(kind, namespace) => {
                match kind {
                    EventKind::Added | EventKind::Modified => {
                        self.cache.upsert_namespace(&namespace);
                    }
                    EventKind::Deleted => self.cache.delete_namespace(&namespace.name),
                }
                // Selector outcomes may change; wake the scheduler.
                self.queues.poke();
            }
        }
        Ok(())
    }

    fn apply_workload(&self, workload: &Workload) -> Result<()> {
        match self.cache.add_or_update_workload(workload) {
            Ok(()) => {}
            Err(SchedulerError::ClusterQueueNotFound(name)) => {
                // The admission references a queue whose event has not
                // arrived; it is recounted when the queue appears.
                debug!(workload = %workload.key(), cluster_queue = %name, "Admitted workload waiting for its cluster queue");
            }
            Err(error) => return Err(error),
        }
        self.queues.add_or_update(workload);
        Ok(())
    }

    async fn recount_admitted(&self, cluster_queue: &str) -> Result<()> {
        for workload in self.store.list().await? {
            let admitted_here = workload
                .admission
                .as_ref()
                .is_some_and(|admission| admission.cluster_queue == cluster_queue);
            if admitted_here {
                self.apply_workload(&workload)?;
            }
        }
        Ok(())
    }

    async fn resync_workloads(&self) -> Result<()> {
        for workload in self.store.list().await? {
            self.apply_workload(&workload)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for StateSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSync").finish_non_exhaustive()
    }
}
