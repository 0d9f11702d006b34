//! Object store abstraction and the in-memory implementation.
//!
//! The scheduler reads workloads and commits admission decisions through
//! the [`WorkloadStore`] trait; every consumer observes changes through the
//! broadcast watch channel. [`MemoryStore`] is both the test double and the
//! default backing of the service binary.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{StoreError, StoreResult};
use crate::namespace::Namespace;
use crate::queue::{ClusterQueue, LocalQueue};
use crate::workload::{Admission, Workload};

const WATCH_CAPACITY: usize = 1024;

/// How an object changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The object was created.
    Added,
    /// The object was updated.
    Modified,
    /// The object was deleted.
    Deleted,
}

/// Change notification delivered to watchers.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A workload changed.
    Workload(EventKind, Workload),
    /// A local queue changed.
    LocalQueue(EventKind, LocalQueue),
    /// A cluster queue changed.
    ClusterQueue(EventKind, ClusterQueue),
    /// A namespace changed.
    Namespace(EventKind, Namespace),
}

/// Store of workload records.
///
/// The admission pipeline treats the store's watch events as its only
/// authoritative input; the commit primitive is a compare-and-set so a
/// workload can never be admitted twice.
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    /// Lists every workload.
    async fn list(&self) -> StoreResult<Vec<Workload>>;

    /// Gets one workload.
    async fn get(&self, namespace: &str, name: &str) -> StoreResult<Option<Workload>>;

    /// Creates a workload. Fails with `Conflict` if it already exists.
    async fn insert(&self, workload: Workload) -> StoreResult<()>;

    /// Deletes a workload.
    async fn delete(&self, namespace: &str, name: &str) -> StoreResult<()>;

    /// Records the admission decision.
    ///
    /// Compare-and-set against a nil admission: fails with `Conflict` when
    /// a decision is already present, `NotFound` when the workload is gone.
    async fn set_admission(
        &self,
        namespace: &str,
        name: &str,
        admission: Admission,
    ) -> StoreResult<()>;

    /// Subscribes to change events.
    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}

/// In-memory object store.
///
/// Data is lost when the process exits; a production deployment would back
/// this with the control plane's object storage.
#[derive(Debug)]
pub struct MemoryStore {
    workloads: RwLock<HashMap<String, Workload>>,
    local_queues: RwLock<HashMap<String, LocalQueue>>,
    cluster_queues: RwLock<HashMap<String, ClusterQueue>>,
    namespaces: RwLock<HashMap<String, Namespace>>,
    events: broadcast::Sender<WatchEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            workloads: RwLock::new(HashMap::new()),
            local_queues: RwLock::new(HashMap::new()),
            cluster_queues: RwLock::new(HashMap::new()),
            namespaces: RwLock::new(HashMap::new()),
            events,
        }
    }

    fn broadcast(&self, event: WatchEvent) {
        // No receivers is fine; events are best-effort notifications.
        let _ = self.events.send(event);
    }

    /// Create or update a local queue.
    pub fn upsert_local_queue(&self, queue: LocalQueue) -> StoreResult<()> {
        let mut queues = self
            .local_queues
            .write()
            .map_err(|_| StoreError::internal("lock poisoned"))?;
        let kind = if queues.contains_key(&queue.key()) {
            EventKind::Modified
        } else {
            EventKind::Added
        };
        queues.insert(queue.key(), queue.clone());
        drop(queues);
        self.broadcast(WatchEvent::LocalQueue(kind, queue));
        Ok(())
    }

    /// Delete a local queue.
    pub fn delete_local_queue(&self, namespace: &str, name: &str) -> StoreResult<()> {
        let mut queues = self
            .local_queues
            .write()
            .map_err(|_| StoreError::internal("lock poisoned"))?;
        let removed = queues
            .remove(&format!("{namespace}/{name}"))
            .ok_or_else(|| StoreError::NotFound(format!("{namespace}/{name}")))?;
        drop(queues);
        self.broadcast(WatchEvent::LocalQueue(EventKind::Deleted, removed));
        Ok(())
    }

    /// Create or update a cluster queue.
    pub fn upsert_cluster_queue(&self, queue: ClusterQueue) -> StoreResult<()> {
        let mut queues = self
            .cluster_queues
            .write()
            .map_err(|_| StoreError::internal("lock poisoned"))?;
        let kind = if queues.contains_key(&queue.name) {
            EventKind::Modified
        } else {
            EventKind::Added
        };
        queues.insert(queue.name.clone(), queue.clone());
        drop(queues);
        self.broadcast(WatchEvent::ClusterQueue(kind, queue));
        Ok(())
    }

    /// Delete a cluster queue.
    pub fn delete_cluster_queue(&self, name: &str) -> StoreResult<()> {
        let mut queues = self
            .cluster_queues
            .write()
            .map_err(|_| StoreError::internal("lock poisoned"))?;
        let removed = queues
            .remove(name)
            .ok_or_else(|| StoreError::NotFound(name.to_owned()))?;
        drop(queues);
        self.broadcast(WatchEvent::ClusterQueue(EventKind::Deleted, removed));
        Ok(())
    }

    /// Create or update a namespace.
    pub fn upsert_namespace(&self, namespace: Namespace) -> StoreResult<()> {
        let mut namespaces = self
            .namespaces
            .write()
            .map_err(|_| StoreError::internal("lock poisoned"))?;
        let kind = if namespaces.contains_key(&namespace.name) {
            EventKind::Modified
        } else {
            EventKind::Added
        };
        namespaces.insert(namespace.name.clone(), namespace.clone());
        drop(namespaces);
        self.broadcast(WatchEvent::Namespace(kind, namespace));
        Ok(())
    }

    /// Update a workload's spec, replacing the stored record.
    pub fn update_workload(&self, workload: Workload) -> StoreResult<()> {
        let mut workloads = self
            .workloads
            .write()
            .map_err(|_| StoreError::internal("lock poisoned"))?;
        workloads.insert(workload.key(), workload.clone());
        drop(workloads);
        self.broadcast(WatchEvent::Workload(EventKind::Modified, workload));
        Ok(())
    }
}

#[async_trait]
impl WorkloadStore for MemoryStore {
    async fn list(&self) -> StoreResult<Vec<Workload>> {
        let workloads = self
            .workloads
            .read()
            .map_err(|_| StoreError::internal("lock poisoned"))?;
        Ok(workloads.values().cloned().collect())
    }

    async fn get(&self, namespace: &str, name: &str) -> StoreResult<Option<Workload>> {
        let workloads = self
            .workloads
            .read()
            .map_err(|_| StoreError::internal("lock poisoned"))?;
        Ok(workloads.get(&format!("{namespace}/{name}")).cloned())
    }

    async fn insert(&self, workload: Workload) -> StoreResult<()> {
        let mut workloads = self
            .workloads
            .write()
            .map_err(|_| StoreError::internal("lock poisoned"))?;
        let key = workload.key();
        if workloads.contains_key(&key) {
            return Err(StoreError::Conflict(key));
        }
        workloads.insert(key, workload.clone());
        drop(workloads);
        self.broadcast(WatchEvent::Workload(EventKind::Added, workload));
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> StoreResult<()> {
        let mut workloads = self
            .workloads
            .write()
            .map_err(|_| StoreError::internal("lock poisoned"))?;
        let removed = workloads
            .remove(&format!("{namespace}/{name}"))
            .ok_or_else(|| StoreError::NotFound(format!("{namespace}/{name}")))?;
        drop(workloads);
        self.broadcast(WatchEvent::Workload(EventKind::Deleted, removed));
        Ok(())
    }

    async fn set_admission(
        &self,
        namespace: &str,
        name: &str,
        admission: Admission,
    ) -> StoreResult<()> {
        let key = format!("{namespace}/{name}");
        let mut workloads = self
            .workloads
            .write()
            .map_err(|_| StoreError::internal("lock poisoned"))?;
        let workload = workloads
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        if workload.admission.is_some() {
            return Err(StoreError::Conflict(key));
        }
        workload.admission = Some(admission);
        let updated = workload.clone();
        drop(workloads);
        self.broadcast(WatchEvent::Workload(EventKind::Modified, updated));
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_workload(name: &str) -> Workload {
        Workload {
            namespace: "sales".to_owned(),
            name: name.to_owned(),
            created_at: Utc::now(),
            queue_name: "main".to_owned(),
            pod_sets: vec![],
            admission: None,
        }
    }

    fn test_admission() -> Admission {
        Admission {
            cluster_queue: "sales".to_owned(),
            pod_set_flavors: vec![],
        }
    }

    #[tokio::test]
    async fn insert_and_get() {
        let store = MemoryStore::new();
        store.insert(test_workload("foo")).await.expect("insert");

        let fetched = store
            .get("sales", "foo")
            .await
            .expect("get")
            .expect("workload present");
        assert_eq!(fetched.name, "foo");
        assert!(store.get("sales", "bar").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let store = MemoryStore::new();
        store.insert(test_workload("foo")).await.expect("insert");
        assert!(matches!(
            store.insert(test_workload("foo")).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn set_admission_is_compare_and_set() {
        let store = MemoryStore::new();
        store.insert(test_workload("foo")).await.expect("insert");

        store
            .set_admission("sales", "foo", test_admission())
            .await
            .expect("first admission");

        // A second admission loses the compare-and-set.
        assert!(matches!(
            store.set_admission("sales", "foo", test_admission()).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            store.set_admission("sales", "gone", test_admission()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn watch_delivers_admission_event() {
        let store = MemoryStore::new();
        let mut watch = store.watch();

        store.insert(test_workload("foo")).await.expect("insert");
        store
            .set_admission("sales", "foo", test_admission())
            .await
            .expect("admission");

        let added = watch.recv().await.expect("added event");
        assert!(matches!(added, WatchEvent::Workload(EventKind::Added, _)));

        match watch.recv().await.expect("modified event") {
            WatchEvent::Workload(EventKind::Modified, workload) => {
                assert!(workload.admission.is_some());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
