//! Shared harness for scheduling integration tests.

pub mod fixtures;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sluice_api::{
    Admission, ClusterQueue, LocalQueue, MemoryStore, Namespace, Workload, WorkloadStore,
};
use sluice_scheduler::{
    Cache, EventRecorder, QueueManager, Scheduler, SchedulerConfig, StateSync,
};

use self::fixtures::commit_tracker;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);
const SETTLE_POLL: Duration = Duration::from_millis(10);

/// One recorded workload event.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub workload: String,
    pub reason: String,
}

/// Event recorder capturing events for assertions.
#[derive(Debug, Default)]
pub struct CapturingRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl CapturingRecorder {
    /// Reasons recorded against one workload, in order.
    pub fn reasons_for(&self, workload: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.workload == workload)
            .map(|event| event.reason.clone())
            .collect()
    }
}

impl EventRecorder for CapturingRecorder {
    fn record(&self, workload: &str, reason: &str, _message: &str) {
        self.events.lock().push(RecordedEvent {
            workload: workload.to_owned(),
            reason: reason.to_owned(),
        });
    }
}

/// A fully wired admission pipeline over an in-memory store, with a live
/// store-event sync and a commit tracker.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub cache: Arc<Cache>,
    pub queues: Arc<QueueManager>,
    pub scheduler: Scheduler,
    pub recorder: Arc<CapturingRecorder>,
    pub token: CancellationToken,
    commits: mpsc::UnboundedReceiver<()>,
}

impl Harness {
    /// Seeds the store, cache, and queue manager the way the sync would,
    /// then starts the sync so committed admissions flow back.
    pub async fn new(
        namespaces: Vec<Namespace>,
        local_queues: Vec<LocalQueue>,
        cluster_queues: Vec<ClusterQueue>,
        workloads: Vec<Workload>,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        for namespace in &namespaces {
            store
                .upsert_namespace(namespace.clone())
                .expect("seed namespace");
        }
        for queue in &local_queues {
            store
                .upsert_local_queue(queue.clone())
                .expect("seed local queue");
        }
        for queue in &cluster_queues {
            store
                .upsert_cluster_queue(queue.clone())
                .expect("seed cluster queue");
        }
        for workload in &workloads {
            store.insert(workload.clone()).await.expect("seed workload");
        }

        let cache = Arc::new(Cache::new());
        let queues = Arc::new(QueueManager::new());
        for namespace in &namespaces {
            cache.upsert_namespace(namespace);
        }
        for queue in &local_queues {
            queues.add_local_queue(queue);
        }
        for queue in &cluster_queues {
            cache.add_cluster_queue(queue).expect("seed cache queue");
            queues.add_cluster_queue(queue).expect("seed manager queue");
        }
        for workload in &workloads {
            cache
                .add_or_update_workload(workload)
                .expect("seed cache workload");
            queues.add_or_update(workload);
        }

        // Only events from here on are pumped; the seed state above is
        // already consistent.
        let events = store.watch();
        let token = CancellationToken::new();
        let sync = StateSync::new(
            Arc::clone(&cache),
            Arc::clone(&queues),
            Arc::clone(&store) as Arc<dyn WorkloadStore>,
        );
        tokio::spawn({
            let token = token.clone();
            async move { sync.run(events, token).await }
        });

        let recorder = Arc::new(CapturingRecorder::default());
        let (wrapper, commits) = commit_tracker();
        let mut scheduler = Scheduler::new(
            Arc::clone(&queues),
            Arc::clone(&cache),
            Arc::clone(&store) as Arc<dyn WorkloadStore>,
            Arc::clone(&recorder) as Arc<dyn EventRecorder>,
            SchedulerConfig::default(),
        );
        scheduler.set_admission_routine_wrapper(wrapper);

        Self {
            store,
            cache,
            queues,
            scheduler,
            recorder,
            token,
            commits,
        }
    }

    /// Runs one pass, asserts how many admissions were dispatched, waits
    /// for their commit tasks to finish, and lets the sync settle.
    pub async fn schedule_and_drain(&mut self, expected_dispatched: usize) {
        let dispatched = self.scheduler.schedule_once(&self.token).await;
        assert_eq!(
            dispatched, expected_dispatched,
            "unexpected number of dispatched admissions"
        );
        for _ in 0..expected_dispatched {
            tokio::time::timeout(SETTLE_TIMEOUT, self.commits.recv())
                .await
                .expect("timed out waiting for a commit task")
                .expect("commit channel closed");
        }
        self.settle().await;
    }

    /// Waits until every admission in the store is reflected in the cache
    /// and removed from the queue manager.
    pub async fn settle(&self) {
        let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
        loop {
            if self.converged().await {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "store, cache, and queues did not converge"
            );
            tokio::time::sleep(SETTLE_POLL).await;
        }
    }

    async fn converged(&self) -> bool {
        let workloads = self.store.list().await.expect("list workloads");
        let snapshot = self.cache.snapshot();
        let dump = self.queues.dump();
        workloads.iter().all(|workload| {
            let key = workload.key();
            match &workload.admission {
                Some(admission) => {
                    let in_cache = snapshot
                        .cluster_queues
                        .get(&admission.cluster_queue)
                        .is_some_and(|cq| cq.workloads.contains_key(&key));
                    let in_queue = dump.values().any(|keys| keys.contains(&key));
                    in_cache && !in_queue
                }
                None => true,
            }
        })
    }

    /// Admissions currently persisted in the store, by workload key.
    pub async fn admissions(&self) -> BTreeMap<String, Admission> {
        self.store
            .list()
            .await
            .expect("list workloads")
            .into_iter()
            .filter_map(|workload| {
                let key = workload.key();
                workload.admission.map(|admission| (key, admission))
            })
            .collect()
    }

    /// Admissions counted in the cache, by workload key, verifying that
    /// every cached workload is admitted by the queue holding it.
    pub fn assignments_in_cache(&self) -> BTreeMap<String, Admission> {
        let snapshot = self.cache.snapshot();
        let mut assignments = BTreeMap::new();
        for (name, cq) in &snapshot.cluster_queues {
            for (key, info) in &cq.workloads {
                let admission = info
                    .workload
                    .admission
                    .clone()
                    .unwrap_or_else(|| panic!("workload {key} cached in {name} is not admitted"));
                assert_eq!(
                    &admission.cluster_queue, name,
                    "workload {key} cached under the wrong cluster queue"
                );
                assignments.insert(key.clone(), admission);
            }
        }
        assignments
    }
}
