//! Builders for scheduling integration tests.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use tokio::sync::mpsc;

use sluice_api::{
    Admission, ClusterQueue, Container, Flavor, LabelSelector, LabelSelectorRequirement, Labels,
    LocalQueue, Namespace, PodSet, PodSetFlavors, PodTemplate, QueueingStrategy, Quota,
    RequestableResource, SelectorOperator, Workload,
};
use sluice_scheduler::RoutineWrapper;

/// Fixed base timestamp so FIFO ordering in tests is deterministic.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("valid timestamp")
}

/// Creates a flavor with no labels or taints.
pub fn flavor(name: &str, guaranteed: &str, ceiling: &str) -> Flavor {
    Flavor {
        name: name.to_owned(),
        labels: Labels::new(),
        taints: vec![],
        quota: Quota {
            guaranteed: guaranteed.parse().expect("quantity"),
            ceiling: ceiling.parse().expect("quantity"),
        },
    }
}

/// Creates a local queue.
pub fn local_queue(namespace: &str, name: &str, cluster_queue: &str) -> LocalQueue {
    LocalQueue {
        namespace: namespace.to_owned(),
        name: name.to_owned(),
        cluster_queue: cluster_queue.to_owned(),
    }
}

/// Creates a namespace with the given labels.
pub fn namespace(name: &str, labels: &[(&str, &str)]) -> Namespace {
    Namespace {
        name: name.to_owned(),
        labels: labels
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect(),
    }
}

/// Builder for test cluster queues.
pub struct ClusterQueueBuilder {
    inner: ClusterQueue,
}

impl ClusterQueueBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            inner: ClusterQueue {
                name: name.to_owned(),
                namespace_selector: None,
                queueing_strategy: QueueingStrategy::StrictFifo,
                cohort: None,
                resources: vec![],
            },
        }
    }

    pub fn cohort(mut self, cohort: &str) -> Self {
        self.inner.cohort = Some(cohort.to_owned());
        self
    }

    pub fn best_effort(mut self) -> Self {
        self.inner.queueing_strategy = QueueingStrategy::BestEffortFifo;
        self
    }

    /// Requires a namespace label to be one of the given values.
    pub fn namespace_selector_in(mut self, key: &str, values: &[&str]) -> Self {
        self.inner.namespace_selector = Some(LabelSelector {
            match_labels: Labels::new(),
            match_expressions: vec![LabelSelectorRequirement {
                key: key.to_owned(),
                operator: SelectorOperator::In,
                values: values.iter().map(|v| (*v).to_owned()).collect(),
            }],
        });
        self
    }

    pub fn resource(mut self, name: &str, flavors: Vec<Flavor>) -> Self {
        self.inner.resources.push(RequestableResource {
            name: name.to_owned(),
            flavors,
        });
        self
    }

    pub fn build(self) -> ClusterQueue {
        self.inner
    }
}

/// Builder for test workloads.
pub struct WorkloadBuilder {
    inner: Workload,
}

impl WorkloadBuilder {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            inner: Workload {
                namespace: namespace.to_owned(),
                name: name.to_owned(),
                created_at: base_time(),
                queue_name: "main".to_owned(),
                pod_sets: vec![],
                admission: None,
            },
        }
    }

    pub fn queue(mut self, name: &str) -> Self {
        self.inner.queue_name = name.to_owned();
        self
    }

    /// Offsets the creation timestamp to order workloads in a test.
    pub fn created_after_secs(mut self, secs: i64) -> Self {
        self.inner.created_at = base_time() + ChronoDuration::seconds(secs);
        self
    }

    pub fn pod_set(mut self, name: &str, count: u32, requests: &[(&str, &str)]) -> Self {
        self.inner.pod_sets.push(PodSet {
            name: name.to_owned(),
            count,
            template: PodTemplate {
                containers: vec![Container {
                    requests: requests
                        .iter()
                        .map(|(r, q)| ((*r).to_owned(), q.parse().expect("quantity")))
                        .collect(),
                }],
                ..PodTemplate::default()
            },
        });
        self
    }

    /// Marks the workload as already admitted.
    pub fn admitted(mut self, cluster_queue: &str, flavors: &[(&str, &[(&str, &str)])]) -> Self {
        self.inner.admission = Some(admission(cluster_queue, flavors));
        self
    }

    pub fn build(self) -> Workload {
        self.inner
    }
}

/// Builds an admission record for assertions.
pub fn admission(cluster_queue: &str, flavors: &[(&str, &[(&str, &str)])]) -> Admission {
    Admission {
        cluster_queue: cluster_queue.to_owned(),
        pod_set_flavors: flavors
            .iter()
            .map(|(pod_set, assignments)| PodSetFlavors {
                name: (*pod_set).to_owned(),
                flavors: assignments
                    .iter()
                    .map(|(r, f)| ((*r).to_owned(), (*f).to_owned()))
                    .collect(),
            })
            .collect(),
    }
}

/// A routine wrapper whose finish hook signals a channel, so tests can
/// await the drain of asynchronous admission tasks.
pub fn commit_tracker() -> (RoutineWrapper, mpsc::UnboundedReceiver<()>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let wrapper = RoutineWrapper::new(
        || {},
        move || {
            let _ = sender.send(());
        },
    );
    (wrapper, receiver)
}
