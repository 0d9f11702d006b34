//! Event recording for user-surfaced workload outcomes.
//!
//! Nothing in the admission pipeline is a hard user-visible failure;
//! scheduling outcomes are conveyed as events recorded against the
//! workload.

use tracing::info;

/// Records events against workloads.
pub trait EventRecorder: Send + Sync {
    /// Records one event: a short reason tag and a human-readable message.
    fn record(&self, workload: &str, reason: &str, message: &str);
}

/// Recorder that emits structured log lines tagged with the manager name.
#[derive(Debug)]
pub struct LogRecorder {
    manager_name: String,
}

impl LogRecorder {
    /// Create a recorder identifying this process as `manager_name`.
    #[must_use]
    pub fn new(manager_name: impl Into<String>) -> Self {
        Self {
            manager_name: manager_name.into(),
        }
    }
}

impl EventRecorder for LogRecorder {
    fn record(&self, workload: &str, reason: &str, message: &str) {
        info!(
            manager = %self.manager_name,
            workload = %workload,
            reason = %reason,
            "{message}"
        );
    }
}
