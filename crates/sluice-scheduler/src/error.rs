//! Error types for the admission pipeline.

use std::fmt;

use thiserror::Error;

use sluice_api::StoreError;

/// Result type alias using [`SchedulerError`].
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Hard errors of the admission pipeline.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Cluster queue already present in the cache.
    #[error("cluster queue already exists: {0}")]
    ClusterQueueExists(String),

    /// Cluster queue missing from the cache.
    #[error("cluster queue not found: {0}")]
    ClusterQueueNotFound(String),

    /// Quota accounting corruption. The process must abort rather than
    /// keep scheduling against a corrupted cache.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a workload stays pending after a scheduling pass.
///
/// None of these are hard failures; they are recorded as events against
/// the workload and the workload is reconsidered on the next pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendReason {
    /// No flavor of a requested resource admits the pod set.
    FlavorUnmatched {
        /// Pod set that failed.
        pod_set: String,
        /// Resource with no matching flavor.
        resource: String,
    },

    /// Every matching flavor is blocked by guarantee, cohort headroom, or
    /// ceiling.
    QuotaExceeded {
        /// Pod set that failed.
        pod_set: String,
        /// Resource out of quota.
        resource: String,
    },

    /// The cluster queue's namespace selector rejects the workload's
    /// namespace.
    NamespaceMismatch,

    /// No local queue or cluster queue routes the workload yet.
    MissingRoute,

    /// Another admission was recorded on the workload first.
    CommitConflict,

    /// The store could not be reached while committing.
    CommitTransport,
}

impl PendReason {
    /// Short reason tag used in event records.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FlavorUnmatched { .. } => "FlavorUnmatched",
            Self::QuotaExceeded { .. } => "QuotaExceeded",
            Self::NamespaceMismatch => "NamespaceMismatch",
            Self::MissingRoute => "MissingRoute",
            Self::CommitConflict => "CommitConflict",
            Self::CommitTransport => "CommitTransport",
        }
    }

    /// Whether the reason comes from a failed commit, in which case the
    /// workload is retried on the next pass rather than waiting for a
    /// topology change.
    #[must_use]
    pub const fn is_commit_failure(&self) -> bool {
        matches!(self, Self::CommitConflict | Self::CommitTransport)
    }
}

impl fmt::Display for PendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FlavorUnmatched { pod_set, resource } => {
                write!(f, "no flavor of {resource} admits pod set {pod_set}")
            }
            Self::QuotaExceeded { pod_set, resource } => {
                write!(f, "insufficient quota of {resource} for pod set {pod_set}")
            }
            Self::NamespaceMismatch => write!(f, "namespace does not match the cluster queue selector"),
            Self::MissingRoute => write!(f, "no route to a known cluster queue"),
            Self::CommitConflict => write!(f, "admission conflicts with a concurrent update"),
            Self::CommitTransport => write!(f, "admission could not be persisted"),
        }
    }
}
