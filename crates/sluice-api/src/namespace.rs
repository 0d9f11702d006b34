//! Namespace objects, mirrored for namespace-selector evaluation.

use serde::{Deserialize, Serialize};

use crate::labels::Labels;

/// A namespace with its labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// Namespace name.
    pub name: String,
    /// Labels evaluated against cluster-queue namespace selectors.
    #[serde(default)]
    pub labels: Labels,
}
