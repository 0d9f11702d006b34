//! Label selectors, taints, tolerations, and node affinity terms.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A label set, as carried by namespaces, flavors, and pod templates.
pub type Labels = BTreeMap<String, String>;

/// Operator of a selector requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectorOperator {
    /// The label value must be one of the listed values.
    In,
    /// The label must be absent or its value outside the listed values.
    NotIn,
    /// The label key must be present.
    Exists,
    /// The label key must be absent.
    DoesNotExist,
}

/// A single selector requirement over one label key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelectorRequirement {
    /// Label key the requirement applies to.
    pub key: String,
    /// How the key and values are compared.
    pub operator: SelectorOperator,
    /// Values compared against; empty for `Exists`/`DoesNotExist`.
    #[serde(default)]
    pub values: Vec<String>,
}

impl LabelSelectorRequirement {
    /// Whether the requirement holds for the given label set.
    #[must_use]
    pub fn matches(&self, labels: &Labels) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            SelectorOperator::In => value.is_some_and(|v| self.values.contains(v)),
            SelectorOperator::NotIn => value.is_none_or(|v| !self.values.contains(v)),
            SelectorOperator::Exists => value.is_some(),
            SelectorOperator::DoesNotExist => value.is_none(),
        }
    }
}

/// A label selector: exact matches plus expression requirements.
///
/// An empty selector matches every label set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelSelector {
    /// Exact key/value matches, ANDed together.
    pub match_labels: Labels,
    /// Expression requirements, ANDed together.
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl LabelSelector {
    /// Whether the selector matches the given label set.
    #[must_use]
    pub fn matches(&self, labels: &Labels) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
            && self.match_expressions.iter().all(|r| r.matches(labels))
    }
}

/// Effect of a taint on pods that do not tolerate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    /// New pods are not scheduled onto the tainted nodes.
    NoSchedule,
    /// Scheduling avoids the tainted nodes when possible.
    PreferNoSchedule,
    /// Running pods are evicted from the tainted nodes.
    NoExecute,
}

/// A taint carried by a flavor's nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    /// Taint key.
    pub key: String,
    /// Taint value; may be empty.
    #[serde(default)]
    pub value: String,
    /// Effect on intolerant pods.
    pub effect: TaintEffect,
}

/// Operator of a toleration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TolerationOperator {
    /// The toleration value must equal the taint value.
    #[default]
    Equal,
    /// Any taint value is tolerated.
    Exists,
}

/// A pod's toleration of a taint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Toleration {
    /// Taint key tolerated; empty tolerates every key (with `Exists`).
    pub key: String,
    /// How the value is compared.
    pub operator: TolerationOperator,
    /// Value compared with `Equal`.
    pub value: String,
    /// Effect tolerated; `None` tolerates every effect.
    pub effect: Option<TaintEffect>,
}

impl Default for Toleration {
    fn default() -> Self {
        Self {
            key: String::new(),
            operator: TolerationOperator::Equal,
            value: String::new(),
            effect: None,
        }
    }
}

impl Toleration {
    /// Whether this toleration covers the given taint.
    #[must_use]
    pub fn tolerates(&self, taint: &Taint) -> bool {
        if !self.key.is_empty() && self.key != taint.key {
            return false;
        }
        if let Some(effect) = self.effect {
            if effect != taint.effect {
                return false;
            }
        }
        match self.operator {
            TolerationOperator::Exists => true,
            TolerationOperator::Equal => self.value == taint.value,
        }
    }
}

/// One term of a required node affinity; terms are ORed, the expressions
/// within a term are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSelectorTerm {
    /// Requirements that must all hold for the term to match.
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

/// Required node affinity of a pod template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeAffinity {
    /// Terms of which at least one must be satisfiable.
    pub required_terms: Vec<NodeSelectorTerm>,
}
