//! Resource arithmetic and flavor matching.

use std::collections::{BTreeMap, BTreeSet};

use sluice_api::{Labels, PodSet, PodTemplate, ResourceName, Taint, TaintEffect};

/// Per-flavor amounts keyed by resource, then flavor name.
pub type Resources = BTreeMap<ResourceName, BTreeMap<String, i64>>;

/// Adds an amount for a (resource, flavor) pair.
pub fn add(target: &mut Resources, resource: &str, flavor: &str, amount: i64) {
    *target
        .entry(resource.to_owned())
        .or_default()
        .entry(flavor.to_owned())
        .or_insert(0) += amount;
}

/// The amount recorded for a (resource, flavor) pair, zero if absent.
#[must_use]
pub fn get(resources: &Resources, resource: &str, flavor: &str) -> i64 {
    resources
        .get(resource)
        .and_then(|flavors| flavors.get(flavor))
        .copied()
        .unwrap_or(0)
}

/// Subtracts `other` from `target`. Returns false if any amount would go
/// negative; `target` is left partially updated in that case, so callers
/// must treat a false return as corruption.
pub fn subtract(target: &mut Resources, other: &Resources) -> bool {
    for (resource, flavors) in other {
        for (flavor, amount) in flavors {
            let Some(current) = target
                .get_mut(resource)
                .and_then(|flavors| flavors.get_mut(flavor))
            else {
                return false;
            };
            if *current < *amount {
                return false;
            }
            *current -= amount;
        }
    }
    true
}

/// Merges `other` into `target`.
pub fn merge(target: &mut Resources, other: &Resources) {
    for (resource, flavors) in other {
        for (flavor, amount) in flavors {
            add(target, resource, flavor, *amount);
        }
    }
}

/// Canonical total request of a pod set: `count × Σ container requests`.
#[must_use]
pub fn pod_set_requests(pod_set: &PodSet) -> BTreeMap<ResourceName, i64> {
    let mut totals = BTreeMap::new();
    for container in &pod_set.template.containers {
        for (resource, quantity) in &container.requests {
            *totals.entry(resource.clone()).or_insert(0) += quantity.canonical(resource);
        }
    }
    for value in totals.values_mut() {
        *value *= i64::from(pod_set.count);
    }
    totals
}

/// Whether a flavor admits a pod template.
///
/// `label_keys` is the set of label keys declared by any flavor of the
/// resource; selector and affinity constraints on other keys are node-side
/// constraints enforced later and are ignored here.
#[must_use]
pub fn flavor_matches(
    flavor_labels: &Labels,
    flavor_taints: &[Taint],
    template: &PodTemplate,
    label_keys: &BTreeSet<String>,
) -> bool {
    for taint in flavor_taints {
        if matches!(taint.effect, TaintEffect::NoSchedule | TaintEffect::NoExecute)
            && !template.tolerations.iter().any(|t| t.tolerates(taint))
        {
            return false;
        }
    }

    for (key, value) in &template.node_selector {
        if label_keys.contains(key) && flavor_labels.get(key) != Some(value) {
            return false;
        }
    }

    if let Some(affinity) = &template.affinity {
        if !affinity.required_terms.is_empty() {
            // Terms are ORed; a term whose expressions are all ignored
            // matches any flavor.
            return affinity.required_terms.iter().any(|term| {
                term.match_expressions
                    .iter()
                    .filter(|requirement| label_keys.contains(&requirement.key))
                    .all(|requirement| requirement.matches(flavor_labels))
            });
        }
    }

    true
}
