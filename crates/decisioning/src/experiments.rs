//! Experiment assignment: deterministic A/B/n bucketing of visitors.
//!
//! The bucket is derived from SHA-256 of `"{experiment_id}:{visitor_id}"`,
//! reduced modulo the total allocation weight and mapped onto the variants in
//! alphabetical key order. No server round-trip is needed and the same
//! visitor lands in the same variant on every page load.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use popup_core::types::{Campaign, Experiment};
use popup_delivery::store::{read_json, write_json, KeyValueStore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// SHA-256 of the assignment input.
pub fn assignment_digest(experiment_id: &str, visitor_id: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(experiment_id.as_bytes());
    hasher.update(b":");
    hasher.update(visitor_id.as_bytes());
    hasher.finalize().into()
}

/// Pick the variant for `visitor_id`. Returns `None` when the allocation is
/// empty or every weight is zero.
pub fn bucket(
    experiment_id: &str,
    visitor_id: &str,
    allocation: &BTreeMap<String, u32>,
) -> Option<String> {
    let total: u64 = allocation.values().map(|w| u64::from(*w)).sum();
    if total == 0 {
        return None;
    }

    let digest = assignment_digest(experiment_id, visitor_id);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let point = u64::from_be_bytes(prefix) % total;

    let mut upper = 0u64;
    for (key, weight) in allocation {
        upper += u64::from(*weight);
        if point < upper {
            return Some(key.clone());
        }
    }
    None
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedAssignment {
    visitor_id: String,
    variant_key: String,
}

/// Assigns visitors to experiment variants and narrows a campaign list to
/// the variants the visitor belongs to.
pub struct ExperimentAssigner {
    cache: Option<Arc<dyn KeyValueStore>>,
    key_prefix: String,
}

impl ExperimentAssigner {
    /// Assigner that recomputes on every call.
    pub fn new() -> Self {
        Self {
            cache: None,
            key_prefix: String::new(),
        }
    }

    /// Assigner that remembers resolved variants in `store`.
    pub fn with_cache(store: Arc<dyn KeyValueStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            cache: Some(store),
            key_prefix: key_prefix.into(),
        }
    }

    fn key(&self, experiment_id: &str) -> String {
        format!("{}:exp:{}", self.key_prefix, experiment_id)
    }

    pub fn assign(&self, experiment: &Experiment, visitor_id: &str) -> Option<String> {
        let Some(store) = &self.cache else {
            return bucket(&experiment.id, visitor_id, &experiment.traffic_allocation);
        };

        let key = self.key(&experiment.id);
        if let Some(cached) = read_json::<CachedAssignment>(store.as_ref(), &key) {
            let still_allocated = experiment
                .traffic_allocation
                .get(&cached.variant_key)
                .is_some_and(|w| *w > 0);
            if cached.visitor_id == visitor_id && still_allocated {
                return Some(cached.variant_key);
            }
        }

        let variant_key = bucket(&experiment.id, visitor_id, &experiment.traffic_allocation)?;
        let record = CachedAssignment {
            visitor_id: visitor_id.to_string(),
            variant_key: variant_key.clone(),
        };
        if let Err(e) = write_json(store.as_ref(), &key, &record) {
            warn!(experiment_id = %experiment.id, error = %e, "failed to cache experiment assignment");
        }
        Some(variant_key)
    }

    /// Keep campaigns outside any experiment plus the variants this visitor
    /// is assigned to. Variants of an unknown experiment are dropped.
    pub fn filter_variants(
        &self,
        campaigns: Vec<Campaign>,
        experiments: &[Experiment],
        visitor_id: &str,
    ) -> Vec<Campaign> {
        let by_id: HashMap<&str, &Experiment> =
            experiments.iter().map(|e| (e.id.as_str(), e)).collect();
        let mut assigned: HashMap<String, Option<String>> = HashMap::new();

        campaigns
            .into_iter()
            .filter(|campaign| {
                let Some(membership) = &campaign.experiment else {
                    return true;
                };
                let Some(experiment) = by_id.get(membership.experiment_id.as_str()) else {
                    warn!(
                        campaign_id = %campaign.id,
                        experiment_id = %membership.experiment_id,
                        "variant references unknown experiment, dropping"
                    );
                    return false;
                };
                let variant = assigned
                    .entry(membership.experiment_id.clone())
                    .or_insert_with(|| self.assign(experiment, visitor_id));
                let keep = variant.as_deref() == Some(membership.variant_key.as_str());
                debug!(
                    campaign_id = %campaign.id,
                    experiment_id = %membership.experiment_id,
                    variant = %membership.variant_key,
                    keep,
                    "experiment variant filter"
                );
                keep
            })
            .collect()
    }
}

impl Default for ExperimentAssigner {
    fn default() -> Self {
        Self::new()
    }
}
