//! Immutable provider registry and task-type selection.
//!
//! The registry is constructed once at startup and never mutated, so
//! lookups need no locking. Unknown or duplicate provider ids are
//! rejected at registration time, not at dispatch time.
//!
//! Selection rules:
//! - `basic`: at least 2 adapters of tier <= 2.
//! - `premium`: at least 3 adapters from tiers 2-4, spanning at least
//!   two distinct vendors.
//! - `critical`: at least 3 adapters spanning at least three distinct
//!   vendors, with an aggregator-capable adapter (tier 4+) as the last
//!   sequential step.
//! - Vendor rotation: vendors in `must_differ_from` are excluded; if
//!   that would break the minimum provider count the policy widens to
//!   any vendor and the selection is flagged `rotation_relaxed`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{Provider, ProviderDescriptor, TaskType};
use crate::error::RegistryError;

/// An ordered provider selection for one dispatch.
pub struct Selection {
    /// The selected providers, in invocation order. For critical tasks
    /// the aggregator is last.
    pub providers: Vec<Arc<dyn Provider>>,
    /// Whether the vendor-rotation constraint had to be widened.
    pub rotation_relaxed: bool,
}

impl std::fmt::Debug for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selection")
            .field("providers", &self.provider_ids())
            .field("rotation_relaxed", &self.rotation_relaxed)
            .finish()
    }
}

impl Selection {
    /// The vendors covered by this selection.
    pub fn vendors(&self) -> HashSet<String> {
        self.providers
            .iter()
            .map(|p| p.describe().vendor.clone())
            .collect()
    }

    /// The provider ids in invocation order.
    pub fn provider_ids(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| p.describe().id.clone())
            .collect()
    }
}

/// Registry of all providers configured at startup.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field(
                "providers",
                &self
                    .providers
                    .iter()
                    .map(|p| p.describe().id.clone())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ProviderRegistry {
    /// Build a registry, rejecting duplicate provider ids.
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Result<Self, RegistryError> {
        let mut index = HashMap::with_capacity(providers.len());
        for (position, provider) in providers.iter().enumerate() {
            let id = provider.describe().id.clone();
            if index.insert(id.clone(), position).is_some() {
                return Err(RegistryError::DuplicateProvider { id });
            }
        }
        Ok(Self { providers, index })
    }

    /// Look up a provider by id.
    pub fn get(&self, id: &str) -> Result<Arc<dyn Provider>, RegistryError> {
        self.index
            .get(id)
            .map(|&position| Arc::clone(&self.providers[position]))
            .ok_or_else(|| RegistryError::UnknownProvider { id: id.to_string() })
    }

    /// Descriptors of every registered provider, sorted by id.
    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        let mut descriptors: Vec<ProviderDescriptor> = self
            .providers
            .iter()
            .map(|p| p.describe().clone())
            .collect();
        descriptors.sort_by(|a, b| a.id.cmp(&b.id));
        descriptors
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Select an ordered provider set for a dispatch.
    ///
    /// `desired` is the number of providers wanted (already folded with
    /// the caller's `min_providers` and, for sequential dispatches, the
    /// chain depth); the task-type rule minimum is enforced here.
    pub fn select(
        &self,
        task_type: TaskType,
        desired: usize,
        must_differ_from: &HashSet<String>,
    ) -> Result<Selection, RegistryError> {
        let required = desired.max(rule_minimum(task_type));

        if let Some(providers) = self.attempt(task_type, required, must_differ_from) {
            return Ok(Selection {
                providers,
                rotation_relaxed: false,
            });
        }

        if !must_differ_from.is_empty() {
            if let Some(providers) = self.attempt(task_type, required, &HashSet::new()) {
                return Ok(Selection {
                    providers,
                    rotation_relaxed: true,
                });
            }
        }

        Err(RegistryError::NoEligibleProviders {
            task_type: task_type.as_str().to_string(),
            required,
            available: self.eligible(task_type, &HashSet::new()).len(),
        })
    }

    /// Tier-eligible candidates, deterministically ordered by
    /// (tier, id), excluding rotated-out vendors.
    fn eligible(&self, task_type: TaskType, excluded: &HashSet<String>) -> Vec<Arc<dyn Provider>> {
        let mut candidates: Vec<Arc<dyn Provider>> = self
            .providers
            .iter()
            .filter(|p| {
                let d = p.describe();
                !excluded.contains(&d.vendor) && tier_eligible(task_type, d.tier)
            })
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            let (da, db) = (a.describe(), b.describe());
            da.tier.cmp(&db.tier).then_with(|| da.id.cmp(&db.id))
        });
        candidates
    }

    fn attempt(
        &self,
        task_type: TaskType,
        required: usize,
        excluded: &HashSet<String>,
    ) -> Option<Vec<Arc<dyn Provider>>> {
        let candidates = self.eligible(task_type, excluded);

        match task_type {
            TaskType::Basic => {
                if candidates.len() < required {
                    return None;
                }
                Some(candidates.into_iter().take(required).collect())
            }
            TaskType::Premium => {
                let picked = pick_vendor_diverse(&candidates, required);
                (picked.len() >= required && distinct_vendors(&picked) >= 2).then_some(picked)
            }
            TaskType::Critical => {
                let aggregator = candidates
                    .iter()
                    .find(|p| p.describe().is_aggregator())?
                    .clone();

                let rest: Vec<Arc<dyn Provider>> = candidates
                    .iter()
                    .filter(|p| p.describe().id != aggregator.describe().id)
                    .cloned()
                    .collect();
                let mut picked = pick_vendor_diverse(&rest, required.saturating_sub(1));
                // The aggregator is the last sequential step.
                picked.push(aggregator);

                (picked.len() >= required && distinct_vendors(&picked) >= 3).then_some(picked)
            }
        }
    }
}

fn rule_minimum(task_type: TaskType) -> usize {
    match task_type {
        TaskType::Basic => 2,
        TaskType::Premium | TaskType::Critical => 3,
    }
}

fn tier_eligible(task_type: TaskType, tier: u8) -> bool {
    match task_type {
        TaskType::Basic => tier <= 2,
        TaskType::Premium => (2..=4).contains(&tier),
        TaskType::Critical => true,
    }
}

fn distinct_vendors(providers: &[Arc<dyn Provider>]) -> usize {
    providers
        .iter()
        .map(|p| p.describe().vendor.as_str())
        .collect::<HashSet<_>>()
        .len()
}

/// Pick up to `count` providers, maximizing vendor coverage first.
///
/// A first pass takes the best candidate of each vendor (candidates are
/// already in deterministic order); a second pass fills the remainder.
fn pick_vendor_diverse(candidates: &[Arc<dyn Provider>], count: usize) -> Vec<Arc<dyn Provider>> {
    let mut picked: Vec<Arc<dyn Provider>> = Vec::with_capacity(count);
    let mut seen_vendors: HashSet<String> = HashSet::new();

    for candidate in candidates {
        if picked.len() >= count {
            break;
        }
        if seen_vendors.insert(candidate.describe().vendor.clone()) {
            picked.push(Arc::clone(candidate));
        }
    }
    for candidate in candidates {
        if picked.len() >= count {
            break;
        }
        if !picked
            .iter()
            .any(|p| p.describe().id == candidate.describe().id)
        {
            picked.push(Arc::clone(candidate));
        }
    }
    picked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::provider::{
        Capability, HealthStatus, InvocationContext, InvocationKind, ProviderOutput,
    };

    struct StaticProvider {
        descriptor: ProviderDescriptor,
    }

    #[async_trait::async_trait]
    impl Provider for StaticProvider {
        fn describe(&self) -> &ProviderDescriptor {
            &self.descriptor
        }

        async fn invoke(
            &self,
            _query: &str,
            _ctx: &InvocationContext,
        ) -> Result<ProviderOutput, ProviderError> {
            Ok(ProviderOutput::default())
        }

        async fn health_check(&self) -> HealthStatus {
            HealthStatus {
                ok: true,
                latency_ms: 0,
                detail: None,
            }
        }
    }

    fn provider(id: &str, vendor: &str, tier: u8, aggregator: bool) -> Arc<dyn Provider> {
        let mut capabilities = vec![Capability::Analysis];
        if aggregator {
            capabilities.push(Capability::Aggregation);
        }
        Arc::new(StaticProvider {
            descriptor: ProviderDescriptor {
                id: id.to_string(),
                name: id.to_string(),
                vendor: vendor.to_string(),
                tier,
                capabilities,
                cost_per_token: 0.0,
                kind: InvocationKind::Subprocess,
            },
        })
    }

    fn registry(providers: Vec<Arc<dyn Provider>>) -> ProviderRegistry {
        ProviderRegistry::new(providers).unwrap()
    }

    fn ids(selection: &Selection) -> Vec<String> {
        selection.provider_ids()
    }

    #[test]
    fn duplicate_ids_rejected_at_registration() {
        let err = ProviderRegistry::new(vec![
            provider("p1", "v1", 1, false),
            provider("p1", "v2", 2, false),
        ])
        .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateProvider { .. }));
    }

    #[test]
    fn unknown_id_rejected_on_lookup() {
        let reg = registry(vec![provider("p1", "v1", 1, false)]);
        assert!(reg.get("p1").is_ok());
        assert!(matches!(
            reg.get("nope"),
            Err(RegistryError::UnknownProvider { .. })
        ));
    }

    #[test]
    fn basic_selects_low_tier_deterministically() {
        let reg = registry(vec![
            provider("b-slow", "v2", 2, false),
            provider("a-fast", "v1", 1, false),
            provider("c-big", "v3", 4, true),
        ]);
        let selection = reg.select(TaskType::Basic, 2, &HashSet::new()).unwrap();
        assert_eq!(ids(&selection), vec!["a-fast", "b-slow"]);
        assert!(!selection.rotation_relaxed);
    }

    #[test]
    fn basic_fails_without_two_low_tier_providers() {
        let reg = registry(vec![
            provider("only-one", "v1", 1, false),
            provider("too-big", "v2", 3, false),
        ]);
        let err = reg.select(TaskType::Basic, 2, &HashSet::new()).unwrap_err();
        assert!(matches!(err, RegistryError::NoEligibleProviders { .. }));
    }

    #[test]
    fn premium_spans_two_vendors() {
        let reg = registry(vec![
            provider("v1-a", "v1", 2, false),
            provider("v1-b", "v1", 2, false),
            provider("v1-c", "v1", 3, false),
            provider("v2-a", "v2", 3, false),
        ]);
        let selection = reg.select(TaskType::Premium, 3, &HashSet::new()).unwrap();
        assert_eq!(selection.providers.len(), 3);
        assert!(selection.vendors().len() >= 2);
    }

    #[test]
    fn premium_single_vendor_pool_fails() {
        let reg = registry(vec![
            provider("v1-a", "v1", 2, false),
            provider("v1-b", "v1", 3, false),
            provider("v1-c", "v1", 4, false),
        ]);
        let err = reg
            .select(TaskType::Premium, 3, &HashSet::new())
            .unwrap_err();
        assert!(matches!(err, RegistryError::NoEligibleProviders { .. }));
    }

    #[test]
    fn critical_places_aggregator_last() {
        let reg = registry(vec![
            provider("v1-a", "v1", 2, false),
            provider("v2-a", "v2", 3, false),
            provider("v3-agg", "v3", 4, true),
            provider("v3-b", "v3", 2, false),
        ]);
        let selection = reg.select(TaskType::Critical, 3, &HashSet::new()).unwrap();
        assert_eq!(selection.providers.len(), 3);
        assert!(selection.vendors().len() >= 3);
        assert_eq!(
            selection
                .providers
                .last()
                .map(|p| p.describe().id.clone())
                .as_deref(),
            Some("v3-agg")
        );
    }

    #[test]
    fn critical_without_aggregator_fails() {
        let reg = registry(vec![
            provider("v1-a", "v1", 2, false),
            provider("v2-a", "v2", 3, false),
            provider("v3-a", "v3", 5, false),
        ]);
        let err = reg
            .select(TaskType::Critical, 3, &HashSet::new())
            .unwrap_err();
        assert!(matches!(err, RegistryError::NoEligibleProviders { .. }));
    }

    #[test]
    fn rotation_excludes_previous_vendors() {
        let reg = registry(vec![
            provider("v1-a", "v1", 1, false),
            provider("v2-a", "v2", 1, false),
            provider("v3-a", "v3", 1, false),
            provider("v4-a", "v4", 2, false),
        ]);
        let used: HashSet<String> = ["v1".to_string(), "v2".to_string()].into();
        let selection = reg.select(TaskType::Basic, 2, &used).unwrap();
        assert_eq!(ids(&selection), vec!["v3-a", "v4-a"]);
        assert!(!selection.rotation_relaxed);
    }

    #[test]
    fn rotation_widens_when_pool_is_too_small() {
        let reg = registry(vec![
            provider("v1-a", "v1", 1, false),
            provider("v3-a", "v3", 1, false),
        ]);
        let used: HashSet<String> = ["v1".to_string(), "v2".to_string()].into();
        let selection = reg.select(TaskType::Basic, 2, &used).unwrap();
        assert_eq!(selection.providers.len(), 2);
        assert!(selection.rotation_relaxed);
    }

    #[test]
    fn sequential_depth_expands_the_selection() {
        let reg = registry(vec![
            provider("p1", "v1", 1, false),
            provider("p2", "v2", 1, false),
            provider("p3", "v3", 2, false),
            provider("p4", "v4", 2, false),
        ]);
        let selection = reg.select(TaskType::Basic, 4, &HashSet::new()).unwrap();
        assert_eq!(selection.providers.len(), 4);
    }
}
