//! The Model Index (§4.D): `model_id -> ordered set of provider names`.
//!
//! `refresh` and `select` are the two operations that matter. Refresh is
//! atomic with respect to select: readers never observe a model id with an
//! empty provider list (§5's ordering guarantee) because the whole map is
//! swapped into place once, under the write lock, rather than mutated
//! incrementally while readers can see it.

use std::collections::HashMap;

use futures_util::future::join_all;
use tokio::sync::RwLock;

use crate::error::GatewayError;
use crate::provider::{Provider, ProviderRegistry};

/// `model_id -> provider names able to serve it`, ordered lexicographically
/// (the tie-break chosen in DESIGN.md for deterministic `select`).
pub struct ModelIndex {
    entries: RwLock<HashMap<String, Vec<String>>>,
}

impl ModelIndex {
    pub fn new() -> Self {
        ModelIndex {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the whole index from the current provider set.
    ///
    /// Every enabled provider is queried concurrently (§4.D: "for each
    /// enabled provider concurrently") so total refresh latency is the
    /// slowest single provider, not their sum. Static providers contribute
    /// their configured model list directly with no network call; dynamic
    /// providers are queried via `list_models`. A provider whose dynamic
    /// fetch fails is quarantined with reason "model fetch failed"; a
    /// provider whose fetch succeeds is re-admitted (§4.D). Every resulting
    /// model id is filtered through `Provider::permits_model` before being
    /// added. Quarantine/re-admit and the per-provider fetch all run inside
    /// the same future, so folding the results afterward is a plain,
    /// lock-free loop over already-resolved data.
    pub async fn refresh(&self, registry: &ProviderRegistry) {
        let fetches = registry.enabled().map(|provider| async move {
            let model_ids = Self::fetch_model_ids(registry, provider).await;
            (provider, model_ids)
        });
        let results = join_all(fetches).await;

        let mut fresh: HashMap<String, Vec<String>> = HashMap::new();
        for (provider, model_ids) in results {
            for model_id in model_ids {
                if provider.permits_model(&model_id) {
                    fresh.entry(model_id).or_default().push(provider.name.clone());
                }
            }
        }

        for providers in fresh.values_mut() {
            providers.sort();
            providers.dedup();
        }

        let mut guard = self.entries.write().await;
        *guard = fresh;
    }

    async fn fetch_model_ids(registry: &ProviderRegistry, provider: &Provider) -> Vec<String> {
        if provider.is_static() {
            return provider.static_models.clone();
        }
        match provider.client().list_models().await {
            Ok(ids) => {
                registry.re_admit(&provider.name);
                ids
            }
            Err(_) => {
                registry.quarantine(&provider.name, "model fetch failed");
                Vec::new()
            }
        }
    }

    /// Select a provider name to serve `model_id`.
    ///
    /// Exactly one candidate: that's the choice. Multiple candidates:
    /// least-loaded by `active`, ties broken lexicographically by name
    /// (DESIGN.md's recorded tie-break decision).
    pub async fn select(&self, model_id: &str, registry: &ProviderRegistry) -> Result<String, GatewayError> {
        let guard = self.entries.read().await;
        let candidates = guard
            .get(model_id)
            .ok_or_else(|| GatewayError::UnknownModel(model_id.to_string()))?;

        if candidates.is_empty() {
            return Err(GatewayError::UnknownModel(model_id.to_string()));
        }
        if candidates.len() == 1 {
            return Ok(candidates[0].clone());
        }

        let mut best: Option<(&str, u32)> = None;
        for name in candidates {
            let Some(provider) = registry.get(name) else { continue };
            if !provider.enabled {
                continue;
            }
            let active = provider.active_count();
            best = match best {
                None => Some((name.as_str(), active)),
                Some((best_name, best_active)) => {
                    if active < best_active || (active == best_active && name.as_str() < best_name) {
                        Some((name.as_str(), active))
                    } else {
                        Some((best_name, best_active))
                    }
                }
            };
        }

        best.map(|(name, _)| name.to_string())
            .ok_or_else(|| GatewayError::UnknownModel(model_id.to_string()))
    }

    /// Purge `provider_name` from every entry, dropping entries that become
    /// empty. Called when a provider is quarantined (§4.C).
    pub async fn purge_provider(&self, provider_name: &str) {
        let mut guard = self.entries.write().await;
        guard.retain(|_, providers| {
            providers.retain(|p| p != provider_name);
            !providers.is_empty()
        });
    }

    /// All model ids currently indexed, sorted ascending (§6: `/v1/models`
    /// response must be "sorted by id ascending").
    pub async fn model_ids_sorted(&self) -> Vec<String> {
        let guard = self.entries.read().await;
        let mut ids: Vec<String> = guard.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for ModelIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelSourceKind, ProviderConfig};

    fn static_provider(name: &str, models: &[&str]) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            base_url: "http://localhost/v1".to_string(),
            credential: None,
            enabled: true,
            model_source: ModelSourceKind::Static,
            static_models: models.iter().map(|m| m.to_string()).collect(),
            allow: None,
            deny: None,
            native_responses: false,
        }
    }

    #[tokio::test]
    async fn single_candidate_is_selected_directly() {
        let registry = ProviderRegistry::from_config(&[static_provider("a", &["m1"])]);
        let index = ModelIndex::new();
        index.refresh(&registry).await;
        assert_eq!(index.select("m1", &registry).await.unwrap(), "a");
    }

    #[tokio::test]
    async fn least_loaded_is_chosen_among_multiple_candidates() {
        let registry = ProviderRegistry::from_config(&[static_provider("a", &["m1"]), static_provider("b", &["m1"])]);
        let index = ModelIndex::new();
        index.refresh(&registry).await;

        registry.get("a").unwrap().incr_active();
        registry.get("a").unwrap().incr_active();
        registry.get("a").unwrap().incr_active();
        registry.get("b").unwrap().incr_active();

        assert_eq!(index.select("m1", &registry).await.unwrap(), "b");
    }

    #[tokio::test]
    async fn ties_break_lexicographically_by_name() {
        let registry = ProviderRegistry::from_config(&[static_provider("zeta", &["m1"]), static_provider("alpha", &["m1"])]);
        let index = ModelIndex::new();
        index.refresh(&registry).await;
        assert_eq!(index.select("m1", &registry).await.unwrap(), "alpha");
    }

    #[tokio::test]
    async fn unknown_model_is_an_error() {
        let registry = ProviderRegistry::from_config(&[static_provider("a", &["m1"])]);
        let index = ModelIndex::new();
        index.refresh(&registry).await;
        assert!(matches!(index.select("nope", &registry).await, Err(GatewayError::UnknownModel(_))));
    }

    #[tokio::test]
    async fn purge_removes_provider_and_drops_empty_entries() {
        let registry = ProviderRegistry::from_config(&[static_provider("a", &["m1"])]);
        let index = ModelIndex::new();
        index.refresh(&registry).await;
        index.purge_provider("a").await;
        assert!(index.model_ids_sorted().await.is_empty());
    }

    #[tokio::test]
    async fn model_ids_are_sorted_ascending() {
        let registry = ProviderRegistry::from_config(&[static_provider("a", &["zeta", "alpha", "mid"])]);
        let index = ModelIndex::new();
        index.refresh(&registry).await;
        assert_eq!(index.model_ids_sorted().await, vec!["alpha", "mid", "zeta"]);
    }
}
