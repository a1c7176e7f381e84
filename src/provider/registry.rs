//! The Provider Registry (§4.C): owns the set of configured providers.
//!
//! Quarantine/re-admit here only toggles the provider's `healthy` flag and
//! is idempotent (setting `healthy=false` on an already-unhealthy provider
//! is a no-op transition). Purging a quarantined provider from the Model
//! Index is coordinated one level up, in [`crate::routing`], since that's
//! the only place both the registry and the index are held together under
//! one lock ordering.

use std::collections::HashMap;

use log::info;

use crate::config::ProviderConfig;
use crate::provider::Provider;

/// Owns every configured `Provider`, by name.
///
/// Disabled providers are still constructed (so `/health` can report them)
/// but are filtered out of anything routing-relevant by callers checking
/// `enabled`.
pub struct ProviderRegistry {
    providers: HashMap<String, Provider>,
    /// Preserves config order for the first-seen tie-break discussed in
    /// §9 (not used by the chosen lexicographic tie-break, but kept for
    /// `/health`'s reporting order and for completeness).
    order: Vec<String>,
}

impl ProviderRegistry {
    pub fn from_config(providers: &[ProviderConfig]) -> Self {
        let mut map = HashMap::with_capacity(providers.len());
        let mut order = Vec::with_capacity(providers.len());
        for config in providers {
            order.push(config.name.clone());
            map.insert(config.name.clone(), Provider::from_config(config));
        }
        ProviderRegistry {
            providers: map,
            order,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Provider> {
        self.providers.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Provider> {
        self.order.iter().filter_map(|name| self.providers.get(name))
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Provider> {
        self.iter().filter(|p| p.enabled)
    }

    /// Mark `name` quarantined. Idempotent: quarantining an already-unhealthy
    /// provider changes nothing observable. Static providers are only ever
    /// quarantined by the Router Core directly (§4's state machine note);
    /// the Health Reconciler is expected to filter them out before calling
    /// this, but the registry itself does not special-case static here —
    /// that invariant lives in the reconciler's snapshot step.
    pub fn quarantine(&self, name: &str, reason: &str) {
        if let Some(provider) = self.providers.get(name) {
            if provider.is_healthy() {
                info!("quarantining provider {name}: {reason}");
            }
            provider.set_healthy(false);
        }
    }

    /// Re-admit a previously quarantined provider. Idempotent.
    pub fn re_admit(&self, name: &str) {
        if let Some(provider) = self.providers.get(name) {
            if !provider.is_healthy() {
                info!("re-admitting provider {name}");
            }
            provider.set_healthy(true);
        }
    }
}
