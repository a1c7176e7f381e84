//! The `Provider` record (§3) and the registry that owns a set of them (§4.C).

pub mod registry;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::config::{ModelSourceKind, ProviderConfig};
use crate::upstream::UpstreamClient;

pub use registry::ProviderRegistry;

/// One configured upstream, with its mutable health/load state.
///
/// `active` and `healthy` are plain atomics (§5: "`active` ... may be
/// implemented as a non-locking atomic integer, since routing tolerates
/// stale load readings"). Structural membership in the Model Index is
/// still guarded by the index's own lock.
pub struct Provider {
    pub name: String,
    pub base_url: String,
    pub credential: Option<String>,
    pub enabled: bool,
    pub model_source: ModelSourceKind,
    pub static_models: Vec<String>,
    pub allow: Option<Vec<String>>,
    pub deny: Option<Vec<String>>,
    pub native_responses: bool,
    healthy: AtomicBool,
    active: Arc<AtomicU32>,
    client: UpstreamClient,
}

impl Provider {
    pub fn from_config(config: &ProviderConfig) -> Self {
        let client = UpstreamClient::new(config.base_url.clone(), config.credential.clone());
        Provider {
            name: config.name.clone(),
            base_url: config.base_url.clone(),
            credential: config.credential.clone(),
            enabled: config.enabled,
            model_source: config.model_source,
            static_models: config.static_models.clone(),
            allow: config.allow.clone(),
            deny: config.deny.clone(),
            native_responses: config.native_responses,
            healthy: AtomicBool::new(true),
            active: Arc::new(AtomicU32::new(0)),
            client,
        }
    }

    pub fn client(&self) -> &UpstreamClient {
        &self.client
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn is_static(&self) -> bool {
        self.model_source == ModelSourceKind::Static
    }

    pub fn active_count(&self) -> u32 {
        self.active.load(Ordering::Relaxed)
    }

    /// A cloneable, `'static` handle onto this provider's in-flight counter,
    /// for callers (the streaming completion path) that must decrement it
    /// later from outside `Provider`'s own borrow scope — once the body is
    /// exhausted or dropped on client disconnect (§4.E, §5).
    pub fn active_handle(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.active)
    }

    /// Increment the in-flight counter. Called by the Router Core at dispatch.
    pub fn incr_active(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement the in-flight counter, saturating at zero so a spurious
    /// double-decrement (e.g. both "completion" and "client disconnect"
    /// paths firing) can never underflow (§3 invariant: `active ≥ 0`).
    pub fn decr_active(&self) {
        self.active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)))
            .ok();
    }

    /// Whether `model_id` passes this provider's allow/deny policy.
    /// Deny first; if an allow list is present, the model must be on it (§4.D).
    pub fn permits_model(&self, model_id: &str) -> bool {
        if let Some(deny) = &self.deny {
            if deny.iter().any(|m| m == model_id) {
                return false;
            }
        }
        if let Some(allow) = &self.allow {
            return allow.iter().any(|m| m == model_id);
        }
        true
    }
}
