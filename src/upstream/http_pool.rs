//! Keyed connection pool of [`reqwest::Client`]s, one per upstream base URL.
//!
//! Directly grounded in the teacher's `http_client_pool.rs`: a process-wide
//! cache keyed by base URL so that repeated calls to the same upstream
//! reuse keep-alive connections instead of paying a new TLS handshake every
//! request.

use std::time::Duration;

use once_cell::sync::Lazy;
use dashmap::DashMap;

static CLIENT_POOL: Lazy<DashMap<String, reqwest::Client>> = Lazy::new(DashMap::new);

/// Per-request deadline a caller applies on top of the pooled client;
/// `list_models` uses its own shorter ceiling instead (§4.A).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// `list_models`'s dedicated ceiling (§4.A, §5).
pub const LIST_MODELS_TIMEOUT: Duration = Duration::from_secs(5);

fn create_pooled_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .expect("reqwest client builder with static config should never fail")
}

/// Fetch (or lazily create) the pooled client for `base_url`.
///
/// HTTP/2 is attempted by reqwest's default ALPN negotiation and falls
/// back to HTTP/1.1 silently (§4.A) — this function does not force
/// `http2_prior_knowledge`, since that would break upstreams that only
/// speak HTTP/1.1.
pub fn get_or_create_client(base_url: &str) -> reqwest::Client {
    CLIENT_POOL
        .entry(base_url.to_string())
        .or_insert_with(create_pooled_client)
        .clone()
}
