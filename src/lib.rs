//! llm-gateway: an OpenAI-wire-compatible gateway that aggregates many upstream
//! chat-completion providers and exposes a filesystem-backed MCP tool runtime.
//!
//! The crate is organized around the components described in the design:
//!
//! - [`upstream`] — HTTP client that talks to one upstream provider.
//! - [`estimator`] — token usage estimation for providers that omit `usage`.
//! - [`provider`] — provider records and the registry that owns their health/load state.
//! - [`routing`] — the model index, router core, and background health reconciler.
//! - [`mcp`] — dynamic tool discovery, script execution, and the MCP JSON-RPC binding.
//! - [`driver`] — the bounded tool-calling loop that drives multi-turn completions.
//! - [`http`] — the axum application that wires everything to the public HTTP surface.
//! - [`config`] — TOML configuration loading.
//! - [`error`] — the shared error taxonomy.
//! - [`auth`] — constant-time bearer token validation.
//! - [`store`] — the out-of-scope response/conversation KV persistence boundary.

pub mod auth;
pub mod config;
pub mod driver;
pub mod error;
pub mod estimator;
pub mod http;
pub mod mcp;
pub mod provider;
pub mod routing;
pub mod store;
pub mod upstream;

pub use config::GatewayConfig;
pub use error::GatewayError;
