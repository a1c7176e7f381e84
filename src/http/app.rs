//! Axum application assembly (§6), grounded in the teacher's
//! `mcp_http_adapter.rs::AxumHttpAdapter` — the same shape (a config struct
//! carrying a bearer token plus shared handles, one `Router` wiring every
//! route to a per-route clone of that shared state), generalized from a
//! tools-only protocol surface to the gateway's full HTTP surface.

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::driver;
use crate::mcp::server::McpServer;
use crate::routing::router::RouterCore;
use crate::store::ConversationStore;

use super::handlers;

/// Shared state every route handler clones an `Arc` of.
pub struct AppState {
    pub router: Arc<RouterCore>,
    pub mcp: Arc<McpServer>,
    pub responses: Arc<dyn ConversationStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub bearer_token: Option<String>,
}

/// Build the axum `Router` exposing the gateway's public HTTP surface.
///
/// `/health` is the only route that bypasses bearer auth, matching the
/// teacher's IP-filter-then-token ordering in `AxumHttpAdapter::start`
/// generalized to a per-request middleware check inside each handler
/// rather than a closure captured per-route.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/embeddings", post(handlers::embeddings))
        .route("/mcp", post(handlers::mcp_rpc))
        .route("/health", get(handlers::health))
        .route("/v1/responses", post(handlers::create_response))
        .route("/v1/responses/{id}", get(handlers::get_response))
        .route("/v1/responses/{id}", delete(handlers::delete_response))
        .route("/v1/conversations", post(handlers::create_conversation))
        .route("/v1/conversations/{id}", get(handlers::get_conversation))
        .route("/v1/conversations/{id}", delete(handlers::delete_conversation))
        .fallback(handlers::not_found)
        .with_state(state)
}

/// Run the tool-calling driver's discovery loop against the given request,
/// reused by the `/v1/chat/completions` handler when the caller opts in
/// (§4.I is invoked by the embedded scripting environment as well as
/// directly by this entry point, per §2's data-flow note "I sits above E").
pub async fn run_driver(state: &AppState, request: serde_json::Value) -> Result<serde_json::Value, crate::error::GatewayError> {
    driver::run(&state.router, &state.mcp, request).await
}
