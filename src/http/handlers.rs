//! Route handlers for the public HTTP surface (§6).

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use log::warn;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::check_bearer;
use crate::error::GatewayError;

use super::app::{run_driver, AppState};

fn bearer_header<'a>(headers: &'a HeaderMap) -> Option<&'a str> {
    headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok())
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid or missing bearer token"}))).into_response()
}

fn require_auth(state: &AppState, headers: &HeaderMap) -> Option<Response> {
    if check_bearer(state.bearer_token.as_deref(), bearer_header(headers)) {
        None
    } else {
        Some(unauthorized())
    }
}

fn error_response(err: GatewayError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({"error": err.to_string()}))).into_response()
}

/// `GET /v1/models` (§6): refresh D, return an OpenAI `ModelsResponse`
/// sorted by id ascending.
pub async fn list_models(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(resp) = require_auth(&state, &headers) {
        return resp;
    }
    let ids = state.router.refresh_and_list_models().await;
    let data: Vec<Value> = ids.into_iter().map(|id| json!({"id": id, "object": "model"})).collect();
    Json(json!({"object": "list", "data": data})).into_response()
}

#[derive(Deserialize)]
pub struct ChatQuery {
    #[serde(default)]
    agentic: bool,
}

/// `POST /v1/chat/completions` (§6, §4.E). A request may opt into the
/// tool-calling driver (§4.I) with `?agentic=true`; otherwise it is routed
/// directly through the Router Core. `stream:true` always triggers SSE
/// pass-through regardless of `agentic`, since the driver does not itself
/// stream (Open Question not raised by the spec; recorded as a design
/// decision in DESIGN.md).
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ChatQuery>,
    Json(request): Json<Value>,
) -> Response {
    if let Some(resp) = require_auth(&state, &headers) {
        return resp;
    }

    let wants_stream = request.get("stream").and_then(Value::as_bool).unwrap_or(false);

    if wants_stream {
        match state.router.complete_stream(request).await {
            Ok(stream) => {
                let body_stream = stream.map(|item| match item {
                    Ok(line) => Ok::<Bytes, std::io::Error>(Bytes::from(format!("{line}\n\n"))),
                    Err(err) => Err(std::io::Error::new(std::io::ErrorKind::Other, err.to_string())),
                });
                Response::builder()
                    .status(StatusCode::OK)
                    .header(axum::http::header::CONTENT_TYPE, "text/event-stream")
                    .body(Body::from_stream(body_stream))
                    .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "streaming not supported").into_response())
            }
            Err(err) => error_response(err),
        }
    } else if query.agentic {
        match run_driver(&state, request).await {
            Ok(response) => Json(response).into_response(),
            Err(err) => error_response(err),
        }
    } else {
        match state.router.complete(request).await {
            Ok(response) => Json(response).into_response(),
            Err(err) => error_response(err),
        }
    }
}

/// `POST /v1/embeddings` (§6): select provider by model, forward unchanged.
pub async fn embeddings(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(request): Json<Value>) -> Response {
    if let Some(resp) = require_auth(&state, &headers) {
        return resp;
    }
    match state.router.embed(request).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize)]
pub struct McpModeQuery {
    tool_mode: Option<String>,
}

fn discovery_mode(headers: &HeaderMap, query: &McpModeQuery) -> bool {
    let header_discovery = headers
        .get("X-MCP-Tool-Mode")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("discovery"))
        .unwrap_or(false);
    let query_discovery = query.tool_mode.as_deref().map(|v| v.eq_ignore_ascii_case("discovery")).unwrap_or(false);
    header_discovery || query_discovery
}

/// `POST /mcp` (§6): MCP JSON-RPC envelope. Mode (discovery vs. the default
/// listed+on-demand split) is selected per-request via header or query
/// param, never stored, matching the component H contract of building a
/// request-scoped context on every call.
pub async fn mcp_rpc(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<McpModeQuery>,
    Json(body): Json<Value>,
) -> Response {
    if let Some(resp) = require_auth(&state, &headers) {
        return resp;
    }

    let discovery = discovery_mode(&headers, &query);
    let id = body.get("id").cloned().unwrap_or(Value::Null);
    let method = body.get("method").and_then(Value::as_str).unwrap_or("");
    let params = body.get("params").cloned().unwrap_or_else(|| json!({}));

    let result: Result<Value, GatewayError> = match method {
        "tools/list" => Ok(json!(state.mcp.tools_list(discovery))),
        "tool_search" => {
            let query_str = params.get("query").and_then(Value::as_str).unwrap_or_default();
            Ok(json!(state.mcp.search(query_str, discovery)))
        }
        "execute_tool" => {
            let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
            let args = params
                .get("arguments")
                .and_then(Value::as_object)
                .map(|m| m.clone().into_iter().collect())
                .unwrap_or_default();
            state.mcp.execute_tool(name, args).await.map(Value::String)
        }
        "execute_code" => {
            let code = params.get("code").and_then(Value::as_str).unwrap_or_default();
            let mut args: std::collections::HashMap<String, Value> = params
                .get("arguments")
                .and_then(Value::as_object)
                .map(|m| m.clone().into_iter().collect())
                .unwrap_or_default();
            args.insert("code".to_string(), Value::String(code.to_string()));
            state.mcp.execute_tool("execute_code", args).await.map(Value::String)
        }
        other => Err(GatewayError::InvalidRequest(format!("unknown MCP method: {other}"))),
    };

    match result {
        Ok(value) => Json(json!({"jsonrpc": "2.0", "id": id, "result": value})).into_response(),
        Err(err) => Json(json!({"jsonrpc": "2.0", "id": id, "error": {"code": err.status_code(), "message": err.to_string()}})).into_response(),
    }
}

/// `GET /health` (§6): per-provider `{enabled, healthy, active}` plus totals.
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let providers: Vec<Value> = state
        .router
        .registry()
        .iter()
        .map(|p| {
            json!({
                "name": p.name,
                "enabled": p.enabled,
                "healthy": p.is_healthy(),
                "active": p.active_count(),
            })
        })
        .collect();
    let total_active: u32 = state.router.registry().iter().map(|p| p.active_count()).sum();
    Json(json!({"providers": providers, "total_active": total_active})).into_response()
}

/// `POST /v1/responses` (§6, out of scope for schema; CRUD wrapping the KV store).
pub async fn create_response(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Some(resp) = require_auth(&state, &headers) {
        return resp;
    }
    let record = state.responses.put(body).await;
    (StatusCode::CREATED, Json(record)).into_response()
}

pub async fn get_response(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<Uuid>) -> Response {
    if let Some(resp) = require_auth(&state, &headers) {
        return resp;
    }
    match state.responses.get(id).await {
        Some(record) => Json(record).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({"error": "response not found"}))).into_response(),
    }
}

pub async fn delete_response(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<Uuid>) -> Response {
    if let Some(resp) = require_auth(&state, &headers) {
        return resp;
    }
    if state.responses.delete(id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(json!({"error": "response not found"}))).into_response()
    }
}

/// `POST /v1/conversations` (§6, out of scope for schema; CRUD wrapping the KV store).
pub async fn create_conversation(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Some(resp) = require_auth(&state, &headers) {
        return resp;
    }
    let record = state.conversations.put(body).await;
    (StatusCode::CREATED, Json(record)).into_response()
}

pub async fn get_conversation(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<Uuid>) -> Response {
    if let Some(resp) = require_auth(&state, &headers) {
        return resp;
    }
    match state.conversations.get(id).await {
        Some(record) => Json(record).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({"error": "conversation not found"}))).into_response(),
    }
}

pub async fn delete_conversation(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<Uuid>) -> Response {
    if let Some(resp) = require_auth(&state, &headers) {
        return resp;
    }
    if state.conversations.delete(id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(json!({"error": "conversation not found"}))).into_response()
    }
}

/// Unmatched paths return 404 with a warning log carrying method, path,
/// query, and `User-Agent` (§6).
pub async fn not_found(method: axum::http::Method, uri: axum::http::Uri, headers: HeaderMap) -> Response {
    let user_agent = headers.get(axum::http::header::USER_AGENT).and_then(|v| v.to_str().ok()).unwrap_or("-");
    warn!(
        "unmatched route: method={} path={} query={} user_agent={}",
        method,
        uri.path(),
        uri.query().unwrap_or(""),
        user_agent
    );
    (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response()
}
