//! Cross-module MCP scenarios from the design's end-to-end scenario list:
//! dynamic tool addition, visibility filtering, and driver loop suppression.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::routing::post;
use axum::{Json, Router};
use llm_gateway::config::{ModelSourceKind, ProviderConfig};
use llm_gateway::driver;
use llm_gateway::mcp::server::McpServer;
use llm_gateway::provider::ProviderRegistry;
use llm_gateway::routing::router::RouterCore;
use serde_json::{json, Value};
use tempfile::TempDir;

fn write_tool(root: &std::path::Path, dir: &str, manifest: &str, script: &str) {
    let tool_dir = root.join(dir);
    std::fs::create_dir_all(&tool_dir).unwrap();
    std::fs::write(tool_dir.join("manifest.toml"), manifest).unwrap();
    std::fs::write(tool_dir.join("tool.expr"), script).unwrap();
}

#[test]
fn dynamic_tool_addition_is_visible_on_the_next_scan() {
    let tmp = TempDir::new().unwrap();
    let server = McpServer::new(tmp.path(), tmp.path().join(".lib"));

    let names_before: Vec<_> = server.tools_list(false).into_iter().map(|t| t.name).collect();
    assert!(!names_before.contains(&"my_tool".to_string()));

    write_tool(
        tmp.path(),
        "my_tool",
        "description = \"a freshly added tool\"\nscript = \"tool.expr\"\n",
        "return_string(\"added\")",
    );

    let names_after: Vec<_> = server.tools_list(false).into_iter().map(|t| t.name).collect();
    assert!(names_after.contains(&"my_tool".to_string()));
}

#[tokio::test]
async fn on_demand_tool_is_hidden_from_listing_but_reachable_by_search_and_execute() {
    let tmp = TempDir::new().unwrap();
    write_tool(
        tmp.path(),
        "hidden",
        "description = \"a hidden thing\"\nkeywords = [\"secret\"]\nscript = \"tool.expr\"\nvisibility = \"on-demand\"\n",
        "return_string(\"found it\")",
    );
    let server = McpServer::new(tmp.path(), tmp.path().join(".lib"));

    let listed: Vec<_> = server.tools_list(false).into_iter().map(|t| t.name).collect();
    assert!(!listed.contains(&"hidden".to_string()));

    let found = server.search("secret", false);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "hidden");

    let output = server.execute_tool("hidden", HashMap::new()).await.unwrap();
    assert_eq!(output, "found it");
}

/// A mock upstream that always asks to call `tool_search` when the request
/// still carries a `tools` array, and otherwise answers plainly — modeling
/// a model that keeps retrying the same call until tools are stripped.
async fn spawn_looping_model_server() -> SocketAddr {
    let app = Router::new().route(
        "/chat/completions",
        post(|Json(body): Json<Value>| async move {
            let has_tools = body.get("tools").map(|t| !t.as_array().map(|a| a.is_empty()).unwrap_or(true)).unwrap_or(false);
            if has_tools {
                Json(json!({
                    "choices": [{
                        "message": {
                            "role": "assistant",
                            "tool_calls": [{
                                "id": "call_1",
                                "function": { "name": "tool_search", "arguments": "{\"query\":\"x\"}" }
                            }]
                        }
                    }]
                }))
            } else {
                Json(json!({
                    "choices": [{ "message": { "role": "assistant", "content": "final answer" } }]
                }))
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn driver_suppresses_an_identical_tool_call_loop_and_returns_a_final_answer() {
    let addr = spawn_looping_model_server().await;
    let registry = ProviderRegistry::from_config(&[ProviderConfig {
        name: "a".to_string(),
        base_url: format!("http://{addr}"),
        credential: None,
        enabled: true,
        model_source: ModelSourceKind::Static,
        static_models: vec!["m1".to_string()],
        allow: None,
        deny: None,
        native_responses: false,
    }]);
    let router = RouterCore::new(registry);
    router.refresh_and_list_models().await;

    let tmp = TempDir::new().unwrap();
    let mcp = McpServer::new(tmp.path(), tmp.path().join(".lib"));

    let request = json!({"model": "m1", "messages": [{"role": "user", "content": "find x"}]});
    let response = driver::run(&router, &mcp, request).await.unwrap();

    let content = response["choices"][0]["message"]["content"].as_str().unwrap();
    assert_eq!(content, "final answer");
}
