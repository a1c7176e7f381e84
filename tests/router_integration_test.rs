//! Cross-module scenarios from the design's end-to-end scenario list that
//! don't fit naturally as a single-module unit test: routing across real
//! (loopback) upstreams, quarantine on a refused connection, and streaming
//! usage injection over a real SSE body.

use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::{Json, Router};
use llm_gateway::config::{ModelSourceKind, ProviderConfig};
use llm_gateway::provider::ProviderRegistry;
use llm_gateway::routing::router::RouterCore;
use serde_json::{json, Value};

fn provider(name: &str, base_url: &str, kind: ModelSourceKind, models: &[&str]) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        base_url: base_url.to_string(),
        credential: None,
        enabled: true,
        model_source: kind,
        static_models: models.iter().map(|m| m.to_string()).collect(),
        allow: None,
        deny: None,
        native_responses: false,
    }
}

async fn spawn_echo_server(responder_name: &'static str) -> SocketAddr {
    let app = Router::new().route(
        "/chat/completions",
        post(move |Json(_body): Json<Value>| {
            let responder_name = responder_name;
            async move {
                Json(json!({
                    "id": "chatcmpl-1",
                    "choices": [{"message": {"role": "assistant", "content": responder_name}}]
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
async fn least_loaded_routing_prefers_the_idle_provider() {
    let addr_a = spawn_echo_server("a").await;
    let addr_b = spawn_echo_server("b").await;

    let registry = ProviderRegistry::from_config(&[
        provider("a", &format!("http://{addr_a}"), ModelSourceKind::Static, &["m1"]),
        provider("b", &format!("http://{addr_b}"), ModelSourceKind::Static, &["m1"]),
    ]);
    let router = RouterCore::new(registry);
    router.refresh_and_list_models().await;

    router.registry().get("a").unwrap().incr_active();
    router.registry().get("a").unwrap().incr_active();
    router.registry().get("a").unwrap().incr_active();
    router.registry().get("b").unwrap().incr_active();

    let response = router
        .complete(json!({"model": "m1", "messages": [{"role": "user", "content": "hi"}]}))
        .await
        .unwrap();

    let content = response["choices"][0]["message"]["content"].as_str().unwrap();
    assert_eq!(content, "b");
}

#[tokio::test]
async fn refused_connection_quarantines_the_provider_and_hides_its_model() {
    // Port 0 binds an ephemeral listener then immediately closes it, giving
    // us a real "connection refused" target without a mocking framework.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = listener.local_addr().unwrap();
    drop(listener);

    let registry = ProviderRegistry::from_config(&[provider(
        "a",
        &format!("http://{dead_addr}"),
        ModelSourceKind::Static,
        &["m2"],
    )]);
    let router = RouterCore::new(registry);
    router.refresh_and_list_models().await;

    let err = router
        .complete(json!({"model": "m2", "messages": [{"role": "user", "content": "hi"}]}))
        .await
        .unwrap_err();
    assert!(err.quarantines_provider());

    router.registry().get("a").unwrap();
    assert!(!router.registry().get("a").unwrap().is_healthy());
}

#[tokio::test]
async fn streaming_completion_injects_usage_on_the_terminal_chunk() {
    let app = Router::new().route(
        "/chat/completions",
        post(|| async move {
            let body = concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"},\"index\":0}]}\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\" there\"},\"index\":0}]}\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"\"},\"finish_reason\":\"stop\",\"index\":0}]}\n",
                "data: [DONE]\n",
            );
            ([(axum::http::header::CONTENT_TYPE, "text/event-stream")], body)
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let registry = ProviderRegistry::from_config(&[provider("a", &format!("http://{addr}"), ModelSourceKind::Static, &["m1"])]);
    let router = RouterCore::new(registry);
    router.refresh_and_list_models().await;

    use futures_util::StreamExt;
    let mut stream = Box::pin(
        router
            .complete_stream(json!({"model": "m1", "messages": [{"role": "user", "content": "hello there"}]}))
            .await
            .unwrap(),
    );

    let mut lines = Vec::new();
    while let Some(line) = stream.next().await {
        lines.push(line.unwrap());
    }

    let done_index = lines.iter().position(|l| l == "data: [DONE]").expect("DONE line present");
    let terminal = &lines[done_index - 1];
    let parsed: Value = serde_json::from_str(terminal.strip_prefix("data: ").unwrap()).unwrap();
    let usage = &parsed["usage"];
    assert!(usage["prompt_tokens"].as_u64().unwrap() >= 1);
    assert!(usage["completion_tokens"].as_u64().unwrap() >= 1);

    assert_eq!(router.registry().get("a").unwrap().active_count(), 0);
}

#[tokio::test]
async fn streaming_completion_decrements_active_on_early_drop() {
    let app = Router::new().route(
        "/chat/completions",
        post(|| async move {
            let body = concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"},\"index\":0}]}\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\" there\"},\"index\":0}]}\n",
                "data: [DONE]\n",
            );
            ([(axum::http::header::CONTENT_TYPE, "text/event-stream")], body)
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let registry = ProviderRegistry::from_config(&[provider("a", &format!("http://{addr}"), ModelSourceKind::Static, &["m1"])]);
    let router = RouterCore::new(registry);
    router.refresh_and_list_models().await;

    use futures_util::StreamExt;
    {
        let mut stream = Box::pin(
            router
                .complete_stream(json!({"model": "m1", "messages": [{"role": "user", "content": "hi"}]}))
                .await
                .unwrap(),
        );
        assert_eq!(router.registry().get("a").unwrap().active_count(), 1);
        // Consume one line, then drop the stream early, modeling a client
        // disconnecting before the body is exhausted.
        let _ = stream.next().await;
    }

    assert_eq!(router.registry().get("a").unwrap().active_count(), 0);
}
