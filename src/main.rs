//! Entry point: `server` starts the gateway, `script` and `tool` are a
//! thin HTTP client over the MCP surface (§10.3).
//!
//! Subcommand shape grounded in the wider example pool's `clap::Parser` /
//! `Subcommand` CLIs (the teacher itself carries no binary); the server
//! subcommand's shutdown wiring follows SPEC_FULL.md §5's single
//! `CancellationToken` shared between the health reconciler and axum's
//! graceful-shutdown future.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::info;
use tokio_util::sync::CancellationToken;

use llm_gateway::config::GatewayConfig;
use llm_gateway::http::app::{build_app, AppState};
use llm_gateway::mcp::server::McpServer;
use llm_gateway::provider::ProviderRegistry;
use llm_gateway::routing::health;
use llm_gateway::routing::router::RouterCore;
use llm_gateway::store::InMemoryConversationStore;

#[derive(Parser)]
#[command(name = "llm-gateway", version, about = "An OpenAI-wire-compatible multi-provider LLM gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway's HTTP server.
    Server {
        /// Path to a TOML config file.
        #[arg(short, long, default_value = "gateway.toml")]
        config: String,
    },
    /// Submit arbitrary code to the `execute_code` MCP tool.
    Script {
        /// Base URL of a running gateway, e.g. http://localhost:8080
        #[arg(short, long, default_value = "http://localhost:8080")]
        endpoint: String,
        /// Bearer token, if the gateway requires one.
        #[arg(short, long)]
        token: Option<String>,
        /// File containing the script source.
        file: String,
    },
    /// Invoke a discovered tool by name with JSON arguments.
    Tool {
        #[arg(short, long, default_value = "http://localhost:8080")]
        endpoint: String,
        #[arg(short, long)]
        token: Option<String>,
        name: String,
        /// JSON object of arguments, e.g. '{"query":"x"}'
        args: String,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config } => run_server(&config).await,
        Commands::Script { endpoint, token, file } => run_script(&endpoint, token, &file).await,
        Commands::Tool { endpoint, token, name, args } => run_tool(&endpoint, token, &name, &args).await,
    }
}

async fn run_server(config_path: &str) {
    let config = match GatewayConfig::load(config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config {config_path}: {err}");
            std::process::exit(1);
        }
    };

    let bind_addr: SocketAddr = match config.bind_addr.parse() {
        Ok(addr) => addr,
        Err(err) => {
            eprintln!("invalid bind_addr {}: {}", config.bind_addr, err);
            std::process::exit(1);
        }
    };

    let registry = ProviderRegistry::from_config(&config.providers);
    let router = Arc::new(RouterCore::new(registry));
    router.refresh_and_list_models().await;

    let mcp = McpServer::new(config.tools_root.clone(), config.libraries_root.clone());

    let state = Arc::new(AppState {
        router: Arc::clone(&router),
        mcp,
        responses: Arc::new(InMemoryConversationStore::new()),
        conversations: Arc::new(InMemoryConversationStore::new()),
        bearer_token: config.bearer_token.clone(),
    });

    let shutdown = CancellationToken::new();

    let reconciler_handle = tokio::spawn(health::run(
        Arc::clone(&router),
        std::time::Duration::from_secs(config.health_reconcile_period_secs),
        shutdown.clone(),
    ));

    let app = build_app(state);
    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("failed to bind {bind_addr}: {err}");
            std::process::exit(1);
        }
    };
    info!("llm-gateway listening on {bind_addr}");

    let shutdown_for_serve = shutdown.clone();
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_for_serve.cancelled().await;
    });

    tokio::select! {
        result = serve => {
            if let Err(err) = result {
                eprintln!("server error: {err}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            shutdown.cancel();
        }
    }

    shutdown.cancel();
    let _ = reconciler_handle.await;
}

fn http_client(token: Option<String>) -> reqwest::Client {
    let mut builder = reqwest::Client::builder();
    if let Some(token) = token {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(value) = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}")) {
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
        builder = builder.default_headers(headers);
    }
    builder.build().unwrap_or_else(|_| reqwest::Client::new())
}

async fn run_script(endpoint: &str, token: Option<String>, file: &str) {
    let code = match std::fs::read_to_string(file) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("could not read {file}: {err}");
            std::process::exit(1);
        }
    };

    let client = http_client(token);
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "execute_code",
        "params": { "code": code }
    });

    match client.post(format!("{endpoint}/mcp")).json(&body).send().await {
        Ok(resp) => match resp.text().await {
            Ok(text) => println!("{text}"),
            Err(err) => eprintln!("failed to read response: {err}"),
        },
        Err(err) => eprintln!("request failed: {err}"),
    }
}

async fn run_tool(endpoint: &str, token: Option<String>, name: &str, args: &str) {
    let arguments: serde_json::Value = match serde_json::from_str(args) {
        Ok(value) => value,
        Err(err) => {
            eprintln!("invalid JSON arguments: {err}");
            std::process::exit(1);
        }
    };

    let client = http_client(token);
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "execute_tool",
        "params": { "name": name, "arguments": arguments }
    });

    match client.post(format!("{endpoint}/mcp")).json(&body).send().await {
        Ok(resp) => match resp.text().await {
            Ok(text) => println!("{text}"),
            Err(err) => eprintln!("failed to read response: {err}"),
        },
        Err(err) => eprintln!("request failed: {err}"),
    }
}
