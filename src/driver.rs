//! The Tool-Calling Driver (§4.I): the bounded multi-turn loop that lets a
//! completion request drive tool discovery and execution against the MCP
//! server, with duplicate-call suppression.
//!
//! Grounded in the teacher's agent-loop shape (`tool_protocol.rs`'s
//! repeated ask-model / run-tool / append-result cycle), generalized from
//! a fixed tool roster to the two discovery tools (`tool_search`,
//! `execute_tool`) the MCP surface exposes.

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;
use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::mcp::server::{McpServer, EXECUTE_TOOL_TOOL, TOOL_SEARCH_TOOL};
use crate::routing::router::RouterCore;

const MAX_ITERATIONS: usize = 20;
const REPEAT_THRESHOLD: u32 = 3;
const IMMEDIATE_REPEAT_THRESHOLD: u32 = 2;

const LOOP_FALLBACK_MESSAGE: &str =
    "The tool has been called multiple times with the same result. Please provide your final answer based on the information gathered.";

fn discovery_tool_definitions() -> Value {
    json!([
        {
            "type": "function",
            "function": {
                "name": TOOL_SEARCH_TOOL,
                "description": "Search for tools not directly listed by keyword.",
                "parameters": {
                    "type": "object",
                    "properties": { "query": { "type": "string" } },
                    "required": ["query"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": EXECUTE_TOOL_TOOL,
                "description": "Execute a tool discovered via tool_search.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "arguments": { "type": "object" }
                    },
                    "required": ["name"]
                }
            }
        }
    ])
}

/// The driver's working state for the duration of one completion request
/// (§3): the message transcript plus a call-count dictionary for loop
/// detection.
struct ConversationAccumulator {
    messages: Vec<Value>,
    call_counts: HashMap<String, u32>,
    last_key: Option<String>,
}

impl ConversationAccumulator {
    fn new(messages: Vec<Value>) -> Self {
        ConversationAccumulator {
            messages,
            call_counts: HashMap::new(),
            last_key: None,
        }
    }

    /// Canonical dedup key: the tool name plus a sorted-keys, whitespace-free
    /// JSON serialization of its arguments (§9, "tool call deduplication key").
    fn canonical_key(name: &str, args: &Value) -> String {
        format!("{}:{}", name, canonical_json(args))
    }

    /// Record a call, returning whether the model is now looping.
    fn record_and_check_loop(&mut self, key: &str) -> bool {
        let count = self.call_counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        let repeated_enough = *count >= REPEAT_THRESHOLD;
        let immediate_repeat = self.last_key.as_deref() == Some(key) && *count >= IMMEDIATE_REPEAT_THRESHOLD;
        self.last_key = Some(key.to_string());
        repeated_enough || immediate_repeat
    }
}

/// Serialize a JSON value with sorted object keys and no insignificant
/// whitespace, so semantically equal argument maps produce the same key
/// regardless of field order.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", serde_json::to_string(k).unwrap(), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

fn first_choice_tool_calls(response: &Value) -> Vec<Value> {
    response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("tool_calls"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn tool_call_name(call: &Value) -> Option<&str> {
    call.get("function").and_then(|f| f.get("name")).and_then(Value::as_str)
}

fn tool_call_arguments(call: &Value) -> Value {
    call.get("function")
        .and_then(|f| f.get("arguments"))
        .and_then(Value::as_str)
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_else(|| json!({}))
}

fn is_allowed_tool(name: &str) -> bool {
    name == TOOL_SEARCH_TOOL || name == EXECUTE_TOOL_TOOL
}

/// Run the bounded tool-calling loop for one completion request (§4.I).
///
/// `request` must already carry `model` and `messages`. Tool definitions
/// for the two discovery tools are attached on entry. Returns the final
/// completion response, or `MaxToolIterations` if the cap is hit without
/// the model settling on a tool-call-free answer.
pub async fn run(router: &RouterCore, mcp: &Arc<McpServer>, mut request: Value) -> Result<Value, GatewayError> {
    let initial_messages = request
        .get("messages")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut accumulator = ConversationAccumulator::new(initial_messages);

    request["tools"] = discovery_tool_definitions();

    for _iteration in 0..MAX_ITERATIONS {
        request["messages"] = Value::Array(accumulator.messages.clone());
        let response = router.complete(request.clone()).await?;

        let tool_calls = first_choice_tool_calls(&response);
        let allowed_calls: Vec<&Value> = tool_calls.iter().filter(|c| tool_call_name(c).is_some_and(is_allowed_tool)).collect();

        if tool_calls.is_empty() {
            return Ok(response);
        }
        if allowed_calls.is_empty() {
            warn!("driver: model requested unrecognized tool call(s), ignoring and returning response unchanged");
            return Ok(response);
        }

        let call = allowed_calls[0];
        let name = tool_call_name(call).expect("filtered to calls with a name");
        let args = tool_call_arguments(call);
        let key = ConversationAccumulator::canonical_key(name, &args);

        if accumulator.record_and_check_loop(&key) {
            accumulator.messages.push(json!({ "role": "system", "content": LOOP_FALLBACK_MESSAGE }));
            request["messages"] = Value::Array(accumulator.messages.clone());
            if let Some(obj) = request.as_object_mut() {
                obj.remove("tools");
            }
            return router.complete(request).await;
        }

        let assistant_message = response
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .and_then(|c| c.get("message"))
            .cloned()
            .unwrap_or_else(|| json!({ "role": "assistant", "tool_calls": [call] }));
        accumulator.messages.push(assistant_message);

        let tool_args: HashMap<String, Value> = match name {
            TOOL_SEARCH_TOOL => {
                let query = args.get("query").and_then(Value::as_str).unwrap_or_default();
                HashMap::from([("query".to_string(), Value::String(query.to_string()))])
            }
            EXECUTE_TOOL_TOOL => {
                let mut map = HashMap::new();
                if let Some(tool_name) = args.get("name").and_then(Value::as_str) {
                    map.insert("name".to_string(), Value::String(tool_name.to_string()));
                }
                map.insert("arguments".to_string(), args.get("arguments").cloned().unwrap_or_else(|| json!({})));
                map
            }
            _ => unreachable!("filtered to allowed tool names"),
        };

        let result = dispatch_discovery_tool(mcp, name, tool_args).await;
        let result_text = match result {
            Ok(text) => text,
            Err(err) => format!("Error: {err}"),
        };

        let call_id = call.get("id").and_then(Value::as_str).unwrap_or("call_0");
        accumulator.messages.push(json!({
            "role": "tool",
            "tool_call_id": call_id,
            "content": result_text,
        }));
    }

    Err(GatewayError::MaxToolIterations(MAX_ITERATIONS))
}

async fn dispatch_discovery_tool(mcp: &Arc<McpServer>, name: &str, args: HashMap<String, Value>) -> Result<String, GatewayError> {
    match name {
        TOOL_SEARCH_TOOL => {
            let query = args.get("query").and_then(Value::as_str).unwrap_or_default();
            let results = mcp.search(query, false);
            Ok(serde_json::to_string(&results).unwrap_or_else(|_| "[]".to_string()))
        }
        EXECUTE_TOOL_TOOL => {
            let tool_name = args
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| GatewayError::InvalidRequest("execute_tool requires a \"name\" argument".to_string()))?;
            let call_args: HashMap<String, Value> = args
                .get("arguments")
                .and_then(Value::as_object)
                .map(|m| m.clone().into_iter().collect())
                .unwrap_or_default();
            mcp.execute_tool(tool_name, call_args).await
        }
        other => Err(GatewayError::ToolNotFound(other.to_string())),
    }
}
