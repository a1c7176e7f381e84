//! The sandboxed scripting environment (§4.G, §10.4).
//!
//! The spec treats "the scripting-language interpreter itself" as an
//! external, already-sandboxed evaluator and puts building one from
//! scratch out of scope. This crate plays that role with `evalexpr`,
//! which is already the teacher's own answer to "a sandboxed expression
//! evaluator" (`tools::calculator::Calculator`, built the same way: a
//! fresh `HashMapContext` per evaluation, constants and functions
//! registered into it, `eval_with_context`/`eval_with_context_mut` to run
//! the expression).
//!
//! `evalexpr`'s registered `Function` values are synchronous closures, but
//! the helper library needs to call back into the async MCP server (tool
//! search / tool execution). Those closures bridge with
//! `tokio::task::block_in_place` + `Handle::current().block_on(...)` — a
//! deliberate, narrow exception to "never block in async code", scoped
//! entirely to this sandbox. It is only sound because every tool
//! invocation already runs on a blocking-capable multi-threaded runtime
//! (`tokio::main(flavor = "multi_thread")`); see DESIGN.md.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use evalexpr::{Context, ContextWithMutableFunctions, ContextWithMutableVariables, EvalexprError, Function, HashMapContext, Value as EvalValue};
use log::warn;
use serde_json::Value as JsonValue;

use crate::error::GatewayError;
use crate::mcp::manifest::{ParameterType, ToolManifest};
use crate::mcp::toon;

/// A short tool summary, used by `tool_search` results.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
}

/// The capabilities a script's helper library needs from its parent MCP
/// server: search, call-by-name, and raw code execution. Implemented by
/// [`crate::mcp::server::McpServer`]; a `NoopToolHost` is provided for
/// tests that don't need real tool delegation.
#[async_trait]
pub trait ToolHost: Send + Sync {
    async fn search(&self, query: &str) -> Vec<ToolSummary>;
    async fn call(&self, name: &str, args: HashMap<String, JsonValue>) -> Result<String, GatewayError>;
    async fn execute_code(&self, code: &str) -> Result<String, GatewayError>;
}

/// A `ToolHost` that finds and executes nothing; useful in tests that
/// exercise the sandbox without a real MCP server behind it.
pub struct NoopToolHost;

#[async_trait]
impl ToolHost for NoopToolHost {
    async fn search(&self, _query: &str) -> Vec<ToolSummary> {
        Vec::new()
    }

    async fn call(&self, name: &str, _args: HashMap<String, JsonValue>) -> Result<String, GatewayError> {
        Err(GatewayError::ToolNotFound(name.to_string()))
    }

    async fn execute_code(&self, _code: &str) -> Result<String, GatewayError> {
        Err(GatewayError::ToolEvaluation("code execution is not available in this context".to_string()))
    }
}

fn block_on_host<F: std::future::Future>(fut: F) -> F::Output {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fut))
}

fn json_to_eval(value: &JsonValue) -> EvalValue {
    match value {
        JsonValue::String(s) => EvalValue::String(s.clone()),
        JsonValue::Number(n) => EvalValue::Float(n.as_f64().unwrap_or_default()),
        JsonValue::Bool(b) => EvalValue::Boolean(*b),
        other => EvalValue::String(other.to_string()),
    }
}

fn eval_to_json(value: &EvalValue) -> JsonValue {
    match value {
        EvalValue::String(s) => JsonValue::String(s.clone()),
        EvalValue::Float(f) => serde_json::json!(f),
        EvalValue::Int(i) => serde_json::json!(i),
        EvalValue::Boolean(b) => JsonValue::Bool(*b),
        EvalValue::Tuple(items) => JsonValue::Array(items.iter().map(eval_to_json).collect()),
        EvalValue::Empty => JsonValue::Null,
    }
}

fn bind_parameter(context: &mut HashMapContext, name: &str, param_type: ParameterType, json: &JsonValue) {
    let value = if param_type.is_string_like() {
        EvalValue::String(json.as_str().map(str::to_string).unwrap_or_else(|| json.to_string()))
    } else {
        match param_type {
            ParameterType::Number => EvalValue::Float(json.as_f64().unwrap_or_default()),
            ParameterType::Boolean => EvalValue::Boolean(json.as_bool().unwrap_or_default()),
            _ => unreachable!("string-like types are handled above"),
        }
    };
    let _ = context.set_value(name.to_string(), value);
}

/// Evaluate `script_source` for `manifest`, with `args` bound as top-level
/// variables per their declared parameter types, and the helper library
/// (`param`, `return_string`, `return_object`, `return_toon`, `tool_search`,
/// `call_tool`, `execute_code`) registered fresh (§5: "Standard-library
/// registrations are re-applied per environment").
pub async fn execute(
    manifest: &ToolManifest,
    script_source: &str,
    args: HashMap<String, JsonValue>,
    libraries_root: &Path,
    host: Arc<dyn ToolHost>,
) -> Result<String, GatewayError> {
    let mut context = HashMapContext::new();

    for (name, spec) in &manifest.parameters {
        if let Some(json) = args.get(name) {
            bind_parameter(&mut context, name, spec.param_type, json);
        }
    }

    let args_for_lookup = Arc::new(args);
    let return_slot: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

    register_helpers(&mut context, Arc::clone(&args_for_lookup), Arc::clone(&return_slot), Arc::clone(&host));
    register_on_demand_loader(&mut context, libraries_root.to_path_buf());
    load_imported_libraries(&mut context, libraries_root, script_source);

    let eval_result = evalexpr::eval_with_context_mut(script_source, &mut context);

    if let Some(returned) = return_slot.lock().unwrap().take() {
        return Ok(returned);
    }

    match eval_result {
        Ok(value) => Ok(eval_value_to_display(&value)),
        Err(err) => Ok(format!("Error: {}", err)),
    }
}

/// Evaluate raw code outside of any manifest — the backing implementation
/// for the built-in `execute_code` tool (§4.H) and the CLI's `script`
/// subcommand (§10.3). Arguments bind by their own JSON type rather than a
/// manifest-declared one, since there is no manifest governing them.
pub async fn execute_raw(
    code: &str,
    args: HashMap<String, JsonValue>,
    libraries_root: &Path,
    host: Arc<dyn ToolHost>,
) -> Result<String, GatewayError> {
    let mut context = HashMapContext::new();
    for (name, json) in &args {
        let value = match json {
            JsonValue::String(s) => EvalValue::String(s.clone()),
            JsonValue::Number(n) => EvalValue::Float(n.as_f64().unwrap_or_default()),
            JsonValue::Bool(b) => EvalValue::Boolean(*b),
            other => EvalValue::String(other.to_string()),
        };
        let _ = context.set_value(name.clone(), value);
    }

    let return_slot: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    register_helpers(&mut context, Arc::new(args), Arc::clone(&return_slot), Arc::clone(&host));
    register_on_demand_loader(&mut context, libraries_root.to_path_buf());
    load_imported_libraries(&mut context, libraries_root, code);

    let eval_result = evalexpr::eval_with_context_mut(code, &mut context);

    if let Some(returned) = return_slot.lock().unwrap().take() {
        return Ok(returned);
    }

    match eval_result {
        Ok(value) => Ok(eval_value_to_display(&value)),
        Err(err) => Ok(format!("Error: {}", err)),
    }
}

fn eval_value_to_display(value: &EvalValue) -> String {
    match value {
        EvalValue::String(s) => s.clone(),
        EvalValue::Empty => String::new(),
        other => format!("{}", other),
    }
}

fn register_helpers(
    context: &mut HashMapContext,
    args: Arc<HashMap<String, JsonValue>>,
    return_slot: Arc<Mutex<Option<String>>>,
    host: Arc<dyn ToolHost>,
) {
    {
        let args = Arc::clone(&args);
        let _ = context.set_function(
            "param".to_string(),
            Function::new(move |argument| {
                let (key, default) = match argument {
                    EvalValue::Tuple(items) if items.len() == 2 => (items[0].clone(), Some(items[1].clone())),
                    EvalValue::Tuple(items) if items.len() == 1 => (items[0].clone(), None),
                    single => (single.clone(), None),
                };
                let key = key.as_string().map_err(|_| EvalexprError::expected_string(key.clone()))?;
                match args.get(&key) {
                    Some(json) => Ok(json_to_eval(json)),
                    None => default.ok_or(EvalexprError::CustomMessage(format!("missing parameter \"{key}\" and no default given"))),
                }
            }),
        );
    }

    {
        let return_slot = Arc::clone(&return_slot);
        let _ = context.set_function(
            "return_string".to_string(),
            Function::new(move |argument| {
                let s = argument.as_string().map_err(|_| EvalexprError::expected_string(argument.clone()))?;
                *return_slot.lock().unwrap() = Some(s);
                Ok(EvalValue::Empty)
            }),
        );
    }

    {
        let return_slot = Arc::clone(&return_slot);
        let _ = context.set_function(
            "return_object".to_string(),
            Function::new(move |argument| {
                let json = eval_to_json(argument);
                *return_slot.lock().unwrap() = Some(json.to_string());
                Ok(EvalValue::Empty)
            }),
        );
    }

    {
        let return_slot = Arc::clone(&return_slot);
        let _ = context.set_function(
            "return_toon".to_string(),
            Function::new(move |argument| {
                let json = eval_to_json(argument);
                *return_slot.lock().unwrap() = Some(toon::encode(&json));
                Ok(EvalValue::Empty)
            }),
        );
    }

    {
        let host = Arc::clone(&host);
        let _ = context.set_function(
            "tool_search".to_string(),
            Function::new(move |argument| {
                let query = argument.as_string().map_err(|_| EvalexprError::expected_string(argument.clone()))?;
                let summaries = block_on_host(host.search(&query));
                let json = JsonValue::Array(
                    summaries
                        .into_iter()
                        .map(|s| serde_json::json!({"name": s.name, "description": s.description}))
                        .collect(),
                );
                Ok(EvalValue::String(json.to_string()))
            }),
        );
    }

    {
        let host = Arc::clone(&host);
        let _ = context.set_function(
            "call_tool".to_string(),
            Function::new(move |argument| {
                let (name, args_json) = match argument {
                    EvalValue::Tuple(items) if items.len() == 2 => {
                        let name = items[0].as_string().map_err(|_| EvalexprError::expected_string(items[0].clone()))?;
                        let args_str = items[1].as_string().unwrap_or_else(|_| "{}".to_string());
                        let args_json: HashMap<String, JsonValue> =
                            serde_json::from_str(&args_str).unwrap_or_default();
                        (name, args_json)
                    }
                    single => {
                        let name = single.as_string().map_err(|_| EvalexprError::expected_string(single.clone()))?;
                        (name, HashMap::new())
                    }
                };
                match block_on_host(host.call(&name, args_json)) {
                    Ok(output) => Ok(EvalValue::String(output)),
                    Err(err) => Ok(EvalValue::String(format!("Error: {err}"))),
                }
            }),
        );
    }

    {
        let host = Arc::clone(&host);
        let _ = context.set_function(
            "execute_tool".to_string(),
            Function::new(move |argument| {
                let (name, args_str) = match argument {
                    EvalValue::Tuple(items) if items.len() == 2 => (
                        items[0].as_string().map_err(|_| EvalexprError::expected_string(items[0].clone()))?,
                        items[1].as_string().unwrap_or_else(|_| "{}".to_string()),
                    ),
                    single => (single.as_string().map_err(|_| EvalexprError::expected_string(single.clone()))?, "{}".to_string()),
                };
                let args_json: HashMap<String, JsonValue> = serde_json::from_str(&args_str).unwrap_or_default();
                match block_on_host(host.call(&name, args_json)) {
                    Ok(output) => Ok(EvalValue::String(output)),
                    Err(err) => Ok(EvalValue::String(format!("Error: {err}"))),
                }
            }),
        );
    }

    {
        let host = Arc::clone(&host);
        let _ = context.set_function(
            "execute_code".to_string(),
            Function::new(move |argument| {
                let code = argument.as_string().map_err(|_| EvalexprError::expected_string(argument.clone()))?;
                match block_on_host(host.execute_code(&code)) {
                    Ok(output) => Ok(EvalValue::String(output)),
                    Err(err) => Ok(EvalValue::String(format!("Error: {err}"))),
                }
            }),
        );
    }
}

/// Register the on-demand library loader's textual primitive:
/// `resolve_library(name) -> source | None`, for scripts that just want a
/// library's raw source rather than a callable (§10.4's `resolve(name)`
/// capability). Actually importing and registering a library as a callable
/// function happens separately, in [`load_imported_libraries`] — `evalexpr`'s
/// `Function` closures only ever see their argument, never a handle back to
/// the context that owns them, so a registered function cannot itself
/// mutate that context to add more functions to it (§4.G, §10.4).
fn register_on_demand_loader(context: &mut HashMapContext, libraries_root: PathBuf) {
    let _ = context.set_function(
        "resolve_library".to_string(),
        Function::new(move |argument| {
            let name = argument.as_string().map_err(|_| EvalexprError::expected_string(argument.clone()))?;
            let path = libraries_root.join(format!("{name}.expr"));
            match fs::read_to_string(&path) {
                Ok(source) => Ok(EvalValue::String(source)),
                Err(_) => Ok(EvalValue::Empty),
            }
        }),
    );

    // `import_library` itself is a no-op at call time: the libraries a
    // script imports are already registered as callable functions before
    // the script runs, by `load_imported_libraries` scanning for these call
    // sites ahead of evaluation. Registering it here just means a script
    // that writes `import_library("x")` inline doesn't fail with
    // "function not found".
    let _ = context.set_function("import_library".to_string(), Function::new(|_argument| Ok(EvalValue::Empty)));
}

/// Names passed to `import_library(...)` in `script_source`, found by
/// scanning the literal call sites rather than by running the script (see
/// [`register_on_demand_loader`] for why a running script can't register
/// functions into its own context).
fn referenced_libraries(script_source: &str) -> Vec<String> {
    const MARKER: &str = "import_library(";
    let mut names = Vec::new();
    let mut rest = script_source;
    while let Some(start) = rest.find(MARKER) {
        rest = &rest[start + MARKER.len()..];
        let Some(quote_at) = rest.find(['"', '\'']) else { break };
        let quote_char = rest.as_bytes()[quote_at] as char;
        let after_quote = &rest[quote_at + 1..];
        let Some(end) = after_quote.find(quote_char) else { break };
        names.push(after_quote[..end].to_string());
        rest = &after_quote[end + 1..];
    }
    names
}

/// Bind a library's call argument(s) as `arg` (the first/only value) and
/// `arg0`, `arg1`, ... (every value, if called with a tuple), so a library's
/// own script can read what it was called with the same way a tool script
/// reads `param(...)`.
fn bind_library_arguments(context: &mut HashMapContext, argument: &EvalValue) {
    let values: Vec<EvalValue> = match argument {
        EvalValue::Tuple(items) => items.clone(),
        EvalValue::Empty => Vec::new(),
        other => vec![other.clone()],
    };
    if let Some(first) = values.first() {
        let _ = context.set_value("arg".to_string(), first.clone());
    }
    for (i, value) in values.into_iter().enumerate() {
        let _ = context.set_value(format!("arg{i}"), value);
    }
}

/// For every library `script_source` imports via `import_library(name)`,
/// read `<libraries_root>/<name>.expr` and register a function named `name`
/// that, when called, evaluates that library's source in its own fresh
/// context (with the call arguments bound per [`bind_library_arguments`])
/// and returns its result — §4.G's "looks up `<name>.expr` and registers
/// it", made real by registering a genuine Rust-side `Function` per library
/// rather than trying to parse function definitions out of `evalexpr`
/// source (`evalexpr`'s `Value` has no function-literal variant of its
/// own). A library whose file is missing is skipped with a warning, per
/// §4.G's scan-defect contract.
fn load_imported_libraries(context: &mut HashMapContext, libraries_root: &Path, script_source: &str) {
    for name in referenced_libraries(script_source) {
        let path = libraries_root.join(format!("{name}.expr"));
        let source = match fs::read_to_string(&path) {
            Ok(source) => source,
            Err(_) => {
                warn!("library \"{name}\" not found under libraries root, skipping import");
                continue;
            }
        };
        let _ = context.set_function(
            name,
            Function::new(move |argument| {
                let mut lib_context = HashMapContext::new();
                bind_library_arguments(&mut lib_context, argument);
                evalexpr::eval_with_context_mut(&source, &mut lib_context)
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::manifest::{ParameterSpec, Visibility};
    use std::collections::HashMap as StdHashMap;

    fn manifest_with_params(params: StdHashMap<String, ParameterSpec>) -> ToolManifest {
        ToolManifest {
            name: "t".to_string(),
            description: "d".to_string(),
            keywords: vec![],
            visibility: Visibility::Listed,
            parameters: params,
            script_path: PathBuf::from("unused"),
        }
    }

    #[tokio::test]
    async fn return_string_becomes_exact_tool_output() {
        let manifest = manifest_with_params(StdHashMap::new());
        let host: Arc<dyn ToolHost> = Arc::new(NoopToolHost);
        let out = execute(&manifest, "return_string(\"hello world\")", StdHashMap::new(), Path::new("/nonexistent"), host)
            .await
            .unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn parameter_is_bound_as_top_level_variable() {
        let mut params = StdHashMap::new();
        params.insert(
            "name".to_string(),
            ParameterSpec {
                param_type: ParameterType::String,
                description: "d".to_string(),
                required: true,
            },
        );
        let manifest = manifest_with_params(params);
        let mut args = StdHashMap::new();
        args.insert("name".to_string(), JsonValue::String("Ada".to_string()));
        let host: Arc<dyn ToolHost> = Arc::new(NoopToolHost);
        let out = execute(&manifest, "return_string(name)", args, Path::new("/nonexistent"), host)
            .await
            .unwrap();
        assert_eq!(out, "Ada");
    }

    #[tokio::test]
    async fn evaluation_failure_is_never_a_crash() {
        let manifest = manifest_with_params(StdHashMap::new());
        let host: Arc<dyn ToolHost> = Arc::new(NoopToolHost);
        let out = execute(&manifest, "1 / 0", StdHashMap::new(), Path::new("/nonexistent"), host)
            .await
            .unwrap();
        assert!(out.starts_with("Error:") || !out.is_empty());
    }

    #[tokio::test]
    async fn imported_library_function_is_callable_by_name() {
        let libs = tempfile::TempDir::new().unwrap();
        fs::write(libs.path().join("double.expr"), "arg * 2").unwrap();

        let manifest = manifest_with_params(StdHashMap::new());
        let host: Arc<dyn ToolHost> = Arc::new(NoopToolHost);
        let out = execute(
            &manifest,
            "import_library(\"double\"); return_object(double(21))",
            StdHashMap::new(),
            libs.path(),
            host,
        )
        .await
        .unwrap();
        assert_eq!(out, "42");
    }

    #[tokio::test]
    async fn missing_imported_library_does_not_fail_the_script() {
        let manifest = manifest_with_params(StdHashMap::new());
        let host: Arc<dyn ToolHost> = Arc::new(NoopToolHost);
        let out = execute(
            &manifest,
            "import_library(\"nope\"); return_string(\"still ran\")",
            StdHashMap::new(),
            Path::new("/nonexistent"),
            host,
        )
        .await
        .unwrap();
        assert_eq!(out, "still ran");
    }

    #[tokio::test]
    async fn param_helper_uses_default_when_missing() {
        let manifest = manifest_with_params(StdHashMap::new());
        let host: Arc<dyn ToolHost> = Arc::new(NoopToolHost);
        let out = execute(
            &manifest,
            "return_string(param(\"missing\", \"fallback\"))",
            StdHashMap::new(),
            Path::new("/nonexistent"),
            host,
        )
        .await
        .unwrap();
        assert_eq!(out, "fallback");
    }
}
