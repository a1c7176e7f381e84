//! The MCP Server Binding (§4.H): per-request attachment of tool
//! providers, discovery-mode gating, and the built-in `execute_code` tool.
//!
//! Grounded in the teacher's `mcp_server.rs::UnifiedMcpServer` (name-keyed
//! registration and dispatch-by-name) and `tool_protocol.rs::ToolProtocol`
//! (the trait shape a tool-serving component exposes), generalized from
//! "registered protocol implementations" to "a filesystem scan refreshed
//! on every call".

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::GatewayError;
use crate::mcp::script_env::{self, ToolHost, ToolSummary};
use crate::mcp::tool_provider::ToolProvider;

pub const EXECUTE_CODE_TOOL: &str = "execute_code";
pub const TOOL_SEARCH_TOOL: &str = "tool_search";
pub const EXECUTE_TOOL_TOOL: &str = "execute_tool";

/// One entry in a `tools/list` response: name + description, matching the
/// shape OpenAI-style tool definitions expect at the top level.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolListing {
    pub name: String,
    pub description: String,
}

/// Owns the tools root and libraries root; constructs fresh
/// [`ToolProvider`]s per call, per §4.G's "re-derives from disk on every
/// call" ownership note.
pub struct McpServer {
    tools_root: PathBuf,
    libraries_root: PathBuf,
}

impl McpServer {
    pub fn new(tools_root: impl Into<PathBuf>, libraries_root: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(McpServer {
            tools_root: tools_root.into(),
            libraries_root: libraries_root.into(),
        })
    }

    fn listed_provider(&self) -> ToolProvider {
        ToolProvider::listed(self.tools_root.clone(), self.libraries_root.clone())
    }

    fn on_demand_provider(&self) -> ToolProvider {
        ToolProvider::on_demand(self.tools_root.clone(), self.libraries_root.clone())
    }

    fn unfiltered_provider(&self) -> ToolProvider {
        ToolProvider::unfiltered(self.tools_root.clone(), self.libraries_root.clone())
    }

    /// `tools/list`. `discovery_mode` collapses every tool — listed,
    /// on-demand, and the `execute_code` built-in — onto the on-demand
    /// side, so the only entries that remain listed are the two discovery
    /// tools themselves (§4.H).
    pub fn tools_list(&self, discovery_mode: bool) -> Vec<ToolListing> {
        let (listed_names, on_demand_is_nonempty) = if discovery_mode {
            // `execute_code` always exists, so the on-demand side is never
            // empty in discovery mode regardless of what the filesystem
            // scan finds (§4.H, §8: discovery mode always lists exactly
            // `{tool_search, execute_tool}`).
            (Vec::new(), true)
        } else {
            let mut listed: Vec<ToolListing> = self
                .listed_provider()
                .list()
                .into_iter()
                .map(|m| ToolListing {
                    name: m.name,
                    description: m.description,
                })
                .collect();
            listed.push(ToolListing {
                name: EXECUTE_CODE_TOOL.to_string(),
                description: "Execute arbitrary sandboxed script code.".to_string(),
            });
            let on_demand_nonempty = !self.on_demand_provider().list().is_empty();
            (listed, on_demand_nonempty)
        };

        let mut listed = listed_names;
        if on_demand_is_nonempty {
            listed.push(ToolListing {
                name: TOOL_SEARCH_TOOL.to_string(),
                description: "Search for tools not directly listed.".to_string(),
            });
            listed.push(ToolListing {
                name: EXECUTE_TOOL_TOOL.to_string(),
                description: "Execute a tool found via tool_search.".to_string(),
            });
        }
        listed
    }

    /// `tool_search`: keyword search over every on-demand-visible tool
    /// (which, in discovery mode, is every tool including `execute_code`).
    pub fn search(&self, query: &str, discovery_mode: bool) -> Vec<ToolSummary> {
        let provider = if discovery_mode {
            self.unfiltered_provider()
        } else {
            self.on_demand_provider()
        };
        provider
            .search(query)
            .into_iter()
            .map(|m| ToolSummary {
                name: m.name,
                description: m.description,
            })
            .collect()
    }

    /// `execute_tool` / direct tool dispatch by name, including the
    /// built-in `execute_code`.
    pub async fn execute_tool(self: &Arc<Self>, name: &str, args: HashMap<String, Value>) -> Result<String, GatewayError> {
        if name == EXECUTE_CODE_TOOL {
            let code = args
                .get("code")
                .and_then(Value::as_str)
                .ok_or_else(|| GatewayError::InvalidRequest("execute_code requires a \"code\" argument".to_string()))?
                .to_string();
            let mut remaining = args;
            remaining.remove("code");
            return script_env::execute_raw(&code, remaining, &self.libraries_root, Arc::clone(self) as Arc<dyn ToolHost>).await;
        }

        self.unfiltered_provider()
            .invoke(name, args, Arc::clone(self) as Arc<dyn ToolHost>)
            .await
    }
}

#[async_trait]
impl ToolHost for McpServer {
    async fn search(&self, query: &str) -> Vec<ToolSummary> {
        McpServer::search(self, query, false)
    }

    async fn call(&self, name: &str, args: HashMap<String, Value>) -> Result<String, GatewayError> {
        if name == EXECUTE_CODE_TOOL {
            let code = args.get("code").and_then(Value::as_str).unwrap_or_default().to_string();
            let mut remaining = args;
            remaining.remove("code");
            // `self` here is `&McpServer`, not `Arc<McpServer>`; re-wrap in
            // a throwaway Arc so the recursive script sandbox still has a
            // `ToolHost` to call back into for nested tool calls.
            let host: Arc<dyn ToolHost> = Arc::new(McpServer {
                tools_root: self.tools_root.clone(),
                libraries_root: self.libraries_root.clone(),
            });
            return script_env::execute_raw(&code, remaining, &self.libraries_root, host).await;
        }
        let host: Arc<dyn ToolHost> = Arc::new(McpServer {
            tools_root: self.tools_root.clone(),
            libraries_root: self.libraries_root.clone(),
        });
        self.unfiltered_provider().invoke(name, args, host).await
    }

    async fn execute_code(&self, code: &str) -> Result<String, GatewayError> {
        let host: Arc<dyn ToolHost> = Arc::new(McpServer {
            tools_root: self.tools_root.clone(),
            libraries_root: self.libraries_root.clone(),
        });
        script_env::execute_raw(code, HashMap::new(), &self.libraries_root, host).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_tool(root: &std::path::Path, dir: &str, visibility: &str) {
        let tool_dir = root.join(dir);
        fs::create_dir_all(&tool_dir).unwrap();
        fs::write(
            tool_dir.join("manifest.toml"),
            format!("description = \"d\"\nscript = \"tool.expr\"\nvisibility = \"{visibility}\"\n"),
        )
        .unwrap();
        fs::write(tool_dir.join("tool.expr"), "return_string(\"ok\")").unwrap();
    }

    #[test]
    fn empty_tools_root_lists_only_execute_code() {
        let tmp = TempDir::new().unwrap();
        let server = McpServer::new(tmp.path(), tmp.path().join(".lib"));
        let names: Vec<_> = server.tools_list(false).into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec![EXECUTE_CODE_TOOL]);
    }

    #[test]
    fn listed_and_on_demand_tools_show_discovery_pair_when_on_demand_nonempty() {
        let tmp = TempDir::new().unwrap();
        write_tool(tmp.path(), "pub", "listed");
        write_tool(tmp.path(), "hidden", "on-demand");
        let server = McpServer::new(tmp.path(), tmp.path().join(".lib"));
        let names: Vec<_> = server.tools_list(false).into_iter().map(|t| t.name).collect();
        assert!(names.contains(&"pub".to_string()));
        assert!(names.contains(&EXECUTE_CODE_TOOL.to_string()));
        assert!(names.contains(&TOOL_SEARCH_TOOL.to_string()));
        assert!(names.contains(&EXECUTE_TOOL_TOOL.to_string()));
        assert!(!names.contains(&"hidden".to_string()));
    }

    #[test]
    fn discovery_mode_lists_exactly_the_two_discovery_tools() {
        let tmp = TempDir::new().unwrap();
        write_tool(tmp.path(), "pub", "listed");
        let server = McpServer::new(tmp.path(), tmp.path().join(".lib"));
        let names: Vec<_> = server.tools_list(true).into_iter().map(|t| t.name).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&TOOL_SEARCH_TOOL.to_string()));
        assert!(names.contains(&EXECUTE_TOOL_TOOL.to_string()));
    }

    #[test]
    fn discovery_mode_is_never_empty_even_with_an_empty_tools_root() {
        let tmp = TempDir::new().unwrap();
        let server = McpServer::new(tmp.path(), tmp.path().join(".lib"));
        let names: Vec<_> = server.tools_list(true).into_iter().map(|t| t.name).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&TOOL_SEARCH_TOOL.to_string()));
        assert!(names.contains(&EXECUTE_TOOL_TOOL.to_string()));
    }

    #[tokio::test]
    async fn execute_tool_runs_a_discovered_tool() {
        let tmp = TempDir::new().unwrap();
        write_tool(tmp.path(), "hidden", "on-demand");
        let server = McpServer::new(tmp.path(), tmp.path().join(".lib"));
        let out = server.execute_tool("hidden", HashMap::new()).await.unwrap();
        assert_eq!(out, "ok");
    }

    #[tokio::test]
    async fn execute_code_runs_raw_script() {
        let tmp = TempDir::new().unwrap();
        let server = McpServer::new(tmp.path(), tmp.path().join(".lib"));
        let mut args = HashMap::new();
        args.insert("code".to_string(), Value::String("return_string(\"direct\")".to_string()));
        let out = server.execute_tool(EXECUTE_CODE_TOOL, args).await.unwrap();
        assert_eq!(out, "direct");
    }

    #[test]
    fn search_respects_visibility_outside_discovery_mode() {
        let tmp = TempDir::new().unwrap();
        write_tool(tmp.path(), "pub", "listed");
        write_tool(tmp.path(), "hidden", "on-demand");
        let server = McpServer::new(tmp.path(), tmp.path().join(".lib"));
        let results = server.search("d", false);
        let names: Vec<_> = results.into_iter().map(|t| t.name).collect();
        assert!(names.contains(&"hidden".to_string()));
        assert!(!names.contains(&"pub".to_string()));
    }
}
