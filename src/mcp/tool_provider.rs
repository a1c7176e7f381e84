//! The Tool Provider (§4.G): filesystem-backed tool discovery and
//! invocation.
//!
//! "Two factories: `listed` and `on-demand`." Both wrap the same
//! underlying scan and differ only in the visibility they keep; tools are
//! re-read from disk on every call per the spec's freshness contract
//! (§9 allows caching keyed on directory mtime, but this implementation
//! keeps the literal always-rescan behavior since the tools root is not
//! expected to be large).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::error::GatewayError;
use crate::mcp::manifest::{self, ToolManifest, Visibility};
use crate::mcp::script_env::{self, ToolHost};

/// A filesystem-backed source of tools, filtered to one visibility.
#[derive(Clone)]
pub struct ToolProvider {
    tools_root: PathBuf,
    libraries_root: PathBuf,
    visibility_filter: Option<Visibility>,
}

impl ToolProvider {
    /// A provider that only ever yields `listed` tools.
    pub fn listed(tools_root: impl Into<PathBuf>, libraries_root: impl Into<PathBuf>) -> Self {
        ToolProvider {
            tools_root: tools_root.into(),
            libraries_root: libraries_root.into(),
            visibility_filter: Some(Visibility::Listed),
        }
    }

    /// A provider that only ever yields `on-demand` tools.
    pub fn on_demand(tools_root: impl Into<PathBuf>, libraries_root: impl Into<PathBuf>) -> Self {
        ToolProvider {
            tools_root: tools_root.into(),
            libraries_root: libraries_root.into(),
            visibility_filter: Some(Visibility::OnDemand),
        }
    }

    /// A provider with no visibility filter, used by invocation lookup and
    /// by the discovery-mode binding which collapses everything onto the
    /// on-demand side regardless of each manifest's declared visibility.
    pub fn unfiltered(tools_root: impl Into<PathBuf>, libraries_root: impl Into<PathBuf>) -> Self {
        ToolProvider {
            tools_root: tools_root.into(),
            libraries_root: libraries_root.into(),
            visibility_filter: None,
        }
    }

    /// Re-scan the tools root and return every manifest matching this
    /// provider's visibility filter.
    pub fn list(&self) -> Vec<ToolManifest> {
        let all = manifest::scan(&self.tools_root);
        match self.visibility_filter {
            Some(visibility) => all.into_iter().filter(|m| m.visibility == visibility).collect(),
            None => all,
        }
    }

    /// Keyword search over this provider's manifests: matches the query
    /// (case-insensitively) against the name, description, or keywords.
    pub fn search(&self, query: &str) -> Vec<ToolManifest> {
        let query = query.to_lowercase();
        self.list()
            .into_iter()
            .filter(|m| {
                m.name.to_lowercase().contains(&query)
                    || m.description.to_lowercase().contains(&query)
                    || m.keywords.iter().any(|k| k.to_lowercase().contains(&query))
            })
            .collect()
    }

    /// Re-scan, locate `name`, read its script fresh, and evaluate it in a
    /// freshly constructed sandbox (§5: "no shared globals between
    /// invocations").
    pub async fn invoke(
        &self,
        name: &str,
        args: HashMap<String, Value>,
        host: Arc<dyn ToolHost>,
    ) -> Result<String, GatewayError> {
        let manifest = manifest::scan(&self.tools_root)
            .into_iter()
            .find(|m| m.name == name)
            .ok_or_else(|| GatewayError::ToolNotFound(name.to_string()))?;

        let script_source = std::fs::read_to_string(&manifest.script_path)
            .map_err(|err| GatewayError::ToolEvaluation(format!("could not read script: {err}")))?;

        script_env::execute(&manifest, &script_source, args, &self.libraries_root, host).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::script_env::NoopToolHost;
    use std::fs;
    use tempfile::TempDir;

    fn write_tool(root: &std::path::Path, dir: &str, manifest: &str) {
        let tool_dir = root.join(dir);
        fs::create_dir_all(&tool_dir).unwrap();
        fs::write(tool_dir.join("manifest.toml"), manifest).unwrap();
        fs::write(tool_dir.join("tool.expr"), "return_string(\"ok\")").unwrap();
    }

    #[test]
    fn listed_provider_excludes_on_demand_tools() {
        let tmp = TempDir::new().unwrap();
        write_tool(tmp.path(), "pub_tool", r#"description = "d"
script = "tool.expr"
visibility = "listed""#);
        write_tool(tmp.path(), "hidden_tool", r#"description = "d"
script = "tool.expr"
visibility = "on-demand""#);

        let listed = ToolProvider::listed(tmp.path(), tmp.path().join(".lib"));
        let names: Vec<_> = listed.list().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["pub_tool"]);
    }

    #[test]
    fn on_demand_provider_excludes_listed_tools() {
        let tmp = TempDir::new().unwrap();
        write_tool(tmp.path(), "pub_tool", r#"description = "d"
script = "tool.expr"
visibility = "listed""#);
        write_tool(tmp.path(), "hidden_tool", r#"description = "searchable thing"
script = "tool.expr"
visibility = "on-demand""#);

        let on_demand = ToolProvider::on_demand(tmp.path(), tmp.path().join(".lib"));
        let names: Vec<_> = on_demand.list().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["hidden_tool"]);
    }

    #[test]
    fn search_matches_description_keywords() {
        let tmp = TempDir::new().unwrap();
        write_tool(tmp.path(), "hidden_tool", r#"description = "searchable thing"
script = "tool.expr"
visibility = "on-demand""#);
        let on_demand = ToolProvider::on_demand(tmp.path(), tmp.path().join(".lib"));
        assert_eq!(on_demand.search("searchable").len(), 1);
        assert_eq!(on_demand.search("nonexistent-keyword").len(), 0);
    }

    #[tokio::test]
    async fn invoke_unknown_tool_is_tool_not_found() {
        let tmp = TempDir::new().unwrap();
        let provider = ToolProvider::unfiltered(tmp.path(), tmp.path().join(".lib"));
        let host: Arc<dyn crate::mcp::script_env::ToolHost> = Arc::new(NoopToolHost);
        let err = provider.invoke("nope", HashMap::new(), host).await.unwrap_err();
        assert!(matches!(err, GatewayError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn invoke_runs_the_script_and_returns_its_output() {
        let tmp = TempDir::new().unwrap();
        write_tool(tmp.path(), "greeter", r#"description = "d"
script = "tool.expr""#);
        let provider = ToolProvider::unfiltered(tmp.path(), tmp.path().join(".lib"));
        let host: Arc<dyn crate::mcp::script_env::ToolHost> = Arc::new(NoopToolHost);
        let output = provider.invoke("greeter", HashMap::new(), host).await.unwrap();
        assert_eq!(output, "ok");
    }
}
