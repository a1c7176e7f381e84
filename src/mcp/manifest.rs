//! Tool manifests: the declarative per-tool-directory file (§3, §6).
//!
//! Parsing and the filesystem scan live together here because the scan's
//! defect-handling ("drop silently with a warning") is defined entirely in
//! terms of what counts as a valid manifest.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::Deserialize;

const MANIFEST_FILE_NAME: &str = "manifest.toml";

/// A tool parameter's declared type. Closed sum type per DESIGN NOTES §9:
/// unknown/unrecognized type strings are treated as `string` rather than
/// rejected, via serde's `#[serde(other)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Boolean,
    #[serde(other)]
    #[allow(non_camel_case_types)]
    UnknownTreatedAsString,
}

impl ParameterType {
    pub fn is_string_like(self) -> bool {
        matches!(self, ParameterType::String | ParameterType::UnknownTreatedAsString)
    }
}

/// One parameter declared in a manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

/// Visibility of a tool: whether it appears in `tools/list` directly, or
/// only via `tool_search`/`execute_tool` (§4.H, Glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    Listed,
    OnDemand,
}

impl Default for Visibility {
    fn default() -> Self {
        Visibility::Listed
    }
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    name: Option<String>,
    description: String,
    #[serde(default)]
    keywords: Vec<String>,
    script: String,
    #[serde(default)]
    visibility: Visibility,
    #[serde(default)]
    parameters: HashMap<String, ParameterSpec>,
}

/// A parsed, validated tool manifest plus the absolute path to its script.
#[derive(Debug, Clone)]
pub struct ToolManifest {
    pub name: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub visibility: Visibility,
    pub parameters: HashMap<String, ParameterSpec>,
    pub script_path: PathBuf,
}

#[derive(Debug)]
enum ScanDefect {
    MissingManifest,
    Parse(toml::de::Error),
    ScriptMissing(PathBuf),
}

fn load_one(tool_dir: &Path) -> Result<ToolManifest, ScanDefect> {
    let manifest_path = tool_dir.join(MANIFEST_FILE_NAME);
    let text = fs::read_to_string(&manifest_path).map_err(|_| ScanDefect::MissingManifest)?;
    let raw: RawManifest = toml::from_str(&text).map_err(ScanDefect::Parse)?;

    let dir_name = tool_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = raw.name.unwrap_or(dir_name);

    let script_path = tool_dir.join(&raw.script);
    if !script_path.is_file() {
        return Err(ScanDefect::ScriptMissing(script_path));
    }

    Ok(ToolManifest {
        name,
        description: raw.description,
        keywords: raw.keywords,
        visibility: raw.visibility,
        parameters: raw.parameters,
        script_path,
    })
}

/// Walk `tools_root` one level deep, parsing every manifest found.
///
/// Any directory without a valid manifest, with a manifest that fails to
/// parse, or whose referenced script is missing is skipped with a
/// `warn!` and never surfaced (§4.G). A manifest declaring a `name`
/// already claimed by an earlier directory (scanned in directory-listing
/// order) is also dropped with a warning — the Open Question decision in
/// DESIGN.md: reject duplicates at load time rather than last-write-wins.
pub fn scan(tools_root: &Path) -> Vec<ToolManifest> {
    let mut seen_names = std::collections::HashSet::new();
    let mut manifests = Vec::new();

    let entries = match fs::read_dir(tools_root) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("could not read tools root {}: {}", tools_root.display(), err);
            return manifests;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match load_one(&path) {
            Ok(manifest) => {
                if !seen_names.insert(manifest.name.clone()) {
                    warn!("duplicate tool name \"{}\" in {}, dropping", manifest.name, path.display());
                    continue;
                }
                manifests.push(manifest);
            }
            Err(ScanDefect::MissingManifest) => {
                // A tool directory without a manifest file isn't a defect;
                // it simply isn't a tool directory.
            }
            Err(ScanDefect::Parse(err)) => {
                warn!("failed to parse manifest in {}: {}", path.display(), err);
            }
            Err(ScanDefect::ScriptMissing(script_path)) => {
                warn!("tool script missing: {}", script_path.display());
            }
        }
    }

    manifests
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_tool(root: &Path, dir: &str, manifest: &str, script: &str) {
        let tool_dir = root.join(dir);
        fs::create_dir_all(&tool_dir).unwrap();
        fs::write(tool_dir.join("manifest.toml"), manifest).unwrap();
        fs::write(tool_dir.join("tool.expr"), script).unwrap();
    }

    #[test]
    fn valid_manifest_is_scanned() {
        let tmp = TempDir::new().unwrap();
        write_tool(
            tmp.path(),
            "greet",
            r#"
                description = "says hello"
                script = "tool.expr"
            "#,
            "1",
        );
        let manifests = scan(tmp.path());
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].name, "greet");
        assert_eq!(manifests[0].visibility, Visibility::Listed);
    }

    #[test]
    fn missing_script_is_dropped() {
        let tmp = TempDir::new().unwrap();
        let tool_dir = tmp.path().join("broken");
        fs::create_dir_all(&tool_dir).unwrap();
        fs::write(
            tool_dir.join("manifest.toml"),
            r#"description = "broken"
script = "missing.expr""#,
        )
        .unwrap();
        assert!(scan(tmp.path()).is_empty());
    }

    #[test]
    fn malformed_toml_is_dropped() {
        let tmp = TempDir::new().unwrap();
        let tool_dir = tmp.path().join("broken");
        fs::create_dir_all(&tool_dir).unwrap();
        fs::write(tool_dir.join("manifest.toml"), "not valid [[[ toml").unwrap();
        assert!(scan(tmp.path()).is_empty());
    }

    #[test]
    fn duplicate_names_keep_only_the_first_scanned() {
        let tmp = TempDir::new().unwrap();
        write_tool(tmp.path(), "a_dir", r#"name = "dup"
description = "first"
script = "tool.expr""#, "1");
        write_tool(tmp.path(), "b_dir", r#"name = "dup"
description = "second"
script = "tool.expr""#, "1");
        let manifests = scan(tmp.path());
        assert_eq!(manifests.len(), 1);
    }

    #[test]
    fn empty_tools_root_yields_no_manifests() {
        let tmp = TempDir::new().unwrap();
        assert!(scan(tmp.path()).is_empty());
    }

    #[test]
    fn unknown_parameter_type_is_treated_as_string() {
        let tmp = TempDir::new().unwrap();
        write_tool(
            tmp.path(),
            "weird",
            r#"
                description = "has an odd type"
                script = "tool.expr"

                [parameters.x]
                type = "timestamp"
                description = "an oddly typed parameter"
            "#,
            "1",
        );
        let manifests = scan(tmp.path());
        let param = &manifests[0].parameters["x"];
        assert!(param.param_type.is_string_like());
    }
}
