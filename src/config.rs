//! TOML configuration loading.
//!
//! The gateway needs a real, load-bearing config layer (providers, bind
//! address, bearer token) unlike the teacher's own single-field
//! `thought_chain_dir` setting, so this module pulls in `toml` rather than
//! staying parse-free. Field defaults follow the `#[serde(default = "fn")]`
//! convention used by the config-struct shapes of proxy/gateway-adjacent
//! crates in the wider example pool.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_tools_root() -> PathBuf {
    PathBuf::from("./tools")
}

fn default_libraries_root() -> PathBuf {
    PathBuf::from("./tools/.lib")
}

fn default_health_reconcile_period_secs() -> u64 {
    30
}

fn default_model_refresh_period_secs() -> u64 {
    0
}

/// Which `model_source` a provider draws its model list from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSourceKind {
    /// Model list comes from `static_models` in config.
    Static,
    /// Model list is fetched via `list_models` at refresh time.
    Dynamic,
}

/// One configured upstream provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub model_source: ModelSourceKind,
    #[serde(default)]
    pub static_models: Vec<String>,
    #[serde(default)]
    pub allow: Option<Vec<String>>,
    #[serde(default)]
    pub deny: Option<Vec<String>>,
    #[serde(default)]
    pub native_responses: bool,
}

fn default_true() -> bool {
    true
}

/// Top-level gateway configuration, loaded from a TOML file at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default = "default_tools_root")]
    pub tools_root: PathBuf,
    #[serde(default = "default_libraries_root")]
    pub libraries_root: PathBuf,
    #[serde(default = "default_health_reconcile_period_secs")]
    pub health_reconcile_period_secs: u64,
    /// Accepted for forward compatibility (SPEC_FULL.md §9 open question);
    /// not currently wired to the refresh-on-every-call behavior.
    #[serde(default = "default_model_refresh_period_secs")]
    pub model_refresh_period_secs: u64,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            bind_addr: default_bind_addr(),
            bearer_token: None,
            tools_root: default_tools_root(),
            libraries_root: default_libraries_root(),
            health_reconcile_period_secs: default_health_reconcile_period_secs(),
            model_refresh_period_secs: default_model_refresh_period_secs(),
            providers: Vec::new(),
        }
    }
}

/// Failure loading or parsing a config file.
#[derive(Debug)]
pub enum ConfigError {
    Read(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read(err) => write!(f, "failed to read config file: {}", err),
            ConfigError::Parse(err) => write!(f, "failed to parse config file: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl GatewayConfig {
    /// Load and parse a TOML config file from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref()).map_err(ConfigError::Read)?;
        toml::from_str(&text).map_err(ConfigError::Parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.tools_root, PathBuf::from("./tools"));
        assert_eq!(cfg.health_reconcile_period_secs, 30);
        assert!(cfg.providers.is_empty());
    }

    #[test]
    fn parses_minimal_toml() {
        let toml_text = r#"
            bind_addr = "127.0.0.1:9000"

            [[providers]]
            name = "local"
            base_url = "http://localhost:11434/v1"
            model_source = "static"
            static_models = ["llama3"]
        "#;
        let cfg: GatewayConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:9000");
        assert_eq!(cfg.providers.len(), 1);
        assert_eq!(cfg.providers[0].model_source, ModelSourceKind::Static);
        assert!(cfg.providers[0].enabled);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = GatewayConfig::load("/nonexistent/path/to/config.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read(_)));
    }
}
