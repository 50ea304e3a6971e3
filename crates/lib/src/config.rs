//! Configuration types and loading.
//!
//! Config is loaded once at startup from a JSON file (e.g. `~/.taskgate/config.json`) and a
//! few environment overrides, then passed by reference to every component. Nothing outside
//! this module reads the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Text-generation provider used to translate tasks into commands.
    #[serde(default)]
    pub translator: TranslatorConfig,

    /// Script location and child-process limits.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Shared data directory (read endpoint root, and the only place path arguments may point).
    #[serde(default)]
    pub data: DataConfig,

    /// Script catalog override.
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// Gateway bind, port, and auth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// HTTP port (default 8000).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Auth settings. When absent, defaults to no auth for loopback bind.
    #[serde(default)]
    pub auth: GatewayAuthConfig,
}

/// Gateway auth: bearer token or none (loopback-only when none).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAuthConfig {
    /// "none" = no shared secret (only safe when bind is loopback). "token" = require `Authorization: Bearer`.
    #[serde(default)]
    pub mode: GatewayAuthMode,

    /// Shared secret. Overridden by TASKGATE_GATEWAY_TOKEN env.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayAuthMode {
    /// No auth; allow only when bind is loopback.
    #[default]
    None,

    /// Require a bearer token matching the configured token on /run and /read.
    Token,
}

/// Which text-generation API the translator talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslatorBackend {
    /// OpenAI-compatible /chat/completions (OpenAI, proxies, LM Studio, vLLM).
    #[default]
    Openai,
    /// Ollama /api/chat.
    Ollama,
}

/// Translator provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslatorConfig {
    #[serde(default)]
    pub backend: TranslatorBackend,

    /// Base URL; defaults per backend (https://api.openai.com/v1 or http://127.0.0.1:11434).
    #[serde(default)]
    pub base_url: Option<String>,

    /// Model id passed as-is to the backend; defaults per backend (gpt-4o-mini or llama3.2:latest).
    #[serde(default)]
    pub model: Option<String>,

    /// Bearer token for the provider. Overridden by TASKGATE_API_TOKEN env.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Whole-request timeout in seconds (default 15).
    #[serde(default = "default_translator_timeout_secs")]
    pub timeout_secs: u64,
}

/// Where the approved scripts live and how they are run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfig {
    /// Scripts directory. Relative paths are resolved against the config file's parent; default is `scripts` next to the config file.
    #[serde(default)]
    pub scripts_dir: Option<PathBuf>,

    /// Interpreter the script path is handed to (default "sh").
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Wall-clock limit for one script run in seconds (default 15).
    #[serde(default = "default_execution_timeout_secs")]
    pub timeout_secs: u64,

    /// Cap per captured stream (default 1 MiB).
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

/// Data root settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataConfig {
    /// Data root (default "/data").
    #[serde(default = "default_data_root")]
    pub root: PathBuf,
}

/// Script catalog settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    /// YAML catalog replacing the built-in one. Relative paths are resolved against the config file's parent.
    #[serde(default)]
    pub catalog: Option<PathBuf>,
}

fn default_gateway_port() -> u16 {
    8000
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_translator_timeout_secs() -> u64 {
    15
}

fn default_interpreter() -> String {
    "sh".to_string()
}

fn default_execution_timeout_secs() -> u64 {
    15
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}

fn default_data_root() -> PathBuf {
    PathBuf::from("/data")
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            auth: GatewayAuthConfig::default(),
        }
    }
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            backend: TranslatorBackend::default(),
            base_url: None,
            model: None,
            api_token: None,
            timeout_secs: default_translator_timeout_secs(),
        }
    }
}

impl TranslatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            scripts_dir: None,
            interpreter: default_interpreter(),
            timeout_secs: default_execution_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            root: default_data_root(),
        }
    }
}

/// Non-empty, trimmed value of an env var.
fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn trimmed_nonempty(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the gateway token: env TASKGATE_GATEWAY_TOKEN overrides config.
pub fn resolve_gateway_token(config: &Config) -> Option<String> {
    env_nonempty("TASKGATE_GATEWAY_TOKEN")
        .or_else(|| trimmed_nonempty(config.gateway.auth.token.as_ref()))
}

/// Resolve the provider API token: env TASKGATE_API_TOKEN overrides config.
pub fn resolve_api_token(config: &Config) -> Option<String> {
    env_nonempty("TASKGATE_API_TOKEN").or_else(|| trimmed_nonempty(config.translator.api_token.as_ref()))
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("TASKGATE_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".taskgate").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used (for resolving the config directory).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

fn config_parent(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

fn resolve_against(config_path: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        config_parent(config_path).join(p)
    }
}

/// Default scripts directory when no override is set: `scripts` subdirectory of the config file's parent.
pub fn scripts_dir(config_path: &Path) -> PathBuf {
    config_parent(config_path).join("scripts")
}

/// Resolve the scripts directory: `execution.scriptsDir` if set (relative paths resolved against the config file's parent), otherwise the default.
pub fn resolve_scripts_dir(config: &Config, config_path: &Path) -> PathBuf {
    match &config.execution.scripts_dir {
        Some(d) if !d.as_os_str().is_empty() => resolve_against(config_path, d),
        _ => scripts_dir(config_path),
    }
}

/// Resolve the catalog override, if any.
pub fn resolve_catalog_path(config: &Config, config_path: &Path) -> Option<PathBuf> {
    config
        .registry
        .catalog
        .as_ref()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| resolve_against(config_path, p))
}
