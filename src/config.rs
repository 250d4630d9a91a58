//! Configuration loading and management.
//!
//! Loads Kira configuration from `./kira.yaml` (or `$KIRA_CONFIG_PATH`).
//! Environment variables override file values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults.
//!
//! The config object is never mutated in place: hot reload builds a fresh
//! [`KiraConfig`] and swaps the `Arc` held by the owning component.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

// ── Top-level config ────────────────────────────────────────────

/// Top-level Kira configuration loaded from YAML.
///
/// Path: `./kira.yaml` or `$KIRA_CONFIG_PATH`.
/// Env vars override file values; file values override defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KiraConfig {
    /// Vault location settings.
    pub vault: VaultConfig,
    /// Core runtime settings (timezone, data directory).
    pub core: CoreConfig,
    /// LLM provider routing.
    pub router: RouterConfig,
    /// Agent graph execution caps.
    pub agent: AgentConfig,
    /// Conversation memory retention.
    pub memory: MemoryConfig,
    /// Optional behavior flags.
    pub features: FeatureFlags,
    /// HTTP agent service settings.
    pub http: HttpConfig,
}

impl KiraConfig {
    /// Load configuration with precedence: env vars > YAML file > defaults.
    ///
    /// Config file path: `$KIRA_CONFIG_PATH` or `./kira.yaml`.
    /// If the file does not exist, returns defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from the YAML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path(|key| std::env::var(key).ok());
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: KiraConfig =
                    serde_yaml::from_str(&contents).context("failed to parse config YAML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(KiraConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve the config file path using a custom env resolver (for testing).
    fn config_path(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        if let Some(p) = env("KIRA_CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("kira.yaml")
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability (avoids unsafe `set_var` in tests).
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // Vault and core.
        if let Some(v) = env("KIRA_VAULT_PATH") {
            self.vault.path = PathBuf::from(v);
        }
        if let Some(v) = env("KIRA_TIMEZONE") {
            self.core.timezone = v;
        }
        if let Some(v) = env("KIRA_DATA_DIR") {
            self.core.data_dir = Some(PathBuf::from(v));
        }

        // Router.
        if let Some(v) = env("KIRA_PLANNING_PROVIDER") {
            self.router.planning_provider = v;
        }
        if let Some(v) = env("KIRA_STRUCTURING_PROVIDER") {
            self.router.structuring_provider = v;
        }
        if let Some(v) = env("KIRA_DEFAULT_PROVIDER") {
            self.router.default_provider = v;
        }
        if let Some(v) = env("KIRA_ENABLE_LOCAL_FALLBACK") {
            match v.parse() {
                Ok(b) => self.router.enable_local_fallback = b,
                Err(_) => tracing::warn!(
                    var = "KIRA_ENABLE_LOCAL_FALLBACK",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        // Anthropic (env var presence creates the provider).
        if let Some(key) = env("KIRA_ANTHROPIC_API_KEY") {
            let model = env("KIRA_ANTHROPIC_MODEL").unwrap_or_else(|| {
                self.router
                    .anthropic
                    .as_ref()
                    .map(|c| c.model.clone())
                    .unwrap_or_else(|| "claude-sonnet-4-20250514".to_string())
            });
            self.router.anthropic = Some(CloudProviderConfig {
                api_key: key,
                model,
            });
        }

        // OpenAI.
        if let Some(key) = env("KIRA_OPENAI_API_KEY") {
            let model = env("KIRA_OPENAI_MODEL").unwrap_or_else(|| {
                self.router
                    .openai
                    .as_ref()
                    .map(|c| c.model.clone())
                    .unwrap_or_else(|| "gpt-4o".to_string())
            });
            self.router.openai = Some(CloudProviderConfig {
                api_key: key,
                model,
            });
        }

        // Ollama (local fallback).
        if let Some(v) = env("KIRA_OLLAMA_URL") {
            self.router.ollama.base_url = v;
        }
        if let Some(v) = env("KIRA_OLLAMA_MODEL") {
            self.router.ollama.model = v;
        }

        // Agent caps.
        if let Some(v) = env("KIRA_MAX_TOOL_CALLS") {
            match v.parse() {
                Ok(n) => self.agent.max_tool_calls = n,
                Err(_) => warn_invalid("KIRA_MAX_TOOL_CALLS", &v),
            }
        }
        if let Some(v) = env("KIRA_MAX_TOKENS") {
            match v.parse() {
                Ok(n) => self.agent.max_tokens = n,
                Err(_) => warn_invalid("KIRA_MAX_TOKENS", &v),
            }
        }
        if let Some(v) = env("KIRA_AGENT_TIMEOUT_SECS") {
            match v.parse() {
                Ok(n) => self.agent.timeout_secs = n,
                Err(_) => warn_invalid("KIRA_AGENT_TIMEOUT_SECS", &v),
            }
        }

        // Memory retention.
        if let Some(v) = env("KIRA_MAX_EXCHANGES") {
            match v.parse() {
                Ok(n) => self.memory.max_exchanges = n,
                Err(_) => warn_invalid("KIRA_MAX_EXCHANGES", &v),
            }
        }
        if let Some(v) = env("KIRA_SESSION_TTL_SECS") {
            match v.parse() {
                Ok(n) => self.memory.session_ttl_secs = n,
                Err(_) => warn_invalid("KIRA_SESSION_TTL_SECS", &v),
            }
        }

        // HTTP.
        if let Some(v) = env("KIRA_HTTP_BIND") {
            self.http.bind_addr = v;
        }
    }

    /// Parse a YAML string into config (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML does not match the config schema.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: KiraConfig =
            serde_yaml::from_str(yaml).context("failed to parse config YAML")?;
        Ok(config)
    }

    /// Resolve the data directory for SQLite, audit logs, and structured logs.
    ///
    /// Explicit `core.data_dir` wins; otherwise the platform data directory
    /// for "kira"; otherwise `./data`.
    pub fn data_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.core.data_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("", "", "kira")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("data"))
    }
}

fn warn_invalid(var: &str, value: &str) {
    tracing::warn!(var, value, "ignoring invalid env override");
}

// ── Vault / core ────────────────────────────────────────────────

/// Vault location settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Vault root directory containing `{kind}s/` entity directories
    /// and `.kira/` metadata.
    pub path: PathBuf,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("vault"),
        }
    }
}

/// Core runtime settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// IANA timezone used for ID generation and local-time windows.
    /// Storage timestamps are always UTC.
    pub timezone: String,
    /// Data directory override; platform default when absent.
    pub data_dir: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            data_dir: None,
        }
    }
}

// ── Router ──────────────────────────────────────────────────────

/// Cloud provider credentials and model selection.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudProviderConfig {
    /// API key for the provider.
    pub api_key: String,
    /// Model identifier to request.
    pub model: String,
}

/// Local provider (Ollama) endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalProviderConfig {
    /// Base URL of the local inference server.
    pub base_url: String,
    /// Model to request.
    pub model: String,
}

impl Default for LocalProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
        }
    }
}

/// LLM provider routing configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Provider name handling `planning` calls.
    pub planning_provider: String,
    /// Provider name handling `structuring` calls.
    pub structuring_provider: String,
    /// Provider name handling everything else.
    pub default_provider: String,
    /// Fall back to the local provider after remote retry exhaustion.
    pub enable_local_fallback: bool,
    /// Anthropic credentials (present enables the provider).
    pub anthropic: Option<CloudProviderConfig>,
    /// OpenAI credentials (present enables the provider).
    pub openai: Option<CloudProviderConfig>,
    /// Local Ollama endpoint, always available as fallback.
    pub ollama: LocalProviderConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            planning_provider: "anthropic".to_string(),
            structuring_provider: "anthropic".to_string(),
            default_provider: "anthropic".to_string(),
            enable_local_fallback: true,
            anthropic: None,
            openai: None,
            ollama: LocalProviderConfig::default(),
        }
    }
}

// ── Agent / memory ──────────────────────────────────────────────

/// Agent graph execution caps.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum tool calls per request.
    pub max_tool_calls: u32,
    /// Maximum response tokens per LLM call.
    pub max_tokens: u32,
    /// LLM sampling temperature.
    pub temperature: f32,
    /// Wall-clock timeout for one graph execution, in seconds.
    pub timeout_secs: u64,
    /// Default per-tool execution timeout, in seconds.
    pub tool_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_calls: 10,
            max_tokens: 4096,
            temperature: 0.2,
            timeout_secs: 60,
            tool_timeout_secs: 20,
        }
    }
}

/// Conversation memory retention settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Exchanges (user+assistant pairs) kept per session.
    pub max_exchanges: usize,
    /// Idle seconds before a session row is evicted.
    pub session_ttl_secs: u64,
    /// Maximum retained sessions (LRU beyond this).
    pub max_sessions: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_exchanges: 10,
            session_ttl_secs: 3600,
            max_sessions: 1000,
        }
    }
}

/// Optional behavior flags.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Auto-create a calendar timebox when a task enters `doing`.
    pub timeboxing: bool,
    /// Ask clarifying questions on ambiguous requests.
    pub clarifications: bool,
    /// Validate the link graph against the filesystem on startup.
    pub graph_validation: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            timeboxing: false,
            clarifications: false,
            graph_validation: true,
        }
    }
}

// ── HTTP ────────────────────────────────────────────────────────

/// HTTP agent service settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Whether the HTTP service is started.
    pub enabled: bool,
    /// Bind address, e.g. `127.0.0.1:8080`.
    pub bind_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: "127.0.0.1:8080".to_string(),
        }
    }
}
