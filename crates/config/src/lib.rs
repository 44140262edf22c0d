//! Configuration loading, validation, and management for mindloop.
//!
//! Loads configuration from `~/.mindloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.
//!
//! The Engine never reads this directly: callers turn an [`AppConfig`] into
//! an explicit [`EngineConfig`] per invocation.

use mindloop_core::agent::{EngineConfig, InvocationSource, RetryConfig};
use mindloop_core::guardrail::{
    GuardrailPolicy, PermissionEffect, PermissionPolicy, RateLimit, RateScope,
};
use mindloop_core::provider::{ModelCatalog, ModelTier};
use mindloop_core::team::AgentDefinition;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.mindloop/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default model-call provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Engine defaults used to build each run's `EngineConfig`
    #[serde(default)]
    pub engine: EngineSection,

    /// Tier → model catalog
    #[serde(default)]
    pub models: ModelCatalog,

    /// Action retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Context window sizing
    #[serde(default)]
    pub context: ContextConfig,

    /// Hard limits, rate limits and permission rules
    #[serde(default = "default_guardrails")]
    pub guardrails: GuardrailPolicy,

    /// Autonomous periodic invocation
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Soul (anchor rules) source
    #[serde(default)]
    pub soul: SoulSection,

    /// External memory backend
    #[serde(default)]
    pub audit: AuditConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Built-in integrations
    #[serde(default)]
    pub integrations: IntegrationsConfig,

    /// Agent roster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<AgentDefinition>,

    /// Teams over the roster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teams: Vec<TeamConfig>,
}

fn default_provider() -> String {
    "openrouter".into()
}

fn default_guardrails() -> GuardrailPolicy {
    GuardrailPolicy {
        hard_limits: Vec::new(),
        rate_limits: vec![RateLimit {
            name: "http-calls".into(),
            capabilities: vec!["http.*".into()],
            max_calls: 30,
            window_secs: 60,
            scope: RateScope::PerUser,
        }],
        permissions: vec![PermissionPolicy {
            name: "autonomous-writes".into(),
            capabilities: vec!["notes.create".into(), "notes.delete".into()],
            sources: vec![InvocationSource::Heartbeat],
            effect: PermissionEffect::RequireApproval,
        }],
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("engine", &self.engine)
            .field("models", &self.models)
            .field("retry", &self.retry)
            .field("context", &self.context)
            .field("guardrails", &self.guardrails)
            .field("heartbeat", &self.heartbeat)
            .field("soul", &self.soul)
            .field("audit", &self.audit)
            .field("providers", &self.providers)
            .field("integrations", &self.integrations)
            .field("agents", &self.agents)
            .field("teams", &self.teams)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Identity written to audit entries for single-agent runs
    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: u32,

    /// Cost ceiling for model selection
    #[serde(default = "default_model_tier")]
    pub model_tier: ModelTier,

    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Used when a trigger does not supply one
    #[serde(default = "default_local")]
    pub user_id: String,

    #[serde(default = "default_local")]
    pub workspace_id: String,
}

fn default_agent_id() -> String {
    "mindloop".into()
}
fn default_max_loop_iterations() -> u32 {
    10
}
fn default_model_tier() -> ModelTier {
    ModelTier::Standard
}
fn default_timezone() -> String {
    "UTC".into()
}
fn default_local() -> String {
    "local".into()
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
            max_loop_iterations: default_max_loop_iterations(),
            model_tier: default_model_tier(),
            timezone: default_timezone(),
            user_id: default_local(),
            workspace_id: default_local(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Token budget of the per-run context window
    #[serde(default = "default_context_tokens")]
    pub max_tokens: usize,

    /// Items older than this are dropped by `clear_expired_items`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_ttl_secs: Option<u64>,

    /// Fragments requested from the search provider per run
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,
}

fn default_context_tokens() -> usize {
    4000
}
fn default_recall_limit() -> usize {
    8
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_context_tokens(),
            item_ttl_secs: None,
            recall_limit: default_recall_limit(),
        }
    }
}

/// Daily window in which heartbeat cycles do work. `start > end` wraps
/// midnight; `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveHours {
    pub start: u32,
    pub end: u32,
    /// Offset of the user's local time from UTC
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for ActiveHours {
    fn default() -> Self {
        Self {
            start: 8,
            end: 22,
            utc_offset_minutes: 0,
        }
    }
}

/// One configured heartbeat check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckConfig {
    /// Surface events waiting on integrations
    PendingEvents {
        #[serde(default)]
        urgent_only: bool,
    },
    /// Surface failed steps in the audit log
    RecentFailures {
        #[serde(default = "default_lookback_minutes")]
        lookback_minutes: i64,
    },
    /// A prompt run every cycle
    StandingTask { name: String, prompt: String },
}

fn default_lookback_minutes() -> i64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_heartbeat_interval")]
    pub interval_minutes: u32,

    #[serde(default)]
    pub active_hours: ActiveHours,

    /// Cap on Engine invocations per cycle
    #[serde(default = "default_max_runs")]
    pub max_runs_per_cycle: usize,

    #[serde(default = "default_checks")]
    pub checks: Vec<CheckConfig>,
}

fn default_heartbeat_interval() -> u32 {
    30
}
fn default_max_runs() -> usize {
    3
}
fn default_checks() -> Vec<CheckConfig> {
    vec![
        CheckConfig::PendingEvents { urgent_only: false },
        CheckConfig::RecentFailures {
            lookback_minutes: default_lookback_minutes(),
        },
    ]
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: default_heartbeat_interval(),
            active_hours: ActiveHours::default(),
            max_runs_per_cycle: default_max_runs(),
            checks: default_checks(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SoulSection {
    /// TOML file with the soul config; built-in defaults when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// `memory`, `jsonl` or `sqlite`
    #[serde(default = "default_audit_backend")]
    pub backend: String,

    /// File path for `jsonl` / `sqlite`; defaults under the config dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_audit_backend() -> String {
    "jsonl".into()
}

const AUDIT_BACKENDS: &[&str] = &["memory", "jsonl", "sqlite"];

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            backend: default_audit_backend(),
            path: None,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Per-call wall-clock timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationsConfig {
    #[serde(default = "default_true")]
    pub notes: bool,

    #[serde(default)]
    pub http: HttpIntegrationConfig,
}

fn default_true() -> bool {
    true
}

impl Default for IntegrationsConfig {
    fn default() -> Self {
        Self {
            notes: true,
            http: HttpIntegrationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpIntegrationConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Allowed endpoint patterns (`api.example.com`, `*.example.com`, `*`)
    #[serde(default)]
    pub allowed_endpoints: Vec<String>,

    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

fn default_http_timeout() -> u64 {
    15
}

impl Default for HttpIntegrationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_endpoints: Vec::new(),
            timeout_secs: default_http_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamConfig {
    pub id: String,
    pub name: String,
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.mindloop/config.toml).
    ///
    /// Environment overrides:
    /// - `MINDLOOP_API_KEY`, then `OPENROUTER_API_KEY`, then `OPENAI_API_KEY`
    ///   (only when no key is set in the file)
    /// - `MINDLOOP_PROVIDER`
    /// - `MINDLOOP_MAX_ITERATIONS`
    /// - `MINDLOOP_AUDIT_PATH`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`, then re-validate.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.api_key.is_none() {
            self.api_key = lookup("MINDLOOP_API_KEY")
                .or_else(|| lookup("OPENROUTER_API_KEY"))
                .or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(provider) = lookup("MINDLOOP_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(raw) = lookup("MINDLOOP_MAX_ITERATIONS") {
            self.engine.max_loop_iterations = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "MINDLOOP_MAX_ITERATIONS must be a positive integer, got '{raw}'"
                ))
            })?;
        }

        if let Some(path) = lookup("MINDLOOP_AUDIT_PATH") {
            self.audit.path = Some(PathBuf::from(path));
        }

        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".mindloop")
    }

    /// Where the audit log lives when `audit.path` is unset.
    pub fn audit_path(&self) -> PathBuf {
        self.audit.path.clone().unwrap_or_else(|| {
            let file = if self.audit.backend == "sqlite" {
                "audit.db"
            } else {
                "audit.jsonl"
            };
            Self::config_dir().join(file)
        })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.engine.max_loop_iterations == 0 {
            return fail("engine.max_loop_iterations must be > 0".into());
        }
        if self.retry.max_attempts == 0 {
            return fail("retry.max_attempts must be > 0".into());
        }
        if self.retry.multiplier < 1.0 {
            return fail("retry.multiplier must be >= 1.0".into());
        }
        if self.context.max_tokens == 0 {
            return fail("context.max_tokens must be > 0".into());
        }

        let hours = &self.heartbeat.active_hours;
        if hours.start > 23 || hours.end > 23 {
            return fail("heartbeat.active_hours start/end must be within 0..=23".into());
        }
        if hours.start == hours.end {
            return fail("heartbeat.active_hours start and end must differ".into());
        }

        for limit in &self.guardrails.rate_limits {
            if limit.max_calls == 0 || limit.window_secs == 0 {
                return fail(format!(
                    "rate limit '{}' needs max_calls > 0 and window_secs > 0",
                    limit.name
                ));
            }
        }

        if !AUDIT_BACKENDS.contains(&self.audit.backend.as_str()) {
            return fail(format!(
                "unknown audit backend '{}' (expected one of {})",
                self.audit.backend,
                AUDIT_BACKENDS.join(", ")
            ));
        }

        for team in &self.teams {
            if let Some(missing) = team
                .members
                .iter()
                .find(|m| !self.agents.iter().any(|a| &a.id == *m))
            {
                return fail(format!(
                    "team '{}' lists unknown agent '{missing}'",
                    team.id
                ));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Build the explicit per-run configuration.
    pub fn engine_config(&self, source: InvocationSource) -> EngineConfig {
        EngineConfig {
            user_id: self.engine.user_id.clone(),
            workspace_id: self.engine.workspace_id.clone(),
            timezone: self.engine.timezone.clone(),
            source,
            max_loop_iterations: self.engine.max_loop_iterations,
            model_tier: self.engine.model_tier,
            guardrails: self.guardrails.clone(),
            agent_id: self.engine.agent_id.clone(),
            retry: self.retry.clone(),
        }
    }

    /// Generate a default config TOML string (for `config --init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            engine: EngineSection::default(),
            models: ModelCatalog::default(),
            retry: RetryConfig::default(),
            context: ContextConfig::default(),
            guardrails: default_guardrails(),
            heartbeat: HeartbeatConfig::default(),
            soul: SoulSection::default(),
            audit: AuditConfig::default(),
            providers: HashMap::new(),
            integrations: IntegrationsConfig::default(),
            agents: Vec::new(),
            teams: Vec::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
