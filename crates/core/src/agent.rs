//! Per-invocation engine configuration.

use serde::{Deserialize, Serialize};

use crate::guardrail::GuardrailPolicy;
use crate::provider::ModelTier;

/// What triggered a loop invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationSource {
    /// Interactive chat channel
    #[default]
    Chat,
    /// Asynchronous job queue
    Queue,
    /// Inbound webhook
    Webhook,
    /// Autonomous heartbeat cycle
    Heartbeat,
    /// Another agent on the same team (handoff or escalation)
    Team,
    /// Command line
    Cli,
}

impl std::fmt::Display for InvocationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InvocationSource::Chat => "chat",
            InvocationSource::Queue => "queue",
            InvocationSource::Webhook => "webhook",
            InvocationSource::Heartbeat => "heartbeat",
            InvocationSource::Team => "team",
            InvocationSource::Cli => "cli",
        };
        f.write_str(s)
    }
}

/// Retry policy for a single action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Growth factor between consecutive delays (>= 1.0)
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound for any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    500
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// `initial * multiplier^(attempt-1)`, capped at `max_delay_ms`. Never
    /// decreases as `attempt` grows.
    pub fn delay_after(&self, attempt: u32) -> std::time::Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let factor = self.multiplier.max(1.0).powi(exp);
        let raw = (self.initial_delay_ms as f64) * factor;
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        std::time::Duration::from_millis(capped as u64)
    }
}

/// Everything one Engine run needs, passed explicitly.
///
/// The Engine never reads the environment; callers (CLI, heartbeat, team
/// runtime) build this from their own configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub user_id: String,
    pub workspace_id: String,
    /// IANA name, informational only
    pub timezone: String,
    pub source: InvocationSource,
    /// Step-count ceiling; each executed step counts once
    pub max_loop_iterations: u32,
    /// Cost ceiling for model selection
    pub model_tier: ModelTier,
    pub guardrails: GuardrailPolicy,
    /// Identity written to every audit entry
    pub agent_id: String,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl EngineConfig {
    pub fn new(user_id: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            workspace_id: workspace_id.into(),
            timezone: "UTC".into(),
            source: InvocationSource::default(),
            max_loop_iterations: 10,
            model_tier: ModelTier::Premium,
            guardrails: GuardrailPolicy::default(),
            agent_id: "mindloop".into(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_source(mut self, source: InvocationSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    pub fn with_model_tier(mut self, tier: ModelTier) -> Self {
        self.model_tier = tier;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_capped() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 300,
        };
        let delays: Vec<u64> = (1..=4).map(|n| retry.delay_after(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 300, 300]);
    }

    #[test]
    fn backoff_never_shrinks_with_bad_multiplier() {
        let retry = RetryConfig {
            multiplier: 0.5,
            ..RetryConfig::default()
        };
        assert!(retry.delay_after(2) >= retry.delay_after(1));
    }

    #[test]
    fn engine_config_defaults_are_explicit() {
        let config = EngineConfig::new("u1", "w1").with_source(InvocationSource::Heartbeat);
        assert_eq!(config.source, InvocationSource::Heartbeat);
        assert_eq!(config.max_loop_iterations, 10);
        assert_eq!(config.source.to_string(), "heartbeat");
    }
}
