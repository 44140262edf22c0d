//! Capability traits for the external collaborators the loop consumes.
//!
//! The Engine depends only on these interfaces:
//! - [`MemorySearchProvider`]: used by Perception
//! - [`IntegrationProvider`]: used by Perception (discovery) and Action
//! - [`ModelProvider`]: used by Action for reasoning steps
//!
//! Concrete implementations live in `mindloop-memory`,
//! `mindloop-integrations` and `mindloop-providers`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IntegrationError, ProviderError};
use crate::message::Message;
use crate::perception::{MemoryFragment, PendingEvent};
use crate::plan::ActionResult;

// ── Model calls ─────────────────────────────────────────────────────────────

/// Cost/quality tier of a model call. Ordered cheapest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Economy,
    #[default]
    Standard,
    Premium,
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModelTier::Economy => "economy",
            ModelTier::Standard => "standard",
            ModelTier::Premium => "premium",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "economy" => Ok(ModelTier::Economy),
            "standard" => Ok(ModelTier::Standard),
            "premium" => Ok(ModelTier::Premium),
            other => Err(format!("unknown model tier '{other}'")),
        }
    }
}

/// Which concrete model serves each tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCatalog {
    #[serde(default = "default_economy")]
    pub economy: String,
    #[serde(default = "default_standard")]
    pub standard: String,
    #[serde(default = "default_premium")]
    pub premium: String,
}

fn default_economy() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_standard() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_premium() -> String {
    "anthropic/claude-opus-4".into()
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            economy: default_economy(),
            standard: default_standard(),
            premium: default_premium(),
        }
    }
}

impl ModelCatalog {
    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Economy => &self.economy,
            ModelTier::Standard => &self.standard,
            ModelTier::Premium => &self.premium,
        }
    }
}

/// The model chosen for a run, including any downgrade forced by the
/// configured cost ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedModel {
    /// Tier the intent called for.
    pub requested_tier: ModelTier,
    /// Tier actually used.
    pub tier: ModelTier,
    /// Concrete model name for `tier`.
    pub model: String,
    /// `tier < requested_tier` because of the cost ceiling.
    pub downgraded: bool,
}

/// A request to a model-call provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    pub tier: ModelTier,
    /// Concrete model name; providers may override per tier.
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.3
}

/// A complete model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: String,
    /// Which model actually responded (may differ from requested).
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
}

/// The model-call capability.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openrouter").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn call(&self, request: ModelRequest) -> std::result::Result<ModelResponse, ProviderError>;

    /// Send a request and get a stream of text deltas.
    ///
    /// Default implementation calls `call()` and emits the whole text as one chunk.
    async fn stream(
        &self,
        request: ModelRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<String, ProviderError>>,
        ProviderError,
    > {
        let response = self.call(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx.send(Ok(response.text)).await;
        Ok(rx)
    }

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

// ── Memory search ───────────────────────────────────────────────────────────

/// Narrowing options for a memory search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub min_score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
}

fn default_limit() -> usize {
    10
}

impl Default for SearchFilters {
    fn default() -> Self {
        Self {
            user_id: None,
            workspace_id: None,
            limit: default_limit(),
            min_score: 0.0,
            since: None,
        }
    }
}

/// The memory/search capability used by Perception and context-search steps.
#[async_trait]
pub trait MemorySearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> std::result::Result<Vec<MemoryFragment>, ProviderError>;
}

// ── Integrations ────────────────────────────────────────────────────────────

/// How expensive invoking a capability is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostClass {
    #[default]
    Free,
    Metered,
    Costly,
}

/// One operation an integration exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Dotted name, `<integration>.<operation>`.
    pub name: String,
    pub description: String,
    /// Words in a query that suggest this capability.
    #[serde(default)]
    pub keywords: Vec<String>,
    pub reversible: bool,
    pub side_effecting: bool,
    #[serde(default)]
    pub cost: CostClass,
}

impl CapabilityDescriptor {
    /// Whether a plan using this capability needs a human first.
    pub fn is_sensitive(&self) -> bool {
        !self.reversible || self.cost == CostClass::Costly
    }
}

/// A reachable integration and what it can do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationInfo {
    pub name: String,
    pub capabilities: Vec<CapabilityDescriptor>,
}

/// The integration capability used by Action.
#[async_trait]
pub trait IntegrationProvider: Send + Sync {
    /// Integrations currently reachable for this process.
    async fn list_active(&self) -> std::result::Result<Vec<IntegrationInfo>, IntegrationError>;

    /// Invoke a capability with JSON arguments.
    async fn invoke(
        &self,
        capability: &str,
        args: &serde_json::Value,
    ) -> std::result::Result<ActionResult, IntegrationError>;

    /// Events waiting on integrations. Default: none.
    async fn pending_events(&self) -> std::result::Result<Vec<PendingEvent>, IntegrationError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_order_by_cost() {
        assert!(ModelTier::Economy < ModelTier::Standard);
        assert!(ModelTier::Standard < ModelTier::Premium);
        assert_eq!("PREMIUM".parse::<ModelTier>().unwrap(), ModelTier::Premium);
        assert!("gold".parse::<ModelTier>().is_err());
    }

    #[test]
    fn catalog_maps_tiers() {
        let catalog = ModelCatalog::default();
        assert_eq!(catalog.model_for(ModelTier::Economy), "openai/gpt-4o-mini");
        assert_ne!(
            catalog.model_for(ModelTier::Standard),
            catalog.model_for(ModelTier::Premium)
        );
    }

    #[test]
    fn irreversible_or_costly_capabilities_are_sensitive() {
        let mut cap = CapabilityDescriptor {
            name: "notes.list".into(),
            description: "List notes".into(),
            keywords: vec![],
            reversible: true,
            side_effecting: false,
            cost: CostClass::Free,
        };
        assert!(!cap.is_sensitive());
        cap.cost = CostClass::Costly;
        assert!(cap.is_sensitive());
        cap.cost = CostClass::Free;
        cap.reversible = false;
        assert!(cap.is_sensitive());
    }

    struct EchoModel;

    #[async_trait]
    impl ModelProvider for EchoModel {
        fn name(&self) -> &str {
            "echo"
        }

        async fn call(&self, request: ModelRequest) -> std::result::Result<ModelResponse, ProviderError> {
            Ok(ModelResponse {
                text: request.messages.last().map(|m| m.content.clone()).unwrap_or_default(),
                model: request.model,
                total_tokens: None,
            })
        }
    }

    #[tokio::test]
    async fn default_stream_emits_single_chunk() {
        let request = ModelRequest {
            tier: ModelTier::Economy,
            model: "echo-1".into(),
            messages: vec![Message::user("ping")],
            temperature: default_temperature(),
            max_tokens: None,
        };
        let mut rx = EchoModel.stream(request).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().unwrap(), "ping");
        assert!(rx.recv().await.is_none());
    }
}
