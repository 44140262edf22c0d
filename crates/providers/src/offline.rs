//! Deterministic provider used when no API key is configured.
//!
//! It answers from the prompt alone so the loop, the audit trail and the
//! CLI stay usable offline.

use async_trait::async_trait;
use mindloop_core::error::ProviderError;
use mindloop_core::message::Role;
use mindloop_core::provider::{ModelProvider, ModelRequest, ModelResponse};

#[derive(Debug, Clone, Default)]
pub struct OfflineModel;

impl OfflineModel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ModelProvider for OfflineModel {
    fn name(&self) -> &str {
        "offline"
    }

    async fn call(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        let prompt = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.trim())
            .unwrap_or_default();
        let first_line = prompt.lines().next().unwrap_or_default();
        let text = if first_line.is_empty() {
            "[offline] nothing to reason about".to_string()
        } else {
            format!("[offline:{}] {first_line}", request.tier)
        };
        Ok(ModelResponse {
            text,
            model: format!("offline/{}", request.tier),
            total_tokens: None,
        })
    }
}
