//! Fallback chain for model providers.
//!
//! Tries each provider in order with its own wall-clock timeout. The first
//! success wins; if every entry fails, the last error is returned.

use async_trait::async_trait;
use mindloop_core::error::ProviderError;
use mindloop_core::provider::{ModelProvider, ModelRequest, ModelResponse};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

struct FallbackEntry {
    provider: Arc<dyn ModelProvider>,
    timeout: Duration,
}

/// A provider that tries a chain of providers in order.
pub struct FallbackModel {
    name: String,
    chain: Vec<FallbackEntry>,
}

impl FallbackModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chain: Vec::new(),
        }
    }

    /// Append a provider with a per-call timeout.
    pub fn add(mut self, provider: Arc<dyn ModelProvider>, timeout: Duration) -> Self {
        self.chain.push(FallbackEntry { provider, timeout });
        self
    }

    /// Append a provider with the default 120s timeout.
    pub fn add_default(self, provider: Arc<dyn ModelProvider>) -> Self {
        self.add(provider, Duration::from_secs(120))
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

#[async_trait]
impl ModelProvider for FallbackModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        let mut last_error =
            ProviderError::NotConfigured(format!("fallback chain '{}' is empty", self.name));

        for (index, entry) in self.chain.iter().enumerate() {
            let provider_name = entry.provider.name().to_string();
            match tokio::time::timeout(entry.timeout, entry.provider.call(request.clone())).await {
                Ok(Ok(response)) => {
                    if index > 0 {
                        info!(chain = %self.name, provider = %provider_name, "Fallback provider succeeded");
                    }
                    return Ok(response);
                }
                Ok(Err(e)) => {
                    warn!(chain = %self.name, provider = %provider_name, error = %e, "Provider failed, trying next");
                    last_error = e;
                }
                Err(_) => {
                    warn!(
                        chain = %self.name,
                        provider = %provider_name,
                        timeout_ms = entry.timeout.as_millis() as u64,
                        "Provider timed out, trying next"
                    );
                    last_error = ProviderError::Timeout(format!(
                        "{provider_name} did not answer within {:?}",
                        entry.timeout
                    ));
                }
            }
        }

        Err(last_error)
    }

    /// Healthy when any provider in the chain is healthy.
    async fn health_check(&self) -> Result<bool, ProviderError> {
        for entry in &self.chain {
            if let Ok(true) = entry.provider.health_check().await {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
