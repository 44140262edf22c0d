//! Tier router: picks the backend for each model call.
//!
//! Catalog entries are plain model names (sent to the default provider) or
//! `<provider>:<model>` to pin a tier to another registered provider, e.g.
//! `economy = "ollama:llama3.1"`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mindloop_core::error::ProviderError;
use mindloop_core::provider::{ModelProvider, ModelRequest, ModelResponse};
use tracing::{debug, info};

use crate::fallback::FallbackModel;
use crate::offline::OfflineModel;
use crate::openai_compat::OpenAiCompatModel;

/// Routes model calls to the correct provider.
pub struct TierRouter {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    default_provider: String,
}

impl TierRouter {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn ModelProvider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn default_provider(&self) -> Option<Arc<dyn ModelProvider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ModelProvider>> {
        self.providers.get(name).cloned()
    }

    /// Resolve a catalog model string to (provider, model name sent upstream).
    pub fn resolve(&self, model: &str) -> Option<(Arc<dyn ModelProvider>, String)> {
        if let Some((prefix, rest)) = model.split_once(':')
            && let Some(provider) = self.providers.get(prefix)
        {
            return Some((provider.clone(), rest.to_string()));
        }
        self.default_provider().map(|p| (p, model.to_string()))
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl ModelProvider for TierRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn call(&self, mut request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        let (provider, model) = self.resolve(&request.model).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "no provider registered for '{}'",
                request.model
            ))
        })?;
        debug!(tier = %request.tier, provider = provider.name(), model = %model, "Routing model call");
        request.model = model;
        provider.call(request).await
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        match self.default_provider() {
            Some(p) => p.health_check().await,
            None => Ok(false),
        }
    }
}

/// Providers that run locally and need no API key.
fn is_local(name: &str) -> bool {
    matches!(name, "ollama" | "vllm" | "llamacpp" | "llama.cpp")
}

/// Build the model provider the Engine uses.
///
/// Without any usable credentials this is the [`OfflineModel`]. Otherwise a
/// [`TierRouter`] over every configured provider, where the default provider
/// falls back to the others in name order.
pub fn build_from_config(config: &mindloop_config::AppConfig) -> Arc<dyn ModelProvider> {
    let has_credentials = config.has_api_key()
        || is_local(&config.default_provider)
        || config.providers.values().any(|p| p.api_key.is_some());
    if !has_credentials {
        info!("No API key configured, using offline model provider");
        return Arc::new(OfflineModel::new());
    }

    let mut names: Vec<String> = config.providers.keys().cloned().collect();
    if !names.contains(&config.default_provider) {
        names.push(config.default_provider.clone());
    }
    names.sort();

    let mut built: HashMap<String, (Arc<dyn ModelProvider>, Duration)> = HashMap::new();
    for name in &names {
        let provider_config = config.providers.get(name);
        let api_key = provider_config
            .and_then(|p| p.api_key.clone())
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();
        let base_url = provider_config
            .and_then(|p| p.api_url.clone())
            .unwrap_or_else(|| default_base_url(name));
        let timeout = Duration::from_secs(
            provider_config
                .and_then(|p| p.timeout_secs)
                .unwrap_or(120),
        );
        let provider: Arc<dyn ModelProvider> = Arc::new(OpenAiCompatModel::with_timeout(
            name, base_url, api_key, timeout,
        ));
        built.insert(name.clone(), (provider, timeout));
    }

    let mut router = TierRouter::new(&config.default_provider);
    for (name, (provider, timeout)) in &built {
        if name == &config.default_provider {
            let mut chain = FallbackModel::new(name.clone()).add(provider.clone(), *timeout);
            for other in names.iter().filter(|n| *n != name) {
                if let Some((p, t)) = built.get(other) {
                    chain = chain.add(p.clone(), *t);
                }
            }
            router.register(name.clone(), Arc::new(chain));
        } else {
            router.register(
                name.clone(),
                Arc::new(FallbackModel::new(name.clone()).add(provider.clone(), *timeout)),
            );
        }
    }

    info!(default = %config.default_provider, providers = ?router.list(), "Model providers ready");
    Arc::new(router)
}

/// Default base URL for well-known providers.
pub fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
