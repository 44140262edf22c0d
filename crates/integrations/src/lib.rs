//! Integration provider for mindloop.
//!
//! Integrations give the loop the ability to act in the world. Each one
//! advertises its capabilities (`<integration>.<operation>`) and the
//! [`IntegrationRegistry`] dispatches invocations on the capability prefix.
//!
//! Built-ins: [`notes`] and [`http`].

pub mod http;
pub mod notes;

use async_trait::async_trait;
use mindloop_core::error::IntegrationError;
use mindloop_core::perception::PendingEvent;
use mindloop_core::plan::ActionResult;
use mindloop_core::provider::{CapabilityDescriptor, IntegrationInfo, IntegrationProvider};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub use http::HttpIntegration;
pub use notes::{Note, NotesIntegration};

/// One integration: a named group of capabilities.
#[async_trait]
pub trait Integration: Send + Sync {
    /// Prefix of every capability this integration owns (e.g. "notes").
    fn name(&self) -> &str;

    fn capabilities(&self) -> Vec<CapabilityDescriptor>;

    async fn invoke(
        &self,
        capability: &str,
        args: &serde_json::Value,
    ) -> Result<ActionResult, IntegrationError>;

    /// Events this integration wants the loop to notice. Default: none.
    async fn pending_events(&self) -> Result<Vec<PendingEvent>, IntegrationError> {
        Ok(Vec::new())
    }
}

/// A registry of available integrations.
#[derive(Default, Clone)]
pub struct IntegrationRegistry {
    integrations: HashMap<String, Arc<dyn Integration>>,
}

impl IntegrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an integration. Replaces any existing one with the same name.
    pub fn register(&mut self, integration: Arc<dyn Integration>) {
        let name = integration.name().to_string();
        self.integrations.insert(name, integration);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Integration>> {
        self.integrations.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.integrations.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.integrations.is_empty()
    }
}

/// Build the registry enabled by configuration.
pub fn build_from_config(config: &mindloop_config::IntegrationsConfig) -> IntegrationRegistry {
    let mut registry = IntegrationRegistry::new();
    if config.notes {
        registry.register(Arc::new(NotesIntegration::new()));
    }
    if config.http.enabled {
        registry.register(Arc::new(HttpIntegration::from_config(&config.http)));
    }
    registry
}

#[async_trait]
impl IntegrationProvider for IntegrationRegistry {
    async fn list_active(&self) -> Result<Vec<IntegrationInfo>, IntegrationError> {
        let mut active: Vec<IntegrationInfo> = self
            .integrations
            .values()
            .map(|i| IntegrationInfo {
                name: i.name().to_string(),
                capabilities: i.capabilities(),
            })
            .collect();
        active.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(active)
    }

    async fn invoke(
        &self,
        capability: &str,
        args: &serde_json::Value,
    ) -> Result<ActionResult, IntegrationError> {
        let prefix = capability.split('.').next().unwrap_or(capability);
        let integration = self
            .integrations
            .get(prefix)
            .ok_or_else(|| IntegrationError::CapabilityNotFound(capability.to_string()))?;
        if !integration.capabilities().iter().any(|c| c.name == capability) {
            return Err(IntegrationError::CapabilityNotFound(capability.to_string()));
        }
        debug!(integration = prefix, capability, "Invoking integration");
        integration.invoke(capability, args).await
    }

    async fn pending_events(&self) -> Result<Vec<PendingEvent>, IntegrationError> {
        let mut events = Vec::new();
        for name in self.names() {
            let Some(integration) = self.integrations.get(name) else {
                continue;
            };
            match integration.pending_events().await {
                Ok(mut found) => events.append(&mut found),
                Err(e) => warn!(integration = name, error = %e, "Failed to collect pending events"),
            }
        }
        events.sort_by(|a, b| a.received_at.cmp(&b.received_at));
        Ok(events)
    }
}

/// Pull a required string argument out of an invocation payload.
pub(crate) fn required_str<'a>(
    args: &'a serde_json::Value,
    key: &str,
    capability: &str,
) -> Result<&'a str, IntegrationError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| IntegrationError::InvalidArguments {
            capability: capability.to_string(),
            reason: format!("missing '{key}'"),
        })
}
