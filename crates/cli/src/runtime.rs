//! Wires configuration into a ready-to-run engine.

use mindloop_agent::{ActionExecutor, CimEngine, StandardDecider, StandardPerceiver, TeamRegistry};
use mindloop_config::AppConfig;
use mindloop_core::audit::AuditSink;
use mindloop_integrations::IntegrationRegistry;
use mindloop_memory::{ExternalMemory, InMemoryAuditSink, InMemoryFragmentStore, JsonlAuditSink, SoulConfig};
use std::sync::Arc;
use tracing::{debug, info};

pub struct Runtime {
    pub config: AppConfig,
    pub soul: Arc<SoulConfig>,
    pub integrations: Arc<IntegrationRegistry>,
    pub engine: Arc<CimEngine>,
}

impl Runtime {
    /// Load `~/.mindloop/config.toml` (plus env overrides) and build.
    pub async fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
        Self::build(config).await
    }

    pub async fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let soul = Arc::new(load_soul(&config)?);
        let memory = open_audit(&config).await?;
        let model = mindloop_providers::build_from_config(&config);
        let integrations = Arc::new(mindloop_integrations::build_from_config(&config.integrations));
        let fragments = Arc::new(InMemoryFragmentStore::new());

        let perceiver = StandardPerceiver::new(fragments.clone(), integrations.clone())
            .with_recall_limit(config.context.recall_limit)
            .with_context_budget(config.context.max_tokens)
            .with_item_ttl(config.context.item_ttl_secs);
        let executor = ActionExecutor::new(
            fragments,
            integrations.clone(),
            model,
            config.models.clone(),
            &soul,
        )
        .with_recall_limit(config.context.recall_limit)
        .with_context_budget(config.context.max_tokens);
        let decider = StandardDecider::new(config.models.clone(), soul.clone());

        let engine = CimEngine::new(
            Arc::new(perceiver),
            Arc::new(decider),
            Arc::new(executor),
            memory,
            soul.clone(),
        );
        info!(
            integrations = ?integrations.names(),
            audit = engine.memory().sink_name(),
            "Runtime ready"
        );

        Ok(Self {
            config,
            soul,
            integrations,
            engine: Arc::new(engine),
        })
    }

    /// The team roster described by configuration.
    pub fn team_registry(&self) -> Result<TeamRegistry, Box<dyn std::error::Error>> {
        let registry = TeamRegistry::new();
        for agent in &self.config.agents {
            registry.register_agent(agent.clone());
        }
        for team in &self.config.teams {
            registry.create_team(
                team.id.clone(),
                team.name.clone(),
                team.members.clone(),
                team.lead.clone(),
            )?;
        }
        Ok(registry)
    }
}

fn load_soul(config: &AppConfig) -> Result<SoulConfig, Box<dyn std::error::Error>> {
    match &config.soul.path {
        Some(path) => {
            debug!(path = %path.display(), "Loading soul config");
            Ok(SoulConfig::load(path)?)
        }
        None => Ok(SoulConfig::default()),
    }
}

/// Open the configured audit sink.
pub async fn open_audit(config: &AppConfig) -> Result<ExternalMemory, Box<dyn std::error::Error>> {
    let sink: Arc<dyn AuditSink> = match config.audit.backend.as_str() {
        "memory" => Arc::new(InMemoryAuditSink::new()),
        "jsonl" => Arc::new(JsonlAuditSink::new(config.audit_path())),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let path = config.audit_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Arc::new(mindloop_memory::SqliteAuditSink::new(&path.to_string_lossy()).await?)
        }
        other => return Err(format!("Audit backend '{other}' is not available in this build").into()),
    };
    Ok(ExternalMemory::new(sink))
}
