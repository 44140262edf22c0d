//! Scripted and counting stand-ins for the provider traits, shared by the
//! unit tests in this crate.

use async_trait::async_trait;
use chrono::Utc;
use mindloop_core::agent::EngineConfig;
use mindloop_core::audit::{AuditFilter, AuditSink, ExternalMemoryEntry};
use mindloop_core::error::{IntegrationError, MemoryError, ProviderError};
use mindloop_core::goal::Goal;
use mindloop_core::perception::{MemoryFragment, PendingEvent, PerceptionResult};
use mindloop_core::plan::{ActionData, ActionResult, Plan};
use mindloop_core::provider::{
    CapabilityDescriptor, CostClass, IntegrationInfo, IntegrationProvider, MemorySearchProvider,
    ModelCatalog, ModelProvider, ModelRequest, ModelResponse, SearchFilters,
};
use mindloop_guardrails::Guardrails;
use mindloop_memory::external::ExternalMemory;
use mindloop_memory::soul::SoulConfig;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::action::ActionExecutor;
use crate::decision::{Decider, Decision, Intent, QueryType, StandardDecider, select_model};
use crate::engine::CimEngine;
use crate::error::{DecisionError, PerceptionError};
use crate::perception::{Perceiver, StandardPerceiver};

// ── Memory search ──────────────────────────────────────────────────────────

pub struct StaticMemory {
    fragments: Vec<MemoryFragment>,
    error: Option<ProviderError>,
    searches: Mutex<usize>,
}

impl StaticMemory {
    pub fn with(fragments: Vec<MemoryFragment>) -> Self {
        Self {
            fragments,
            error: None,
            searches: Mutex::new(0),
        }
    }

    pub fn failing(error: ProviderError) -> Self {
        Self {
            fragments: Vec::new(),
            error: Some(error),
            searches: Mutex::new(0),
        }
    }

    pub fn search_count(&self) -> usize {
        *self.searches.lock().unwrap()
    }
}

#[async_trait]
impl MemorySearchProvider for StaticMemory {
    fn name(&self) -> &str {
        "static"
    }

    async fn search(
        &self,
        _query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<MemoryFragment>, ProviderError> {
        *self.searches.lock().unwrap() += 1;
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(self.fragments.iter().take(filters.limit).cloned().collect()),
        }
    }
}

pub fn dentist_fragment() -> MemoryFragment {
    MemoryFragment {
        id: "m1".into(),
        content: "Dentist on Friday".into(),
        source: Some("calendar".into()),
        score: 0.8,
        created_at: Utc::now(),
    }
}

// ── Integrations ───────────────────────────────────────────────────────────

pub fn notes_capabilities() -> Vec<CapabilityDescriptor> {
    let cap = |name: &str, keywords: &[&str], reversible: bool, side_effecting: bool| {
        CapabilityDescriptor {
            name: name.into(),
            description: format!("Stub {name}"),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            reversible,
            side_effecting,
            cost: CostClass::Free,
        }
    };
    vec![
        cap(
            "notes.create",
            &["note", "remember", "jot", "write", "create", "add"],
            true,
            true,
        ),
        cap("notes.list", &["notes", "list", "show"], true, false),
        cap("notes.delete", &["delete", "remove", "erase"], false, true),
    ]
}

pub fn notes_perception() -> PerceptionResult {
    let mut perception = PerceptionResult::empty("UTC");
    perception.active_integrations = vec![IntegrationInfo {
        name: "notes".into(),
        capabilities: notes_capabilities(),
    }];
    perception
}

pub struct StaticIntegrations {
    fail: bool,
    pending: Vec<PendingEvent>,
    invocations: Mutex<usize>,
}

impl StaticIntegrations {
    pub fn notes() -> Self {
        Self {
            fail: false,
            pending: Vec::new(),
            invocations: Mutex::new(0),
        }
    }

    /// Lists the notes capabilities but fails every invocation.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::notes()
        }
    }

    pub fn with_pending(mut self, pending: Vec<PendingEvent>) -> Self {
        self.pending = pending;
        self
    }

    pub fn invocations(&self) -> usize {
        *self.invocations.lock().unwrap()
    }
}

#[async_trait]
impl IntegrationProvider for StaticIntegrations {
    async fn list_active(&self) -> Result<Vec<IntegrationInfo>, IntegrationError> {
        Ok(notes_perception().active_integrations)
    }

    async fn invoke(
        &self,
        capability: &str,
        args: &serde_json::Value,
    ) -> Result<ActionResult, IntegrationError> {
        *self.invocations.lock().unwrap() += 1;
        if self.fail {
            return Err(IntegrationError::InvocationFailed {
                capability: capability.to_string(),
                reason: "integration down".into(),
            });
        }
        Ok(ActionResult::succeeded(
            ActionData::Integration {
                capability: capability.to_string(),
                summary: format!("{capability} ok"),
                payload: args.clone(),
            },
            capability != "notes.delete",
        ))
    }

    async fn pending_events(&self) -> Result<Vec<PendingEvent>, IntegrationError> {
        Ok(self.pending.clone())
    }
}

// ── Model ──────────────────────────────────────────────────────────────────

/// Replays scripted outcomes in order, then answers "ok".
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ModelRequest>>,
    delay: Duration,
}

impl ScriptedModel {
    pub fn new(script: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Every call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn call(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok("ok".into())).map(|text| ModelResponse {
            text,
            model,
            total_tokens: None,
        })
    }
}

// ── Loop phases ────────────────────────────────────────────────────────────

pub struct FailingPerceiver;

#[async_trait]
impl Perceiver for FailingPerceiver {
    async fn perceive(
        &self,
        _config: &EngineConfig,
        _query: &str,
    ) -> Result<PerceptionResult, PerceptionError> {
        Err(PerceptionError::Search(ProviderError::SearchFailed(
            "index offline".into(),
        )))
    }
}

pub struct PanickingPerceiver;

#[async_trait]
impl Perceiver for PanickingPerceiver {
    async fn perceive(
        &self,
        _config: &EngineConfig,
        _query: &str,
    ) -> Result<PerceptionResult, PerceptionError> {
        panic!("perceiver exploded")
    }
}

/// Always returns the same plan.
pub struct FixedDecider {
    plan: Plan,
    catalog: ModelCatalog,
}

impl FixedDecider {
    pub fn new(plan: Plan) -> Self {
        Self {
            plan,
            catalog: ModelCatalog::default(),
        }
    }
}

#[async_trait]
impl Decider for FixedDecider {
    async fn decide(
        &self,
        query: &str,
        goal: &Goal,
        _perception: &PerceptionResult,
        config: &EngineConfig,
    ) -> Result<Decision, DecisionError> {
        let mut plan = self.plan.clone();
        plan.goal_id = goal.id.clone();
        let approval_reasons = if plan.requires_approval {
            vec!["fixed plan requires approval".to_string()]
        } else {
            Vec::new()
        };
        Ok(Decision {
            intent: Intent {
                query_type: QueryType::ActionRequest,
                complexity: plan.estimated_complexity,
                clauses: vec![query.to_string()],
            },
            selected_model: select_model(plan.estimated_complexity, config.model_tier, &self.catalog),
            reasoning: "fixed plan".into(),
            approval_reasons,
            plan,
        })
    }

    fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }
}

pub struct BrokenSink;

#[async_trait]
impl AuditSink for BrokenSink {
    fn name(&self) -> &str {
        "broken"
    }

    async fn append(&self, _entry: &ExternalMemoryEntry) -> Result<(), MemoryError> {
        Err(MemoryError::AppendFailed("disk full".into()))
    }

    async fn read(&self, _filter: &AuditFilter) -> Result<Vec<ExternalMemoryEntry>, MemoryError> {
        Ok(Vec::new())
    }
}

// ── Engine harness ─────────────────────────────────────────────────────────

/// Builds engines over counting stubs; the stubs stay inspectable.
pub struct Harness {
    pub memory: Arc<StaticMemory>,
    pub integrations: Arc<StaticIntegrations>,
    pub model: Arc<ScriptedModel>,
    pub audit: ExternalMemory,
    pub guardrails: Arc<Guardrails>,
    perceiver: Option<Arc<dyn Perceiver>>,
    decider: Option<Arc<dyn Decider>>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            memory: Arc::new(StaticMemory::with(vec![dentist_fragment()])),
            integrations: Arc::new(StaticIntegrations::notes()),
            model: Arc::new(ScriptedModel::new(vec![])),
            audit: ExternalMemory::in_memory(),
            guardrails: Arc::new(Guardrails::new()),
            perceiver: None,
            decider: None,
        }
    }

    pub fn with_integrations(mut self, integrations: StaticIntegrations) -> Self {
        self.integrations = Arc::new(integrations);
        self
    }

    pub fn with_model(mut self, model: ScriptedModel) -> Self {
        self.model = Arc::new(model);
        self
    }

    pub fn with_perceiver(mut self, perceiver: impl Perceiver + 'static) -> Self {
        self.perceiver = Some(Arc::new(perceiver));
        self
    }

    pub fn with_decider(mut self, decider: impl Decider + 'static) -> Self {
        self.decider = Some(Arc::new(decider));
        self
    }

    pub fn with_broken_audit(mut self) -> Self {
        self.audit = ExternalMemory::new(Arc::new(BrokenSink));
        self
    }

    pub fn engine(&self) -> CimEngine {
        let soul = Arc::new(SoulConfig::default());
        let perceiver = self.perceiver.clone().unwrap_or_else(|| -> Arc<dyn Perceiver> {
            Arc::new(StandardPerceiver::new(
                self.memory.clone(),
                self.integrations.clone(),
            ))
        });
        let decider = self.decider.clone().unwrap_or_else(|| -> Arc<dyn Decider> {
            Arc::new(StandardDecider::new(ModelCatalog::default(), soul.clone()))
        });
        let executor = ActionExecutor::new(
            self.memory.clone(),
            self.integrations.clone(),
            self.model.clone(),
            ModelCatalog::default(),
            &soul,
        );
        CimEngine::new(perceiver, decider, Arc::new(executor), self.audit.clone(), soul)
            .with_guardrails(self.guardrails.clone())
    }
}
