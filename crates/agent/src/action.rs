//! Action: execute one plan step against the model, memory or integration
//! providers, with bounded retries.
//!
//! Action never decides *whether* a step may run; the Engine has already
//! applied soul anchors and guardrails. Every result leaving
//! [`ActionExecutor::execute_with_retry`] is marked `logged`, and
//! [`create_audit_entry`] refuses anything that is not.

use mindloop_core::agent::{EngineConfig, RetryConfig};
use mindloop_core::audit::{AuditAction, AuditData, ExternalMemoryEntry};
use mindloop_core::message::Message;
use mindloop_core::plan::{ActionData, ActionRequest, ActionResult, PlanStep, StepAction};
use mindloop_core::provider::{
    IntegrationProvider, MemorySearchProvider, ModelCatalog, ModelProvider, ModelRequest,
    SearchFilters,
};
use mindloop_core::state::Phase;
use mindloop_memory::context::{ContextItem, ContextPriority, create_context_window};
use mindloop_memory::soul::{SoulConfig, get_soul_prompt};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ActionError;

/// Why [`retry_with_backoff`] gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The token fired before an attempt could start.
    Cancelled,
    /// The last attempt's error: either non-retryable or attempts ran out.
    Exhausted(E),
}

/// Outcome of a retried operation and how many attempts it took.
#[derive(Debug)]
pub struct RetryReport<T, E> {
    pub outcome: Result<T, RetryError<E>>,
    pub attempts: u32,
}

/// Run `attempt_fn` up to `retry.max_attempts` times with exponential
/// backoff between failures.
///
/// Cancellation is checked before every attempt and while waiting out a
/// delay; it never interrupts an attempt already in flight.
pub async fn retry_with_backoff<T, E, F, Fut>(
    retry: &RetryConfig,
    cancel: Option<&CancellationToken>,
    is_retryable: impl Fn(&E) -> bool,
    mut attempt_fn: F,
) -> RetryReport<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = retry.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            return RetryReport {
                outcome: Err(RetryError::Cancelled),
                attempts,
            };
        }

        attempts += 1;
        let err = match attempt_fn(attempts).await {
            Ok(value) => {
                return RetryReport {
                    outcome: Ok(value),
                    attempts,
                };
            }
            Err(e) => e,
        };

        if attempts >= max_attempts || !is_retryable(&err) {
            return RetryReport {
                outcome: Err(RetryError::Exhausted(err)),
                attempts,
            };
        }

        let delay = retry.delay_after(attempts);
        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => {
                        return RetryReport { outcome: Err(RetryError::Cancelled), attempts };
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }
}

/// Executes plan steps against the configured providers.
pub struct ActionExecutor {
    memory: Arc<dyn MemorySearchProvider>,
    integrations: Arc<dyn IntegrationProvider>,
    model: Arc<dyn ModelProvider>,
    catalog: ModelCatalog,
    system_prompt: String,
    recall_limit: usize,
    context_budget: usize,
}

impl ActionExecutor {
    pub fn new(
        memory: Arc<dyn MemorySearchProvider>,
        integrations: Arc<dyn IntegrationProvider>,
        model: Arc<dyn ModelProvider>,
        catalog: ModelCatalog,
        soul: &SoulConfig,
    ) -> Self {
        Self {
            memory,
            integrations,
            model,
            catalog,
            system_prompt: get_soul_prompt(soul),
            recall_limit: 8,
            context_budget: 4000,
        }
    }

    pub fn with_recall_limit(mut self, limit: usize) -> Self {
        self.recall_limit = limit;
        self
    }

    /// Token budget for dependency context in reasoning prompts.
    pub fn with_context_budget(mut self, tokens: usize) -> Self {
        self.context_budget = tokens;
        self
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// One attempt at one action.
    pub async fn execute(
        &self,
        request: &ActionRequest,
        config: &EngineConfig,
    ) -> Result<ActionResult, ActionError> {
        match &request.action {
            StepAction::ContextSearch { query } => {
                let filters = SearchFilters {
                    user_id: Some(request.user_id.clone()),
                    workspace_id: Some(request.workspace_id.clone()),
                    limit: self.recall_limit,
                    ..Default::default()
                };
                let fragments = self.memory.search(query, &filters).await?;
                Ok(ActionResult::succeeded(
                    ActionData::SearchResults { fragments },
                    true,
                ))
            }
            StepAction::Integration { capability, args } => {
                Ok(self.integrations.invoke(capability, args).await?)
            }
            StepAction::Reasoning { prompt, tier } => {
                let tier = (*tier).min(config.model_tier);
                let mut window = create_context_window(self.context_budget);
                for (i, item) in request.context.iter().enumerate() {
                    // Oversized context is dropped rather than failing the call.
                    let source = format!("result-{}", i + 1);
                    if let Err(e) = window.add_to_context(ContextItem::new(
                        item,
                        source.as_str(),
                        ContextPriority::High,
                    )) {
                        debug!(step_id = %request.step_id, source = %source, error = %e, "Dependency result dropped from context");
                    }
                }
                let content = if window.is_empty() {
                    prompt.clone()
                } else {
                    format!("Context:\n{}\n\n{prompt}", window.render())
                };

                let response = self
                    .model
                    .call(ModelRequest {
                        tier,
                        model: self.catalog.model_for(tier).to_string(),
                        messages: vec![
                            Message::system(self.system_prompt.clone()),
                            Message::user(content),
                        ],
                        temperature: 0.3,
                        max_tokens: None,
                    })
                    .await?;
                Ok(ActionResult::succeeded(
                    ActionData::Completion {
                        model: response.model,
                        text: response.text,
                    },
                    true,
                ))
            }
            StepAction::Unknown { kind, .. } => Err(ActionError::Unsupported(kind.clone())),
        }
    }

    /// Execute a step, retrying transient failures. Never returns an error:
    /// every outcome, including cancellation, is an [`ActionResult`].
    pub async fn execute_with_retry(
        &self,
        step: &PlanStep,
        context: Vec<String>,
        config: &EngineConfig,
        retry: Option<&RetryConfig>,
        cancel: Option<&CancellationToken>,
    ) -> ActionResult {
        let started = Instant::now();
        let request = ActionRequest::from_step(step, &config.user_id, &config.workspace_id)
            .with_context(context);
        let retry = retry.unwrap_or(&config.retry);

        let request = &request;
        let report = retry_with_backoff(retry, cancel, ActionError::is_retryable, move |attempt| {
            debug!(step_id = %request.step_id, attempt, "Executing step");
            self.execute(request, config)
        })
        .await;

        let mut result = match report.outcome {
            Ok(result) => result,
            Err(RetryError::Cancelled) => ActionResult::failed("cancelled before execution"),
            Err(RetryError::Exhausted(e)) => {
                warn!(
                    step_id = %step.id,
                    attempts = report.attempts,
                    error = %e,
                    "Step failed"
                );
                ActionResult::failed(e.to_string())
            }
        };
        result.attempts = report.attempts;
        result.execution_time_ms = started.elapsed().as_millis() as u64;
        result.logged = true;
        result
    }
}

/// The audit entry for one step outcome. Unlogged results are rejected.
pub fn create_audit_entry(
    result: &ActionResult,
    step: &PlanStep,
    agent_id: &str,
) -> Result<ExternalMemoryEntry, ActionError> {
    if !result.logged {
        return Err(ActionError::NotLogged(step.id.clone()));
    }
    let action = if result.is_blocked() {
        AuditAction::StepBlocked
    } else {
        AuditAction::StepExecuted
    };
    let data = AuditData::Step {
        step_id: step.id.clone(),
        description: step.description.clone(),
        capability: step.action.capability().to_string(),
        status: step.status,
        result: result.clone(),
    };
    Ok(ExternalMemoryEntry::new(agent_id, action, data).in_phase(Phase::Action))
}
