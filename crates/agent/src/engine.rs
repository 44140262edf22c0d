//! The Engine: Perceive → Decide → Act → Observe, one sequential state
//! machine per invocation.
//!
//! Perception and planning failures degrade (empty snapshot, fallback
//! plan). Action failures fail their step only. Anything else, including a
//! panic inside the run, is caught once at the top and turned into a failed
//! [`CimResult`]; `run` never returns an error to its caller.

use chrono::Utc;
use futures::FutureExt;
use mindloop_core::agent::{EngineConfig, InvocationSource};
use mindloop_core::audit::{AuditAction, AuditData};
use mindloop_core::error::PlanError;
use mindloop_core::event::{EventBus, LoopEvent};
use mindloop_core::goal::Goal;
use mindloop_core::perception::PerceptionResult;
use mindloop_core::plan::{ActionResult, Plan, PlanStep, StepStatus};
use mindloop_core::state::{ActionRecord, CimError, CimLoopState, CimResult, LoopStatus, Phase};
use mindloop_guardrails::{Guardrails, Reservation};
use mindloop_memory::external::{AuditScope, ExternalMemory};
use mindloop_memory::soul::SoulConfig;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::action::{ActionExecutor, create_audit_entry};
use crate::decision::{Decider, select_model};
use crate::error::EngineError;
use crate::perception::Perceiver;

/// Options for [`CimEngine::run_cim`], the entry point used by invocation
/// triggers.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Base configuration; user and workspace are always overwritten.
    pub config: Option<EngineConfig>,
    pub source: Option<InvocationSource>,
    pub cancel: Option<CancellationToken>,
}

const ESCALATION_REVIEW: &str = "escalated goals require human review";

/// What Observe hands back.
struct Observed {
    goal_met: bool,
    summary: String,
}

/// Where guardrails and anchors leave a step.
enum Gate {
    Run(Reservation),
    Block(Vec<String>),
    Approve(Vec<String>),
}

pub struct CimEngine {
    perceiver: Arc<dyn Perceiver>,
    decider: Arc<dyn Decider>,
    executor: Arc<ActionExecutor>,
    guardrails: Arc<Guardrails>,
    memory: ExternalMemory,
    soul: Arc<SoulConfig>,
    events: Arc<EventBus>,
}

impl CimEngine {
    pub fn new(
        perceiver: Arc<dyn Perceiver>,
        decider: Arc<dyn Decider>,
        executor: Arc<ActionExecutor>,
        memory: ExternalMemory,
        soul: Arc<SoulConfig>,
    ) -> Self {
        Self {
            perceiver,
            decider,
            executor,
            guardrails: Arc::new(Guardrails::new()),
            memory,
            soul,
            events: Arc::new(EventBus::default()),
        }
    }

    /// Share rate-limit windows with other engines.
    pub fn with_guardrails(mut self, guardrails: Arc<Guardrails>) -> Self {
        self.guardrails = guardrails;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn memory(&self) -> &ExternalMemory {
        &self.memory
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn guardrails(&self) -> &Arc<Guardrails> {
        &self.guardrails
    }

    /// Run one user query.
    pub async fn run(
        &self,
        query: &str,
        config: &EngineConfig,
        cancel: Option<&CancellationToken>,
    ) -> CimResult {
        self.run_goal(Goal::from_query(query), config, cancel).await
    }

    /// The invocation-trigger entry point: queue consumers, webhooks, the
    /// heartbeat and the CLI all come through here.
    pub async fn run_cim(
        &self,
        query: &str,
        user_id: &str,
        workspace_id: &str,
        options: RunOptions,
    ) -> CimResult {
        let mut config = options
            .config
            .unwrap_or_else(|| EngineConfig::new(user_id, workspace_id));
        config.user_id = user_id.to_string();
        config.workspace_id = workspace_id.to_string();
        if let Some(source) = options.source {
            config.source = source;
        }
        self.run(query, &config, options.cancel.as_ref()).await
    }

    /// Run a prepared goal (heartbeat findings, handoffs, escalations).
    pub async fn run_goal(
        &self,
        goal: Goal,
        config: &EngineConfig,
        cancel: Option<&CancellationToken>,
    ) -> CimResult {
        let mut state = CimLoopState::new(goal);
        let scope = AuditScope::new(config.agent_id.clone())
            .run(state.run_id.clone())
            .user(config.user_id.clone());
        info!(
            run_id = %state.run_id,
            agent_id = %config.agent_id,
            source = %config.source,
            "Run started"
        );

        let outcome = AssertUnwindSafe(self.drive(&mut state, config, &scope, cancel))
            .catch_unwind()
            .await;
        let observed = match outcome {
            Ok(Ok(observed)) => observed,
            Ok(Err(e)) => self.fail(&mut state, &scope, e.to_string()).await,
            Err(panic) => {
                let message = format!("panic during run: {}", panic_message(panic.as_ref()));
                self.fail(&mut state, &scope, message).await
            }
        };

        let audit_trail = match self.memory.get_audit_trail(&state.run_id).await {
            Ok(trail) => trail,
            Err(e) => {
                warn!(run_id = %state.run_id, error = %e, "Could not read audit trail");
                Vec::new()
            }
        };

        self.events.publish(LoopEvent::RunFinished {
            run_id: state.run_id.clone(),
            status: state.status,
            goal_met: observed.goal_met,
            timestamp: Utc::now(),
        });
        info!(
            run_id = %state.run_id,
            status = %state.status,
            goal_met = observed.goal_met,
            steps = state.action_history.len(),
            "Run finished"
        );

        CimResult {
            success: state.status != LoopStatus::Failed,
            goal_met: observed.goal_met,
            final_state: state,
            summary: observed.summary,
            audit_trail,
        }
    }

    async fn drive(
        &self,
        state: &mut CimLoopState,
        config: &EngineConfig,
        scope: &AuditScope,
        cancel: Option<&CancellationToken>,
    ) -> Result<Observed, EngineError> {
        let mut halted_for = None;
        'phases: {
            if self.check_cancel(state, scope, cancel).await? {
                break 'phases;
            }
            let perception = self.perceive(state, config, scope).await?;

            if self.check_cancel(state, scope, cancel).await? {
                break 'phases;
            }
            let approval_reasons = self.decide(state, &perception, config, scope).await?;

            if self.check_cancel(state, scope, cancel).await? {
                break 'phases;
            }
            halted_for = self
                .act(state, config, scope, approval_reasons, cancel)
                .await?;
        }
        self.observe(state, scope, halted_for).await
    }

    fn enter(&self, state: &mut CimLoopState, status: LoopStatus, phase: Phase) {
        state.set_status(status);
        debug!(run_id = %state.run_id, %phase, "Entering phase");
        self.events.publish(LoopEvent::PhaseEntered {
            run_id: state.run_id.clone(),
            phase,
            timestamp: Utc::now(),
        });
    }

    /// Cancellation is observed at phase and step boundaries only.
    async fn check_cancel(
        &self,
        state: &mut CimLoopState,
        scope: &AuditScope,
        cancel: Option<&CancellationToken>,
    ) -> Result<bool, EngineError> {
        if !cancel.is_some_and(|c| c.is_cancelled()) {
            return Ok(false);
        }
        info!(run_id = %state.run_id, iteration = state.iteration, "Run cancelled");
        let err = CimError::new(Phase::Engine, "run cancelled", false);
        self.memory.log_error(scope, &err).await?;
        state.record_error(err);
        state.set_status(LoopStatus::Failed);
        Ok(true)
    }

    async fn perceive(
        &self,
        state: &mut CimLoopState,
        config: &EngineConfig,
        scope: &AuditScope,
    ) -> Result<PerceptionResult, EngineError> {
        self.enter(state, LoopStatus::Perceiving, Phase::Perception);
        let perception = match self.perceiver.perceive(config, &state.goal.description).await {
            Ok(perception) => perception,
            Err(e) => {
                warn!(run_id = %state.run_id, error = %e, "Perception failed; continuing with an empty snapshot");
                let err = CimError::new(Phase::Perception, e.to_string(), true);
                self.memory.log_error(scope, &err).await?;
                state.record_error(err);
                PerceptionResult::empty(&config.timezone)
            }
        };
        state.perception = Some(perception.clone());
        Ok(perception)
    }

    /// Stores the plan in `state`; returns the approval reasons, if any.
    async fn decide(
        &self,
        state: &mut CimLoopState,
        perception: &PerceptionResult,
        config: &EngineConfig,
        scope: &AuditScope,
    ) -> Result<Vec<String>, EngineError> {
        self.enter(state, LoopStatus::Planning, Phase::Planning);
        let query = state.goal.description.clone();

        let (plan, query_type, selected, reasoning, approval_reasons) = match self
            .decider
            .decide(&query, &state.goal, perception, config)
            .await
        {
            Ok(d) => (
                d.plan,
                d.intent.query_type.to_string(),
                d.selected_model,
                d.reasoning,
                d.approval_reasons,
            ),
            Err(e) => {
                warn!(run_id = %state.run_id, error = %e, "Planning failed; using fallback plan");
                let err = CimError::new(Phase::Planning, e.to_string(), true);
                self.memory.log_error(scope, &err).await?;
                state.record_error(err);

                let mut plan = Plan::fallback(state.goal.id.clone(), &query);
                let mut reasons = Vec::new();
                if state.goal.origin.requires_review() {
                    plan.requires_approval = true;
                    reasons.push(ESCALATION_REVIEW.to_string());
                }
                let selected = select_model(
                    plan.estimated_complexity,
                    config.model_tier,
                    self.decider.catalog(),
                );
                let reasoning = format!("Planning failed ({e}); falling back to a context search");
                (plan, "fallback".to_string(), selected, reasoning, reasons)
            }
        };

        self.memory
            .log_decision(scope, &plan, &query_type, &selected, &reasoning)
            .await?;
        info!(
            run_id = %state.run_id,
            plan_id = %plan.id,
            steps = plan.steps.len(),
            requires_approval = plan.requires_approval,
            model = %selected.model,
            "Plan ready"
        );
        state.plan = Some(plan);
        Ok(approval_reasons)
    }

    /// Returns the approval reasons when the run halted for a human.
    async fn act(
        &self,
        state: &mut CimLoopState,
        config: &EngineConfig,
        scope: &AuditScope,
        mut approval_reasons: Vec<String>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Vec<String>>, EngineError> {
        let (mut requires_approval, step_count) = match &state.plan {
            Some(plan) => (plan.requires_approval, plan.steps.len()),
            None => return Ok(None),
        };

        // Escalated work waits for review whatever the decider planned.
        if state.goal.origin.requires_review() {
            requires_approval = true;
            if let Some(plan) = state.plan.as_mut() {
                plan.requires_approval = true;
            }
            if !approval_reasons.iter().any(|r| r == ESCALATION_REVIEW) {
                approval_reasons.push(ESCALATION_REVIEW.to_string());
            }
        }

        if requires_approval {
            info!(run_id = %state.run_id, reasons = ?approval_reasons, "Plan awaits approval");
            self.memory
                .write(scope.entry(
                    AuditAction::ApprovalRequested,
                    Phase::Planning,
                    AuditData::Approval {
                        step_id: None,
                        reasons: approval_reasons.clone(),
                    },
                ))
                .await?;
            state.set_status(LoopStatus::WaitingHuman);
            return Ok(Some(approval_reasons));
        }

        self.enter(state, LoopStatus::Acting, Phase::Action);
        for index in 0..step_count {
            if state.iteration >= config.max_loop_iterations {
                info!(
                    run_id = %state.run_id,
                    limit = config.max_loop_iterations,
                    "Iteration ceiling reached; stopping step execution"
                );
                break;
            }
            if self.check_cancel(state, scope, cancel).await? {
                break;
            }

            let Some(plan) = state.plan.as_ref() else {
                break;
            };
            let step = plan.steps[index].clone();

            if !plan.dependencies_met(index) {
                transition(state, index, StepStatus::Skipped)?;
                debug!(run_id = %state.run_id, step_id = %step.id, "Dependencies unmet; step skipped");
                continue;
            }

            match self.gate(&step, config) {
                Gate::Block(reasons) => {
                    transition(state, index, StepStatus::Failed)?;
                    let mut result = ActionResult::blocked(reasons);
                    result.logged = true;
                    self.record_step(state, index, result, config).await?;
                }
                Gate::Approve(reasons) => {
                    info!(run_id = %state.run_id, step_id = %step.id, "Step awaits approval");
                    self.memory
                        .write(scope.entry(
                            AuditAction::ApprovalRequested,
                            Phase::Action,
                            AuditData::Approval {
                                step_id: Some(step.id.clone()),
                                reasons: reasons.clone(),
                            },
                        ))
                        .await?;
                    state.set_status(LoopStatus::WaitingHuman);
                    return Ok(Some(reasons));
                }
                Gate::Run(reservation) => {
                    transition(state, index, StepStatus::InProgress)?;
                    let context = dependency_context(state, &step);
                    let result = self
                        .executor
                        .execute_with_retry(&step, context, config, None, cancel)
                        .await;
                    state.iteration += 1;
                    if result.attempts == 0 {
                        self.guardrails.release(reservation);
                    }

                    if result.success {
                        transition(state, index, StepStatus::Completed)?;
                    } else {
                        transition(state, index, StepStatus::Failed)?;
                        let err = CimError::new(
                            Phase::Action,
                            result.error.clone().unwrap_or_else(|| "step failed".into()),
                            false,
                        )
                        .with_context(step.id.clone());
                        self.memory.log_error(scope, &err).await?;
                        state.record_error(err);
                    }
                    self.record_step(state, index, result, config).await?;
                }
            }
        }
        Ok(None)
    }

    /// Soul `forbid` anchors first, then guardrails.
    fn gate(&self, step: &PlanStep, config: &EngineConfig) -> Gate {
        let capability = step.action.capability();
        if let Some(anchor) = self.soul.forbidding(capability) {
            warn!(step_id = %step.id, capability, anchor = %anchor.id, "Anchor forbids step");
            return Gate::Block(vec![format!(
                "anchor '{}' forbids '{capability}': {}",
                anchor.id, anchor.directive
            )]);
        }
        let (result, reservation) = self.guardrails.admit(step, config);
        if !result.can_execute {
            Gate::Block(result.blocked_reasons)
        } else if result.needs_approval {
            Gate::Approve(result.approval_reasons)
        } else {
            Gate::Run(reservation)
        }
    }

    /// Attach the result to its step, append to the history, audit it.
    async fn record_step(
        &self,
        state: &mut CimLoopState,
        index: usize,
        result: ActionResult,
        config: &EngineConfig,
    ) -> Result<(), EngineError> {
        let Some(step) = state.plan.as_mut().and_then(|p| p.steps.get_mut(index)) else {
            return Ok(());
        };
        step.result = Some(result.clone());
        let step = step.clone();

        state.action_history.push(ActionRecord {
            step_id: step.id.clone(),
            description: step.description.clone(),
            capability: step.action.capability().to_string(),
            status: step.status,
            result: result.clone(),
        });

        let entry = create_audit_entry(&result, &step, &config.agent_id)?
            .for_run(state.run_id.clone())
            .for_user(config.user_id.clone());
        self.memory.write(entry).await?;

        debug!(
            run_id = %state.run_id,
            step_id = %step.id,
            status = %step.status,
            attempts = result.attempts,
            "Step recorded"
        );
        self.events.publish(LoopEvent::StepFinished {
            run_id: state.run_id.clone(),
            step_id: step.id,
            status: step.status,
            duration_ms: result.execution_time_ms,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn observe(
        &self,
        state: &mut CimLoopState,
        scope: &AuditScope,
        halted_for: Option<Vec<String>>,
    ) -> Result<Observed, EngineError> {
        let count = |status| state.plan.as_ref().map_or(0, |p: &Plan| p.count(status));
        let completed = count(StepStatus::Completed);
        let failed = count(StepStatus::Failed);
        let skipped = count(StepStatus::Skipped);

        if !matches!(state.status, LoopStatus::WaitingHuman | LoopStatus::Failed) {
            state.set_status(LoopStatus::Completed);
        }
        let goal_met = completed > 0 && failed == 0 && state.status == LoopStatus::Completed;
        let summary = summarize(state, goal_met, halted_for.as_deref(), completed, failed, skipped);

        self.memory
            .create_task_summary(scope, state, goal_met, &summary)
            .await?;
        Ok(Observed { goal_met, summary })
    }

    /// Engine-level failure: record it and produce the failed observation.
    /// Audit writes here are best-effort; the run is already failing.
    async fn fail(&self, state: &mut CimLoopState, scope: &AuditScope, message: String) -> Observed {
        error!(run_id = %state.run_id, error = %message, "Run failed");
        let err = CimError::new(Phase::Engine, message.clone(), false);
        if let Err(e) = self.memory.log_error(scope, &err).await {
            warn!(run_id = %state.run_id, error = %e, "Could not record engine error");
        }
        state.record_error(err);
        state.set_status(LoopStatus::Failed);

        let summary = format!("Run failed: {message}");
        if let Err(e) = self.memory.create_task_summary(scope, state, false, &summary).await {
            warn!(run_id = %state.run_id, error = %e, "Could not write task summary");
        }
        Observed {
            goal_met: false,
            summary,
        }
    }
}

fn transition(state: &mut CimLoopState, index: usize, to: StepStatus) -> Result<(), PlanError> {
    match state.plan.as_mut().and_then(|p| p.steps.get_mut(index)) {
        Some(step) => step.transition(to),
        None => Ok(()),
    }
}

/// Results of the step's completed dependencies, rendered for the prompt.
fn dependency_context(state: &CimLoopState, step: &PlanStep) -> Vec<String> {
    let Some(plan) = state.plan.as_ref() else {
        return Vec::new();
    };
    step.dependencies
        .iter()
        .filter_map(|id| plan.step(id))
        .filter_map(|dep| dep.result.as_ref()?.data.as_ref().map(|d| d.summary()))
        .collect()
}

fn summarize(
    state: &CimLoopState,
    goal_met: bool,
    halted_for: Option<&[String]>,
    completed: usize,
    failed: usize,
    skipped: usize,
) -> String {
    let total = state.plan.as_ref().map_or(0, |p| p.steps.len());

    if state.status == LoopStatus::WaitingHuman {
        let reasons = halted_for.map(|r| r.join("; ")).unwrap_or_default();
        return if completed == 0 {
            format!("Plan created, awaiting approval: {reasons}")
        } else {
            format!("Paused after {completed} of {total} step(s), awaiting approval: {reasons}")
        };
    }
    if state.status == LoopStatus::Failed {
        return format!("Run cancelled after {completed} of {total} step(s).");
    }

    let last_output = state
        .action_history
        .iter()
        .rev()
        .find(|r| r.status == StepStatus::Completed)
        .and_then(|r| r.result.data.as_ref())
        .map(|d| d.summary());

    if goal_met {
        let mut out = format!("Completed {completed} step(s).");
        if let Some(output) = last_output {
            out.push_str(&format!(" Result: {output}"));
        }
        return out;
    }

    let mut out = format!("{completed} of {total} step(s) completed.");
    let failures: Vec<String> = state
        .action_history
        .iter()
        .filter(|r| r.status == StepStatus::Failed)
        .map(|r| {
            format!(
                "{} ({})",
                r.step_id,
                r.result.error.as_deref().unwrap_or("no error message")
            )
        })
        .collect();
    if !failures.is_empty() {
        out.push_str(&format!(" Failed: {}.", failures.join(", ")));
    }
    if skipped > 0 {
        out.push_str(&format!(" Skipped {skipped} step(s) with unmet dependencies."));
    }
    if failed == 0 && completed < total {
        out.push_str(" Stopped at the iteration ceiling.");
    }
    out
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use mindloop_core::error::ProviderError;
    use mindloop_core::goal::GoalOrigin;
    use mindloop_core::guardrail::{HardLimit, PermissionEffect, PermissionPolicy, RateLimit};
    use mindloop_core::plan::StepAction;
    use mindloop_core::provider::ModelTier;
    use std::time::Duration;

    fn config() -> EngineConfig {
        let mut config = EngineConfig::new("u1", "w1");
        config.retry.max_attempts = 1;
        config
    }

    fn search_step(order: usize) -> PlanStep {
        PlanStep::new(
            order,
            "Search",
            StepAction::ContextSearch {
                query: "q".into(),
            },
        )
    }

    fn note_step(order: usize) -> PlanStep {
        PlanStep::new(
            order,
            "Create note",
            StepAction::Integration {
                capability: "notes.create".into(),
                args: serde_json::json!({"title": "x"}),
            },
        )
    }

    #[tokio::test]
    async fn simple_lookup_meets_goal() {
        let harness = Harness::new();
        let result = harness
            .engine()
            .run("What meetings do I have this week?", &config(), None)
            .await;

        assert!(result.success);
        assert!(result.goal_met);
        assert_eq!(result.status(), LoopStatus::Completed);
        assert_eq!(result.final_state.action_history.len(), 1);
        assert!(result.final_state.errors.is_empty());

        let actions: Vec<AuditAction> = result.audit_trail.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::Decision,
                AuditAction::StepExecuted,
                AuditAction::TaskSummary
            ]
        );
    }

    #[tokio::test]
    async fn approval_plan_halts_before_any_step() {
        let mut plan = Plan::new("g", vec![note_step(1)], Default::default());
        plan.requires_approval = true;
        let harness = Harness::new().with_decider(FixedDecider::new(plan));
        let result = harness.engine().run("anything", &config(), None).await;

        assert!(result.success);
        assert!(!result.goal_met);
        assert_eq!(result.status(), LoopStatus::WaitingHuman);
        assert!(result.final_state.action_history.is_empty());
        assert_eq!(harness.integrations.invocations(), 0);
        assert!(result.summary.starts_with("Plan created, awaiting approval"));
        assert!(
            result
                .audit_trail
                .iter()
                .any(|e| e.action == AuditAction::ApprovalRequested)
        );
    }

    #[tokio::test]
    async fn failed_dependency_skips_dependent_step() {
        let harness = Harness::new()
            .with_integrations(StaticIntegrations::failing())
            .with_decider(FixedDecider::new(Plan::new(
                "g",
                vec![note_step(1), search_step(2).depends_on("step-1")],
                Default::default(),
            )));
        let result = harness.engine().run("anything", &config(), None).await;

        let plan = result.final_state.plan.as_ref().unwrap();
        assert_eq!(plan.steps[0].status, StepStatus::Failed);
        assert_eq!(plan.steps[1].status, StepStatus::Skipped);
        assert!(!result.goal_met);
        assert!(result.success);
        assert_eq!(harness.memory.search_count(), 1, "only perception searched");
        assert_eq!(result.final_state.errors_in(Phase::Action).count(), 1);
        assert!(result.summary.contains("Failed: step-1"));
    }

    #[tokio::test]
    async fn perception_failure_is_recoverable() {
        let harness = Harness::new().with_perceiver(FailingPerceiver);
        let result = harness.engine().run("What is on today?", &config(), None).await;

        let errors: Vec<&CimError> = result.final_state.errors_in(Phase::Perception).collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].recoverable);
        assert!(!result.final_state.action_history.is_empty(), "reached Act");
        assert!(result.success);
    }

    #[tokio::test]
    async fn planning_failure_falls_back_to_search() {
        let harness = Harness::new();
        let result = harness.engine().run("   ", &config(), None).await;

        assert_eq!(result.final_state.errors_in(Phase::Planning).count(), 1);
        let plan = result.final_state.plan.as_ref().unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert!(matches!(plan.steps[0].action, StepAction::ContextSearch { .. }));
        assert!(!plan.requires_approval);
    }

    #[tokio::test]
    async fn hard_limit_blocks_without_provider_call() {
        let mut config = config();
        config.guardrails.hard_limits.push(HardLimit {
            name: "no-notes".into(),
            capabilities: vec!["notes.*".into()],
            reason: "notes are read-only here".into(),
        });
        let harness = Harness::new()
            .with_decider(FixedDecider::new(Plan::new("g", vec![note_step(1)], Default::default())));
        let result = harness.engine().run("anything", &config, None).await;

        let record = &result.final_state.action_history[0];
        assert_eq!(record.status, StepStatus::Failed);
        assert!(record.result.is_blocked());
        assert_eq!(record.result.execution_time_ms, 0);
        assert_eq!(harness.integrations.invocations(), 0);
        assert!(
            result
                .audit_trail
                .iter()
                .any(|e| e.action == AuditAction::StepBlocked)
        );
    }

    #[tokio::test]
    async fn forbid_anchor_blocks_before_guardrails() {
        let step = PlanStep::new(
            1,
            "Read secret",
            StepAction::Integration {
                capability: "secrets.read".into(),
                args: serde_json::Value::Null,
            },
        );
        let harness = Harness::new()
            .with_decider(FixedDecider::new(Plan::new("g", vec![step], Default::default())));
        let result = harness.engine().run("anything", &config(), None).await;
        let record = &result.final_state.action_history[0];
        assert!(record.result.is_blocked());
        assert!(record.result.error.as_deref().unwrap().contains("protect-secrets"));
    }

    #[tokio::test]
    async fn mid_plan_approval_preserves_completed_steps() {
        let mut config = config();
        config.guardrails.permissions.push(PermissionPolicy {
            name: "confirm-notes".into(),
            capabilities: vec!["notes.create".into()],
            sources: vec![],
            effect: PermissionEffect::RequireApproval,
        });
        let harness = Harness::new().with_decider(FixedDecider::new(Plan::new(
            "g",
            vec![search_step(1), note_step(2).depends_on("step-1")],
            Default::default(),
        )));
        let result = harness.engine().run("anything", &config, None).await;

        assert_eq!(result.status(), LoopStatus::WaitingHuman);
        assert!(!result.goal_met);
        assert!(result.success);
        let plan = result.final_state.plan.as_ref().unwrap();
        assert_eq!(plan.steps[0].status, StepStatus::Completed);
        assert_eq!(plan.steps[1].status, StepStatus::Pending);
        assert!(result.summary.starts_with("Paused after 1 of 2"));
    }

    #[tokio::test]
    async fn iteration_ceiling_stops_without_failing() {
        let mut config = config();
        config.max_loop_iterations = 2;
        let harness = Harness::new().with_decider(FixedDecider::new(Plan::new(
            "g",
            vec![search_step(1), search_step(2), search_step(3)],
            Default::default(),
        )));
        let result = harness.engine().run("anything", &config, None).await;

        assert_eq!(result.final_state.iteration, 2);
        assert_eq!(result.status(), LoopStatus::Completed);
        assert!(result.success);
        let plan = result.final_state.plan.as_ref().unwrap();
        assert_eq!(plan.steps[2].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn rate_limit_is_shared_across_runs() {
        let mut config = config();
        config.guardrails.rate_limits.push(RateLimit {
            name: "one-search".into(),
            capabilities: vec!["memory.search".into()],
            max_calls: 1,
            window_secs: 3600,
            scope: Default::default(),
        });
        let harness = Harness::new();
        let engine = harness.engine();
        let first = engine.run("What is on today?", &config, None).await;
        let second = engine.run("What is on today?", &config, None).await;

        assert!(first.goal_met);
        assert!(!second.goal_met);
        assert!(second.final_state.action_history[0].result.is_blocked());
    }

    #[tokio::test]
    async fn cancelled_run_fails_without_acting() {
        let token = CancellationToken::new();
        token.cancel();
        let harness = Harness::new();
        let result = harness.engine().run("What is on today?", &config(), Some(&token)).await;

        assert!(!result.success);
        assert_eq!(result.status(), LoopStatus::Failed);
        assert_eq!(harness.memory.search_count(), 0);
        assert!(
            result
                .audit_trail
                .iter()
                .any(|e| e.action == AuditAction::TaskSummary)
        );
    }

    #[tokio::test]
    async fn panics_become_failed_results() {
        let harness = Harness::new().with_perceiver(PanickingPerceiver);
        let result = harness.engine().run("anything", &config(), None).await;

        assert!(!result.success);
        assert_eq!(result.status(), LoopStatus::Failed);
        let engine_errors: Vec<&CimError> = result.final_state.errors_in(Phase::Engine).collect();
        assert!(engine_errors[0].message.contains("perceiver exploded"));
    }

    #[tokio::test]
    async fn audit_write_failure_fails_the_run() {
        let harness = Harness::new().with_broken_audit();
        let result = harness.engine().run("What is on today?", &config(), None).await;
        assert!(!result.success);
        assert!(result.summary.starts_with("Run failed"));
    }

    #[tokio::test]
    async fn reasoning_results_flow_into_dependent_steps() {
        let model = ScriptedModel::new(vec![Ok("the answer".into())]);
        let harness = Harness::new().with_model(model).with_decider(FixedDecider::new(Plan::new(
            "g",
            vec![
                search_step(1),
                PlanStep::new(
                    2,
                    "Answer",
                    StepAction::Reasoning {
                        prompt: "Answer it".into(),
                        tier: ModelTier::Standard,
                    },
                )
                .depends_on("step-1"),
            ],
            Default::default(),
        )));
        let result = harness.engine().run("anything", &config(), None).await;

        assert!(result.goal_met);
        assert!(result.summary.ends_with("Result: the answer"));
        let prompt = &harness.model.requests()[0].messages[1].content;
        assert!(prompt.contains("Dentist on Friday"));
    }

    #[tokio::test]
    async fn run_cim_applies_identity_and_source() {
        let harness = Harness::new();
        let result = harness
            .engine()
            .run_cim(
                "What is on today?",
                "alice",
                "home",
                RunOptions {
                    source: Some(InvocationSource::Queue),
                    ..Default::default()
                },
            )
            .await;
        assert!(result.success);
        let perception = result.final_state.perception.as_ref().unwrap();
        assert_eq!(perception.state.context["user_id"], "alice");
        assert_eq!(perception.state.context["source"], "queue");
        assert!(result.audit_trail.iter().all(|e| e.user_id.as_deref() == Some("alice")));
    }

    #[tokio::test]
    async fn transient_model_failure_is_retried_within_a_run() {
        let model = ScriptedModel::new(vec![
            Err(ProviderError::Network("reset".into())),
            Ok("fine".into()),
        ]);
        let harness = Harness::new().with_model(model).with_decider(FixedDecider::new(Plan::new(
            "g",
            vec![PlanStep::new(
                1,
                "Answer",
                StepAction::Reasoning {
                    prompt: "Answer it".into(),
                    tier: ModelTier::Economy,
                },
            )],
            Default::default(),
        )));
        let mut config = config();
        config.retry.max_attempts = 2;
        config.retry.initial_delay_ms = 1;
        let result = harness.engine().run("anything", &config, None).await;
        assert!(result.goal_met);
        assert_eq!(result.final_state.action_history[0].result.attempts, 2);
    }

    fn reasoning_plan() -> Plan {
        Plan::new(
            "g",
            vec![PlanStep::new(
                1,
                "Answer",
                StepAction::Reasoning {
                    prompt: "Answer it".into(),
                    tier: ModelTier::Economy,
                },
            )],
            Default::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_runs_cannot_overrun_a_rate_limit() {
        let mut config = config();
        config.guardrails.rate_limits.push(RateLimit {
            name: "one-answer".into(),
            capabilities: vec!["model.reasoning".into()],
            max_calls: 1,
            window_secs: 3600,
            scope: Default::default(),
        });
        let harness = Harness::new()
            .with_model(ScriptedModel::new(vec![]).with_delay(Duration::from_millis(50)))
            .with_decider(FixedDecider::new(reasoning_plan()));
        let engine = harness.engine();

        let (a, b) = tokio::join!(
            engine.run("anything", &config, None),
            engine.run("anything", &config, None)
        );

        assert_eq!(harness.model.call_count(), 1);
        assert_eq!([a.goal_met, b.goal_met].iter().filter(|met| **met).count(), 1);
        let blocked = if a.goal_met { &b } else { &a };
        assert!(blocked.final_state.action_history[0].result.is_blocked());
    }

    #[tokio::test]
    async fn slot_is_returned_when_a_step_never_attempts() {
        let mut config = config();
        config.guardrails.rate_limits.push(RateLimit {
            name: "one-answer".into(),
            capabilities: vec!["model.reasoning".into()],
            max_calls: 1,
            window_secs: 3600,
            scope: Default::default(),
        });
        let harness = Harness::new().with_decider(FixedDecider::new(reasoning_plan()));
        let engine = harness.engine();
        let rule = config.guardrails.rate_limits[0].clone();

        let (_, held) = engine.guardrails().admit(&reasoning_plan().steps[0], &config);
        engine.guardrails().release(held);
        assert_eq!(engine.guardrails().limiter().status(&rule, "u1").used, 0);

        let result = engine.run("anything", &config, None).await;
        assert!(result.goal_met);
        assert_eq!(engine.guardrails().limiter().status(&rule, "u1").used, 1);
    }

    #[tokio::test]
    async fn escalated_goal_waits_whatever_the_decider_planned() {
        let harness = Harness::new()
            .with_decider(FixedDecider::new(Plan::new("g", vec![note_step(1)], Default::default())));
        let goal = Goal::from_query("Create a note about the outage").with_origin(
            GoalOrigin::Escalation {
                from_agent: "triage".into(),
                reason: "needs sign-off".into(),
            },
        );
        let result = harness.engine().run_goal(goal, &config(), None).await;

        assert_eq!(result.status(), LoopStatus::WaitingHuman);
        assert!(result.success);
        assert!(!result.goal_met);
        assert_eq!(harness.integrations.invocations(), 0);
        assert!(result.final_state.plan.as_ref().unwrap().requires_approval);
        assert!(result.summary.contains("escalated goals require human review"));
    }
}
