//! External memory: typed, append-only audit writes over an [`AuditSink`].
//!
//! Every write stamps a SHA-256 digest over the entry's canonical content and
//! mirrors the entry to `tracing` under the `mindloop::audit` target. A failed
//! append is returned to the caller, never swallowed.

use mindloop_core::audit::{AuditAction, AuditData, AuditFilter, AuditSink, ExternalMemoryEntry};
use mindloop_core::error::MemoryError;
use mindloop_core::plan::{Plan, StepStatus};
use mindloop_core::provider::SelectedModel;
use mindloop_core::state::{CimError, CimLoopState, Phase};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::sync::Arc;

use crate::in_memory::InMemoryAuditSink;

/// Who is writing: stamped onto every entry from one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditScope {
    pub agent_id: String,
    pub run_id: Option<String>,
    pub user_id: Option<String>,
}

impl AuditScope {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            run_id: None,
            user_id: None,
        }
    }

    pub fn run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn entry(&self, action: AuditAction, phase: Phase, data: AuditData) -> ExternalMemoryEntry {
        let mut entry = ExternalMemoryEntry::new(self.agent_id.clone(), action, data).in_phase(phase);
        entry.run_id = self.run_id.clone();
        entry.user_id = self.user_id.clone();
        entry
    }
}

/// Hex SHA-256 over the entry's canonical bytes.
pub fn compute_digest(entry: &ExternalMemoryEntry) -> Result<String, MemoryError> {
    let bytes = entry
        .canonical_bytes()
        .map_err(|e| MemoryError::AppendFailed(format!("Failed to encode entry: {e}")))?;
    let hash = Sha256::digest(&bytes);
    let mut out = String::with_capacity(hash.len() * 2);
    for byte in hash {
        let _ = write!(out, "{byte:02x}");
    }
    Ok(out)
}

#[derive(Clone)]
pub struct ExternalMemory {
    sink: Arc<dyn AuditSink>,
}

impl ExternalMemory {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// External memory backed by a fresh in-memory sink.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryAuditSink::new()))
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    /// Append one entry. Returns the entry as stored (with its digest).
    pub async fn write(&self, mut entry: ExternalMemoryEntry) -> Result<ExternalMemoryEntry, MemoryError> {
        entry.digest = compute_digest(&entry)?;
        self.sink.append(&entry).await?;

        tracing::info!(
            target: "mindloop::audit",
            entry_id = %entry.id,
            agent_id = %entry.agent_id,
            run_id = entry.run_id.as_deref().unwrap_or("-"),
            action = %entry.action,
            phase = entry.phase.map(|p| p.to_string()).unwrap_or_default(),
            digest = %entry.digest,
            "audit entry written"
        );
        Ok(entry)
    }

    pub async fn read(&self, filter: &AuditFilter) -> Result<Vec<ExternalMemoryEntry>, MemoryError> {
        self.sink.read(filter).await
    }

    /// Every entry of one run, oldest first.
    pub async fn get_audit_trail(&self, run_id: &str) -> Result<Vec<ExternalMemoryEntry>, MemoryError> {
        self.sink.read(&AuditFilter::run(run_id)).await
    }

    /// Whether `entry` still matches its digest.
    pub fn verify(entry: &ExternalMemoryEntry) -> bool {
        compute_digest(entry).is_ok_and(|d| !entry.digest.is_empty() && d == entry.digest)
    }

    /// Write the one summary a finished run produces.
    pub async fn create_task_summary(
        &self,
        scope: &AuditScope,
        state: &CimLoopState,
        goal_met: bool,
        summary: &str,
    ) -> Result<ExternalMemoryEntry, MemoryError> {
        let count = |status| state.plan.as_ref().map_or(0, |p: &Plan| p.count(status));
        let data = AuditData::TaskSummary {
            goal_id: state.goal.id.clone(),
            goal: state.goal.description.clone(),
            status: state.status,
            goal_met,
            completed: count(StepStatus::Completed),
            failed: count(StepStatus::Failed),
            skipped: count(StepStatus::Skipped),
            summary: summary.to_string(),
            action_history: state.action_history.clone(),
        };
        self.write(scope.entry(AuditAction::TaskSummary, Phase::Observation, data))
            .await
    }

    pub async fn log_decision(
        &self,
        scope: &AuditScope,
        plan: &Plan,
        query_type: &str,
        selected_model: &SelectedModel,
        reasoning: &str,
    ) -> Result<ExternalMemoryEntry, MemoryError> {
        let data = AuditData::Decision {
            query_type: query_type.to_string(),
            complexity: plan.estimated_complexity,
            plan_id: plan.id.clone(),
            step_count: plan.steps.len(),
            requires_approval: plan.requires_approval,
            selected_model: selected_model.clone(),
            reasoning: reasoning.to_string(),
        };
        self.write(scope.entry(AuditAction::Decision, Phase::Planning, data))
            .await
    }

    pub async fn log_error(
        &self,
        scope: &AuditScope,
        error: &CimError,
    ) -> Result<ExternalMemoryEntry, MemoryError> {
        let data = AuditData::Error {
            error: error.clone(),
        };
        self.write(scope.entry(AuditAction::Error, error.phase, data))
            .await
    }

    /// The latest task summaries for a user, newest last.
    pub async fn recent_task_summaries(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ExternalMemoryEntry>, MemoryError> {
        self.sink
            .read(&AuditFilter {
                user_id: Some(user_id.to_string()),
                action: Some(AuditAction::TaskSummary),
                limit: Some(limit),
                ..Default::default()
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mindloop_core::goal::Goal;
    use mindloop_core::plan::{Complexity, PlanStep, StepAction};
    use mindloop_core::provider::ModelTier;
    use mindloop_core::state::LoopStatus;

    struct BrokenSink;

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

    fn scope() -> AuditScope {
        AuditScope::new("agent-1").run("run-1").user("u1")
    }

    #[tokio::test]
    async fn write_stamps_verifiable_digest() {
        let memory = ExternalMemory::in_memory();
        let err = CimError::new(Phase::Perception, "search down", true);
        let stored = memory.log_error(&scope(), &err).await.unwrap();
        assert_eq!(stored.digest.len(), 64);
        assert!(ExternalMemory::verify(&stored));

        let mut tampered = stored.clone();
        tampered.agent_id = "someone-else".into();
        assert!(!ExternalMemory::verify(&tampered));
    }

    #[tokio::test]
    async fn write_failure_is_surfaced() {
        let memory = ExternalMemory::new(Arc::new(BrokenSink));
        let err = CimError::new(Phase::Engine, "boom", false);
        assert!(memory.log_error(&scope(), &err).await.is_err());
    }

    #[tokio::test]
    async fn audit_trail_is_scoped_to_run() {
        let memory = ExternalMemory::in_memory();
        let err = CimError::new(Phase::Action, "x", false);
        memory.log_error(&scope(), &err).await.unwrap();
        memory
            .log_error(&AuditScope::new("agent-1").run("run-2"), &err)
            .await
            .unwrap();
        let trail = memory.get_audit_trail("run-1").await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].phase, Some(Phase::Action));
    }

    #[tokio::test]
    async fn task_summary_counts_steps() {
        let memory = ExternalMemory::in_memory();
        let mut state = CimLoopState::new(Goal::from_query("find notes"));
        let mut plan = Plan::new(
            state.goal.id.clone(),
            vec![
                PlanStep::new(1, "search", StepAction::ContextSearch { query: "notes".into() }),
                PlanStep::new(
                    2,
                    "reason",
                    StepAction::Reasoning {
                        prompt: "p".into(),
                        tier: ModelTier::Economy,
                    },
                )
                .depends_on("step-1"),
            ],
            Complexity::Simple,
        );
        plan.steps[0].transition(StepStatus::InProgress).unwrap();
        plan.steps[0].transition(StepStatus::Failed).unwrap();
        plan.steps[1].transition(StepStatus::Skipped).unwrap();
        state.plan = Some(plan);
        state.set_status(LoopStatus::Failed);

        let entry = memory
            .create_task_summary(&scope(), &state, false, "Completed 0 of 2 steps")
            .await
            .unwrap();
        match entry.data {
            AuditData::TaskSummary {
                completed,
                failed,
                skipped,
                goal_met,
                ..
            } => {
                assert_eq!((completed, failed, skipped), (0, 1, 1));
                assert!(!goal_met);
            }
            other => panic!("unexpected data {other:?}"),
        }

        let recent = memory.recent_task_summaries("u1", 5).await.unwrap();
        assert_eq!(recent.len(), 1);
    }
}
