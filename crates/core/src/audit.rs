//! External memory: the append-only audit record.
//!
//! An [`ExternalMemoryEntry`] is written once and never mutated or deleted.
//! The [`AuditSink`] trait has no update or delete operation, so no
//! implementation can offer one through the public contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MemoryError;
use crate::plan::{ActionResult, Complexity, StepStatus};
use crate::provider::SelectedModel;
use crate::state::{ActionRecord, CimError, LoopStatus, Phase};

/// What an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    StepExecuted,
    StepBlocked,
    ApprovalRequested,
    Decision,
    Error,
    TaskSummary,
    HeartbeatCycle,
    MessageSent,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditAction::StepExecuted => "step_executed",
            AuditAction::StepBlocked => "step_blocked",
            AuditAction::ApprovalRequested => "approval_requested",
            AuditAction::Decision => "decision",
            AuditAction::Error => "error",
            AuditAction::TaskSummary => "task_summary",
            AuditAction::HeartbeatCycle => "heartbeat_cycle",
            AuditAction::MessageSent => "message_sent",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "step_executed" => AuditAction::StepExecuted,
            "step_blocked" => AuditAction::StepBlocked,
            "approval_requested" => AuditAction::ApprovalRequested,
            "decision" => AuditAction::Decision,
            "error" => AuditAction::Error,
            "task_summary" => AuditAction::TaskSummary,
            "heartbeat_cycle" => AuditAction::HeartbeatCycle,
            "message_sent" => AuditAction::MessageSent,
            other => return Err(format!("unknown audit action '{other}'")),
        })
    }
}

/// Typed audit payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditData {
    Step {
        step_id: String,
        description: String,
        capability: String,
        status: StepStatus,
        result: ActionResult,
    },
    Decision {
        query_type: String,
        complexity: Complexity,
        plan_id: String,
        step_count: usize,
        requires_approval: bool,
        selected_model: SelectedModel,
        reasoning: String,
    },
    Error {
        error: CimError,
    },
    Approval {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<String>,
        reasons: Vec<String>,
    },
    TaskSummary {
        goal_id: String,
        goal: String,
        status: LoopStatus,
        goal_met: bool,
        completed: usize,
        failed: usize,
        skipped: usize,
        summary: String,
        action_history: Vec<ActionRecord>,
    },
    Heartbeat {
        checks_run: Vec<String>,
        findings: usize,
        runs_triggered: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        skipped_reason: Option<String>,
    },
    Message {
        message_id: String,
        from: String,
        to: String,
        message_kind: String,
        preview: String,
    },
    Opaque {
        value: serde_json::Value,
    },
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalMemoryEntry {
    pub id: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub action: AuditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    pub timestamp: DateTime<Utc>,
    pub data: AuditData,
    /// Hex SHA-256 over the canonical content; set when written.
    #[serde(default)]
    pub digest: String,
}

impl ExternalMemoryEntry {
    pub fn new(agent_id: impl Into<String>, action: AuditAction, data: AuditData) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            run_id: None,
            user_id: None,
            action,
            phase: None,
            timestamp: Utc::now(),
            data,
            digest: String::new(),
        }
    }

    pub fn for_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn in_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    /// The bytes the digest covers: the entry serialized with an empty digest.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut unsigned = self.clone();
        unsigned.digest.clear();
        serde_json::to_vec(&unsigned)
    }
}

/// Query over external memory. All set fields must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub agent_id: Option<String>,
    pub run_id: Option<String>,
    pub user_id: Option<String>,
    pub action: Option<AuditAction>,
    pub phase: Option<Phase>,
    pub since: Option<DateTime<Utc>>,
    /// Keep only the most recent `limit` matches.
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn run(run_id: impl Into<String>) -> Self {
        Self {
            run_id: Some(run_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, entry: &ExternalMemoryEntry) -> bool {
        fn eq_opt(want: &Option<String>, have: &Option<String>) -> bool {
            want.as_ref().is_none_or(|w| have.as_ref() == Some(w))
        }
        self.agent_id.as_ref().is_none_or(|a| *a == entry.agent_id)
            && eq_opt(&self.run_id, &entry.run_id)
            && eq_opt(&self.user_id, &entry.user_id)
            && self.action.is_none_or(|a| a == entry.action)
            && self.phase.is_none_or(|p| entry.phase == Some(p))
            && self.since.is_none_or(|s| entry.timestamp >= s)
    }

    /// Filter entries (in append order) and apply `limit`, keeping order.
    pub fn apply<I>(&self, entries: I) -> Vec<ExternalMemoryEntry>
    where
        I: IntoIterator<Item = ExternalMemoryEntry>,
    {
        let mut matched: Vec<ExternalMemoryEntry> =
            entries.into_iter().filter(|e| self.matches(e)).collect();
        if let Some(limit) = self.limit
            && matched.len() > limit
        {
            matched.drain(..matched.len() - limit);
        }
        matched
    }
}

/// The durable audit sink backing external memory.
///
/// Append is the only mutation. Implementations must tolerate concurrent
/// appenders without losing writes.
#[async_trait]
pub trait AuditSink: Send + Sync {
    fn name(&self) -> &str;

    async fn append(&self, entry: &ExternalMemoryEntry) -> Result<(), MemoryError>;

    /// Entries matching `filter`, oldest first.
    async fn read(&self, filter: &AuditFilter) -> Result<Vec<ExternalMemoryEntry>, MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(run: &str, action: AuditAction) -> ExternalMemoryEntry {
        ExternalMemoryEntry::new(
            "agent-a",
            action,
            AuditData::Opaque {
                value: serde_json::json!({"n": 1}),
            },
        )
        .for_run(run)
    }

    #[test]
    fn filter_matches_set_fields_only() {
        let e = entry("r1", AuditAction::Decision).in_phase(Phase::Planning);
        assert!(AuditFilter::default().matches(&e));
        assert!(AuditFilter::run("r1").matches(&e));
        assert!(!AuditFilter::run("r2").matches(&e));
        let by_phase = AuditFilter {
            phase: Some(Phase::Action),
            ..Default::default()
        };
        assert!(!by_phase.matches(&e));
    }

    #[test]
    fn limit_keeps_most_recent() {
        let entries: Vec<_> = (0..5)
            .map(|i| entry(&format!("r{i}"), AuditAction::StepExecuted))
            .collect();
        let filter = AuditFilter {
            limit: Some(2),
            ..Default::default()
        };
        let kept = filter.apply(entries);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].run_id.as_deref(), Some("r3"));
        assert_eq!(kept[1].run_id.as_deref(), Some("r4"));
    }

    #[test]
    fn canonical_bytes_ignore_digest() {
        let mut e = entry("r1", AuditAction::Error);
        let before = e.canonical_bytes().unwrap();
        e.digest = "abc".into();
        assert_eq!(before, e.canonical_bytes().unwrap());
    }

    #[test]
    fn action_labels_parse() {
        assert_eq!(
            "task_summary".parse::<AuditAction>().unwrap(),
            AuditAction::TaskSummary
        );
        assert_eq!(AuditAction::StepBlocked.to_string(), "step_blocked");
    }
}
