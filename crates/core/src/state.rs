//! Loop state and the terminal result of an invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::ExternalMemoryEntry;
use crate::goal::Goal;
use crate::perception::PerceptionResult;
use crate::plan::{ActionResult, Plan, StepStatus};

/// Where in the system an error or audit entry originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Perception,
    Planning,
    Action,
    Observation,
    Engine,
    Heartbeat,
    Team,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Perception => "perception",
            Phase::Planning => "planning",
            Phase::Action => "action",
            Phase::Observation => "observation",
            Phase::Engine => "engine",
            Phase::Heartbeat => "heartbeat",
            Phase::Team => "team",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "perception" => Ok(Phase::Perception),
            "planning" => Ok(Phase::Planning),
            "action" => Ok(Phase::Action),
            "observation" => Ok(Phase::Observation),
            "engine" => Ok(Phase::Engine),
            "heartbeat" => Ok(Phase::Heartbeat),
            "team" => Ok(Phase::Team),
            other => Err(format!("unknown phase '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    #[default]
    Idle,
    Perceiving,
    Planning,
    Acting,
    WaitingHuman,
    Completed,
    Failed,
}

impl std::fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoopStatus::Idle => "idle",
            LoopStatus::Perceiving => "perceiving",
            LoopStatus::Planning => "planning",
            LoopStatus::Acting => "acting",
            LoopStatus::WaitingHuman => "waiting_human",
            LoopStatus::Completed => "completed",
            LoopStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// An error recorded during a run.
///
/// `perception` and `planning` errors are always recoverable; `action`
/// errors fail their step; `engine` errors fail the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CimError {
    pub phase: Phase,
    pub message: String,
    pub recoverable: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl CimError {
    pub fn new(phase: Phase, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            phase,
            message: message.into(),
            recoverable,
            timestamp: Utc::now(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// One executed or blocked step, as kept in the action history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub step_id: String,
    pub description: String,
    pub capability: String,
    pub status: StepStatus,
    pub result: ActionResult,
}

/// The Engine's working state. One per invocation, mutated only by the Engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CimLoopState {
    pub run_id: String,
    pub iteration: u32,
    pub status: LoopStatus,
    pub goal: Goal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perception: Option<PerceptionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub action_history: Vec<ActionRecord>,
    #[serde(default)]
    pub errors: Vec<CimError>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl CimLoopState {
    pub fn new(goal: Goal) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            iteration: 0,
            status: LoopStatus::Idle,
            goal,
            perception: None,
            plan: None,
            action_history: Vec::new(),
            errors: Vec::new(),
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn set_status(&mut self, status: LoopStatus) {
        self.status = status;
        self.updated_at = Utc::now();
        if matches!(status, LoopStatus::Completed | LoopStatus::Failed | LoopStatus::WaitingHuman) {
            self.completed_at = Some(self.updated_at);
        }
    }

    pub fn record_error(&mut self, error: CimError) {
        self.updated_at = Utc::now();
        self.errors.push(error);
    }

    pub fn errors_in(&self, phase: Phase) -> impl Iterator<Item = &CimError> {
        self.errors.iter().filter(move |e| e.phase == phase)
    }
}

/// The single terminal artifact of a loop invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CimResult {
    pub success: bool,
    pub goal_met: bool,
    pub final_state: CimLoopState,
    pub summary: String,
    #[serde(default)]
    pub audit_trail: Vec<ExternalMemoryEntry>,
}

impl CimResult {
    pub fn run_id(&self) -> &str {
        &self.final_state.run_id
    }

    pub fn status(&self) -> LoopStatus {
        self.final_state.status
    }
}
