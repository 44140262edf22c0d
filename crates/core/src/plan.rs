//! Plans, plan steps and action results.
//!
//! A [`Plan`] is produced once per loop invocation by Decision. Its steps form
//! a dependency DAG that [`Plan::validate`] checks at creation time; the
//! Engine executes steps strictly in listed order and skips any step whose
//! dependencies are not all [`StepStatus::Completed`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::error::PlanError;
use crate::perception::MemoryFragment;
use crate::provider::ModelTier;

/// Capability name reported by context-search steps.
pub const CONTEXT_SEARCH_CAPABILITY: &str = "memory.search";
/// Capability name reported by reasoning steps.
pub const REASONING_CAPABILITY: &str = "model.reasoning";

/// Estimated difficulty of a goal, which also drives model-tier selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    #[default]
    Simple,
    Moderate,
    Complex,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a plan step.
///
/// `pending → in_progress → {completed, failed}`, plus `pending → skipped`
/// (unmet dependency) and `pending → failed` (blocked before execution).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped)
    }

    fn can_transition_to(self, to: StepStatus) -> bool {
        use StepStatus::*;
        matches!(
            (self, to),
            (Pending, InProgress)
                | (Pending, Skipped)
                | (Pending, Failed)
                | (InProgress, Completed)
                | (InProgress, Failed)
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// What a step does when executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// Search the memory/search provider for context.
    ContextSearch { query: String },
    /// Invoke an integration capability (e.g. `email.send`).
    Integration {
        capability: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    /// Ask the model-call provider to reason over a prompt.
    Reasoning {
        prompt: String,
        #[serde(default)]
        tier: ModelTier,
    },
    /// An action kind this build does not know how to execute.
    Unknown {
        kind: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

impl StepAction {
    /// The capability name guardrails and anchors are evaluated against.
    pub fn capability(&self) -> &str {
        match self {
            StepAction::ContextSearch { .. } => CONTEXT_SEARCH_CAPABILITY,
            StepAction::Integration { capability, .. } => capability,
            StepAction::Reasoning { .. } => REASONING_CAPABILITY,
            StepAction::Unknown { kind, .. } => kind,
        }
    }
}

/// One independently statusable unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub order: usize,
    pub description: String,
    pub action: StepAction,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionResult>,
}

impl PlanStep {
    pub fn new(order: usize, description: impl Into<String>, action: StepAction) -> Self {
        Self {
            id: format!("step-{order}"),
            order,
            description: description.into(),
            action,
            dependencies: Vec::new(),
            status: StepStatus::Pending,
            result: None,
        }
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.dependencies.push(step_id.into());
        self
    }

    /// Move to a new status, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, to: StepStatus) -> Result<(), PlanError> {
        if !self.status.can_transition_to(to) {
            return Err(PlanError::InvalidTransition {
                step: self.id.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}

/// An ordered, dependency-aware decomposition of a goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub goal_id: String,
    pub steps: Vec<PlanStep>,
    pub estimated_complexity: Complexity,
    pub requires_approval: bool,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(goal_id: impl Into<String>, steps: Vec<PlanStep>, complexity: Complexity) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            goal_id: goal_id.into(),
            steps,
            estimated_complexity: complexity,
            requires_approval: false,
            created_at: Utc::now(),
        }
    }

    /// The plan used when Decision fails: one unapproved context search of
    /// the original query.
    pub fn fallback(goal_id: impl Into<String>, query: &str) -> Self {
        let step = PlanStep::new(
            1,
            "Search available context for the request",
            StepAction::ContextSearch {
                query: query.to_string(),
            },
        );
        Self::new(goal_id, vec![step], Complexity::Simple)
    }

    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Whether every dependency of the step at `index` has completed.
    pub fn dependencies_met(&self, index: usize) -> bool {
        let Some(step) = self.steps.get(index) else {
            return false;
        };
        step.dependencies.iter().all(|dep| {
            self.step(dep)
                .is_some_and(|d| d.status == StepStatus::Completed)
        })
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// Check that ids are unique, dependencies exist, and there is no cycle.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::Empty);
        }

        let mut ids = HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.id.as_str()) {
                return Err(PlanError::DuplicateStep(step.id.clone()));
            }
        }
        for step in &self.steps {
            for dep in &step.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(PlanError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let edges: HashMap<&str, Vec<&str>> = self
            .steps
            .iter()
            .map(|s| {
                (
                    s.id.as_str(),
                    s.dependencies.iter().map(String::as_str).collect(),
                )
            })
            .collect();
        let mut marks: HashMap<&str, Mark> = HashMap::new();

        fn visit<'a>(
            node: &'a str,
            edges: &HashMap<&'a str, Vec<&'a str>>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Result<(), PlanError> {
            match marks.get(node) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => return Err(PlanError::Cycle(node.to_string())),
                None => {}
            }
            marks.insert(node, Mark::Visiting);
            for dep in edges.get(node).into_iter().flatten() {
                visit(dep, edges, marks)?;
            }
            marks.insert(node, Mark::Done);
            Ok(())
        }

        for step in &self.steps {
            visit(step.id.as_str(), &edges, &mut marks)?;
        }
        Ok(())
    }
}

/// The unit Action executes: a step plus the invocation it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub step_id: String,
    pub description: String,
    pub action: StepAction,
    pub user_id: String,
    pub workspace_id: String,
    /// Results of completed dependency steps, rendered as text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl ActionRequest {
    pub fn from_step(step: &PlanStep, user_id: &str, workspace_id: &str) -> Self {
        Self {
            step_id: step.id.clone(),
            description: step.description.clone(),
            action: step.action.clone(),
            user_id: user_id.to_string(),
            workspace_id: workspace_id.to_string(),
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.context = context;
        self
    }
}

/// Typed payload of an action result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionData {
    SearchResults {
        fragments: Vec<MemoryFragment>,
    },
    Completion {
        model: String,
        text: String,
    },
    Integration {
        capability: String,
        summary: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    Blocked {
        reasons: Vec<String>,
    },
    /// Anything a newer provider returns that this build does not model.
    Opaque {
        value: serde_json::Value,
    },
}

impl ActionData {
    /// One-line rendering used for summaries and downstream step context.
    pub fn summary(&self) -> String {
        match self {
            ActionData::SearchResults { fragments } => {
                if fragments.is_empty() {
                    "No matching context found".to_string()
                } else {
                    let lines: Vec<&str> =
                        fragments.iter().map(|f| f.content.as_str()).collect();
                    format!("{} context item(s): {}", fragments.len(), lines.join(" | "))
                }
            }
            ActionData::Completion { text, .. } => text.clone(),
            ActionData::Integration { summary, .. } => summary.clone(),
            ActionData::Blocked { reasons } => format!("blocked: {}", reasons.join("; ")),
            ActionData::Opaque { value } => value.to_string(),
        }
    }
}

/// Outcome of executing (or refusing to execute) one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ActionData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub tool_calls: u32,
    /// Set once the result has been recorded; required before auditing.
    pub logged: bool,
    pub reversible: bool,
    #[serde(default)]
    pub attempts: u32,
}

impl ActionResult {
    pub fn succeeded(data: ActionData, reversible: bool) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            execution_time_ms: 0,
            tool_calls: 1,
            logged: false,
            reversible,
            attempts: 0,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            execution_time_ms: 0,
            tool_calls: 0,
            logged: false,
            reversible: true,
            attempts: 0,
        }
    }

    /// A result for a step refused before any provider call.
    pub fn blocked(reasons: Vec<String>) -> Self {
        Self {
            success: false,
            error: Some(format!("blocked: {}", reasons.join("; "))),
            data: Some(ActionData::Blocked { reasons }),
            execution_time_ms: 0,
            tool_calls: 0,
            logged: false,
            reversible: true,
            attempts: 0,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self.data, Some(ActionData::Blocked { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search(order: usize) -> PlanStep {
        PlanStep::new(
            order,
            format!("search {order}"),
            StepAction::ContextSearch {
                query: "q".into(),
            },
        )
    }

    #[test]
    fn fallback_plan_is_single_unapproved_search() {
        let plan = Plan::fallback("goal-1", "What meetings do I have?");
        assert_eq!(plan.steps.len(), 1);
        assert!(!plan.requires_approval);
        assert_eq!(plan.steps[0].action.capability(), CONTEXT_SEARCH_CAPABILITY);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unknown_dependency() {
        let plan = Plan::new("g", vec![search(1).depends_on("step-9")], Complexity::Simple);
        assert_eq!(
            plan.validate(),
            Err(PlanError::UnknownDependency {
                step: "step-1".into(),
                dependency: "step-9".into()
            })
        );
    }

    #[test]
    fn validate_rejects_cycles() {
        let plan = Plan::new(
            "g",
            vec![search(1).depends_on("step-2"), search(2).depends_on("step-1")],
            Complexity::Moderate,
        );
        assert!(matches!(plan.validate(), Err(PlanError::Cycle(_))));
    }

    #[test]
    fn validate_rejects_duplicates() {
        let plan = Plan::new("g", vec![search(1), search(1)], Complexity::Simple);
        assert_eq!(plan.validate(), Err(PlanError::DuplicateStep("step-1".into())));
    }

    #[test]
    fn dependencies_met_requires_completed() {
        let mut plan = Plan::new(
            "g",
            vec![search(1), search(2).depends_on("step-1")],
            Complexity::Simple,
        );
        assert!(plan.dependencies_met(0));
        assert!(!plan.dependencies_met(1));

        plan.steps[0].transition(StepStatus::InProgress).unwrap();
        plan.steps[0].transition(StepStatus::Failed).unwrap();
        assert!(!plan.dependencies_met(1));
    }

    #[test]
    fn step_state_machine_rejects_illegal_moves() {
        let mut step = search(1);
        assert!(step.transition(StepStatus::Completed).is_err());
        step.transition(StepStatus::InProgress).unwrap();
        step.transition(StepStatus::Completed).unwrap();
        assert!(step.transition(StepStatus::Skipped).is_err());
        assert!(step.status.is_terminal());
    }

    #[test]
    fn blocked_result_has_no_cost() {
        let result = ActionResult::blocked(vec!["capability disallowed".into()]);
        assert!(!result.success);
        assert!(result.is_blocked());
        assert_eq!(result.execution_time_ms, 0);
        assert_eq!(result.tool_calls, 0);
        assert!(result.error.unwrap().starts_with("blocked"));
    }

    #[test]
    fn step_action_serializes_tagged() {
        let action = StepAction::Integration {
            capability: "notes.create".into(),
            args: serde_json::json!({"text": "buy milk"}),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "integration");
        assert_eq!(action.capability(), "notes.create");
    }
}
