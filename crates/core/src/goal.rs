//! Goals: the objective driving one loop invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How urgent a goal is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Where a goal came from.
///
/// The origin is data the planner acts on: escalated goals always go to a
/// human before anything executes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GoalOrigin {
    /// A user query (chat, queue, webhook)
    #[default]
    User,
    /// Synthesized by a heartbeat check
    Heartbeat { check: String },
    /// Transferred from another agent
    Handoff { from_agent: String },
    /// Elevated by another agent to a more capable agent or a human
    Escalation { from_agent: String, reason: String },
}

impl GoalOrigin {
    /// Whether work for this goal must be reviewed before it executes.
    pub fn requires_review(&self) -> bool {
        matches!(self, GoalOrigin::Escalation { .. })
    }
}

/// The objective of one loop invocation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_goal_id: Option<String>,
    #[serde(default)]
    pub origin: GoalOrigin,
    /// Context handed over with the goal (rendered context bundle).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Goal {
    /// Create a user goal from a natural-language query.
    pub fn from_query(query: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: query.trim().to_string(),
            success_criteria: vec!["Every planned step completes without failure".into()],
            priority: Priority::Normal,
            deadline: None,
            parent_goal_id: None,
            origin: GoalOrigin::User,
            context: None,
        }
    }

    pub fn with_origin(mut self, origin: GoalOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Derive a child goal (new id, same description) for a delegated run.
    pub fn child(&self, origin: GoalOrigin) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_goal_id: Some(self.id.clone()),
            origin,
            ..self.clone()
        }
    }
}
