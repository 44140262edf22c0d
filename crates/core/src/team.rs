//! Multi-agent entities: roster, teams, context bundles and mailbox messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::goal::Goal;
use crate::provider::ModelTier;

/// Id of the reserved inbox for messages addressed to a person.
pub const HUMAN_INBOX: &str = "human";

/// A member of a team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub description: String,
    /// Capability patterns this agent is expected to use.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Cost ceiling for this agent's runs.
    #[serde(default)]
    pub model_tier: ModelTier,
    /// Default escalation target (agent id or `human`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalates_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTeam {
    pub id: String,
    pub name: String,
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AgentTeam {
    pub fn has_member(&self, agent_id: &str) -> bool {
        self.members.iter().any(|m| m == agent_id)
    }
}

/// A serializable snapshot handed to a teammate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub goal: Goal,
    /// What has been done so far, one line per item.
    #[serde(default)]
    pub progress: Vec<String>,
    /// Facts the receiver should know.
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub open_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_run_id: Option<String>,
}

impl ContextBundle {
    pub fn new(goal: Goal) -> Self {
        Self {
            goal,
            progress: Vec::new(),
            facts: Vec::new(),
            open_questions: Vec::new(),
            source_run_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum EscalationTarget {
    Agent(String),
    Human,
}

impl EscalationTarget {
    pub fn inbox(&self) -> &str {
        match self {
            EscalationTarget::Agent(id) => id,
            EscalationTarget::Human => HUMAN_INBOX,
        }
    }
}

/// Body of a mailbox message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageKind {
    Text {
        text: String,
    },
    /// Transfer of an in-flight goal.
    Handoff {
        bundle: ContextBundle,
    },
    /// Request for a more capable agent or a human. Never auto-executed.
    Escalation {
        bundle: ContextBundle,
        reason: String,
        target: EscalationTarget,
    },
    Opaque {
        value: serde_json::Value,
    },
}

impl MessageKind {
    pub fn label(&self) -> &'static str {
        match self {
            MessageKind::Text { .. } => "text",
            MessageKind::Handoff { .. } => "handoff",
            MessageKind::Escalation { .. } => "escalation",
            MessageKind::Opaque { .. } => "opaque",
        }
    }
}

/// The mailbox unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub kind: MessageKind,
    pub sent_at: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(from: impl Into<String>, to: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            kind,
            sent_at: Utc::now(),
        }
    }

    /// Short human-readable preview for logs and audit entries.
    pub fn preview(&self) -> String {
        let text = match &self.kind {
            MessageKind::Text { text } => text.clone(),
            MessageKind::Handoff { bundle } => bundle.goal.description.clone(),
            MessageKind::Escalation { reason, .. } => reason.clone(),
            MessageKind::Opaque { value } => value.to_string(),
        };
        text.chars().take(80).collect()
    }
}
