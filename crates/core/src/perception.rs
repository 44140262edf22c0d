//! Perception output: the structured snapshot the loop plans against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::provider::IntegrationInfo;

/// A piece of remembered knowledge returned by the search provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryFragment {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Relevance in `0.0..=1.0`, set by the search provider.
    #[serde(default)]
    pub score: f32,
    pub created_at: DateTime<Utc>,
}

/// An event waiting on an integration (unread mail, calendar invite, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEvent {
    pub id: String,
    pub source: String,
    pub summary: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub urgent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Time,
    Email,
    Term,
}

/// A named entity recognized in the query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub value: String,
}

/// What the loop currently believes about the world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedState {
    pub timestamp: DateTime<Utc>,
    pub timezone: String,
    #[serde(default)]
    pub active_sources: Vec<String>,
    /// Free-form context keyed by origin (`query`, `handoff`, `recent_task`, ...).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    /// One-paragraph summary of the snapshot.
    #[serde(default)]
    pub summary: String,
}

/// Perception output, rebuilt once per loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptionResult {
    pub state: ObservedState,
    #[serde(default)]
    pub relevant_memories: Vec<MemoryFragment>,
    #[serde(default)]
    pub active_integrations: Vec<IntegrationInfo>,
    #[serde(default)]
    pub pending_events: Vec<PendingEvent>,
}

impl PerceptionResult {
    /// The default snapshot used when perception fails.
    pub fn empty(timezone: &str) -> Self {
        Self {
            state: ObservedState {
                timestamp: Utc::now(),
                timezone: timezone.to_string(),
                active_sources: Vec::new(),
                context: BTreeMap::new(),
                entities: Vec::new(),
                summary: "No context available.".to_string(),
            },
            relevant_memories: Vec::new(),
            active_integrations: Vec::new(),
            pending_events: Vec::new(),
        }
    }

    /// Look up an advertised capability across all active integrations.
    pub fn capability(&self, name: &str) -> Option<&crate::provider::CapabilityDescriptor> {
        self.active_integrations
            .iter()
            .flat_map(|i| i.capabilities.iter())
            .find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CapabilityDescriptor, CostClass};

    #[test]
    fn empty_perception_has_no_context() {
        let p = PerceptionResult::empty("Europe/Berlin");
        assert!(p.relevant_memories.is_empty());
        assert!(p.active_integrations.is_empty());
        assert_eq!(p.state.timezone, "Europe/Berlin");
    }

    #[test]
    fn capability_lookup_spans_integrations() {
        let mut p = PerceptionResult::empty("UTC");
        p.active_integrations.push(IntegrationInfo {
            name: "notes".into(),
            capabilities: vec![CapabilityDescriptor {
                name: "notes.delete".into(),
                description: "Delete a note".into(),
                keywords: vec!["delete".into()],
                reversible: false,
                side_effecting: true,
                cost: CostClass::Free,
            }],
        });
        assert!(p.capability("notes.delete").is_some_and(|c| !c.reversible));
        assert!(p.capability("notes.create").is_none());
    }
}
