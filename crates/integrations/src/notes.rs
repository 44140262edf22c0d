//! In-process notes integration.
//!
//! `notes.create` and `notes.list` are reversible; `notes.delete` is not,
//! so any plan that deletes a note goes through approval first. Notes
//! flagged `follow_up` surface as pending events until deleted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mindloop_core::error::IntegrationError;
use mindloop_core::perception::PendingEvent;
use mindloop_core::plan::{ActionData, ActionResult};
use mindloop_core::provider::{CapabilityDescriptor, CostClass};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{Integration, required_str};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub follow_up: bool,
    #[serde(default)]
    pub urgent: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NotesIntegration {
    notes: Arc<RwLock<Vec<Note>>>,
}

impl NotesIntegration {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.notes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.notes.read().await.is_empty()
    }

    async fn create(&self, args: &serde_json::Value) -> Result<ActionResult, IntegrationError> {
        let title = required_str(args, "title", "notes.create")?;
        let note = Note {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            body: args["body"].as_str().unwrap_or_default().to_string(),
            follow_up: args["follow_up"].as_bool().unwrap_or(false),
            urgent: args["urgent"].as_bool().unwrap_or(false),
            created_at: Utc::now(),
        };
        let payload = serde_json::to_value(&note).unwrap_or(serde_json::Value::Null);
        let summary = format!("Created note '{}'", note.title);
        self.notes.write().await.push(note);
        Ok(ActionResult::succeeded(
            ActionData::Integration {
                capability: "notes.create".into(),
                summary,
                payload,
            },
            true,
        ))
    }

    async fn list(&self, args: &serde_json::Value) -> Result<ActionResult, IntegrationError> {
        let filter = args["query"].as_str().map(str::to_lowercase);
        let notes = self.notes.read().await;
        let matching: Vec<&Note> = notes
            .iter()
            .filter(|n| {
                filter.as_deref().is_none_or(|q| {
                    n.title.to_lowercase().contains(q) || n.body.to_lowercase().contains(q)
                })
            })
            .collect();
        let summary = if matching.is_empty() {
            "No notes found".to_string()
        } else {
            let titles: Vec<&str> = matching.iter().map(|n| n.title.as_str()).collect();
            format!("{} note(s): {}", matching.len(), titles.join(", "))
        };
        let payload = serde_json::to_value(&matching).unwrap_or(serde_json::Value::Null);
        Ok(ActionResult::succeeded(
            ActionData::Integration {
                capability: "notes.list".into(),
                summary,
                payload,
            },
            true,
        ))
    }

    async fn delete(&self, args: &serde_json::Value) -> Result<ActionResult, IntegrationError> {
        let id = required_str(args, "id", "notes.delete")?;
        let mut notes = self.notes.write().await;
        let position = notes.iter().position(|n| n.id == id).ok_or_else(|| {
            IntegrationError::InvocationFailed {
                capability: "notes.delete".into(),
                reason: format!("no note with id '{id}'"),
            }
        })?;
        let removed = notes.remove(position);
        Ok(ActionResult::succeeded(
            ActionData::Integration {
                capability: "notes.delete".into(),
                summary: format!("Deleted note '{}'", removed.title),
                payload: serde_json::json!({ "id": removed.id }),
            },
            false,
        ))
    }
}

#[async_trait]
impl Integration for NotesIntegration {
    fn name(&self) -> &str {
        "notes"
    }

    fn capabilities(&self) -> Vec<CapabilityDescriptor> {
        vec![
            CapabilityDescriptor {
                name: "notes.create".into(),
                description: "Create a note with a title and optional body".into(),
                keywords: vec![
                    "note".into(),
                    "remember".into(),
                    "jot".into(),
                    "write".into(),
                    "create".into(),
                    "add".into(),
                ],
                reversible: true,
                side_effecting: true,
                cost: CostClass::Free,
            },
            CapabilityDescriptor {
                name: "notes.list".into(),
                description: "List notes, optionally filtered by a query".into(),
                keywords: vec!["notes".into(), "list".into(), "show".into()],
                reversible: true,
                side_effecting: false,
                cost: CostClass::Free,
            },
            CapabilityDescriptor {
                name: "notes.delete".into(),
                description: "Permanently delete a note by id".into(),
                keywords: vec!["delete".into(), "remove".into(), "erase".into()],
                reversible: false,
                side_effecting: true,
                cost: CostClass::Free,
            },
        ]
    }

    async fn invoke(
        &self,
        capability: &str,
        args: &serde_json::Value,
    ) -> Result<ActionResult, IntegrationError> {
        match capability {
            "notes.create" => self.create(args).await,
            "notes.list" => self.list(args).await,
            "notes.delete" => self.delete(args).await,
            other => Err(IntegrationError::CapabilityNotFound(other.to_string())),
        }
    }

    async fn pending_events(&self) -> Result<Vec<PendingEvent>, IntegrationError> {
        Ok(self
            .notes
            .read()
            .await
            .iter()
            .filter(|n| n.follow_up)
            .map(|n| PendingEvent {
                id: n.id.clone(),
                source: "notes".into(),
                summary: format!("Follow up: {}", n.title),
                received_at: n.created_at,
                urgent: n.urgent,
            })
            .collect())
    }
}
