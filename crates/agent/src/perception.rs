//! Perception: turn "what do we know" into a structured snapshot.
//!
//! Read-only with respect to the rest of the system. The Engine treats any
//! error from here as recoverable and continues with an empty snapshot.

use async_trait::async_trait;
use chrono::Utc;
use mindloop_core::agent::EngineConfig;
use mindloop_core::perception::{Entity, EntityKind, ObservedState, PerceptionResult};
use mindloop_core::provider::{IntegrationProvider, MemorySearchProvider, SearchFilters};
use mindloop_memory::context::{ContextItem, ContextPriority, create_context_window};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::PerceptionError;

#[async_trait]
pub trait Perceiver: Send + Sync {
    async fn perceive(
        &self,
        config: &EngineConfig,
        query: &str,
    ) -> Result<PerceptionResult, PerceptionError>;
}

/// Perception over a memory/search provider and an integration provider.
pub struct StandardPerceiver {
    memory: Arc<dyn MemorySearchProvider>,
    integrations: Arc<dyn IntegrationProvider>,
    recall_limit: usize,
    context_budget: usize,
    item_ttl_secs: Option<u64>,
}

impl StandardPerceiver {
    pub fn new(
        memory: Arc<dyn MemorySearchProvider>,
        integrations: Arc<dyn IntegrationProvider>,
    ) -> Self {
        Self {
            memory,
            integrations,
            recall_limit: 8,
            context_budget: 4000,
            item_ttl_secs: None,
        }
    }

    pub fn with_recall_limit(mut self, limit: usize) -> Self {
        self.recall_limit = limit;
        self
    }

    /// Token budget for the recalled-memory block in the observed state.
    pub fn with_context_budget(mut self, tokens: usize) -> Self {
        self.context_budget = tokens;
        self
    }

    /// Recalled fragments older than this stay out of the observed context.
    pub fn with_item_ttl(mut self, ttl_secs: Option<u64>) -> Self {
        self.item_ttl_secs = ttl_secs;
        self
    }
}

#[async_trait]
impl Perceiver for StandardPerceiver {
    async fn perceive(
        &self,
        config: &EngineConfig,
        query: &str,
    ) -> Result<PerceptionResult, PerceptionError> {
        let filters = SearchFilters {
            user_id: Some(config.user_id.clone()),
            workspace_id: Some(config.workspace_id.clone()),
            limit: self.recall_limit,
            ..Default::default()
        };
        let memories = self.memory.search(query, &filters).await?;
        let integrations = self.integrations.list_active().await?;
        let pending = self.integrations.pending_events().await?;

        let now = Utc::now();
        let mut window = create_context_window(self.context_budget);
        for fragment in &memories {
            let priority = if fragment.score >= 0.75 {
                ContextPriority::High
            } else if fragment.score >= 0.4 {
                ContextPriority::Normal
            } else {
                ContextPriority::Low
            };
            let source = fragment.source.clone().unwrap_or_else(|| "memory".into());
            let mut item = ContextItem::new(&fragment.content, source, priority)
                .with_added_at(fragment.created_at);
            if let Some(ttl) = self.item_ttl_secs {
                item = item.with_ttl(ttl);
            }
            // Stale items must not evict live ones.
            if item.is_expired(now) {
                debug!(fragment_id = %fragment.id, "Recalled fragment past its TTL");
                continue;
            }
            if let Err(e) = window.add_to_context(item) {
                debug!(fragment_id = %fragment.id, error = %e, "Recalled fragment dropped from context");
            }
        }
        window.clear_expired_items(Utc::now());

        let mut context = BTreeMap::new();
        context.insert("query".to_string(), query.to_string());
        context.insert("source".to_string(), config.source.to_string());
        context.insert("user_id".to_string(), config.user_id.clone());
        context.insert("workspace_id".to_string(), config.workspace_id.clone());
        if !window.is_empty() {
            context.insert("recalled".to_string(), window.render());
        }

        let mut active_sources: Vec<String> = integrations.iter().map(|i| i.name.clone()).collect();
        if !memories.is_empty() {
            active_sources.push(self.memory.name().to_string());
        }

        let urgent = pending.iter().filter(|e| e.urgent).count();
        let names: Vec<&str> = integrations.iter().map(|i| i.name.as_str()).collect();
        let summary = format!(
            "Found {} relevant memor{}, {} active integration(s){}, {} pending event(s) ({} urgent).",
            memories.len(),
            if memories.len() == 1 { "y" } else { "ies" },
            integrations.len(),
            if names.is_empty() {
                String::new()
            } else {
                format!(" [{}]", names.join(", "))
            },
            pending.len(),
            urgent
        );

        debug!(
            memories = memories.len(),
            integrations = integrations.len(),
            pending = pending.len(),
            "Perception complete"
        );

        Ok(PerceptionResult {
            state: ObservedState {
                timestamp: Utc::now(),
                timezone: config.timezone.clone(),
                active_sources,
                context,
                entities: extract_entities(query),
                summary,
            },
            relevant_memories: memories,
            active_integrations: integrations,
            pending_events: pending,
        })
    }
}

const TIME_WORDS: &[&str] = &[
    "today", "tomorrow", "yesterday", "tonight", "morning", "afternoon", "evening", "week",
    "weekend", "month", "monday", "tuesday", "wednesday", "thursday", "friday", "saturday",
    "sunday",
];

const NOT_NAMES: &[&str] = &[
    "I", "What", "When", "Where", "Who", "Why", "How", "Which", "Can", "Could", "Please", "The",
    "A", "An", "Do", "Does", "Is", "Are", "Send", "Create", "Delete", "Remind", "Tell", "Show",
    "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
];

/// Cheap named-entity pass: emails, time expressions, capitalized names and
/// quoted terms.
pub fn extract_entities(query: &str) -> Vec<Entity> {
    let mut entities = Vec::new();
    let mut push = |kind: EntityKind, value: String| {
        if !entities.iter().any(|e: &Entity| e.kind == kind && e.value == value) {
            entities.push(Entity { kind, value });
        }
    };

    for (i, raw) in query.split_whitespace().enumerate() {
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '@' && c != '.' && c != '_');
        let word = word.trim_end_matches('.');
        if word.is_empty() {
            continue;
        }
        if word.contains('@') && word.contains('.') {
            push(EntityKind::Email, word.to_lowercase());
            continue;
        }
        let lower = word.to_lowercase();
        if TIME_WORDS.contains(&lower.as_str()) {
            push(EntityKind::Time, lower);
            continue;
        }
        let capitalized = word.chars().next().is_some_and(|c| c.is_uppercase())
            && word.chars().skip(1).all(|c| c.is_lowercase());
        if capitalized && i > 0 && !NOT_NAMES.contains(&word) {
            push(EntityKind::Person, word.to_string());
        }
    }

    for (i, part) in query.split('"').enumerate() {
        if i % 2 == 1 && !part.trim().is_empty() {
            push(EntityKind::Term, part.trim().to_string());
        }
    }
    entities
}
