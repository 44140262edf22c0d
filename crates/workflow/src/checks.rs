//! Heartbeat checks and the findings they produce.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mindloop_config::CheckConfig;
use mindloop_core::audit::{AuditData, AuditFilter};
use mindloop_core::goal::Priority;
use mindloop_core::plan::StepStatus;
use mindloop_core::provider::IntegrationProvider;
use mindloop_core::state::Phase;
use mindloop_memory::ExternalMemory;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::HeartbeatError;

/// Something a check noticed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatFinding {
    /// Name of the check that produced it
    pub check: String,
    pub summary: String,
    /// Whether the finding should start an Engine run
    pub actionable: bool,
    pub priority: Priority,
    /// Goal text for the run; falls back to `summary`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl HeartbeatFinding {
    pub fn goal_text(&self) -> &str {
        self.prompt.as_deref().unwrap_or(&self.summary)
    }
}

/// One thing the heartbeat looks at every cycle.
#[async_trait]
pub trait HeartbeatCheck: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, now: DateTime<Utc>) -> Result<Vec<HeartbeatFinding>, HeartbeatError>;
}

/// Surfaces events waiting on integrations.
pub struct PendingEventsCheck {
    integrations: Arc<dyn IntegrationProvider>,
    urgent_only: bool,
}

impl PendingEventsCheck {
    pub fn new(integrations: Arc<dyn IntegrationProvider>, urgent_only: bool) -> Self {
        Self {
            integrations,
            urgent_only,
        }
    }
}

#[async_trait]
impl HeartbeatCheck for PendingEventsCheck {
    fn name(&self) -> &str {
        "pending_events"
    }

    async fn run(&self, _now: DateTime<Utc>) -> Result<Vec<HeartbeatFinding>, HeartbeatError> {
        let events = self.integrations.pending_events().await?;
        Ok(events
            .into_iter()
            .filter(|e| e.urgent || !self.urgent_only)
            .map(|e| HeartbeatFinding {
                check: self.name().to_string(),
                summary: format!("[{}] {}", e.source, e.summary),
                actionable: true,
                priority: if e.urgent { Priority::Urgent } else { Priority::Normal },
                prompt: Some(e.summary),
            })
            .collect())
    }
}

/// Surfaces failed steps recorded in the audit log.
///
/// Each failure is reported once, in the first cycle that sees it.
pub struct RecentFailuresCheck {
    memory: ExternalMemory,
    lookback: Duration,
    user_id: Option<String>,
    seen: Mutex<HashSet<String>>,
}

impl RecentFailuresCheck {
    pub fn new(memory: ExternalMemory, lookback_minutes: i64) -> Self {
        Self {
            memory,
            lookback: Duration::minutes(lookback_minutes.max(1)),
            user_id: None,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Only look at failures from one user's runs.
    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

#[async_trait]
impl HeartbeatCheck for RecentFailuresCheck {
    fn name(&self) -> &str {
        "recent_failures"
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<Vec<HeartbeatFinding>, HeartbeatError> {
        let entries = self
            .memory
            .read(&AuditFilter {
                user_id: self.user_id.clone(),
                phase: Some(Phase::Action),
                since: Some(now - self.lookback),
                ..Default::default()
            })
            .await?;

        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let mut findings = Vec::new();
        for entry in entries {
            let AuditData::Step {
                step_id,
                description,
                capability,
                status: StepStatus::Failed,
                result,
            } = &entry.data
            else {
                continue;
            };
            if !seen.insert(entry.id.clone()) {
                continue;
            }
            let error = result.error.as_deref().unwrap_or("unknown error");
            findings.push(HeartbeatFinding {
                check: self.name().to_string(),
                summary: format!("{step_id} ({capability}) failed: {error}"),
                actionable: true,
                priority: Priority::High,
                prompt: Some(format!("Why did the step '{description}' fail with: {error}?")),
            });
        }
        debug!(findings = findings.len(), "Recent failures scanned");
        Ok(findings)
    }
}

/// A configured prompt that runs every cycle.
pub struct StandingTaskCheck {
    name: String,
    prompt: String,
}

impl StandingTaskCheck {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
        }
    }
}

#[async_trait]
impl HeartbeatCheck for StandingTaskCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _now: DateTime<Utc>) -> Result<Vec<HeartbeatFinding>, HeartbeatError> {
        Ok(vec![HeartbeatFinding {
            check: self.name.clone(),
            summary: format!("Standing task '{}'", self.name),
            actionable: true,
            priority: Priority::Normal,
            prompt: Some(self.prompt.clone()),
        }])
    }
}

/// Build the configured checks, in configuration order.
pub fn build_checks(
    configs: &[CheckConfig],
    integrations: Arc<dyn IntegrationProvider>,
    memory: &ExternalMemory,
    user_id: &str,
) -> Vec<Arc<dyn HeartbeatCheck>> {
    configs
        .iter()
        .map(|config| -> Arc<dyn HeartbeatCheck> {
            match config {
                CheckConfig::PendingEvents { urgent_only } => {
                    Arc::new(PendingEventsCheck::new(integrations.clone(), *urgent_only))
                }
                CheckConfig::RecentFailures { lookback_minutes } => Arc::new(
                    RecentFailuresCheck::new(memory.clone(), *lookback_minutes).for_user(user_id),
                ),
                CheckConfig::StandingTask { name, prompt } => {
                    Arc::new(StandingTaskCheck::new(name.clone(), prompt.clone()))
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindloop_core::audit::{AuditAction, ExternalMemoryEntry};
    use mindloop_core::plan::ActionResult;
    use mindloop_integrations::{IntegrationRegistry, NotesIntegration};

    fn failed_step(step_id: &str) -> ExternalMemoryEntry {
        ExternalMemoryEntry::new(
            "mindloop",
            AuditAction::StepExecuted,
            AuditData::Step {
                step_id: step_id.into(),
                description: "Fetch the report".into(),
                capability: "http.get".into(),
                status: StepStatus::Failed,
                result: ActionResult::failed("connection refused"),
            },
        )
        .for_user("u1")
        .in_phase(Phase::Action)
    }

    #[tokio::test]
    async fn pending_events_honours_urgent_only() {
        let mut registry = IntegrationRegistry::new();
        registry.register(Arc::new(NotesIntegration::new()));
        let registry = Arc::new(registry);
        for (title, urgent) in [("Call the bank", true), ("Water plants", false)] {
            registry
                .invoke(
                    "notes.create",
                    &serde_json::json!({ "title": title, "follow_up": true, "urgent": urgent }),
                )
                .await
                .unwrap();
        }

        let all = PendingEventsCheck::new(registry.clone(), false)
            .run(Utc::now())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let urgent = PendingEventsCheck::new(registry, true)
            .run(Utc::now())
            .await
            .unwrap();
        assert_eq!(urgent.len(), 1);
        assert_eq!(urgent[0].priority, Priority::Urgent);
        assert!(urgent[0].goal_text().contains("Call the bank"));
    }

    #[tokio::test]
    async fn recent_failures_are_reported_once() {
        let memory = ExternalMemory::in_memory();
        memory.write(failed_step("step-2")).await.unwrap();
        let check = RecentFailuresCheck::new(memory.clone(), 60).for_user("u1");

        let first = check.run(Utc::now()).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(first[0].summary.starts_with("step-2 (http.get) failed"));
        assert!(first[0].goal_text().ends_with('?'));

        assert!(check.run(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recent_failures_ignore_old_and_foreign_entries() {
        let memory = ExternalMemory::in_memory();
        memory.write(failed_step("step-1")).await.unwrap();

        let other_user = RecentFailuresCheck::new(memory.clone(), 60).for_user("u2");
        assert!(other_user.run(Utc::now()).await.unwrap().is_empty());

        let later = Utc::now() + Duration::minutes(90);
        let check = RecentFailuresCheck::new(memory, 60);
        assert!(check.run(later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn build_checks_keeps_config_order() {
        let configs = vec![
            CheckConfig::StandingTask {
                name: "inbox-zero".into(),
                prompt: "Summarize my open notes".into(),
            },
            CheckConfig::PendingEvents { urgent_only: false },
            CheckConfig::RecentFailures { lookback_minutes: 30 },
        ];
        let checks = build_checks(
            &configs,
            Arc::new(IntegrationRegistry::new()),
            &ExternalMemory::in_memory(),
            "u1",
        );
        let names: Vec<&str> = checks.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["inbox-zero", "pending_events", "recent_failures"]);
    }
}
