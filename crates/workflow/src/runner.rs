//! The heartbeat cycle and its interval scheduler.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use mindloop_agent::CimEngine;
use mindloop_config::HeartbeatConfig;
use mindloop_core::agent::{EngineConfig, InvocationSource};
use mindloop_core::audit::{AuditAction, AuditData, ExternalMemoryEntry};
use mindloop_core::event::LoopEvent;
use mindloop_core::goal::{Goal, GoalOrigin};
use mindloop_core::state::{CimResult, Phase};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::HeartbeatError;
use crate::checks::{HeartbeatCheck, HeartbeatFinding};
use crate::schedule::is_within_active_hours;

/// What one heartbeat cycle did.
#[derive(Debug, Clone)]
pub struct HeartbeatResult {
    pub timestamp: DateTime<Utc>,
    /// Set when the cycle was a no-op
    pub skipped_reason: Option<String>,
    pub checks_run: Vec<String>,
    pub findings: Vec<HeartbeatFinding>,
    pub runs: Vec<CimResult>,
}

impl HeartbeatResult {
    pub fn runs_triggered(&self) -> usize {
        self.runs.len()
    }

    pub fn was_skipped(&self) -> bool {
        self.skipped_reason.is_some()
    }
}

pub struct HeartbeatRunner {
    engine: Arc<CimEngine>,
    checks: Vec<Arc<dyn HeartbeatCheck>>,
    engine_config: EngineConfig,
}

impl HeartbeatRunner {
    /// Runs are made with `engine_config`, tagged as heartbeat-initiated.
    pub fn new(engine: Arc<CimEngine>, engine_config: EngineConfig) -> Self {
        Self {
            engine,
            checks: Vec::new(),
            engine_config: engine_config.with_source(InvocationSource::Heartbeat),
        }
    }

    pub fn with_check(mut self, check: Arc<dyn HeartbeatCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn with_checks(mut self, checks: impl IntoIterator<Item = Arc<dyn HeartbeatCheck>>) -> Self {
        self.checks.extend(checks);
        self
    }

    pub fn check_names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Run one cycle as of `now`.
    ///
    /// Outside active hours nothing is checked and nothing runs; the skip is
    /// still recorded. Inside, actionable findings become goals (highest
    /// priority first, at most `max_runs_per_cycle`) and run concurrently on
    /// the shared engine. A failing check is logged and does not stop the
    /// others.
    pub async fn run_heartbeat_cycle(
        &self,
        config: &HeartbeatConfig,
        now: DateTime<Utc>,
        cancel: Option<&CancellationToken>,
    ) -> Result<HeartbeatResult, HeartbeatError> {
        if !is_within_active_hours(&config.active_hours, now) {
            let result = HeartbeatResult {
                timestamp: now,
                skipped_reason: Some(format!(
                    "outside active hours ({:02}:00-{:02}:00)",
                    config.active_hours.start, config.active_hours.end
                )),
                checks_run: Vec::new(),
                findings: Vec::new(),
                runs: Vec::new(),
            };
            debug!(at = %now, "Heartbeat skipped outside active hours");
            self.record(&result).await?;
            return Ok(result);
        }

        let mut checks_run = Vec::with_capacity(self.checks.len());
        let mut findings = Vec::new();
        for check in &self.checks {
            checks_run.push(check.name().to_string());
            match check.run(now).await {
                Ok(mut found) => findings.append(&mut found),
                Err(e) => warn!(check = check.name(), error = %e, "Heartbeat check failed"),
            }
        }

        let mut actionable: Vec<&HeartbeatFinding> = findings.iter().filter(|f| f.actionable).collect();
        // Stable sort keeps check order within a priority.
        actionable.sort_by(|a, b| b.priority.cmp(&a.priority));
        if actionable.len() > config.max_runs_per_cycle {
            info!(
                actionable = actionable.len(),
                cap = config.max_runs_per_cycle,
                "Heartbeat findings over the per-cycle cap"
            );
            actionable.truncate(config.max_runs_per_cycle);
        }

        let runs = join_all(actionable.into_iter().map(|finding| {
            let goal = Goal::from_query(finding.goal_text())
                .with_origin(GoalOrigin::Heartbeat {
                    check: finding.check.clone(),
                })
                .with_priority(finding.priority);
            self.engine.run_goal(goal, &self.engine_config, cancel)
        }))
        .await;

        let result = HeartbeatResult {
            timestamp: now,
            skipped_reason: None,
            checks_run,
            findings,
            runs,
        };
        info!(
            checks = result.checks_run.len(),
            findings = result.findings.len(),
            runs = result.runs_triggered(),
            "Heartbeat cycle complete"
        );
        self.record(&result).await?;
        Ok(result)
    }

    async fn record(&self, result: &HeartbeatResult) -> Result<(), HeartbeatError> {
        let entry = ExternalMemoryEntry::new(
            self.engine_config.agent_id.clone(),
            AuditAction::HeartbeatCycle,
            AuditData::Heartbeat {
                checks_run: result.checks_run.clone(),
                findings: result.findings.len(),
                runs_triggered: result.runs.iter().map(|r| r.run_id().to_string()).collect(),
                skipped_reason: result.skipped_reason.clone(),
            },
        )
        .for_user(self.engine_config.user_id.clone())
        .in_phase(Phase::Heartbeat);
        self.engine.memory().write(entry).await?;

        self.engine.events().publish(LoopEvent::HeartbeatCycle {
            checks_run: result.checks_run.len(),
            runs_triggered: result.runs_triggered(),
            skipped: result.was_skipped(),
            timestamp: result.timestamp,
        });
        Ok(())
    }

    /// Run cycles every `interval_minutes` until `cancel` fires.
    ///
    /// The first cycle runs immediately. Runs in flight when `cancel` fires
    /// observe it at their next step boundary.
    pub fn start(
        self: Arc<Self>,
        config: HeartbeatConfig,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_secs(u64::from(config.interval_minutes.max(1)) * 60);
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                interval_minutes = config.interval_minutes,
                checks = self.checks.len(),
                "Heartbeat started"
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.run_heartbeat_cycle(&config, Utc::now(), Some(&cancel)).await {
                            warn!(error = %e, "Heartbeat cycle failed");
                        }
                    }
                }
            }
            info!("Heartbeat stopped");
        })
    }
}
