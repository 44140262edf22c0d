//! Heartbeat: autonomous, schedule-driven invocation of the cognitive loop.
//!
//! A cycle is gated by the configured active hours. Inside the window it runs
//! every [`HeartbeatCheck`], turns actionable findings into synthetic goals
//! and hands them to the same [`CimEngine`](mindloop_agent::CimEngine) that
//! serves user queries, so guardrails and the audit trail apply unchanged.
//! [`HeartbeatRunner::start`] repeats cycles on a fixed interval.

pub mod checks;
pub mod runner;
pub mod schedule;

use mindloop_core::error::{IntegrationError, MemoryError};

pub use checks::{
    HeartbeatCheck, HeartbeatFinding, PendingEventsCheck, RecentFailuresCheck, StandingTaskCheck,
    build_checks,
};
pub use runner::{HeartbeatResult, HeartbeatRunner};
pub use schedule::is_within_active_hours;

#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error("Check '{check}' failed: {reason}")]
    Check { check: String, reason: String },

    #[error("Integration error: {0}")]
    Integration(#[from] IntegrationError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),
}
