//! The cognitive loop: the heart of mindloop.
//!
//! Every invocation follows a **Perceive → Decide → Act → Observe** cycle:
//!
//! 1. **Perceive**: search memory, list reachable integrations, collect
//!    pending events into a structured snapshot
//! 2. **Decide**: classify intent, pick a model tier, build a validated plan
//!    and decide whether it needs a human first
//! 3. **Act**: run each step through soul anchors and guardrails, then
//!    execute it with bounded retries
//! 4. **Observe**: judge whether the goal was met and write the task summary
//!
//! Every step outcome, decision and error lands in external memory. The
//! [`team`] module layers handoffs and escalations between agents on top of
//! the same [`CimEngine`].

pub mod action;
pub mod decision;
pub mod engine;
pub mod error;
pub mod perception;
pub mod team;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use action::{
    ActionExecutor, RetryError, RetryReport, create_audit_entry, retry_with_backoff,
};
pub use decision::{Decider, Decision, Intent, QueryType, StandardDecider};
pub use engine::{CimEngine, RunOptions};
pub use error::{ActionError, DecisionError, EngineError, PerceptionError, TeamError};
pub use perception::{Perceiver, StandardPerceiver, extract_entities};
pub use team::{InboxOutcome, Mailbox, TeamRegistry, TeamRuntime};
