//! Error types for the loop phases and the team runtime.

use mindloop_core::error::{IntegrationError, MemoryError, PlanError, ProviderError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PerceptionError {
    #[error("Memory search failed: {0}")]
    Search(#[from] ProviderError),

    #[error("Integration discovery failed: {0}")]
    Integrations(#[from] IntegrationError),
}

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("Query is empty")]
    EmptyQuery,

    #[error("Planner produced an invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Provider call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Integration call failed: {0}")]
    Integration(#[from] IntegrationError),

    #[error("Unsupported action kind: {0}")]
    Unsupported(String),

    #[error("Result for step {0} has not been logged")]
    NotLogged(String),
}

impl ActionError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ActionError::Provider(e) => !matches!(
                e,
                ProviderError::AuthenticationFailed(_)
                    | ProviderError::ModelNotFound(_)
                    | ProviderError::NotConfigured(_)
            ),
            ActionError::Integration(e) => matches!(
                e,
                IntegrationError::Unavailable(_) | IntegrationError::InvocationFailed { .. }
            ),
            ActionError::Unsupported(_) | ActionError::NotLogged(_) => false,
        }
    }
}

/// Catastrophic failures; the Engine converts these into a failed result.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("External memory write failed: {0}")]
    Memory(#[from] MemoryError),

    #[error("Plan state error: {0}")]
    Plan(#[from] PlanError),

    #[error("Action bookkeeping error: {0}")]
    Action(#[from] ActionError),
}

#[derive(Debug, Error)]
pub enum TeamError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Unknown team: {0}")]
    UnknownTeam(String),

    #[error("Team already exists: {0}")]
    DuplicateTeam(String),

    #[error("The human inbox is reviewed by people, not processed by agents")]
    HumanInbox,

    #[error("Audit write failed: {0}")]
    Memory(#[from] MemoryError),
}
