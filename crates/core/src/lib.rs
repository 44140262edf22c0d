//! # mindloop core
//!
//! Domain types, capability traits, and error definitions for the mindloop
//! cognitive loop. This crate has **no runtime dependencies** beyond
//! serialization and async-trait: it defines the model that every other crate
//! implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (search, integrations, model calls, the audit
//! sink) is a trait here. Implementations live in their own crates. This
//! enables:
//! - Swapping implementations via configuration
//! - Easy testing with scripted stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod agent;
pub mod audit;
pub mod error;
pub mod event;
pub mod goal;
pub mod guardrail;
pub mod message;
pub mod perception;
pub mod plan;
pub mod provider;
pub mod state;
pub mod team;

// Re-export key types at crate root for ergonomics
pub use agent::{EngineConfig, InvocationSource, RetryConfig};
pub use audit::{AuditAction, AuditData, AuditFilter, AuditSink, ExternalMemoryEntry};
pub use error::{Error, Result};
pub use event::{EventBus, LoopEvent};
pub use goal::{Goal, GoalOrigin, Priority};
pub use guardrail::{GuardrailPolicy, GuardrailResult, capability_matches};
pub use message::{Message, Role};
pub use perception::{MemoryFragment, ObservedState, PendingEvent, PerceptionResult};
pub use plan::{
    ActionData, ActionRequest, ActionResult, Complexity, Plan, PlanStep, StepAction, StepStatus,
};
pub use provider::{
    CapabilityDescriptor, CostClass, IntegrationInfo, IntegrationProvider, MemorySearchProvider,
    ModelCatalog, ModelProvider, ModelRequest, ModelResponse, ModelTier, SearchFilters,
    SelectedModel,
};
pub use state::{ActionRecord, CimError, CimLoopState, CimResult, LoopStatus, Phase};
pub use team::{AgentDefinition, AgentMessage, AgentTeam, ContextBundle, EscalationTarget, MessageKind};
