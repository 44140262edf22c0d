//! Error types for the mindloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for core operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Integration errors ---
    #[error("Integration error: {0}")]
    Integration(#[from] IntegrationError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Plan errors ---
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures reported by a model-call or memory-search provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Search failed: {0}")]
    SearchFailed(String),
}

/// Failures reported by an integration provider.
#[derive(Debug, Clone, Error)]
pub enum IntegrationError {
    #[error("Capability not found: {0}")]
    CapabilityNotFound(String),

    #[error("Integration unavailable: {0}")]
    Unavailable(String),

    #[error("Invocation of {capability} failed: {reason}")]
    InvocationFailed { capability: String, reason: String },

    #[error("Invalid arguments for {capability}: {reason}")]
    InvalidArguments { capability: String, reason: String },

    #[error("Endpoint denied: {0}")]
    EndpointDenied(String),
}

/// Failures of the external-memory (audit) store.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Append failed: {0}")]
    AppendFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Structural problems with a plan or an illegal step transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Plan has no steps")]
    Empty,

    #[error("Duplicate step id: {0}")]
    DuplicateStep(String),

    #[error("Step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: String, dependency: String },

    #[error("Dependency cycle through step {0}")]
    Cycle(String),

    #[error("Illegal status transition for step {step}: {from} -> {to}")]
    InvalidTransition {
        step: String,
        from: String,
        to: String,
    },
}
