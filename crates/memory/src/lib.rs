//! Memory Manager for mindloop.
//!
//! - [`context`]: token-budgeted context window
//! - [`external`]: append-only external memory over an audit sink
//! - [`soul`]: anchor rules rendered into prompts
//! - [`fragments`]: keyword-scored local knowledge store
//! - audit sinks: in-memory, JSONL file, SQLite (feature `sqlite`)

pub mod context;
pub mod external;
pub mod file_backend;
pub mod fragments;
pub mod in_memory;
pub mod soul;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use context::{
    ContextError, ContextItem, ContextPriority, ContextSummary, ContextWindow,
    create_context_window, estimate_tokens,
};
pub use external::{AuditScope, ExternalMemory, compute_digest};
pub use file_backend::JsonlAuditSink;
pub use fragments::InMemoryFragmentStore;
pub use in_memory::InMemoryAuditSink;
pub use soul::{
    AnchorEnforcement, AnchorRule, SoulConfig, SoulError, create_default_soul_config,
    get_soul_prompt,
};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteAuditSink;
