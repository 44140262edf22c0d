//! Model-call providers for mindloop.
//!
//! All providers implement `mindloop_core::ModelProvider`.
//! [`build_from_config`] assembles the provider the Engine uses.

pub mod fallback;
pub mod offline;
pub mod openai_compat;
pub mod router;

pub use fallback::FallbackModel;
pub use offline::OfflineModel;
pub use openai_compat::OpenAiCompatModel;
pub use router::{TierRouter, build_from_config, default_base_url};
