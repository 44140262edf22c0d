//! Model-tier selection: a pure function of complexity and the cost ceiling.

use mindloop_core::plan::Complexity;
use mindloop_core::provider::{ModelCatalog, ModelTier, SelectedModel};

/// The tier a given complexity calls for.
pub fn required_tier(complexity: Complexity) -> ModelTier {
    match complexity {
        Complexity::Simple => ModelTier::Economy,
        Complexity::Moderate => ModelTier::Standard,
        Complexity::Complex => ModelTier::Premium,
    }
}

/// Pick the model for a run. A ceiling below the required tier is reported
/// as a downgrade, never applied silently.
pub fn select_model(
    complexity: Complexity,
    ceiling: ModelTier,
    catalog: &ModelCatalog,
) -> SelectedModel {
    let requested_tier = required_tier(complexity);
    let tier = requested_tier.min(ceiling);
    SelectedModel {
        requested_tier,
        tier,
        model: catalog.model_for(tier).to_string(),
        downgraded: tier < requested_tier,
    }
}
