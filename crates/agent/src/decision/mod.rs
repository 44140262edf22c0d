//! Decision: classify intent, pick a model tier, build the plan.
//!
//! Decision is a pure function of its inputs. It never calls a model or an
//! integration; everything it knows comes from the perception snapshot.

pub mod intent;
pub mod model_tier;
pub mod planner;

use async_trait::async_trait;
use mindloop_core::agent::EngineConfig;
use mindloop_core::goal::Goal;
use mindloop_core::perception::PerceptionResult;
use mindloop_core::plan::Plan;
use mindloop_core::provider::{ModelCatalog, SelectedModel};
use mindloop_memory::soul::SoulConfig;
use std::sync::Arc;
use tracing::debug;

use crate::error::DecisionError;
pub use intent::{Intent, QueryType, classify_intent, split_clauses};
pub use model_tier::{required_tier, select_model};
pub use planner::{PlanDraft, build_plan};

/// Everything Decision hands to the Engine.
#[derive(Debug, Clone)]
pub struct Decision {
    pub plan: Plan,
    pub intent: Intent,
    pub selected_model: SelectedModel,
    /// Human-readable rationale, written to the decision audit entry.
    pub reasoning: String,
    pub approval_reasons: Vec<String>,
}

#[async_trait]
pub trait Decider: Send + Sync {
    async fn decide(
        &self,
        query: &str,
        goal: &Goal,
        perception: &PerceptionResult,
        config: &EngineConfig,
    ) -> Result<Decision, DecisionError>;

    /// Catalog used to pick a model when planning falls back.
    fn catalog(&self) -> &ModelCatalog;
}

/// Rule-based decision over a model catalog and the soul's anchors.
pub struct StandardDecider {
    catalog: ModelCatalog,
    soul: Arc<SoulConfig>,
}

impl StandardDecider {
    pub fn new(catalog: ModelCatalog, soul: Arc<SoulConfig>) -> Self {
        Self { catalog, soul }
    }
}

#[async_trait]
impl Decider for StandardDecider {
    async fn decide(
        &self,
        query: &str,
        goal: &Goal,
        perception: &PerceptionResult,
        config: &EngineConfig,
    ) -> Result<Decision, DecisionError> {
        if query.trim().is_empty() {
            return Err(DecisionError::EmptyQuery);
        }

        let intent = classify_intent(query, perception);
        let selected_model = select_model(intent.complexity, config.model_tier, &self.catalog);
        let draft = build_plan(goal, &intent, perception, config, &self.soul, selected_model.tier)?;

        let mut reasoning = format!(
            "Classified as {} ({}); {} step(s) on {} tier",
            intent.query_type,
            intent.complexity,
            draft.plan.steps.len(),
            selected_model.tier
        );
        if selected_model.downgraded {
            reasoning.push_str(&format!(
                ", downgraded from {} by the {} ceiling",
                selected_model.requested_tier, config.model_tier
            ));
        }
        if !draft.approval_reasons.is_empty() {
            reasoning.push_str(&format!(
                "; approval required: {}",
                draft.approval_reasons.join("; ")
            ));
        }

        debug!(
            query_type = %intent.query_type,
            complexity = %intent.complexity,
            steps = draft.plan.steps.len(),
            tier = %selected_model.tier,
            requires_approval = draft.plan.requires_approval,
            "Decision complete"
        );

        Ok(Decision {
            plan: draft.plan,
            intent,
            selected_model,
            reasoning,
            approval_reasons: draft.approval_reasons,
        })
    }

    fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::notes_perception;
    use mindloop_core::provider::ModelTier;

    fn decider() -> StandardDecider {
        StandardDecider::new(ModelCatalog::default(), Arc::new(SoulConfig::default()))
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let err = decider()
            .decide("   ", &Goal::from_query(""), &notes_perception(), &EngineConfig::new("u", "w"))
            .await
            .unwrap_err();
        assert!(matches!(err, DecisionError::EmptyQuery));
    }

    #[tokio::test]
    async fn downgrade_is_explained() {
        let query = "Compare the two vendor quotes for the office move";
        let config = EngineConfig::new("u", "w").with_model_tier(ModelTier::Economy);
        let decision = decider()
            .decide(query, &Goal::from_query(query), &notes_perception(), &config)
            .await
            .unwrap();
        assert!(decision.selected_model.downgraded);
        assert!(decision.reasoning.contains("downgraded from premium"));
        match &decision.plan.steps[1].action {
            mindloop_core::plan::StepAction::Reasoning { tier, .. } => {
                assert_eq!(*tier, ModelTier::Economy)
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[tokio::test]
    async fn destructive_request_requires_approval() {
        let query = "Delete note abc-123";
        let decision = decider()
            .decide(query, &Goal::from_query(query), &notes_perception(), &EngineConfig::new("u", "w"))
            .await
            .unwrap();
        assert!(decision.plan.requires_approval);
        assert!(decision.reasoning.contains("approval required"));
    }
}
