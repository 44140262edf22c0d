//! Rule-based planner: goal + intent + perception → dependency-ordered plan.
//!
//! `requires_approval` is computed here and nowhere else. A plan needs a
//! human when any step touches a capability that is irreversible, costly,
//! not offered by an active integration, restricted by guardrail policy or
//! an approval anchor, or when the goal itself came from an escalation.

use mindloop_core::agent::EngineConfig;
use mindloop_core::goal::Goal;
use mindloop_core::perception::PerceptionResult;
use mindloop_core::plan::{Plan, PlanStep, StepAction};
use mindloop_core::provider::{CapabilityDescriptor, CostClass, ModelTier};
use mindloop_memory::soul::SoulConfig;

use super::intent::{Intent, QueryType};
use crate::error::DecisionError;

/// A validated plan and why it needs approval, if it does.
#[derive(Debug, Clone)]
pub struct PlanDraft {
    pub plan: Plan,
    pub approval_reasons: Vec<String>,
}

const FILLER: &[&str] = &[
    "a", "an", "the", "to", "that", "about", "me", "my", "please", "new", "this", "down", "create",
    "add", "write", "jot", "note", "notes", "remember", "list", "show", "all", "delete", "remove",
    "erase",
];

fn words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// The active capability whose keywords best match a clause. The clause's
/// leading verb counts double.
pub fn match_capability<'a>(
    clause: &str,
    perception: &'a PerceptionResult,
) -> Option<&'a CapabilityDescriptor> {
    let clause_words = words(clause);
    let verb = clause_words.first().cloned().unwrap_or_default();
    perception
        .active_integrations
        .iter()
        .flat_map(|i| i.capabilities.iter())
        .map(|c| {
            let score: usize = c
                .keywords
                .iter()
                .map(|k| {
                    if *k == verb {
                        2
                    } else if clause_words.contains(k) {
                        1
                    } else {
                        0
                    }
                })
                .sum();
            (score, c)
        })
        .filter(|(score, _)| *score > 0)
        .fold(None, |best: Option<(usize, &CapabilityDescriptor)>, (score, c)| match best {
            Some((s, _)) if s >= score => best,
            _ => Some((score, c)),
        })
        .map(|(_, c)| c)
}

/// Arguments for an integration call derived from the clause that asked for it.
pub fn integration_args(capability: &str, clause: &str) -> serde_json::Value {
    let stripped = || -> String {
        clause
            .split_whitespace()
            .skip_while(|w| {
                FILLER.contains(&w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase().as_str())
            })
            .collect::<Vec<_>>()
            .join(" ")
            .trim_start_matches(':')
            .trim()
            .to_string()
    };
    match capability {
        "http.get" => {
            let url = clause
                .split_whitespace()
                .find(|w| w.starts_with("http://") || w.starts_with("https://"))
                .map(|w| w.trim_end_matches([',', ')', '.', ';']))
                .unwrap_or_default();
            serde_json::json!({ "url": url })
        }
        "notes.create" => serde_json::json!({ "title": stripped(), "body": clause }),
        "notes.list" => {
            let query = stripped();
            if query.is_empty() {
                serde_json::json!({})
            } else {
                serde_json::json!({ "query": query })
            }
        }
        "notes.delete" => {
            let id = clause.split_whitespace().last().unwrap_or_default();
            serde_json::json!({ "id": id })
        }
        _ => serde_json::json!({ "request": clause }),
    }
}

fn with_goal_context(goal: &Goal, prompt: String) -> String {
    match &goal.context {
        Some(ctx) => format!("{ctx}\n\nTask: {prompt}"),
        None => prompt,
    }
}

fn search(order: usize, query: &str) -> PlanStep {
    PlanStep::new(
        order,
        "Search memory for relevant context",
        StepAction::ContextSearch {
            query: query.to_string(),
        },
    )
}

fn reasoning(order: usize, description: &str, prompt: String, tier: ModelTier) -> PlanStep {
    PlanStep::new(order, description, StepAction::Reasoning { prompt, tier })
}

fn draft_steps(goal: &Goal, intent: &Intent, perception: &PerceptionResult, tier: ModelTier) -> Vec<PlanStep> {
    use mindloop_core::plan::Complexity::*;
    let query = goal.description.as_str();

    match intent.query_type {
        QueryType::FactualLookup => {
            let mut steps = vec![search(1, query)];
            if intent.complexity >= Moderate {
                steps.push(
                    reasoning(
                        2,
                        "Answer from the retrieved context",
                        with_goal_context(goal, format!("Answer using the retrieved context: {query}")),
                        tier,
                    )
                    .depends_on("step-1"),
                );
            }
            steps
        }
        QueryType::StatusCheck => vec![
            search(1, query),
            reasoning(
                2,
                "Summarize status from the retrieved context",
                with_goal_context(goal, format!("Report the current status for: {query}")),
                ModelTier::Economy.min(tier),
            )
            .depends_on("step-1"),
        ],
        QueryType::Analytical => {
            let mut steps = vec![
                search(1, query),
                reasoning(
                    2,
                    "Analyze the request against the retrieved context",
                    with_goal_context(goal, format!("Analyze: {query}")),
                    tier,
                )
                .depends_on("step-1"),
            ];
            if intent.complexity == Complex {
                steps.push(
                    reasoning(
                        3,
                        "Synthesize a recommendation",
                        with_goal_context(goal, format!("Synthesize a recommendation for: {query}")),
                        tier,
                    )
                    .depends_on("step-2"),
                );
            }
            steps
        }
        QueryType::SocialCreative => vec![reasoning(
            1,
            "Respond to the user",
            with_goal_context(goal, query.to_string()),
            tier,
        )],
        QueryType::ActionRequest => {
            let mut steps = Vec::with_capacity(intent.clauses.len());
            for (i, clause) in intent.clauses.iter().enumerate() {
                let order = i + 1;
                let step = match match_capability(clause, perception) {
                    Some(cap) => PlanStep::new(
                        order,
                        format!("{}: {clause}", cap.description),
                        StepAction::Integration {
                            capability: cap.name.clone(),
                            args: integration_args(&cap.name, clause),
                        },
                    ),
                    None => reasoning(
                        order,
                        &format!("Work out how to: {clause}"),
                        with_goal_context(goal, format!("No integration can do this directly. Explain how to: {clause}")),
                        tier,
                    ),
                };
                let step = if order > 1 {
                    step.depends_on(format!("step-{}", order - 1))
                } else {
                    step
                };
                steps.push(step);
            }
            steps
        }
    }
}

/// Collect every reason the plan must wait for a human.
pub fn approval_reasons(
    goal: &Goal,
    plan: &Plan,
    perception: &PerceptionResult,
    config: &EngineConfig,
    soul: &SoulConfig,
) -> Vec<String> {
    let mut reasons = Vec::new();
    if goal.origin.requires_review() {
        reasons.push("escalated goals require human review".to_string());
    }
    for step in &plan.steps {
        let cap = step.action.capability();
        match &step.action {
            StepAction::Integration { capability, .. } => match perception.capability(capability) {
                None => reasons.push(format!(
                    "{}: '{capability}' is not offered by any active integration",
                    step.id
                )),
                Some(d) if !d.reversible => {
                    reasons.push(format!("{}: '{capability}' is irreversible", step.id))
                }
                Some(d) if d.cost == CostClass::Costly => {
                    reasons.push(format!("{}: '{capability}' is costly", step.id))
                }
                Some(_) => {}
            },
            StepAction::Unknown { kind, .. } => {
                reasons.push(format!("{}: unknown action kind '{kind}'", step.id))
            }
            StepAction::ContextSearch { .. } | StepAction::Reasoning { .. } => {}
        }
        if config.guardrails.restricts(cap, config.source) {
            reasons.push(format!(
                "{}: '{cap}' is restricted by guardrail policy for {} invocations",
                step.id, config.source
            ));
        }
        if let Some(anchor) = soul.requiring_approval(cap) {
            reasons.push(format!(
                "{}: anchor '{}' requires approval for '{cap}'",
                step.id, anchor.id
            ));
        }
    }
    reasons
}

/// Build and validate the plan for one goal.
pub fn build_plan(
    goal: &Goal,
    intent: &Intent,
    perception: &PerceptionResult,
    config: &EngineConfig,
    soul: &SoulConfig,
    tier: ModelTier,
) -> Result<PlanDraft, DecisionError> {
    let steps = draft_steps(goal, intent, perception, tier);
    let mut plan = Plan::new(goal.id.clone(), steps, intent.complexity);
    plan.validate()?;

    let reasons = approval_reasons(goal, &plan, perception, config, soul);
    plan.requires_approval = !reasons.is_empty();
    Ok(PlanDraft {
        plan,
        approval_reasons: reasons,
    })
}
