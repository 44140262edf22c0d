//! Intent classification: query type plus complexity.

use mindloop_core::perception::PerceptionResult;
use mindloop_core::plan::Complexity;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    FactualLookup,
    ActionRequest,
    Analytical,
    SocialCreative,
    StatusCheck,
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueryType::FactualLookup => "factual_lookup",
            QueryType::ActionRequest => "action_request",
            QueryType::Analytical => "analytical",
            QueryType::SocialCreative => "social_creative",
            QueryType::StatusCheck => "status_check",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub query_type: QueryType,
    pub complexity: Complexity,
    /// Clauses of a compound request, in order.
    pub clauses: Vec<String>,
}

const GREETINGS: &[&str] = &["hi", "hello", "hey", "thanks", "thank you", "good morning"];
const CREATIVE: &[&str] = &["poem", "story", "joke", "brainstorm", "haiku", "slogan", "creative"];
const STATUS: &[&str] = &[
    "status",
    "progress",
    "any updates",
    "what happened",
    "did i",
    "did you",
    "is it done",
    "how is",
    "how's",
];
const ANALYTICAL: &[&str] = &[
    "analyze",
    "analyse",
    "compare",
    "why",
    "explain",
    "evaluate",
    "summarize",
    "summarise",
    "pros and cons",
    "trade-off",
    "tradeoff",
    "assess",
    "plan my",
];
const ACTION_VERBS: &[&str] = &[
    "create", "send", "delete", "remove", "schedule", "book", "add", "write", "note", "remind",
    "fetch", "cancel", "pay", "post", "update", "save", "jot", "email", "call", "buy", "erase",
    "download", "get",
];

fn contains_phrase(text: &str, phrase: &str) -> bool {
    if phrase.contains(' ') || phrase.contains('\'') || phrase.contains('-') {
        return text.contains(phrase);
    }
    text.split(|c: char| !c.is_alphanumeric())
        .any(|w| w == phrase)
}

/// Split a compound request into ordered clauses.
pub fn split_clauses(query: &str) -> Vec<String> {
    let mut clauses = vec![query.trim().trim_end_matches(['?', '.', '!']).to_string()];
    for separator in [" and then ", ", then ", "; ", " then ", " and "] {
        clauses = clauses
            .into_iter()
            .flat_map(|c| {
                c.split(separator)
                    .map(|p| p.trim().trim_start_matches("then ").trim().to_string())
                    .collect::<Vec<_>>()
            })
            .filter(|c| !c.is_empty())
            .collect();
    }
    clauses
}

/// Classify a query. Capability keywords from the active integrations count
/// as action signals.
pub fn classify_intent(query: &str, perception: &PerceptionResult) -> Intent {
    let lower = query.trim().to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let first = words.first().copied().unwrap_or_default();

    let capability_hit = perception
        .active_integrations
        .iter()
        .flat_map(|i| i.capabilities.iter())
        .filter(|c| c.side_effecting)
        .flat_map(|c| c.keywords.iter())
        .any(|k| words.contains(&k.as_str()));

    let query_type = if words.len() <= 4 && GREETINGS.iter().any(|g| lower.starts_with(g)) {
        QueryType::SocialCreative
    } else if STATUS.iter().any(|s| contains_phrase(&lower, s)) {
        QueryType::StatusCheck
    } else if ACTION_VERBS.contains(&first)
        || (first == "please" && words.get(1).is_some_and(|w| ACTION_VERBS.contains(w)))
        || (capability_hit && !lower.ends_with('?'))
    {
        QueryType::ActionRequest
    } else if ANALYTICAL.iter().any(|a| contains_phrase(&lower, a)) {
        QueryType::Analytical
    } else if CREATIVE.iter().any(|c| contains_phrase(&lower, c)) {
        QueryType::SocialCreative
    } else {
        QueryType::FactualLookup
    };

    let clauses = if query_type == QueryType::ActionRequest {
        split_clauses(query)
    } else {
        vec![query.trim().to_string()]
    };

    let complexity = match query_type {
        QueryType::Analytical if words.len() > 20 || lower.contains("compare") => Complexity::Complex,
        QueryType::Analytical => Complexity::Moderate,
        QueryType::ActionRequest if clauses.len() >= 3 => Complexity::Complex,
        QueryType::ActionRequest if clauses.len() == 2 => Complexity::Moderate,
        _ if words.len() > 25 => Complexity::Moderate,
        _ => Complexity::Simple,
    };

    Intent {
        query_type,
        complexity,
        clauses,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::notes_perception;

    fn classify(query: &str) -> Intent {
        classify_intent(query, &PerceptionResult::empty("UTC"))
    }

    #[test]
    fn question_is_a_simple_lookup() {
        let intent = classify("What meetings do I have this week?");
        assert_eq!(intent.query_type, QueryType::FactualLookup);
        assert_eq!(intent.complexity, Complexity::Simple);
    }

    #[test]
    fn imperative_is_an_action() {
        let intent = classify("Create a note to buy milk and then remind me tomorrow");
        assert_eq!(intent.query_type, QueryType::ActionRequest);
        assert_eq!(intent.clauses.len(), 2);
        assert_eq!(intent.complexity, Complexity::Moderate);
    }

    #[test]
    fn capability_keywords_signal_actions() {
        let intent = classify_intent("I need you to jot this down: dentist at 3", &notes_perception());
        assert_eq!(intent.query_type, QueryType::ActionRequest);
    }

    #[test]
    fn analytical_and_status_and_social() {
        assert_eq!(
            classify("Compare the two vendor quotes").complexity,
            Complexity::Complex
        );
        assert_eq!(classify("Explain why the build broke").query_type, QueryType::Analytical);
        assert_eq!(classify("What's the status of my tasks?").query_type, QueryType::StatusCheck);
        assert_eq!(classify("hello there").query_type, QueryType::SocialCreative);
        assert_eq!(classify("Give me a haiku about rain").query_type, QueryType::SocialCreative);
    }

    #[test]
    fn clause_splitting() {
        assert_eq!(
            split_clauses("fetch https://x.dev/a; then note it and send it."),
            vec!["fetch https://x.dev/a", "note it", "send it"]
        );
    }
}
