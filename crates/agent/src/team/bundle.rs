use mindloop_core::plan::StepStatus;
use mindloop_core::state::{CimResult, LoopStatus};
use mindloop_core::team::ContextBundle;

/// Render a bundle as the context block of the receiving agent's prompts.
pub fn bundle_to_prompt(bundle: &ContextBundle) -> String {
    let mut out = format!("Goal: {}", bundle.goal.description);
    let mut section = |title: &str, items: &[String]| {
        if !items.is_empty() {
            out.push_str(&format!("\n{title}:"));
            for item in items {
                out.push_str(&format!("\n- {item}"));
            }
        }
    };
    section("Progress so far", &bundle.progress);
    section("Known facts", &bundle.facts);
    section("Open questions", &bundle.open_questions);
    if let Some(run_id) = &bundle.source_run_id {
        out.push_str(&format!("\n(handed over from run {run_id})"));
    }
    out
}

/// Package what a run learned so a teammate can pick it up.
pub fn bundle_from_result(result: &CimResult) -> ContextBundle {
    let state = &result.final_state;
    let mut bundle = ContextBundle::new(state.goal.clone());
    bundle.source_run_id = Some(state.run_id.clone());

    for record in &state.action_history {
        let outcome = match (&record.result.data, &record.result.error) {
            (_, Some(error)) => error.clone(),
            (Some(data), None) => data.summary(),
            (None, None) => String::new(),
        };
        bundle
            .progress
            .push(format!("{} [{}] {}: {outcome}", record.step_id, record.status, record.description));
        if record.status == StepStatus::Failed {
            bundle
                .open_questions
                .push(format!("How to recover from the failure of {}?", record.step_id));
        }
    }

    if let Some(perception) = &state.perception {
        bundle.facts = perception
            .relevant_memories
            .iter()
            .take(5)
            .map(|m| m.content.clone())
            .collect();
    }
    if state.status == LoopStatus::WaitingHuman {
        bundle.open_questions.push(result.summary.clone());
    }
    bundle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::Harness;
    use mindloop_core::agent::EngineConfig;
    use mindloop_core::goal::Goal;

    #[test]
    fn prompt_lists_non_empty_sections() {
        let mut bundle = ContextBundle::new(Goal::from_query("Plan the offsite"));
        bundle.facts.push("Budget is 5k".into());
        let prompt = bundle_to_prompt(&bundle);
        assert!(prompt.starts_with("Goal: Plan the offsite"));
        assert!(prompt.contains("Known facts:\n- Budget is 5k"));
        assert!(!prompt.contains("Progress so far"));
    }

    #[tokio::test]
    async fn bundle_carries_progress_and_facts() {
        let harness = Harness::new();
        let result = harness
            .engine()
            .run("When is the dentist?", &EngineConfig::new("u", "w"), None)
            .await;
        let bundle = bundle_from_result(&result);

        assert_eq!(bundle.source_run_id.as_deref(), Some(result.run_id()));
        assert!(bundle.progress[0].starts_with("step-1 [completed]"));
        assert_eq!(bundle.facts, vec!["Dentist on Friday".to_string()]);
        assert!(bundle.open_questions.is_empty());
    }
}
