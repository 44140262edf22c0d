pub mod audit;
pub mod config_cmd;
pub mod heartbeat;
pub mod run;
pub mod soul;
pub mod team;

use mindloop_core::state::CimResult;

/// Human-readable rendering of a run.
pub(crate) fn print_result(result: &CimResult) {
    let state = &result.final_state;
    println!("  Run:       {}", state.run_id);
    println!("  Goal:      {}", state.goal.description);
    println!("  Status:    {}", state.status);
    println!("  Goal met:  {}", if result.goal_met { "yes" } else { "no" });
    for record in &state.action_history {
        let outcome = match (&record.result.data, &record.result.error) {
            (_, Some(error)) => error.clone(),
            (Some(data), None) => data.summary(),
            (None, None) => String::new(),
        };
        println!(
            "    {} [{}] {} ({}): {outcome}",
            record.step_id, record.status, record.description, record.capability
        );
    }
    println!();
    println!("  {}", result.summary);
    println!("  ({} audit entries)", result.audit_trail.len());
}
