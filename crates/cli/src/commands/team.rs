//! `mindloop team`: Agents, handoffs and escalations.
//!
//! Mailboxes live in-process, so handoff and escalate deliver the message
//! and process the recipient's inbox within the same invocation.

use mindloop_agent::TeamRuntime;
use mindloop_core::agent::InvocationSource;
use mindloop_core::goal::Goal;
use mindloop_core::team::{ContextBundle, HUMAN_INBOX};
use std::sync::Arc;

use crate::runtime::Runtime;

pub async fn list() -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::load().await?;
    let registry = runtime.team_registry()?;

    let agents = registry.list_agents();
    if agents.is_empty() {
        println!("  No agents configured. Add [[agents]] entries to the config file.");
        return Ok(());
    }
    println!("  Agents:");
    for agent in &agents {
        println!(
            "    {:<12} {:<16} tier: {:<8} escalates to: {}",
            agent.id,
            agent.role,
            agent.model_tier,
            agent.escalates_to.as_deref().unwrap_or(HUMAN_INBOX)
        );
    }
    let teams = registry.list_teams();
    if !teams.is_empty() {
        println!("  Teams:");
        for team in &teams {
            println!(
                "    {:<12} {} [{}] lead: {}",
                team.id,
                team.name,
                team.members.join(", "),
                team.lead.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

pub async fn handoff(from: String, to: String, query: String) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::load().await?;
    let team = TeamRuntime::new(Arc::new(runtime.team_registry()?), runtime.engine.clone());

    team.create_handoff(&from, &to, ContextBundle::new(Goal::from_query(&query)))
        .await?;
    process(&runtime, &team, &to).await
}

pub async fn escalate(from: String, query: String, reason: String) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::load().await?;
    let team = TeamRuntime::new(Arc::new(runtime.team_registry()?), runtime.engine.clone());

    let message = team
        .create_escalation(&from, ContextBundle::new(Goal::from_query(&query)), reason, None)
        .await?;
    if message.to == HUMAN_INBOX {
        println!("  Escalated to a human; nothing runs until someone picks it up.");
        println!("  Message: {}", message.id);
        return Ok(());
    }
    process(&runtime, &team, &message.to).await
}

async fn process(
    runtime: &Runtime,
    team: &TeamRuntime,
    agent_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let base = runtime.config.engine_config(InvocationSource::Team);
    for outcome in team.process_inbox(agent_id, &base, None).await? {
        println!("  {} message {} from {}", outcome.kind, outcome.message_id, outcome.from);
        if let Some(result) = &outcome.result {
            super::print_result(result);
        }
    }
    Ok(())
}
