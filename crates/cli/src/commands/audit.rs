//! `mindloop audit`: Print the audit trail.

use mindloop_config::AppConfig;
use mindloop_core::audit::{AuditData, AuditFilter, ExternalMemoryEntry};
use mindloop_memory::ExternalMemory;

use crate::runtime::open_audit;

pub async fn run(run_id: Option<String>, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if config.audit.backend == "memory" {
        println!("  The in-memory audit backend keeps nothing between runs.");
        return Ok(());
    }
    let memory = open_audit(&config).await?;
    let entries = memory
        .read(&AuditFilter {
            run_id,
            limit: Some(limit),
            ..Default::default()
        })
        .await?;

    if entries.is_empty() {
        println!("  No audit entries.");
        return Ok(());
    }
    let mut tampered = 0;
    for entry in &entries {
        let verified = ExternalMemory::verify(entry);
        if !verified {
            tampered += 1;
        }
        println!("{}", render(entry, verified));
    }
    println!();
    println!("  {} entries ({} failed verification)", entries.len(), tampered);
    Ok(())
}

fn render(entry: &ExternalMemoryEntry, verified: bool) -> String {
    let detail = match &entry.data {
        AuditData::Step {
            step_id,
            capability,
            status,
            ..
        } => format!("{step_id} {capability} -> {status}"),
        AuditData::Decision {
            query_type,
            step_count,
            requires_approval,
            ..
        } => format!("{query_type}, {step_count} step(s), approval: {requires_approval}"),
        AuditData::Error { error } => format!("{}: {}", error.phase, error.message),
        AuditData::Approval { reasons, .. } => reasons.join("; "),
        AuditData::TaskSummary { summary, .. } => summary.clone(),
        AuditData::Heartbeat {
            checks_run,
            runs_triggered,
            skipped_reason,
            ..
        } => match skipped_reason {
            Some(reason) => format!("skipped: {reason}"),
            None => format!("{} check(s), {} run(s)", checks_run.len(), runs_triggered.len()),
        },
        AuditData::Message {
            from, to, preview, ..
        } => format!("{from} -> {to}: {preview}"),
        AuditData::Opaque { value } => value.to_string(),
    };
    format!(
        "{} {:<18} {:<10} {:<12} {}{}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.action.to_string(),
        entry.agent_id,
        entry.run_id.as_deref().map_or("-", |r| r.get(..8).unwrap_or(r)),
        detail,
        if verified { "" } else { "  [TAMPERED]" }
    )
}
