//! `mindloop heartbeat`: Autonomous cycles.

use chrono::Utc;
use mindloop_core::agent::InvocationSource;
use mindloop_workflow::{HeartbeatResult, HeartbeatRunner, build_checks};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::runtime::Runtime;

pub async fn run(once: bool) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::load().await?;
    let heartbeat = runtime.config.heartbeat.clone();
    let engine_config = runtime.config.engine_config(InvocationSource::Heartbeat);
    let checks = build_checks(
        &heartbeat.checks,
        runtime.integrations.clone(),
        runtime.engine.memory(),
        &engine_config.user_id,
    );
    let runner = HeartbeatRunner::new(runtime.engine.clone(), engine_config).with_checks(checks);

    if once {
        let result = runner.run_heartbeat_cycle(&heartbeat, Utc::now(), None).await?;
        print_cycle(&result);
        return Ok(());
    }

    if !heartbeat.enabled {
        return Err("Heartbeat is disabled; set heartbeat.enabled = true or use --once".into());
    }

    println!(
        "  Heartbeat every {} min, active {:02}:00-{:02}:00, checks: {}",
        heartbeat.interval_minutes,
        heartbeat.active_hours.start,
        heartbeat.active_hours.end,
        runner.check_names().join(", ")
    );
    println!("  Press Ctrl-C to stop.");

    let cancel = CancellationToken::new();
    let handle = Arc::new(runner).start(heartbeat, cancel.clone());
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    cancel.cancel();
    handle.await?;
    Ok(())
}

fn print_cycle(result: &HeartbeatResult) {
    if let Some(reason) = &result.skipped_reason {
        println!("  Skipped: {reason}");
        return;
    }
    println!("  Checks:    {}", result.checks_run.join(", "));
    println!("  Findings:  {}", result.findings.len());
    for finding in &result.findings {
        println!("    [{}] {}", finding.check, finding.summary);
    }
    for run in &result.runs {
        println!();
        super::print_result(run);
    }
}
