//! `mindloop run`: One query through the cognitive loop.

use mindloop_agent::RunOptions;
use mindloop_core::agent::InvocationSource;
use tokio_util::sync::CancellationToken;

use crate::runtime::Runtime;

pub async fn run(
    query: String,
    user: Option<String>,
    workspace: Option<String>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::load().await?;
    let user = user.unwrap_or_else(|| runtime.config.engine.user_id.clone());
    let workspace = workspace.unwrap_or_else(|| runtime.config.engine.workspace_id.clone());

    // Ctrl-C stops the run at the next step boundary.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let options = RunOptions {
        config: Some(runtime.config.engine_config(InvocationSource::Cli)),
        source: Some(InvocationSource::Cli),
        cancel: Some(cancel),
    };
    let result = runtime.engine.run_cim(&query, &user, &workspace, options).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        super::print_result(&result);
    }
    Ok(())
}
