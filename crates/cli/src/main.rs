//! mindloop CLI: the main entry point.
//!
//! Commands:
//! - `run`: Run one query through the cognitive loop
//! - `heartbeat`: Run one heartbeat cycle, or the scheduler until Ctrl-C
//! - `audit`: Print the audit trail
//! - `soul`: Print the rendered soul prompt
//! - `config`: Show or initialize configuration
//! - `team`: List agents, hand off or escalate goals

use clap::{Parser, Subcommand, ValueEnum};

mod commands;
mod runtime;

#[derive(Parser)]
#[command(
    name = "mindloop",
    about = "mindloop: Perceive, Decide, Act, Observe",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query through the cognitive loop
    Run {
        query: String,

        /// Override the configured user id
        #[arg(short, long)]
        user: Option<String>,

        /// Override the configured workspace id
        #[arg(short, long)]
        workspace: Option<String>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run heartbeat cycles
    Heartbeat {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },

    /// Print the audit trail
    Audit {
        /// Only entries for this run
        #[arg(long)]
        run: Option<String>,

        /// Keep the most recent N entries
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Print the rendered soul prompt
    Soul,

    /// Show the effective configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },

    /// Multi-agent operations
    Team {
        #[command(subcommand)]
        command: TeamCommands,
    },
}

#[derive(Subcommand)]
enum TeamCommands {
    /// List configured agents and teams
    List,

    /// Hand a goal to another agent and run it as that agent
    Handoff {
        from: String,
        to: String,
        query: String,
    },

    /// Escalate a goal to the sender's escalation target
    Escalate {
        from: String,
        query: String,

        #[arg(short, long, default_value = "needs review")]
        reason: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init(),
    }

    match cli.command {
        Commands::Run {
            query,
            user,
            workspace,
            json,
        } => commands::run::run(query, user, workspace, json).await?,
        Commands::Heartbeat { once } => commands::heartbeat::run(once).await?,
        Commands::Audit { run, limit } => commands::audit::run(run, limit).await?,
        Commands::Soul => commands::soul::run().await?,
        Commands::Config { init } => commands::config_cmd::run(init).await?,
        Commands::Team { command } => match command {
            TeamCommands::List => commands::team::list().await?,
            TeamCommands::Handoff { from, to, query } => {
                commands::team::handoff(from, to, query).await?
            }
            TeamCommands::Escalate {
                from,
                query,
                reason,
            } => commands::team::escalate(from, query, reason).await?,
        },
    }

    Ok(())
}
