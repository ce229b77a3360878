use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "reconworker")]
#[command(about = "Reconnaissance job worker - runs agent commands against a target hierarchy")]
#[command(version)]
struct Cli {
    /// Path to the config file (defaults to ~/.reconworker/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },

    /// Register an agent (job definition)
    Agent {
        #[command(subcommand)]
        action: cli::AgentAction,
    },

    /// Register a target
    Target {
        #[command(subcommand)]
        action: cli::TargetAction,
    },

    /// Create the run handle for a job and print its queue message
    Enqueue {
        /// Agent name
        agent: String,
        /// Target name
        target: String,
        /// Root domain segment (use `all` to fan out)
        #[arg(long)]
        rootdomain: Option<String>,
        /// Subdomain segment (use `all` to fan out)
        #[arg(long)]
        subdomain: Option<String>,
        /// Bypass admission control for this run
        #[arg(long)]
        no_skip: bool,
        /// Message sequence number
        #[arg(long, default_value_t = 1)]
        number: i64,
        /// Server number for external bookkeeping
        #[arg(long, default_value_t = 1)]
        server_number: i64,
    },

    /// Process job messages (one JSON message, or a line feed on stdin)
    Run {
        /// One JSON job message; omit to read messages from stdin
        message: Option<String>,
    },

    /// Stop a run out-of-band while a worker may be mid-stream
    Stop {
        /// Channel of the run to stop
        channel: String,
    },

    /// Show runs and their latest command status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init { force } => {
            cli::init_command(config_path, force)?;
        }
        Commands::Agent { action } => {
            cli::agent_command(config_path, action)?;
        }
        Commands::Target { action } => {
            cli::target_command(config_path, action)?;
        }
        Commands::Enqueue {
            agent,
            target,
            rootdomain,
            subdomain,
            no_skip,
            number,
            server_number,
        } => {
            cli::enqueue_command(
                config_path,
                &agent,
                &target,
                rootdomain.as_deref(),
                subdomain.as_deref(),
                !no_skip,
                number,
                server_number,
            )?;
        }
        Commands::Run { message } => {
            cli::run_command(config_path, message.as_deref()).await?;
        }
        Commands::Stop { channel } => {
            cli::stop_command(config_path, &channel)?;
        }
        Commands::Status => {
            cli::status_command(config_path)?;
        }
    }

    Ok(())
}
