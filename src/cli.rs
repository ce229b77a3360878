//! CLI command implementations

use std::io::BufRead;
use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use tracing::{info, warn};

use reconworker::config::Config;
use reconworker::db::Db;
use reconworker::domain::{Agent, AgentScope, JobMessage, Stage, Target, Trigger};
use reconworker::store::{AgentRepository, CommandRepository, RunnerRepository, TargetRepository};
use reconworker::worker::{self, Worker};

#[derive(Subcommand)]
pub enum AgentAction {
    /// Register or update an agent
    Add {
        /// Agent name (referenced by channels and ledgers)
        name: String,
        /// Command template with {target}/{rootdomain}/{subdomain} placeholders
        command: String,
        /// Hierarchy level the command addresses: target, rootdomain, subdomain
        #[arg(long, default_value = "target")]
        scope: String,
        /// Line-parser expression for the selected backend
        #[arg(long)]
        script: Option<String>,
        /// Parser backend tag (regex, json); defaults to the configured one
        #[arg(long)]
        parser: Option<String>,
        /// Trigger configuration as inline JSON
        #[arg(long)]
        trigger: Option<String>,
    },
    /// List registered agents
    List,
}

#[derive(Subcommand)]
pub enum TargetAction {
    /// Register a target
    Add {
        name: String,
        /// Mark the target as having a bounty program
        #[arg(long)]
        bounty: bool,
    },
    /// List registered targets
    List,
}

fn open_db(config_path: Option<&Path>) -> Result<(Config, Db)> {
    let config = Config::load(config_path)?;
    let db = Db::open(&config.database)?;
    Ok((config, db))
}

/// Write a default config file
pub fn init_command(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::global_config_path);

    if path.exists() && !force {
        bail!(
            "config file already exists at {} (use --force to overwrite)",
            path.display()
        );
    }

    Config::default().save_to_file(&path)?;
    info!("wrote config to {}", path.display());
    Ok(())
}

pub fn agent_command(config_path: Option<&Path>, action: AgentAction) -> Result<()> {
    let (_config, db) = open_db(config_path)?;
    let agents = AgentRepository::new(db);

    match action {
        AgentAction::Add {
            name,
            command,
            scope,
            script,
            parser,
            trigger,
        } => {
            let scope = AgentScope::parse(&scope)
                .with_context(|| format!("unknown scope `{}`", scope))?;
            let mut agent = Agent::new(&name, command, scope);
            agent.script = script;
            agent.parser = parser;
            if let Some(trigger) = trigger {
                agent.trigger = serde_json::from_str::<Trigger>(&trigger)
                    .context("invalid trigger JSON")?;
            }
            agents.upsert(&agent)?;
            println!("registered agent {} ({})", name, scope);
        }
        AgentAction::List => {
            let all = agents.list()?;
            if all.is_empty() {
                println!("No agents registered.");
                return Ok(());
            }
            for agent in all {
                println!("  {} [{}] {}", agent.name, agent.scope, agent.command);
            }
        }
    }
    Ok(())
}

pub fn target_command(config_path: Option<&Path>, action: TargetAction) -> Result<()> {
    let (_config, db) = open_db(config_path)?;
    let targets = TargetRepository::new(db);

    match action {
        TargetAction::Add { name, bounty } => {
            let mut target = Target::new(&name);
            target.has_bounty = bounty;
            targets.insert(&target)?;
            println!("registered target {}", name);
        }
        TargetAction::List => {
            let all = targets.list()?;
            if all.is_empty() {
                println!("No targets registered.");
                return Ok(());
            }
            for target in all {
                let bounty = if target.has_bounty { " [bounty]" } else { "" };
                println!("  {}{}", target.name, bounty);
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn enqueue_command(
    config_path: Option<&Path>,
    agent: &str,
    target: &str,
    rootdomain: Option<&str>,
    subdomain: Option<&str>,
    allow_skip: bool,
    number: i64,
    server_number: i64,
) -> Result<()> {
    let (_config, db) = open_db(config_path)?;
    let (run, message) = worker::enqueue(
        &db,
        agent,
        target,
        rootdomain,
        subdomain,
        allow_skip,
        number,
        server_number,
    )?;

    info!("enqueued {} ({})", run.channel, run.scope);
    println!("{}", serde_json::to_string(&message)?);
    Ok(())
}

/// Process one message, or a stdin feed of one JSON message per line
pub async fn run_command(config_path: Option<&Path>, message: Option<&str>) -> Result<()> {
    let (config, db) = open_db(config_path)?;
    let worker = Worker::new(db, config);

    match message {
        Some(raw) => {
            let msg: JobMessage = serde_json::from_str(raw).context("invalid job message")?;
            worker.run(&msg).await;
        }
        None => {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = line.context("failed to read stdin")?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JobMessage>(&line) {
                    Ok(msg) => worker.run(&msg).await,
                    Err(e) => warn!("skipping malformed message: {}", e),
                }
            }
        }
    }
    Ok(())
}

/// Flip a run's stage to stopped; an in-flight execution loop observes the
/// change on its next iteration
pub fn stop_command(config_path: Option<&Path>, channel: &str) -> Result<()> {
    let (_config, db) = open_db(config_path)?;
    let runners = RunnerRepository::new(db);

    if runners.get(channel)?.is_none() {
        bail!("unknown channel `{}`", channel);
    }
    runners.set_stage(channel, Stage::Stopped)?;
    println!("stopped {}", channel);
    Ok(())
}

pub fn status_command(config_path: Option<&Path>) -> Result<()> {
    let (_config, db) = open_db(config_path)?;
    let runners = RunnerRepository::new(db.clone());
    let commands = CommandRepository::new(db);

    let runs = runners.list()?;
    if runs.is_empty() {
        println!("No runs found.");
        return Ok(());
    }

    println!("Runs ({}):\n", runs.len());
    for run in runs {
        println!("  {} [{}] {} {}", run.channel, run.stage, run.agent, run.scope);
        if let Some(cmd) = commands.latest_for_channel(&run.channel)? {
            println!("    last command: [{}] {}", cmd.status, cmd.command);
            if let Some(err) = &cmd.error {
                println!("    error: {}", err);
            }
        }
    }
    Ok(())
}
