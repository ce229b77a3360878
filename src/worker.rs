//! Run orchestrator: the per-message pipeline and its transactional
//! envelope.
//!
//! `Worker::run` never propagates errors. Every failure inside an attempt
//! is caught once here: the envelope is rolled back and, when the command
//! record already existed, a failure record with the captured error is
//! written in its place. Failure visibility lives in the stored
//! stage/status fields, not in queue-level nacks — messages are always
//! acknowledged by the consuming side.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result, bail};
use tracing::{debug, error, info, warn};

use crate::admission;
use crate::channel::{self, ALL_TOKEN, ChannelParts, DecodedChannel};
use crate::config::Config;
use crate::db::Db;
use crate::domain::{AgentScope, CommandStatus, JobCommand, JobMessage, JobRun, RunScope, Stage};
use crate::exec::{self, ExecContext};
use crate::parser;
use crate::process::{ProcessLauncher, ShellLauncher};
use crate::store::{
    AgentRepository, CommandRepository, OutputRepository, RootDomainRepository, RunnerRepository,
    SubdomainRepository, TargetRepository, UnitOfWork,
};

/// Processes job messages one at a time, end to end
pub struct Worker {
    db: Db,
    config: Config,
    launcher: Arc<dyn ProcessLauncher>,
    cancel: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(db: Db, config: Config) -> Self {
        let launcher = Arc::new(ShellLauncher::new(
            config.shell.clone(),
            config.read_timeout(),
        ));
        Self::with_launcher(db, config, launcher)
    }

    /// Construct with a custom process launcher (tests)
    pub fn with_launcher(db: Db, config: Config, launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            db,
            config,
            launcher,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared stop flag; setting it makes an in-flight execution loop
    /// terminate its process and wind down
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Process one queue message. All-or-nothing at the storage layer;
    /// never returns an error to the message-consumption side.
    pub async fn run(&self, msg: &JobMessage) {
        let runners = RunnerRepository::new(self.db.clone());

        // A message for an unknown or already-removed run is dropped, not
        // an error: redelivery after a runner was cleaned up is normal.
        let run = match runners.get(&msg.channel) {
            Ok(Some(run)) => run,
            Ok(None) => {
                debug!("dropping message for unknown channel {}", msg.channel);
                return;
            }
            Err(e) => {
                error!("failed to resolve channel {}: {:#}", msg.channel, e);
                return;
            }
        };

        let mut uow = UnitOfWork::begin(self.db.clone());

        // Decode failures happen before a command record exists; they leave
        // no trace beyond the log (redelivery retries from scratch).
        let decoded = match channel::decode(&self.db, &msg.channel, &msg.payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                uow.rollback();
                warn!("channel {}: decode failed: {}", msg.channel, e);
                return;
            }
        };

        if run.stage == Stage::Enqueued {
            runners.stage_advance(&mut uow, &run.channel);
        }

        let mut cmd = JobCommand::new(&run.channel, &msg.command, msg.number, msg.server_number);
        let commands = CommandRepository::new(self.db.clone());

        let outcome = self.attempt(&run, &decoded, &cmd, &mut uow).await;

        match outcome {
            Ok(status) => {
                cmd.status = status;
                if status == CommandStatus::Success {
                    self.stage_mark_ran(&run, &decoded, &mut uow);
                }
                commands.stage_insert(&mut uow, &cmd);
                match uow.commit() {
                    Ok(_) => {
                        info!("channel {}: command {} finished {}", run.channel, cmd.id, status);
                    }
                    Err(e) => self.record_failure(&commands, cmd, &e),
                }
            }
            Err(e) => {
                uow.rollback();
                self.record_failure(&commands, cmd, &e);
            }
        }
    }

    /// Steps 6-7 of the pipeline: admission check, then the execution loop
    async fn attempt(
        &self,
        run: &JobRun,
        decoded: &DecodedChannel,
        cmd: &JobCommand,
        uow: &mut UnitOfWork,
    ) -> Result<CommandStatus> {
        if run.allow_skip
            && admission::should_skip(
                run,
                &decoded.agent,
                Some(&decoded.target),
                decoded.root_domain.as_ref(),
                decoded.subdomain.as_ref(),
            )
        {
            info!("channel {}: skipped by admission rules", run.channel);
            return Ok(CommandStatus::Skipped);
        }

        let parser = parser::build(&decoded.agent, &self.config)?;
        let mut process = self.launcher.launch(&cmd.command)?;

        let runners = RunnerRepository::new(self.db.clone());
        let outputs = OutputRepository::new(self.db.clone());
        let mut ctx = ExecContext {
            runners: &runners,
            outputs: &outputs,
            uow,
            channel: &run.channel,
            command_id: &cmd.id,
            rendered: &cmd.command,
            target: &decoded.target.name,
            root_domain: decoded.root_domain.as_ref().map(|r| r.name.as_str()),
            subdomain: decoded.subdomain.as_ref().map(|s| s.name.as_str()),
            cancel: &self.cancel,
        };

        exec::execute(process.as_mut(), parser.as_ref(), &mut ctx).await
    }

    /// Append the agent to the addressed entity's ran-before ledger
    fn stage_mark_ran(&self, run: &JobRun, decoded: &DecodedChannel, uow: &mut UnitOfWork) {
        let agent = &decoded.agent.name;
        match run.scope.level() {
            AgentScope::Target => {
                TargetRepository::new(self.db.clone()).stage_mark_ran(
                    uow,
                    &decoded.target.name,
                    agent,
                );
            }
            AgentScope::RootDomain => {
                if let Some(root) = &decoded.root_domain {
                    RootDomainRepository::new(self.db.clone()).stage_mark_ran(
                        uow,
                        &root.target,
                        &root.name,
                        agent,
                    );
                }
            }
            AgentScope::Subdomain => {
                if let Some(sub) = &decoded.subdomain {
                    SubdomainRepository::new(self.db.clone()).stage_mark_ran(
                        uow,
                        &sub.target,
                        &sub.root_domain,
                        &sub.name,
                        agent,
                    );
                }
            }
        }
    }

    /// The envelope is gone; persist the attempt as failed with the
    /// captured error so the failure stays visible
    fn record_failure(&self, commands: &CommandRepository, mut cmd: JobCommand, err: &anyhow::Error) {
        error!("channel {}: attempt failed: {:#}", cmd.channel, err);
        cmd.status = CommandStatus::Failed;
        cmd.error = Some(format!("{:#}", err));
        if let Err(e) = commands.insert_now(&cmd) {
            error!("channel {}: could not record failure: {:#}", cmd.channel, e);
        }
    }
}

/// Create the run handle for a job and the message a queue producer would
/// deliver for it.
///
/// The run scope derives from the agent's declared level plus whether any
/// segment fans out with the `all` token. The rendered command lands on the
/// message; the worker itself never renders templates.
pub fn enqueue(
    db: &Db,
    agent_name: &str,
    target_name: &str,
    root_domain: Option<&str>,
    subdomain: Option<&str>,
    allow_skip: bool,
    number: i64,
    server_number: i64,
) -> Result<(JobRun, JobMessage)> {
    let agent = AgentRepository::new(db.clone())
        .get(agent_name)?
        .with_context(|| format!("unknown agent `{}`", agent_name))?;
    if TargetRepository::new(db.clone()).get(target_name)?.is_none() && target_name != ALL_TOKEN {
        bail!("unknown target `{}`", target_name);
    }

    let run_id = chrono::Utc::now().format("%Y%m%d.%H%M%S").to_string();
    let mut segments = vec![run_id.as_str(), agent_name, target_name];
    if let Some(root) = root_domain {
        segments.push(root);
    }
    if let Some(sub) = subdomain {
        segments.push(sub);
    }
    let channel = segments.join("_");

    let scope = RunScope::derive(agent.scope, ChannelParts::has_all_segment(&channel));
    let mut run = JobRun::new(&channel, agent_name, scope);
    run.allow_skip = allow_skip;
    RunnerRepository::new(db.clone()).insert(&run)?;

    let command = agent.render_command(target_name, root_domain, subdomain);
    let message = JobMessage {
        channel,
        payload: String::new(),
        command,
        number,
        server_number,
    };

    Ok((run, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Agent, Target};
    use tempfile::tempdir;

    #[test]
    fn test_enqueue_derives_scope_and_renders_command() {
        let dir = tempdir().unwrap();
        let db = Db::open(&dir.path().join("worker.db")).unwrap();

        AgentRepository::new(db.clone())
            .upsert(&Agent::new(
                "sub-enum",
                "sub-enum -d {rootdomain}",
                AgentScope::RootDomain,
            ))
            .unwrap();
        TargetRepository::new(db.clone())
            .insert(&Target::new("acme"))
            .unwrap();

        let (run, msg) =
            enqueue(&db, "sub-enum", "acme", Some("example.com"), None, true, 1, 1).unwrap();
        assert_eq!(run.scope, RunScope::CurrentRootDomain);
        assert_eq!(run.stage, Stage::Enqueued);
        assert_eq!(msg.command, "sub-enum -d example.com");
        assert!(msg.channel.ends_with("_sub-enum_acme_example.com"));

        // Fan-out over every root domain of the target
        let (run, _msg) = enqueue(&db, "sub-enum", "acme", Some("all"), None, true, 1, 1).unwrap();
        assert_eq!(run.scope, RunScope::AllRootDomains);
    }

    #[test]
    fn test_enqueue_rejects_unknown_names() {
        let dir = tempdir().unwrap();
        let db = Db::open(&dir.path().join("worker.db")).unwrap();
        TargetRepository::new(db.clone())
            .insert(&Target::new("acme"))
            .unwrap();

        assert!(enqueue(&db, "ghost", "acme", None, None, true, 1, 1).is_err());

        AgentRepository::new(db.clone())
            .upsert(&Agent::new("ASN", "asn-lookup {target}", AgentScope::Target))
            .unwrap();
        assert!(enqueue(&db, "ASN", "ghost", None, None, true, 1, 1).is_err());
    }
}
