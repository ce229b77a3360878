//! Shared test utilities for worker integration tests

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use reconworker::config::Config;
use reconworker::db::Db;
use reconworker::domain::{Agent, AgentScope, JobMessage, JobRun, RunScope, Stage, Target};
use reconworker::process::{CommandStream, ProcessLauncher};
use reconworker::store::{AgentRepository, RunnerRepository, TargetRepository};

/// Create a scratch database and a config pointing at it
pub fn scratch() -> (TempDir, Db, Config) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = dir.path().join("worker_test.db");
    let db = Db::open(&db_path).expect("Failed to open scratch db");

    let mut config = Config::default();
    config.database = db_path;
    config.read_timeout_ms = 100;

    (dir, db, config)
}

pub fn seed_agent(db: &Db, agent: &Agent) {
    AgentRepository::new(db.clone())
        .upsert(agent)
        .expect("Failed to seed agent");
}

pub fn seed_target(db: &Db, target: &Target) {
    TargetRepository::new(db.clone())
        .insert(target)
        .expect("Failed to seed target");
}

pub fn seed_runner(db: &Db, channel: &str, agent: &str, scope: RunScope) -> JobRun {
    let run = JobRun::new(channel, agent, scope);
    RunnerRepository::new(db.clone())
        .insert(&run)
        .expect("Failed to seed runner");
    run
}

pub fn message(channel: &str, command: &str) -> JobMessage {
    JobMessage {
        channel: channel.to_string(),
        payload: String::new(),
        command: command.to_string(),
        number: 1,
        server_number: 1,
    }
}

/// A target-level agent with the default (whole-line root domain) parser
pub fn asn_agent() -> Agent {
    Agent::new("ASN", "ASN {target}", AgentScope::Target)
}

/// Launcher that serves a scripted line stream instead of spawning
/// anything. Optionally flips the runner's stage to stopped after serving
/// N lines, standing in for an external actor halting the run mid-stream.
pub struct FakeLauncher {
    lines: Vec<String>,
    stop_after: Option<(usize, Db, String)>,
    /// Set once any spawned stream gets an exit call
    pub exited: Arc<AtomicBool>,
    /// Number of launches requested
    pub launches: Arc<AtomicUsize>,
}

impl FakeLauncher {
    pub fn new(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|s| s.to_string()).collect(),
            stop_after: None,
            exited: Arc::new(AtomicBool::new(false)),
            launches: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Flip `channel`'s stage to stopped after `served` lines were read
    pub fn stop_channel_after(mut self, served: usize, db: &Db, channel: &str) -> Self {
        self.stop_after = Some((served, db.clone(), channel.to_string()));
        self
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&self, _command: &str) -> Result<Box<dyn CommandStream>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeProcess {
            lines: self.lines.iter().cloned().collect(),
            served: 0,
            finished: false,
            stop_after: self.stop_after.clone(),
            exited: self.exited.clone(),
        }))
    }
}

struct FakeProcess {
    lines: VecDeque<String>,
    served: usize,
    finished: bool,
    stop_after: Option<(usize, Db, String)>,
    exited: Arc<AtomicBool>,
}

#[async_trait]
impl CommandStream for FakeProcess {
    async fn read_line(&mut self) -> Result<String> {
        match self.lines.pop_front() {
            Some(line) => {
                self.served += 1;
                if let Some((after, db, channel)) = &self.stop_after {
                    if self.served >= *after {
                        RunnerRepository::new(db.clone()).set_stage(channel, Stage::Stopped)?;
                    }
                }
                Ok(line)
            }
            None => {
                self.finished = true;
                Ok(String::new())
            }
        }
    }

    fn finished(&self) -> bool {
        self.finished
    }

    fn exit(&mut self) {
        self.exited.store(true, Ordering::SeqCst);
        self.finished = true;
    }
}
