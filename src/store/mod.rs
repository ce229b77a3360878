//! Repository implementations over the worker database
//!
//! Straight reads and bookkeeping writes go directly through the
//! connection. Anything belonging to a job attempt's all-or-nothing
//! envelope is staged into a [`UnitOfWork`] instead. Command output rows
//! are the deliberate exception: they are appended immediately so raw
//! process output survives a rolled-back attempt.

mod uow;

pub use uow::UnitOfWork;

use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, params};

use crate::db::Db;
use crate::domain::{
    Agent, AgentScope, CommandOutput, CommandStatus, JobCommand, JobRun, RootDomain, RunScope,
    Service, Stage, Subdomain, Target, Trigger,
};
use crate::parser::ParsedFacts;

fn vec_to_json(v: &[String]) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string())
}

fn vec_from_json(s: Option<String>) -> Vec<String> {
    s.as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

// ============================================
// AGENT REPOSITORY
// ============================================

/// Repository for agent (job definition) records
pub struct AgentRepository {
    db: Db,
}

impl AgentRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Insert or replace an agent definition
    pub fn upsert(&self, agent: &Agent) -> Result<()> {
        let conn = self.db.conn();
        conn.execute(
            r#"
            INSERT INTO agents (name, command, script, parser, scope, trigger_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(name) DO UPDATE SET
                command = excluded.command,
                script = excluded.script,
                parser = excluded.parser,
                scope = excluded.scope,
                trigger_json = excluded.trigger_json
            "#,
            params![
                agent.name,
                agent.command,
                agent.script,
                agent.parser,
                agent.scope.as_str(),
                serde_json::to_string(&agent.trigger).ok(),
                agent.created_at,
            ],
        )
        .context("Failed to upsert agent")?;
        Ok(())
    }

    /// Get an agent by exact name
    pub fn get(&self, name: &str) -> Result<Option<Agent>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT name, command, script, parser, scope, trigger_json, created_at
             FROM agents WHERE name = ?1",
        )?;

        let result = stmt.query_row(params![name], |row| {
            Ok(Agent {
                name: row.get(0)?,
                command: row.get(1)?,
                script: row.get(2)?,
                parser: row.get(3)?,
                scope: AgentScope::parse(&row.get::<_, String>(4)?).unwrap_or_default(),
                trigger: row
                    .get::<_, Option<String>>(5)?
                    .as_deref()
                    .and_then(|s| serde_json::from_str::<Trigger>(s).ok())
                    .unwrap_or_default(),
                created_at: row.get(6)?,
            })
        });

        match result {
            Ok(agent) => Ok(Some(agent)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List all agents by name
    pub fn list(&self) -> Result<Vec<Agent>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare("SELECT name FROM agents ORDER BY name")?;
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(conn);

        let mut agents = Vec::with_capacity(names.len());
        for name in names {
            if let Some(agent) = self.get(&name)? {
                agents.push(agent);
            }
        }
        Ok(agents)
    }
}

// ============================================
// TARGET REPOSITORY
// ============================================

/// Repository for target records
pub struct TargetRepository {
    db: Db,
}

impl TargetRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn insert(&self, target: &Target) -> Result<()> {
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO targets (name, has_bounty, ran_before_json, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                target.name,
                target.has_bounty,
                vec_to_json(&target.ran_before),
                target.created_at,
            ],
        )
        .context("Failed to insert target")?;
        Ok(())
    }

    pub fn update(&self, target: &Target) -> Result<()> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE targets SET has_bounty = ?2, ran_before_json = ?3 WHERE name = ?1",
            params![
                target.name,
                target.has_bounty,
                vec_to_json(&target.ran_before)
            ],
        )
        .context("Failed to update target")?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Option<Target>> {
        let conn = self.db.conn();
        let result = conn.query_row(
            "SELECT name, has_bounty, ran_before_json, created_at FROM targets WHERE name = ?1",
            params![name],
            |row| {
                Ok(Target {
                    name: row.get(0)?,
                    has_bounty: row.get(1)?,
                    ran_before: vec_from_json(row.get(2)?),
                    created_at: row.get(3)?,
                })
            },
        );

        match result {
            Ok(target) => Ok(Some(target)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list(&self) -> Result<Vec<Target>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT name, has_bounty, ran_before_json, created_at FROM targets ORDER BY name",
        )?;
        let targets = stmt
            .query_map([], |row| {
                Ok(Target {
                    name: row.get(0)?,
                    has_bounty: row.get(1)?,
                    ran_before: vec_from_json(row.get(2)?),
                    created_at: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(targets)
    }

    /// Stage an append of `agent` to the target's ran-before ledger
    pub fn stage_mark_ran(&self, uow: &mut UnitOfWork, name: &str, agent: &str) {
        let name = name.to_string();
        let agent = agent.to_string();
        uow.stage(move |conn| {
            let current: Option<String> = conn
                .query_row(
                    "SELECT ran_before_json FROM targets WHERE name = ?1",
                    params![name],
                    |r| r.get(0),
                )
                .optional()?
                .flatten();
            let mut ledger = vec_from_json(current);
            if !ledger.iter().any(|a| a == &agent) {
                ledger.push(agent);
                conn.execute(
                    "UPDATE targets SET ran_before_json = ?2 WHERE name = ?1",
                    params![name, vec_to_json(&ledger)],
                )?;
            }
            Ok(())
        });
    }
}

// ============================================
// ROOT DOMAIN REPOSITORY
// ============================================

/// Repository for root domain records
pub struct RootDomainRepository {
    db: Db,
}

impl RootDomainRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn insert(&self, root: &RootDomain) -> Result<()> {
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO root_domains (target, name, has_bounty, ran_before_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                root.target,
                root.name,
                root.has_bounty,
                vec_to_json(&root.ran_before),
                root.created_at,
            ],
        )
        .context("Failed to insert root domain")?;
        Ok(())
    }

    pub fn update(&self, root: &RootDomain) -> Result<()> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE root_domains SET has_bounty = ?3, ran_before_json = ?4
             WHERE target = ?1 AND name = ?2",
            params![
                root.target,
                root.name,
                root.has_bounty,
                vec_to_json(&root.ran_before)
            ],
        )
        .context("Failed to update root domain")?;
        Ok(())
    }

    pub fn get(&self, target: &str, name: &str) -> Result<Option<RootDomain>> {
        let conn = self.db.conn();
        let result = conn.query_row(
            "SELECT target, name, has_bounty, ran_before_json, created_at
             FROM root_domains WHERE target = ?1 AND name = ?2",
            params![target, name],
            |row| {
                Ok(RootDomain {
                    target: row.get(0)?,
                    name: row.get(1)?,
                    has_bounty: row.get(2)?,
                    ran_before: vec_from_json(row.get(3)?),
                    created_at: row.get(4)?,
                })
            },
        );

        match result {
            Ok(root) => Ok(Some(root)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_by_target(&self, target: &str) -> Result<Vec<RootDomain>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT target, name, has_bounty, ran_before_json, created_at
             FROM root_domains WHERE target = ?1 ORDER BY name",
        )?;
        let roots = stmt
            .query_map(params![target], |row| {
                Ok(RootDomain {
                    target: row.get(0)?,
                    name: row.get(1)?,
                    has_bounty: row.get(2)?,
                    ran_before: vec_from_json(row.get(3)?),
                    created_at: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(roots)
    }

    /// Stage an append of `agent` to the root domain's ran-before ledger
    pub fn stage_mark_ran(&self, uow: &mut UnitOfWork, target: &str, name: &str, agent: &str) {
        let target = target.to_string();
        let name = name.to_string();
        let agent = agent.to_string();
        uow.stage(move |conn| {
            let current: Option<String> = conn
                .query_row(
                    "SELECT ran_before_json FROM root_domains WHERE target = ?1 AND name = ?2",
                    params![target, name],
                    |r| r.get(0),
                )
                .optional()?
                .flatten();
            let mut ledger = vec_from_json(current);
            if !ledger.iter().any(|a| a == &agent) {
                ledger.push(agent);
                conn.execute(
                    "UPDATE root_domains SET ran_before_json = ?3 WHERE target = ?1 AND name = ?2",
                    params![target, name, vec_to_json(&ledger)],
                )?;
            }
            Ok(())
        });
    }
}

// ============================================
// SUBDOMAIN REPOSITORY
// ============================================

fn subdomain_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subdomain> {
    Ok(Subdomain {
        target: row.get(0)?,
        root_domain: row.get(1)?,
        name: row.get(2)?,
        has_bounty: row.get(3)?,
        is_alive: row.get(4)?,
        has_http_open: row.get(5)?,
        is_main_portal: row.get(6)?,
        ip: row.get(7)?,
        technology: row.get(8)?,
        labels: vec_from_json(row.get(9)?),
        services: row
            .get::<_, Option<String>>(10)?
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default(),
        ran_before: vec_from_json(row.get(11)?),
        created_at: row.get(12)?,
    })
}

const SUBDOMAIN_COLUMNS: &str = "target, root_domain, name, has_bounty, is_alive, has_http_open, \
     is_main_portal, ip, technology, labels_json, services_json, ran_before_json, created_at";

/// Repository for subdomain records
pub struct SubdomainRepository {
    db: Db,
}

impl SubdomainRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn insert(&self, sub: &Subdomain) -> Result<()> {
        let conn = self.db.conn();
        conn.execute(
            r#"
            INSERT INTO subdomains (target, root_domain, name, has_bounty, is_alive,
                has_http_open, is_main_portal, ip, technology, labels_json,
                services_json, ran_before_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                sub.target,
                sub.root_domain,
                sub.name,
                sub.has_bounty,
                sub.is_alive,
                sub.has_http_open,
                sub.is_main_portal,
                sub.ip,
                sub.technology,
                vec_to_json(&sub.labels),
                serde_json::to_string(&sub.services).ok(),
                vec_to_json(&sub.ran_before),
                sub.created_at,
            ],
        )
        .context("Failed to insert subdomain")?;
        Ok(())
    }

    pub fn get(&self, target: &str, root_domain: &str, name: &str) -> Result<Option<Subdomain>> {
        let conn = self.db.conn();
        let sql = format!(
            "SELECT {SUBDOMAIN_COLUMNS} FROM subdomains
             WHERE target = ?1 AND root_domain = ?2 AND name = ?3"
        );
        let result = conn.query_row(&sql, params![target, root_domain, name], subdomain_from_row);

        match result {
            Ok(sub) => Ok(Some(sub)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_by_root(&self, target: &str, root_domain: &str) -> Result<Vec<Subdomain>> {
        let conn = self.db.conn();
        let sql = format!(
            "SELECT {SUBDOMAIN_COLUMNS} FROM subdomains
             WHERE target = ?1 AND root_domain = ?2 ORDER BY name"
        );
        let mut stmt = conn.prepare(&sql)?;
        let subs = stmt
            .query_map(params![target, root_domain], subdomain_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(subs)
    }

    /// Stage an append of `agent` to the subdomain's ran-before ledger
    pub fn stage_mark_ran(
        &self,
        uow: &mut UnitOfWork,
        target: &str,
        root_domain: &str,
        name: &str,
        agent: &str,
    ) {
        let target = target.to_string();
        let root_domain = root_domain.to_string();
        let name = name.to_string();
        let agent = agent.to_string();
        uow.stage(move |conn| {
            let current: Option<String> = conn
                .query_row(
                    "SELECT ran_before_json FROM subdomains
                     WHERE target = ?1 AND root_domain = ?2 AND name = ?3",
                    params![target, root_domain, name],
                    |r| r.get(0),
                )
                .optional()?
                .flatten();
            let mut ledger = vec_from_json(current);
            if !ledger.iter().any(|a| a == &agent) {
                ledger.push(agent);
                conn.execute(
                    "UPDATE subdomains SET ran_before_json = ?4
                     WHERE target = ?1 AND root_domain = ?2 AND name = ?3",
                    params![target, root_domain, name, vec_to_json(&ledger)],
                )?;
            }
            Ok(())
        });
    }
}

// ============================================
// RUNNER REPOSITORY
// ============================================

/// Repository for job run handles
pub struct RunnerRepository {
    db: Db,
}

impl RunnerRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn insert(&self, run: &JobRun) -> Result<()> {
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO runners (channel, agent, stage, scope, allow_skip, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run.channel,
                run.agent,
                run.stage.as_str(),
                run.scope.as_str(),
                run.allow_skip,
                run.created_at,
            ],
        )
        .context("Failed to insert runner")?;
        Ok(())
    }

    pub fn get(&self, channel: &str) -> Result<Option<JobRun>> {
        let conn = self.db.conn();
        let result = conn.query_row(
            "SELECT channel, agent, stage, scope, allow_skip, created_at
             FROM runners WHERE channel = ?1",
            params![channel],
            |row| {
                Ok(JobRun {
                    channel: row.get(0)?,
                    agent: row.get(1)?,
                    stage: Stage::parse(&row.get::<_, String>(2)?).unwrap_or(Stage::Failed),
                    scope: RunScope::parse(&row.get::<_, String>(3)?)
                        .unwrap_or(RunScope::CurrentTarget),
                    allow_skip: row.get(4)?,
                    created_at: row.get(5)?,
                })
            },
        );

        match result {
            Ok(run) => Ok(Some(run)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list(&self) -> Result<Vec<JobRun>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT channel, agent, stage, scope, allow_skip, created_at
             FROM runners ORDER BY created_at DESC",
        )?;
        let runs = stmt
            .query_map([], |row| {
                Ok(JobRun {
                    channel: row.get(0)?,
                    agent: row.get(1)?,
                    stage: Stage::parse(&row.get::<_, String>(2)?).unwrap_or(Stage::Failed),
                    scope: RunScope::parse(&row.get::<_, String>(3)?)
                        .unwrap_or(RunScope::CurrentTarget),
                    allow_skip: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(runs)
    }

    /// Re-read only the stage of a run; the execution loop polls this on
    /// every iteration to observe out-of-band stops
    pub fn stage(&self, channel: &str) -> Result<Option<Stage>> {
        let conn = self.db.conn();
        let result: Option<String> = conn
            .query_row(
                "SELECT stage FROM runners WHERE channel = ?1",
                params![channel],
                |r| r.get(0),
            )
            .optional()?;
        Ok(result.as_deref().and_then(Stage::parse))
    }

    /// Immediately set a run's stage. This is the out-of-band path used by
    /// `reconworker stop` while a worker may be mid-loop.
    pub fn set_stage(&self, channel: &str, stage: Stage) -> Result<()> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE runners SET stage = ?2 WHERE channel = ?1",
            params![channel, stage.as_str()],
        )
        .context("Failed to set runner stage")?;
        Ok(())
    }

    /// Stage the one-shot enqueued -> running advance. Guarded on the
    /// current stage so an external stopped/failed write is never clobbered
    /// when the envelope commits.
    pub fn stage_advance(&self, uow: &mut UnitOfWork, channel: &str) {
        let channel = channel.to_string();
        uow.stage(move |conn| {
            conn.execute(
                "UPDATE runners SET stage = 'running'
                 WHERE channel = ?1 AND stage = 'enqueued'",
                params![channel],
            )?;
            Ok(())
        });
    }
}

// ============================================
// COMMAND REPOSITORY
// ============================================

fn command_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobCommand> {
    Ok(JobCommand {
        id: row.get(0)?,
        channel: row.get(1)?,
        status: CommandStatus::parse(&row.get::<_, String>(2)?).unwrap_or(CommandStatus::Failed),
        command: row.get(3)?,
        number: row.get(4)?,
        server_number: row.get(5)?,
        error: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Repository for command attempts
pub struct CommandRepository {
    db: Db,
}

impl CommandRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Stage the command record into the attempt's envelope
    pub fn stage_insert(&self, uow: &mut UnitOfWork, cmd: &JobCommand) {
        let cmd = cmd.clone();
        uow.stage(move |conn| {
            insert_command(conn, &cmd)?;
            Ok(())
        });
    }

    /// Write a command record immediately, outside any envelope. Used for
    /// the failure record after a rollback.
    pub fn insert_now(&self, cmd: &JobCommand) -> Result<()> {
        let conn = self.db.conn();
        insert_command(&conn, cmd)
    }

    pub fn get(&self, id: &str) -> Result<Option<JobCommand>> {
        let conn = self.db.conn();
        let result = conn.query_row(
            "SELECT id, channel, status, command, number, server_number, error, created_at
             FROM commands WHERE id = ?1",
            params![id],
            command_from_row,
        );

        match result {
            Ok(cmd) => Ok(Some(cmd)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_for_channel(&self, channel: &str) -> Result<Vec<JobCommand>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, channel, status, command, number, server_number, error, created_at
             FROM commands WHERE channel = ?1 ORDER BY created_at",
        )?;
        let cmds = stmt
            .query_map(params![channel], command_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(cmds)
    }

    pub fn latest_for_channel(&self, channel: &str) -> Result<Option<JobCommand>> {
        let conn = self.db.conn();
        let result = conn.query_row(
            "SELECT id, channel, status, command, number, server_number, error, created_at
             FROM commands WHERE channel = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
            params![channel],
            command_from_row,
        );

        match result {
            Ok(cmd) => Ok(Some(cmd)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn insert_command(conn: &rusqlite::Connection, cmd: &JobCommand) -> Result<()> {
    conn.execute(
        "INSERT INTO commands (id, channel, status, command, number, server_number, error, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            cmd.id,
            cmd.channel,
            cmd.status.as_str(),
            cmd.command,
            cmd.number,
            cmd.server_number,
            cmd.error,
            cmd.created_at,
        ],
    )
    .context("Failed to insert command")?;
    Ok(())
}

// ============================================
// OUTPUT REPOSITORY
// ============================================

/// Repository for raw command output lines
pub struct OutputRepository {
    db: Db,
}

impl OutputRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Append one raw line. Immediate write: raw output stays durable even
    /// when the surrounding attempt rolls back.
    pub fn append(&self, command_id: &str, line: &str) -> Result<()> {
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO command_outputs (command_id, line, created_at)
             VALUES (?1, ?2, ?3)",
            params![command_id, line, crate::domain::now_millis()],
        )
        .context("Failed to append command output")?;
        Ok(())
    }

    pub fn list(&self, command_id: &str) -> Result<Vec<CommandOutput>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, command_id, line, created_at FROM command_outputs
             WHERE command_id = ?1 ORDER BY id",
        )?;
        let outputs = stmt
            .query_map(params![command_id], |row| {
                Ok(CommandOutput {
                    id: row.get(0)?,
                    command_id: row.get(1)?,
                    line: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(outputs)
    }
}

// ============================================
// FACT PERSISTENCE
// ============================================

/// Stage parsed facts against the hierarchy.
///
/// Candidate root domains and subdomains become INSERT OR IGNORE upserts;
/// ip and service facts update the subdomain they belong to (the candidate
/// subdomain on the same line, falling back to the channel's subdomain).
/// Everything lands in the attempt's envelope and disappears on rollback.
pub fn stage_facts(
    uow: &mut UnitOfWork,
    target: &str,
    channel_root: Option<&str>,
    channel_subdomain: Option<&str>,
    facts: &ParsedFacts,
) {
    if facts.is_empty() {
        return;
    }

    let target = target.to_string();
    let root_for_sub = facts
        .root_domain
        .clone()
        .or_else(|| channel_root.map(str::to_string));
    let subdomain = facts
        .subdomain
        .clone()
        .or_else(|| channel_subdomain.map(str::to_string));
    let facts = facts.clone();

    uow.stage(move |conn| {
        if let Some(root) = &facts.root_domain {
            conn.execute(
                "INSERT OR IGNORE INTO root_domains (target, name, ran_before_json, created_at)
                 VALUES (?1, ?2, '[]', ?3)",
                params![target, root, crate::domain::now_millis()],
            )?;
        }

        let (Some(root), Some(sub)) = (&root_for_sub, &subdomain) else {
            return Ok(());
        };

        if facts.subdomain.is_some() {
            conn.execute(
                "INSERT OR IGNORE INTO subdomains
                     (target, root_domain, name, labels_json, services_json, ran_before_json, created_at)
                 VALUES (?1, ?2, ?3, '[]', '[]', '[]', ?4)",
                params![target, root, sub, crate::domain::now_millis()],
            )?;
        }

        if let Some(ip) = &facts.ip {
            conn.execute(
                "UPDATE subdomains SET ip = ?4
                 WHERE target = ?1 AND root_domain = ?2 AND name = ?3",
                params![target, root, sub, ip],
            )?;
        }

        if let Some(service) = &facts.service {
            let current: Option<String> = conn
                .query_row(
                    "SELECT services_json FROM subdomains
                     WHERE target = ?1 AND root_domain = ?2 AND name = ?3",
                    params![target, root, sub],
                    |r| r.get(0),
                )
                .optional()?
                .flatten();
            let mut services: Vec<Service> = current
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_default();
            let entry = Service {
                name: service.clone(),
                port: facts.port.unwrap_or(0),
            };
            if !services.contains(&entry) {
                services.push(entry);
                conn.execute(
                    "UPDATE subdomains SET services_json = ?4
                     WHERE target = ?1 AND root_domain = ?2 AND name = ?3",
                    params![target, root, sub, serde_json::to_string(&services)?],
                )?;
            }
        }

        Ok(())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn scratch_db() -> (tempfile::TempDir, Db) {
        let dir = tempdir().unwrap();
        let db = Db::open(&dir.path().join("store.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_agent_round_trip_with_trigger() {
        let (_dir, db) = scratch_db();
        let agents = AgentRepository::new(db);

        let mut agent = Agent::new("ASN", "asn-lookup {target}", AgentScope::Target);
        agent.trigger.skip_if_ran_before = true;
        agent.trigger.target_name = Some(crate::domain::Matcher::exclude("internal"));
        agents.upsert(&agent).unwrap();

        let loaded = agents.get("ASN").unwrap().unwrap();
        assert_eq!(loaded.command, "asn-lookup {target}");
        assert!(loaded.trigger.skip_if_ran_before);
        assert_eq!(
            loaded.trigger.target_name.unwrap().pattern,
            "internal"
        );
        assert!(agents.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_runner_stage_advance_is_guarded() {
        let (_dir, db) = scratch_db();
        let runners = RunnerRepository::new(db.clone());

        let run = JobRun::new("1_ASN_acme", "ASN", RunScope::CurrentTarget);
        runners.insert(&run).unwrap();

        // External actor stops the run before the envelope commits
        runners.set_stage("1_ASN_acme", Stage::Stopped).unwrap();

        let mut uow = UnitOfWork::begin(db);
        runners.stage_advance(&mut uow, "1_ASN_acme");
        uow.commit().unwrap();

        assert_eq!(
            runners.stage("1_ASN_acme").unwrap(),
            Some(Stage::Stopped)
        );
    }

    #[test]
    fn test_mark_ran_appends_once() {
        let (_dir, db) = scratch_db();
        let targets = TargetRepository::new(db.clone());
        targets.insert(&Target::new("acme")).unwrap();

        for _ in 0..2 {
            let mut uow = UnitOfWork::begin(db.clone());
            targets.stage_mark_ran(&mut uow, "acme", "ASN");
            uow.commit().unwrap();
        }

        let target = targets.get("acme").unwrap().unwrap();
        assert_eq!(target.ran_before, vec!["ASN".to_string()]);
    }

    #[test]
    fn test_stage_facts_creates_hierarchy_rows() {
        let (_dir, db) = scratch_db();
        let targets = TargetRepository::new(db.clone());
        targets.insert(&Target::new("acme")).unwrap();

        let facts = ParsedFacts {
            root_domain: Some("example.com".to_string()),
            subdomain: Some("www.example.com".to_string()),
            ip: Some("10.0.0.1".to_string()),
            service: Some("http".to_string()),
            port: Some(80),
        };
        let mut uow = UnitOfWork::begin(db.clone());
        stage_facts(&mut uow, "acme", None, None, &facts);
        uow.commit().unwrap();

        let roots = RootDomainRepository::new(db.clone());
        assert!(roots.get("acme", "example.com").unwrap().is_some());

        let subs = SubdomainRepository::new(db);
        let sub = subs
            .get("acme", "example.com", "www.example.com")
            .unwrap()
            .unwrap();
        assert_eq!(sub.ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(
            sub.services,
            vec![Service {
                name: "http".to_string(),
                port: 80
            }]
        );
    }

    #[test]
    fn test_stage_facts_rollback_discards_everything() {
        let (_dir, db) = scratch_db();
        TargetRepository::new(db.clone())
            .insert(&Target::new("acme"))
            .unwrap();

        let facts = ParsedFacts {
            root_domain: Some("example.com".to_string()),
            ..Default::default()
        };
        let mut uow = UnitOfWork::begin(db.clone());
        stage_facts(&mut uow, "acme", None, None, &facts);
        uow.rollback();

        assert!(
            RootDomainRepository::new(db)
                .get("acme", "example.com")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_output_append_and_list() {
        let (_dir, db) = scratch_db();
        let outputs = OutputRepository::new(db);

        outputs.append("cmd-1", "first").unwrap();
        outputs.append("cmd-1", "second").unwrap();
        outputs.append("cmd-2", "other").unwrap();

        let lines = outputs.list("cmd-1").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].line, "first");
        assert_eq!(lines[1].line, "second");
    }
}
