//! SQLite database connection and schema management
//!
//! Manages the `~/.reconworker/reconworker.db` database with automatic
//! schema migration. WAL mode so the stop command and status queries can
//! run while a worker holds the connection.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::config::Config;

/// Database wrapper shared by the repositories
#[derive(Clone)]
pub struct Db {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Open or create the database at the default location
    /// (~/.reconworker/reconworker.db)
    pub fn open_default() -> Result<Self> {
        let db_path = Config::global_config_dir().join("reconworker.db");
        Self::open(&db_path)
    }

    /// Open or create the database at a specific path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data dir: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Get a reference to the connection
    pub fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("db lock poisoned")
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(SCHEMA_SQL)?;
        drop(conn);
        self.run_migrations()?;
        Ok(())
    }

    /// Run any pending migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn();

        let version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM rw_schema_version",
                [],
                |r| r.get(0),
            )
            .unwrap_or(0);

        // Future migrations go here
        // if version < 2 { ... }

        let _ = version;

        Ok(())
    }
}

/// SQL schema
///
/// Nested collections (trigger config, service/label lists, ledgers) live
/// in JSON columns. `command_outputs` intentionally carries no foreign key:
/// output rows are written through immediately while the owning command row
/// is still pending in the unit of work.
const SCHEMA_SQL: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS rw_schema_version (version INTEGER PRIMARY KEY);
INSERT OR IGNORE INTO rw_schema_version VALUES (1);

-- ============================================
-- AGENTS (job definitions)
-- ============================================
CREATE TABLE IF NOT EXISTS agents (
    name TEXT PRIMARY KEY,
    command TEXT NOT NULL,                  -- template with {target}/{rootdomain}/{subdomain}
    script TEXT,                            -- line-parser expression
    parser TEXT,                            -- backend tag, NULL = configured default
    scope TEXT NOT NULL,                    -- target, rootdomain, subdomain
    trigger_json TEXT,                      -- admission predicates
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000)
);

-- ============================================
-- HIERARCHY: TARGETS / ROOT DOMAINS / SUBDOMAINS
-- ============================================
CREATE TABLE IF NOT EXISTS targets (
    name TEXT PRIMARY KEY,
    has_bounty INTEGER NOT NULL DEFAULT 0,
    ran_before_json TEXT,                   -- JSON array of agent names
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000)
);

CREATE TABLE IF NOT EXISTS root_domains (
    target TEXT NOT NULL,
    name TEXT NOT NULL,
    has_bounty INTEGER NOT NULL DEFAULT 0,
    ran_before_json TEXT,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000),

    PRIMARY KEY (target, name),
    FOREIGN KEY (target) REFERENCES targets(name) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS subdomains (
    target TEXT NOT NULL,
    root_domain TEXT NOT NULL,
    name TEXT NOT NULL,
    has_bounty INTEGER NOT NULL DEFAULT 0,
    is_alive INTEGER NOT NULL DEFAULT 0,
    has_http_open INTEGER NOT NULL DEFAULT 0,
    is_main_portal INTEGER NOT NULL DEFAULT 0,
    ip TEXT,
    technology TEXT,
    labels_json TEXT,                       -- JSON array of strings
    services_json TEXT,                     -- JSON array of {name, port}
    ran_before_json TEXT,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000),

    PRIMARY KEY (target, root_domain, name)
);
CREATE INDEX IF NOT EXISTS idx_subdomains_root ON subdomains(target, root_domain);

-- ============================================
-- RUNNERS (one long-lived handle per channel)
-- ============================================
CREATE TABLE IF NOT EXISTS runners (
    channel TEXT PRIMARY KEY,
    agent TEXT NOT NULL,
    stage TEXT NOT NULL DEFAULT 'enqueued', -- enqueued, running, stopped, failed
    scope TEXT NOT NULL,                    -- current-target, all-targets, ...
    allow_skip INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000)
);
CREATE INDEX IF NOT EXISTS idx_runners_stage ON runners(stage);

-- ============================================
-- COMMANDS (one execution attempt per message)
-- ============================================
CREATE TABLE IF NOT EXISTS commands (
    id TEXT PRIMARY KEY,
    channel TEXT NOT NULL,
    status TEXT NOT NULL,                   -- running, success, failed, skipped, stopped
    command TEXT NOT NULL,
    number INTEGER NOT NULL,
    server_number INTEGER NOT NULL,
    error TEXT,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000)
);
CREATE INDEX IF NOT EXISTS idx_commands_channel ON commands(channel);

-- ============================================
-- COMMAND OUTPUT (append-only raw lines)
-- ============================================
CREATE TABLE IF NOT EXISTS command_outputs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    command_id TEXT NOT NULL,
    line TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000)
);
CREATE INDEX IF NOT EXISTS idx_outputs_command ON command_outputs(command_id);
"#;
