//! Command attempt and output types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of one execution attempt. Created as `Running`; transitions to
/// exactly one terminal state and is never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Running,
    Success,
    Failed,
    Skipped,
    Stopped,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Running => "running",
            CommandStatus::Success => "success",
            CommandStatus::Failed => "failed",
            CommandStatus::Skipped => "skipped",
            CommandStatus::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(CommandStatus::Running),
            "success" => Some(CommandStatus::Success),
            "failed" => Some(CommandStatus::Failed),
            "skipped" => Some(CommandStatus::Skipped),
            "stopped" => Some(CommandStatus::Stopped),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One execution attempt of a job run. Exactly one is created per
/// successfully processed queue message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCommand {
    pub id: String,
    /// Channel of the owning run
    pub channel: String,
    pub status: CommandStatus,
    /// The rendered command string that was (or would have been) executed
    pub command: String,
    /// Sequencing pair used for external bookkeeping
    pub number: i64,
    pub server_number: i64,
    /// Captured error message when the attempt failed
    pub error: Option<String>,
    pub created_at: i64,
}

impl JobCommand {
    pub fn new(channel: impl Into<String>, command: impl Into<String>, number: i64, server_number: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel: channel.into(),
            status: CommandStatus::Running,
            command: command.into(),
            number,
            server_number,
            error: None,
            created_at: super::now_millis(),
        }
    }
}

/// One raw output line attached to a command attempt; append-only and
/// immutable once written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub id: i64,
    pub command_id: String,
    pub line: String,
    pub created_at: i64,
}
