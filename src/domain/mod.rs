//! Domain model types for the worker

pub mod agent;
pub mod command;
pub mod entity;
pub mod message;
pub mod runner;

pub use agent::{Agent, AgentScope, MatchMode, Matcher, Trigger};
pub use command::{CommandOutput, CommandStatus, JobCommand};
pub use entity::{RootDomain, Service, Subdomain, Target};
pub use message::JobMessage;
pub use runner::{JobRun, RunScope, Stage};

/// Current time as unix milliseconds (storage timestamp convention)
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
