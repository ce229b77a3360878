//! Job run (runner) lifecycle types

use serde::{Deserialize, Serialize};

use super::AgentScope;

/// Lifecycle stage of a job run.
///
/// Advances `Enqueued -> Running` exactly once when the first message for
/// the channel is processed. `Stopped` and `Failed` are written out-of-band
/// by an external actor (e.g. a user stopping the run); the worker only
/// observes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Enqueued,
    Running,
    Stopped,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Enqueued => "enqueued",
            Stage::Running => "running",
            Stage::Stopped => "stopped",
            Stage::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "enqueued" => Some(Stage::Enqueued),
            "running" => Some(Stage::Running),
            "stopped" => Some(Stage::Stopped),
            "failed" => Some(Stage::Failed),
            _ => None,
        }
    }

    /// An external stop/fail signal the execution loop must honour
    pub fn is_halted(&self) -> bool {
        matches!(self, Stage::Stopped | Stage::Failed)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which hierarchy level a run addresses, and whether it fans out over
/// every entity of that level (`all` channels) or a single one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunScope {
    CurrentTarget,
    AllTargets,
    CurrentRootDomain,
    AllRootDomains,
    CurrentSubdomain,
    AllSubdomains,
}

impl RunScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunScope::CurrentTarget => "current-target",
            RunScope::AllTargets => "all-targets",
            RunScope::CurrentRootDomain => "current-rootdomain",
            RunScope::AllRootDomains => "all-rootdomains",
            RunScope::CurrentSubdomain => "current-subdomain",
            RunScope::AllSubdomains => "all-subdomains",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "current-target" => Some(RunScope::CurrentTarget),
            "all-targets" => Some(RunScope::AllTargets),
            "current-rootdomain" => Some(RunScope::CurrentRootDomain),
            "all-rootdomains" => Some(RunScope::AllRootDomains),
            "current-subdomain" => Some(RunScope::CurrentSubdomain),
            "all-subdomains" => Some(RunScope::AllSubdomains),
            _ => None,
        }
    }

    /// The hierarchy level this scope addresses; only the entity at this
    /// level is consulted by the admission rules
    pub fn level(&self) -> AgentScope {
        match self {
            RunScope::CurrentTarget | RunScope::AllTargets => AgentScope::Target,
            RunScope::CurrentRootDomain | RunScope::AllRootDomains => AgentScope::RootDomain,
            RunScope::CurrentSubdomain | RunScope::AllSubdomains => AgentScope::Subdomain,
        }
    }

    /// Derive the run scope from the agent's declared level and whether the
    /// channel fans out with an `all` segment at that level
    pub fn derive(level: AgentScope, fan_out: bool) -> Self {
        match (level, fan_out) {
            (AgentScope::Target, false) => RunScope::CurrentTarget,
            (AgentScope::Target, true) => RunScope::AllTargets,
            (AgentScope::RootDomain, false) => RunScope::CurrentRootDomain,
            (AgentScope::RootDomain, true) => RunScope::AllRootDomains,
            (AgentScope::Subdomain, false) => RunScope::CurrentSubdomain,
            (AgentScope::Subdomain, true) => RunScope::AllSubdomains,
        }
    }
}

impl std::fmt::Display for RunScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One long-lived run handle per channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    /// Unique key; see the channel decoder for the format
    pub channel: String,
    /// Name of the agent this run executes
    pub agent: String,
    pub stage: Stage,
    pub scope: RunScope,
    /// When false, admission control is bypassed and the command always runs
    pub allow_skip: bool,
    pub created_at: i64,
}

impl JobRun {
    pub fn new(channel: impl Into<String>, agent: impl Into<String>, scope: RunScope) -> Self {
        Self {
            channel: channel.into(),
            agent: agent.into(),
            stage: Stage::Enqueued,
            scope,
            allow_skip: true,
            created_at: super::now_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_round_trip() {
        for stage in [Stage::Enqueued, Stage::Running, Stage::Stopped, Stage::Failed] {
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(Stage::parse("paused"), None);
    }

    #[test]
    fn test_halted_stages() {
        assert!(Stage::Stopped.is_halted());
        assert!(Stage::Failed.is_halted());
        assert!(!Stage::Running.is_halted());
        assert!(!Stage::Enqueued.is_halted());
    }

    #[test]
    fn test_scope_level() {
        assert_eq!(RunScope::AllTargets.level(), AgentScope::Target);
        assert_eq!(RunScope::CurrentRootDomain.level(), AgentScope::RootDomain);
        assert_eq!(RunScope::AllSubdomains.level(), AgentScope::Subdomain);
    }

    #[test]
    fn test_scope_derive() {
        assert_eq!(
            RunScope::derive(AgentScope::Subdomain, true),
            RunScope::AllSubdomains
        );
        assert_eq!(
            RunScope::derive(AgentScope::Target, false),
            RunScope::CurrentTarget
        );
    }
}
