//! Agent (job definition) and trigger types

use serde::{Deserialize, Serialize};

/// The hierarchy level an agent's command addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentScope {
    /// The command runs against a target (e.g. ASN lookups)
    #[default]
    Target,
    /// The command runs against a root domain (e.g. subdomain enumeration)
    RootDomain,
    /// The command runs against a single subdomain (e.g. port scans)
    Subdomain,
}

impl AgentScope {
    /// Parse a scope from a string (supports short aliases)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "t" | "target" => Some(AgentScope::Target),
            "r" | "root" | "rootdomain" => Some(AgentScope::RootDomain),
            "s" | "sub" | "subdomain" => Some(AgentScope::Subdomain),
            _ => None,
        }
    }

    /// Get the canonical string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentScope::Target => "target",
            AgentScope::RootDomain => "rootdomain",
            AgentScope::Subdomain => "subdomain",
        }
    }
}

impl std::fmt::Display for AgentScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a trigger pattern admits or rejects matching values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Only run when the pattern matches
    Include,
    /// Skip when the pattern matches
    Exclude,
}

/// One (mode, pattern) admission predicate applied to a single attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matcher {
    pub mode: MatchMode,
    /// Regular expression; an empty pattern disables the predicate
    pub pattern: String,
}

impl Matcher {
    pub fn include(pattern: impl Into<String>) -> Self {
        Self {
            mode: MatchMode::Include,
            pattern: pattern.into(),
        }
    }

    pub fn exclude(pattern: impl Into<String>) -> Self {
        Self {
            mode: MatchMode::Exclude,
            pattern: pattern.into(),
        }
    }

    /// A matcher with an empty pattern is treated as not configured
    pub fn is_configured(&self) -> bool {
        !self.pattern.trim().is_empty()
    }
}

/// Admission-control predicates for one agent.
///
/// All predicates are optional and additive: unset flags and empty patterns
/// leave their rule block out of the evaluation entirely. Owned one-to-one
/// by an [`Agent`] and stored alongside it as a JSON column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Trigger {
    /// Skip when the addressed entity's ledger already names this agent
    pub skip_if_ran_before: bool,

    // Target-level predicates
    pub target_has_bounty: bool,
    pub target_name: Option<Matcher>,

    // Root-domain-level predicates
    pub rootdomain_has_bounty: bool,
    pub rootdomain_name: Option<Matcher>,

    // Subdomain-level predicates
    pub subdomain_has_bounty: bool,
    pub subdomain_is_alive: bool,
    pub subdomain_has_http_open: bool,
    pub subdomain_is_main_portal: bool,
    pub subdomain_name: Option<Matcher>,
    pub subdomain_ip: Option<Matcher>,
    pub subdomain_technology: Option<Matcher>,
    /// Collection predicate over the subdomain's services (name or port)
    pub subdomain_service: Option<Matcher>,
    /// Collection predicate over the subdomain's labels
    pub subdomain_label: Option<Matcher>,
}

/// A registered job definition: what command to run, how to parse its
/// output, and when to skip it. Read-only while a run is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Unique name, referenced by channels and ledgers
    pub name: String,
    /// Command template with `{target}`, `{rootdomain}` and `{subdomain}`
    /// placeholders
    pub command: String,
    /// Line-parser expression, interpreted by the selected backend
    pub script: Option<String>,
    /// Parser backend tag; falls back to the configured default when unset
    pub parser: Option<String>,
    /// Hierarchy level the command addresses
    pub scope: AgentScope,
    #[serde(default)]
    pub trigger: Trigger,
    pub created_at: i64,
}

impl Agent {
    pub fn new(name: impl Into<String>, command: impl Into<String>, scope: AgentScope) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            script: None,
            parser: None,
            scope,
            trigger: Trigger::default(),
            created_at: super::now_millis(),
        }
    }

    /// Render the command template against resolved entity names.
    /// Placeholders for unresolved levels render as empty strings.
    pub fn render_command(
        &self,
        target: &str,
        root_domain: Option<&str>,
        subdomain: Option<&str>,
    ) -> String {
        self.command
            .replace("{target}", target)
            .replace("{rootdomain}", root_domain.unwrap_or(""))
            .replace("{subdomain}", subdomain.unwrap_or(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_parse_aliases() {
        assert_eq!(AgentScope::parse("t"), Some(AgentScope::Target));
        assert_eq!(AgentScope::parse("RootDomain"), Some(AgentScope::RootDomain));
        assert_eq!(AgentScope::parse("sub"), Some(AgentScope::Subdomain));
        assert_eq!(AgentScope::parse("nope"), None);
    }

    #[test]
    fn test_render_command_fills_placeholders() {
        let agent = Agent::new("ASN", "asn-lookup {target}", AgentScope::Target);
        assert_eq!(agent.render_command("acme", None, None), "asn-lookup acme");
    }

    #[test]
    fn test_render_command_missing_levels_render_empty() {
        let agent = Agent::new(
            "resolver",
            "resolve {subdomain} --root {rootdomain}",
            AgentScope::Subdomain,
        );
        assert_eq!(agent.render_command("acme", None, None), "resolve  --root ");
    }

    #[test]
    fn test_matcher_empty_pattern_is_unconfigured() {
        assert!(!Matcher::include("").is_configured());
        assert!(!Matcher::exclude("   ").is_configured());
        assert!(Matcher::include(".*").is_configured());
    }

    #[test]
    fn test_trigger_json_round_trip_defaults() {
        let trigger: Trigger = serde_json::from_str("{}").unwrap();
        assert!(!trigger.skip_if_ran_before);
        assert!(trigger.target_name.is_none());
    }
}
