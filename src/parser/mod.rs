//! Pluggable per-agent line parsers
//!
//! Each agent carries a parser expression (`script`) interpreted by one of
//! the swappable backends here. The worker core only sees the
//! [`LineParser`] trait; picking an evaluator technology is a configuration
//! concern.

mod json;
mod pattern;

pub use json::JsonParser;
pub use pattern::PatternParser;

use anyhow::{Result, bail};

use crate::config::Config;
use crate::domain::Agent;

/// Structured facts extracted from one output line. Any subset may be
/// populated; all-absent means "nothing of interest on this line".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFacts {
    pub root_domain: Option<String>,
    pub subdomain: Option<String>,
    pub ip: Option<String>,
    pub service: Option<String>,
    pub port: Option<u16>,
}

impl ParsedFacts {
    pub fn is_empty(&self) -> bool {
        self.root_domain.is_none()
            && self.subdomain.is_none()
            && self.ip.is_none()
            && self.service.is_none()
            && self.port.is_none()
    }
}

/// One parser invocation per non-empty output line
pub trait LineParser: Send + Sync {
    /// Parse a raw line. `seq` is the 1-based count of non-empty lines seen
    /// so far in this run. Errors abort the whole attempt.
    fn parse(&self, line: &str, seq: usize) -> Result<ParsedFacts>;
}

/// Build the parser for an agent, honouring its backend tag and falling
/// back to the configured default. A malformed expression surfaces here,
/// before any line is read.
pub fn build(agent: &Agent, config: &Config) -> Result<Box<dyn LineParser>> {
    let backend = agent
        .parser
        .as_deref()
        .unwrap_or(config.parser_backend.as_str());
    let script = agent.script.as_deref().unwrap_or("");

    match backend {
        "regex" => Ok(Box::new(PatternParser::new(script)?)),
        "json" => Ok(Box::new(JsonParser::new())),
        other => bail!("unknown parser backend `{}` for agent `{}`", other, agent.name),
    }
}
