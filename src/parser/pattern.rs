//! Regex parser backend
//!
//! The agent script is a regular expression with named capture groups. A
//! line that matches contributes whichever of the `rootdomain`,
//! `subdomain`, `ip`, `service` and `port` groups captured; a line that
//! does not match yields empty facts. An empty script captures the whole
//! line as a root domain candidate, which covers the common
//! one-domain-per-line tool output.

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use super::{LineParser, ParsedFacts};

pub struct PatternParser {
    pattern: Regex,
}

/// Default for agents without a script: the whole trimmed line is a root
/// domain candidate
const WHOLE_LINE: &str = r"^(?P<rootdomain>\S+)$";

impl PatternParser {
    pub fn new(script: &str) -> Result<Self> {
        let script = if script.trim().is_empty() {
            WHOLE_LINE
        } else {
            script
        };
        let pattern = Regex::new(script)
            .with_context(|| format!("invalid parser expression: {}", script))?;
        Ok(Self { pattern })
    }
}

impl LineParser for PatternParser {
    fn parse(&self, line: &str, seq: usize) -> Result<ParsedFacts> {
        let Some(caps) = self.pattern.captures(line.trim()) else {
            return Ok(ParsedFacts::default());
        };

        let group = |name: &str| caps.name(name).map(|m| m.as_str().to_string());

        let port = match caps.name("port") {
            Some(m) => match m.as_str().parse::<u16>() {
                Ok(p) => Some(p),
                Err(_) => {
                    debug!("line {}: port capture `{}` out of range", seq, m.as_str());
                    None
                }
            },
            None => None,
        };

        Ok(ParsedFacts {
            root_domain: group("rootdomain"),
            subdomain: group("subdomain"),
            ip: group("ip"),
            service: group("service"),
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_script_captures_whole_line() {
        let parser = PatternParser::new("").unwrap();
        let facts = parser.parse("example.com", 1).unwrap();
        assert_eq!(facts.root_domain.as_deref(), Some("example.com"));
        assert!(facts.subdomain.is_none());
    }

    #[test]
    fn test_named_groups_map_to_facts() {
        let parser =
            PatternParser::new(r"^(?P<subdomain>\S+) (?P<ip>[\d.]+) (?P<service>\w+)/(?P<port>\d+)$")
                .unwrap();
        let facts = parser.parse("www.example.com 10.0.0.1 http/80", 1).unwrap();
        assert_eq!(facts.subdomain.as_deref(), Some("www.example.com"));
        assert_eq!(facts.ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(facts.service.as_deref(), Some("http"));
        assert_eq!(facts.port, Some(80));
    }

    #[test]
    fn test_non_matching_line_yields_empty_facts() {
        let parser = PatternParser::new(r"^(?P<ip>[\d.]+)$").unwrap();
        let facts = parser.parse("not an ip", 1).unwrap();
        assert!(facts.is_empty());
    }

    #[test]
    fn test_port_out_of_range_is_dropped() {
        let parser = PatternParser::new(r"^(?P<service>\w+)/(?P<port>\d+)$").unwrap();
        let facts = parser.parse("http/99999", 1).unwrap();
        assert_eq!(facts.service.as_deref(), Some("http"));
        assert_eq!(facts.port, None);
    }

    #[test]
    fn test_invalid_expression_is_rejected() {
        assert!(PatternParser::new("(unclosed").is_err());
    }
}
