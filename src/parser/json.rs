//! JSON parser backend
//!
//! For tools with `--json`-style line output: every line must be a JSON
//! object, and the `rootdomain`/`subdomain`/`ip`/`service`/`port` keys are
//! read when present. This backend is strict by design: a line that is not
//! valid JSON is a parse failure and aborts the attempt, which is the
//! wanted behaviour when a tool's structured output contract breaks
//! mid-stream.

use anyhow::{Context, Result};
use serde_json::Value;

use super::{LineParser, ParsedFacts};

#[derive(Default)]
pub struct JsonParser;

impl JsonParser {
    pub fn new() -> Self {
        Self
    }
}

impl LineParser for JsonParser {
    fn parse(&self, line: &str, seq: usize) -> Result<ParsedFacts> {
        let value: Value = serde_json::from_str(line)
            .with_context(|| format!("line {} is not valid JSON: {}", seq, line))?;

        let field = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let port = value
            .get("port")
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok());

        Ok(ParsedFacts {
            root_domain: field("rootdomain"),
            subdomain: field("subdomain"),
            ip: field("ip"),
            service: field("service"),
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_keys_extracted() {
        let parser = JsonParser::new();
        let facts = parser
            .parse(r#"{"subdomain":"www.example.com","ip":"10.0.0.1","port":443}"#, 1)
            .unwrap();
        assert_eq!(facts.subdomain.as_deref(), Some("www.example.com"));
        assert_eq!(facts.ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(facts.port, Some(443));
        assert!(facts.root_domain.is_none());
    }

    #[test]
    fn test_object_without_known_keys_is_empty() {
        let parser = JsonParser::new();
        let facts = parser.parse(r#"{"banner":"nginx"}"#, 1).unwrap();
        assert!(facts.is_empty());
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let parser = JsonParser::new();
        let err = parser.parse("plain text output", 3).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_port_out_of_range_is_dropped() {
        let parser = JsonParser::new();
        let facts = parser.parse(r#"{"service":"http","port":70000}"#, 1).unwrap();
        assert_eq!(facts.service.as_deref(), Some("http"));
        assert_eq!(facts.port, None);
    }
}
