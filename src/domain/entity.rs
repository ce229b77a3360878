//! Hierarchy entities: targets, root domains and subdomains
//!
//! These are shared mutable state: several runners (for different agents)
//! may read and write the same entity. Every entity carries a ledger of
//! agent names that already ran against it, used for deduplication.

use serde::{Deserialize, Serialize};

/// A reconnaissance target (program / organisation)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub has_bounty: bool,
    /// Agents that previously executed against this target
    #[serde(default)]
    pub ran_before: Vec<String>,
    pub created_at: i64,
}

impl Target {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            has_bounty: false,
            ran_before: Vec::new(),
            created_at: super::now_millis(),
        }
    }

    pub fn ran_before(&self, agent: &str) -> bool {
        self.ran_before.iter().any(|a| a == agent)
    }
}

/// A root domain under a target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootDomain {
    pub target: String,
    pub name: String,
    pub has_bounty: bool,
    #[serde(default)]
    pub ran_before: Vec<String>,
    pub created_at: i64,
}

impl RootDomain {
    pub fn new(target: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            name: name.into(),
            has_bounty: false,
            ran_before: Vec::new(),
            created_at: super::now_millis(),
        }
    }

    pub fn ran_before(&self, agent: &str) -> bool {
        self.ran_before.iter().any(|a| a == agent)
    }
}

/// A service discovered on a subdomain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub port: u16,
}

/// A subdomain under a root domain, with the attributes the admission
/// rules consult
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subdomain {
    pub target: String,
    pub root_domain: String,
    pub name: String,
    pub has_bounty: bool,
    pub is_alive: bool,
    pub has_http_open: bool,
    pub is_main_portal: bool,
    pub ip: Option<String>,
    pub technology: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub ran_before: Vec<String>,
    pub created_at: i64,
}

impl Subdomain {
    pub fn new(
        target: impl Into<String>,
        root_domain: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            root_domain: root_domain.into(),
            name: name.into(),
            has_bounty: false,
            is_alive: false,
            has_http_open: false,
            is_main_portal: false,
            ip: None,
            technology: None,
            labels: Vec::new(),
            services: Vec::new(),
            ran_before: Vec::new(),
            created_at: super::now_millis(),
        }
    }

    pub fn ran_before(&self, agent: &str) -> bool {
        self.ran_before.iter().any(|a| a == agent)
    }
}
