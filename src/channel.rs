//! Channel decoder
//!
//! A channel is a compact, underscore-separated identifier locating one job
//! in the hierarchy:
//!
//! ```text
//! <runId>_<agentName>_<targetSeg>[_<rootdomainSeg>[_<subdomainSeg>]]
//! ```
//!
//! A segment equal to the literal `all` stands for "every entity at this
//! level"; the message payload carries the concrete name for the entity the
//! current message addresses. Absent trailing segments leave that level
//! unresolved. The agent and the target must resolve; deeper levels
//! propagate as absent when their segment is missing or unknown.

use thiserror::Error;

use crate::db::Db;
use crate::domain::{Agent, RootDomain, Subdomain, Target};
use crate::store::{AgentRepository, RootDomainRepository, SubdomainRepository, TargetRepository};

/// Segment token that substitutes the message payload
pub const ALL_TOKEN: &str = "all";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("channel `{0}` has too few segments")]
    TooFewSegments(String),
    #[error("unknown agent `{0}`")]
    UnknownAgent(String),
    #[error("unknown target `{0}`")]
    UnknownTarget(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// The raw segments of a channel, before any lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelParts {
    pub run_id: String,
    pub agent: String,
    pub target: String,
    pub root_domain: Option<String>,
    pub subdomain: Option<String>,
}

impl ChannelParts {
    /// Split a channel into its segments, substituting `all` segments with
    /// the payload. Pure; no lookups.
    pub fn parse(channel: &str, payload: &str) -> Result<Self, DecodeError> {
        let segments: Vec<&str> = channel.split('_').collect();
        if segments.len() < 3 || segments.len() > 5 {
            return Err(DecodeError::TooFewSegments(channel.to_string()));
        }

        let resolve = |seg: &str| {
            if seg == ALL_TOKEN {
                payload.to_string()
            } else {
                seg.to_string()
            }
        };

        Ok(Self {
            run_id: segments[0].to_string(),
            agent: segments[1].to_string(),
            target: resolve(segments[2]),
            root_domain: segments.get(3).map(|s| resolve(s)),
            subdomain: segments.get(4).map(|s| resolve(s)),
        })
    }

    /// Whether any entity segment fans out over a whole level
    pub fn has_all_segment(channel: &str) -> bool {
        channel.split('_').skip(2).any(|s| s == ALL_TOKEN)
    }
}

/// A channel resolved against the hierarchy store
#[derive(Debug, Clone)]
pub struct DecodedChannel {
    pub run_id: String,
    pub agent: Agent,
    pub target: Target,
    pub root_domain: Option<RootDomain>,
    pub subdomain: Option<Subdomain>,
}

/// Decode a channel and resolve its entities by exact name.
///
/// Unknown agent or target aborts the job. A root domain or subdomain
/// segment naming an unknown entity resolves to absent, same as a missing
/// segment.
pub fn decode(db: &Db, channel: &str, payload: &str) -> Result<DecodedChannel, DecodeError> {
    let parts = ChannelParts::parse(channel, payload)?;

    let agent = AgentRepository::new(db.clone())
        .get(&parts.agent)?
        .ok_or_else(|| DecodeError::UnknownAgent(parts.agent.clone()))?;

    let target = TargetRepository::new(db.clone())
        .get(&parts.target)?
        .ok_or_else(|| DecodeError::UnknownTarget(parts.target.clone()))?;

    let root_domain = match &parts.root_domain {
        Some(name) => RootDomainRepository::new(db.clone()).get(&target.name, name)?,
        None => None,
    };

    let subdomain = match (&root_domain, &parts.subdomain) {
        (Some(root), Some(name)) => {
            SubdomainRepository::new(db.clone()).get(&target.name, &root.name, name)?
        }
        _ => None,
    };

    Ok(DecodedChannel {
        run_id: parts.run_id,
        agent,
        target,
        root_domain,
        subdomain,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AgentScope;
    use tempfile::tempdir;

    #[test]
    fn test_parse_minimal_channel() {
        let parts = ChannelParts::parse("20260830.1_ASN_acme", "").unwrap();
        assert_eq!(parts.run_id, "20260830.1");
        assert_eq!(parts.agent, "ASN");
        assert_eq!(parts.target, "acme");
        assert_eq!(parts.root_domain, None);
        assert_eq!(parts.subdomain, None);
    }

    #[test]
    fn test_parse_full_channel() {
        let parts = ChannelParts::parse("1_nmap_acme_example.com_www.example.com", "").unwrap();
        assert_eq!(parts.root_domain.as_deref(), Some("example.com"));
        assert_eq!(parts.subdomain.as_deref(), Some("www.example.com"));
    }

    #[test]
    fn test_all_segment_takes_payload() {
        let parts = ChannelParts::parse("1_sub-enum_acme_all", "example.com").unwrap();
        assert_eq!(parts.root_domain.as_deref(), Some("example.com"));

        let parts = ChannelParts::parse("1_nmap_acme_example.com_all", "www.example.com").unwrap();
        assert_eq!(parts.subdomain.as_deref(), Some("www.example.com"));
    }

    #[test]
    fn test_too_few_segments_rejected() {
        assert!(matches!(
            ChannelParts::parse("1_ASN", ""),
            Err(DecodeError::TooFewSegments(_))
        ));
        assert!(matches!(
            ChannelParts::parse("justonesegment", ""),
            Err(DecodeError::TooFewSegments(_))
        ));
    }

    #[test]
    fn test_has_all_segment() {
        assert!(ChannelParts::has_all_segment("1_sub-enum_acme_all"));
        assert!(!ChannelParts::has_all_segment("1_sub-enum_acme_example.com"));
        // `all` in the agent position is a name, not a fan-out token
        assert!(!ChannelParts::has_all_segment("1_all_acme"));
    }

    fn seeded_db(dir: &tempfile::TempDir) -> Db {
        let db = Db::open(&dir.path().join("channel.db")).unwrap();
        AgentRepository::new(db.clone())
            .upsert(&Agent::new("ASN", "asn-lookup {target}", AgentScope::Target))
            .unwrap();
        TargetRepository::new(db.clone())
            .insert(&Target::new("acme"))
            .unwrap();
        RootDomainRepository::new(db.clone())
            .insert(&RootDomain::new("acme", "example.com"))
            .unwrap();
        db
    }

    #[test]
    fn test_decode_resolves_entities() {
        let dir = tempdir().unwrap();
        let db = seeded_db(&dir);

        let decoded = decode(&db, "1_ASN_acme_example.com", "").unwrap();
        assert_eq!(decoded.agent.name, "ASN");
        assert_eq!(decoded.target.name, "acme");
        assert_eq!(decoded.root_domain.unwrap().name, "example.com");
        assert!(decoded.subdomain.is_none());
    }

    #[test]
    fn test_decode_minimal_channel_leaves_deeper_levels_absent() {
        let dir = tempdir().unwrap();
        let db = seeded_db(&dir);

        let decoded = decode(&db, "1_ASN_acme", "").unwrap();
        assert!(decoded.root_domain.is_none());
        assert!(decoded.subdomain.is_none());
    }

    #[test]
    fn test_decode_unknown_agent_and_target_abort() {
        let dir = tempdir().unwrap();
        let db = seeded_db(&dir);

        assert!(matches!(
            decode(&db, "1_ghost_acme", ""),
            Err(DecodeError::UnknownAgent(_))
        ));
        assert!(matches!(
            decode(&db, "1_ASN_ghost", ""),
            Err(DecodeError::UnknownTarget(_))
        ));
    }

    #[test]
    fn test_decode_unknown_root_domain_resolves_absent() {
        let dir = tempdir().unwrap();
        let db = seeded_db(&dir);

        let decoded = decode(&db, "1_ASN_acme_unknown.org_www.unknown.org", "").unwrap();
        assert!(decoded.root_domain.is_none());
        assert!(decoded.subdomain.is_none());
    }
}
