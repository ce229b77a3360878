//! Admission control: decide whether a job is redundant or out of scope
//! before spending resources on it.
//!
//! [`should_skip`] is a pure function over the run, the agent's trigger
//! configuration and the resolved hierarchy entities. Only the entity at
//! the level the run addresses is consulted. Rule blocks are evaluated in
//! fixed order and each block is gated on being configured at all.
//!
//! One asymmetry is deliberate and load-bearing: a configured scalar block
//! (name/ip/technology) always terminates the evaluation, while a
//! collection EXCLUDE block (services/labels) that matches nothing falls
//! through to the next configured block. Downstream trigger configurations
//! rely on that fall-through; do not "fix" it.

use regex::Regex;
use tracing::debug;

use crate::domain::{
    Agent, AgentScope, JobRun, MatchMode, Matcher, RootDomain, Subdomain, Target,
};

/// Decide whether this run's command should be skipped.
///
/// Deterministic, side-effect free, safe to call speculatively.
pub fn should_skip(
    run: &JobRun,
    agent: &Agent,
    target: Option<&Target>,
    root_domain: Option<&RootDomain>,
    subdomain: Option<&Subdomain>,
) -> bool {
    let trigger = &agent.trigger;

    match run.scope.level() {
        AgentScope::Target => {
            let Some(target) = target else { return false };
            if trigger.skip_if_ran_before && target.ran_before(&agent.name) {
                return true;
            }
            skip_for_target(agent, target)
        }
        AgentScope::RootDomain => {
            let Some(root) = root_domain else { return false };
            if trigger.skip_if_ran_before && root.ran_before(&agent.name) {
                return true;
            }
            skip_for_root_domain(agent, root)
        }
        AgentScope::Subdomain => {
            let Some(sub) = subdomain else { return false };
            if trigger.skip_if_ran_before && sub.ran_before(&agent.name) {
                return true;
            }
            skip_for_subdomain(agent, sub)
        }
    }
}

fn skip_for_target(agent: &Agent, target: &Target) -> bool {
    let trigger = &agent.trigger;

    if trigger.target_has_bounty && !target.has_bounty {
        return true;
    }
    if let Some(verdict) = eval_scalar(&trigger.target_name, &target.name) {
        return verdict;
    }

    false
}

fn skip_for_root_domain(agent: &Agent, root: &RootDomain) -> bool {
    let trigger = &agent.trigger;

    if trigger.rootdomain_has_bounty && !root.has_bounty {
        return true;
    }
    if let Some(verdict) = eval_scalar(&trigger.rootdomain_name, &root.name) {
        return verdict;
    }

    false
}

fn skip_for_subdomain(agent: &Agent, sub: &Subdomain) -> bool {
    let trigger = &agent.trigger;

    // Boolean requirements: a missing attribute fails the requirement
    if trigger.subdomain_has_bounty && !sub.has_bounty {
        return true;
    }
    if trigger.subdomain_is_alive && !sub.is_alive {
        return true;
    }
    if trigger.subdomain_has_http_open && !sub.has_http_open {
        return true;
    }
    if trigger.subdomain_is_main_portal && !sub.is_main_portal {
        return true;
    }

    // Scalar blocks terminate the evaluation once configured
    if let Some(verdict) = eval_scalar(&trigger.subdomain_name, &sub.name) {
        return verdict;
    }
    if let Some(verdict) = eval_scalar(&trigger.subdomain_ip, sub.ip.as_deref().unwrap_or("")) {
        return verdict;
    }
    if let Some(verdict) = eval_scalar(
        &trigger.subdomain_technology,
        sub.technology.as_deref().unwrap_or(""),
    ) {
        return verdict;
    }

    // Collection blocks: a service matches on its name or its port rendered
    // as a string
    if let Some(verdict) = eval_collection(
        &trigger.subdomain_service,
        sub.services
            .iter()
            .flat_map(|s| [s.name.clone(), s.port.to_string()]),
    ) {
        return verdict;
    }
    if let Some(verdict) = eval_collection(&trigger.subdomain_label, sub.labels.iter().cloned()) {
        return verdict;
    }

    false
}

/// Compile a configured matcher's pattern. An unconfigured matcher, or one
/// with an unparseable pattern, disables its block.
fn compiled(matcher: &Option<Matcher>) -> Option<(MatchMode, Regex)> {
    let matcher = matcher.as_ref().filter(|m| m.is_configured())?;
    match Regex::new(&matcher.pattern) {
        Ok(re) => Some((matcher.mode, re)),
        Err(e) => {
            debug!("ignoring unparseable trigger pattern `{}`: {}", matcher.pattern, e);
            None
        }
    }
}

/// Scalar include/exclude block. `Some(verdict)` terminates the evaluation;
/// `None` means the block is not configured.
fn eval_scalar(matcher: &Option<Matcher>, value: &str) -> Option<bool> {
    let (mode, re) = compiled(matcher)?;
    let matched = re.is_match(value);
    match mode {
        MatchMode::Include => Some(!matched),
        MatchMode::Exclude => Some(matched),
    }
}

/// Collection include/exclude block. INCLUDE returns a verdict either way;
/// EXCLUDE only returns on a match and otherwise falls through (`None`).
fn eval_collection(
    matcher: &Option<Matcher>,
    values: impl Iterator<Item = String>,
) -> Option<bool> {
    let (mode, re) = compiled(matcher)?;
    let matched = values.into_iter().any(|v| re.is_match(&v));
    match mode {
        MatchMode::Include => Some(!matched),
        MatchMode::Exclude => {
            if matched {
                Some(true)
            } else {
                None
            }
        }
    }
}
