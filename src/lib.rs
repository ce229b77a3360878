//! reconworker - reconnaissance job worker
//!
//! Consumes job messages ("run this command for this point in a
//! target/domain/subdomain hierarchy"), decides via configurable admission
//! rules whether the work is redundant or out of scope, runs the external
//! command, streams its output through a pluggable per-agent parser, and
//! persists raw output and extracted facts within one transactional
//! envelope per attempt.

pub mod admission;
pub mod channel;
pub mod config;
pub mod db;
pub mod domain;
pub mod exec;
pub mod parser;
pub mod process;
pub mod store;
pub mod worker;

pub use domain::*;
