//! Execution loop: drive an external command to completion, streaming its
//! output through the line parser and persisting raw lines and facts.
//!
//! Cancellation is cooperative and polled every iteration, before the
//! blocking read: first the caller's in-process stop flag, then the run's
//! persisted stage, which an external actor may have flipped to stopped or
//! failed mid-stream. The loop owns terminating the process on either
//! trigger.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tracing::{debug, info};

use crate::domain::CommandStatus;
use crate::parser::LineParser;
use crate::process::CommandStream;
use crate::store::{OutputRepository, RunnerRepository, UnitOfWork, stage_facts};

/// Everything one attempt's loop needs around the process itself
pub struct ExecContext<'a> {
    pub runners: &'a RunnerRepository,
    pub outputs: &'a OutputRepository,
    pub uow: &'a mut UnitOfWork,
    pub channel: &'a str,
    pub command_id: &'a str,
    pub rendered: &'a str,
    pub target: &'a str,
    pub root_domain: Option<&'a str>,
    pub subdomain: Option<&'a str>,
    /// Caller-initiated stop (e.g. worker shutdown)
    pub cancel: &'a AtomicBool,
}

/// Run the command to completion and return its terminal status.
///
/// Raw lines are written through immediately; parsed facts are staged into
/// the attempt's unit of work. Parser errors propagate to the orchestrator,
/// which fails the whole attempt.
pub async fn execute(
    process: &mut dyn CommandStream,
    parser: &dyn LineParser,
    ctx: &mut ExecContext<'_>,
) -> Result<CommandStatus> {
    // Synthetic first line announcing what is about to run
    ctx.outputs
        .append(ctx.command_id, &format!("$ {}", ctx.rendered))?;

    let mut seq = 0usize;

    while !process.finished() {
        if ctx.cancel.load(Ordering::SeqCst) {
            info!("channel {}: cancelled by caller, stopping process", ctx.channel);
            process.exit();
            return Ok(CommandStatus::Stopped);
        }

        if let Some(stage) = ctx.runners.stage(ctx.channel)? {
            if stage.is_halted() {
                info!("channel {}: stage is {}, stopping process", ctx.channel, stage);
                process.exit();
                return Ok(CommandStatus::Stopped);
            }
        }

        let line = process.read_line().await?;
        if line.trim().is_empty() {
            continue;
        }

        ctx.outputs.append(ctx.command_id, &line)?;

        seq += 1;
        let facts = parser.parse(&line, seq)?;
        if !facts.is_empty() {
            debug!("channel {}: line {} produced {:?}", ctx.channel, seq, facts);
            stage_facts(ctx.uow, ctx.target, ctx.root_domain, ctx.subdomain, &facts);
        }
    }

    process.exit();
    Ok(CommandStatus::Success)
}
