//! The run engine.
//!
//! Parses and flattens a test description, walks the steps in order, and
//! aggregates their results into a [`RunOutcome`]. Extensions observe the
//! run at every stage and get a final look at the outcome.

use crate::context::Context;
use crate::error::Result;
use crate::extensions::ExtensionSet;
use crate::steps::{parse_file, StepResult, StepState};
use std::path::Path;

/// Engine options for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Parse and flatten only; run nothing.
    pub check: bool,

    /// Keep running after a step fails instead of stopping at the first
    /// failure. Errors stop the run regardless.
    pub keep_going: bool,
}

/// The aggregate outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every step passed (or was skipped, or had its failure ignored).
    Success,

    /// At least one step failed its test condition.
    Failure(String),

    /// The run could not proceed: bad configuration, a step that could not
    /// execute, or a fatal extension failure.
    Error(String),
}

impl RunOutcome {
    /// Process exit code: 0 success, 1 test failure, 2 error.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::Failure(_) => 1,
            RunOutcome::Error(_) => 2,
        }
    }

    /// The outcome's detail message, when there is one.
    pub fn message(&self) -> Option<&str> {
        match self {
            RunOutcome::Success => None,
            RunOutcome::Failure(msg) | RunOutcome::Error(msg) => Some(msg),
        }
    }
}

/// Run a test description to completion.
///
/// Never fails: every error becomes a [`RunOutcome::Error`]. The debug
/// dump and the extensions' `finalize` hooks run whatever happened.
pub fn execute(
    ctxt: &mut Context,
    exts: &mut ExtensionSet,
    path: &Path,
    key: Option<&str>,
    options: &RunOptions,
) -> RunOutcome {
    let outcome = match run_inner(ctxt, exts, path, key, options) {
        Ok(outcome) => outcome,
        Err(e) => RunOutcome::Error(e.to_string()),
    };
    ctxt.dump();
    exts.finalize(ctxt, outcome)
}

fn run_inner(
    ctxt: &mut Context,
    exts: &mut ExtensionSet,
    path: &Path,
    key: Option<&str>,
    options: &RunOptions,
) -> Result<RunOutcome> {
    let mut steps = parse_file(ctxt, path, key)?;
    tracing::debug!(steps = steps.len(), source = %path.display(), "flattened");

    exts.read_steps(ctxt, &mut steps)?;

    if options.check {
        for (idx, step) in steps.iter().enumerate() {
            ctxt.emit(
                &format!("[Step {}]: {} ({})", idx + 1, step.name, step.address),
                1,
                false,
            );
        }
        return Ok(RunOutcome::Success);
    }

    let mut failed: Vec<String> = Vec::new();
    for (idx, step) in steps.iter().enumerate() {
        let mut result = if exts.pre_step(ctxt, step, idx)? {
            StepResult::new(StepState::Skipped)
        } else {
            step.call(ctxt)?
        };
        exts.post_step(ctxt, step, idx, &mut result)?;

        let note = if result.ignored() { " (ignored)" } else { "" };
        ctxt.emit(
            &format!("[Step {}]: {} . . . {}{}", idx + 1, step.name, result.state, note),
            1,
            false,
        );

        if result.ok() {
            continue;
        }

        let place = format!("{} ({})", step.name, step.address);
        if result.state == StepState::Error {
            let msg = match result.msg {
                Some(msg) => format!("{}: {}", place, msg),
                None => place,
            };
            return Ok(RunOutcome::Error(msg));
        }

        failed.push(place);
        if !options.keep_going {
            break;
        }
    }

    if failed.is_empty() {
        Ok(RunOutcome::Success)
    } else {
        Ok(RunOutcome::Failure(format!(
            "{} step(s) failed: {}",
            failed.len(),
            failed.join(", ")
        )))
    }
}
