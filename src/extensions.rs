//! Run-observing extensions.
//!
//! Extensions hook the engine around the run as a whole, where modifiers
//! hook individual steps. They are registered statically, gated behind
//! command-line arguments they add themselves, and held in ascending
//! priority order.
//!
//! A misbehaving extension must not take the run down with it: hook errors
//! are logged and discarded by default. Setting `STRIDE_EXTENSION_DEBUG` to
//! 1 or higher escalates hook errors to fatal (except `finalize`, whose
//! errors are always discarded since the run outcome already exists); 2 or
//! higher additionally traces every hook invocation, and 3 or higher every
//! extension within each hook.

use crate::context::Context;
use crate::error::{Result, StrideError};
use crate::runner::RunOutcome;
use crate::steps::{Step, StepResult};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::fmt;
use std::time::{Duration, Instant};

/// Escalation level read from `STRIDE_EXTENSION_DEBUG`.
pub const EXTENSION_DEBUG: &str = "STRIDE_EXTENSION_DEBUG";

/// A run-observing extension.
///
/// All hooks have pass-through defaults; an extension implements only the
/// ones it cares about.
pub trait Extension: fmt::Debug {
    /// The extension's registry name.
    fn name(&self) -> &str;

    /// Hook invocation order; lower runs first.
    fn priority(&self) -> i32;

    /// Called once with the fully flattened step list, before any step
    /// runs; may reorder or drop steps.
    fn read_steps(&mut self, _ctxt: &mut Context, _steps: &mut Vec<Step>) -> Result<()> {
        Ok(())
    }

    /// Called before each step. Returning `true` asks the engine to skip
    /// the step.
    fn pre_step(&mut self, _ctxt: &mut Context, _step: &Step, _idx: usize) -> Result<bool> {
        Ok(false)
    }

    /// Called after each step; may mutate the result in place.
    fn post_step(
        &mut self,
        _ctxt: &mut Context,
        _step: &Step,
        _idx: usize,
        _result: &mut StepResult,
    ) -> Result<()> {
        Ok(())
    }

    /// Called once after the run, with the outcome; may replace it.
    fn finalize(&mut self, _ctxt: &mut Context, outcome: RunOutcome) -> Result<RunOutcome> {
        Ok(outcome)
    }
}

type PrepareFn = fn(Command) -> Command;
type ActivateFn = fn(&mut Context, &ArgMatches) -> Result<Option<Box<dyn Extension>>>;

/// Registry entry for an extension.
pub struct ExtensionSpec {
    /// The extension's name, for diagnostics.
    pub name: &'static str,

    /// Hook invocation order; lower runs first.
    pub priority: i32,

    /// Add the extension's command-line arguments.
    prepare: PrepareFn,

    /// Inspect the parsed arguments; return an instance if the extension
    /// is enabled for this run.
    activate: ActivateFn,
}

/// The extension registration table, in ascending priority order.
static EXTENSIONS: &[ExtensionSpec] = &[ExtensionSpec {
    name: "timing",
    priority: 500,
    prepare: prepare_timing,
    activate: activate_timing,
}];

/// How hard to come down on extension hook failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionDebug {
    level: u32,
}

impl ExtensionDebug {
    /// Read the escalation level from the process environment, once, at
    /// startup. Unset means 0; a set but non-numeric value means 1.
    pub fn from_env() -> Self {
        let level = match std::env::var(EXTENSION_DEBUG) {
            Ok(text) => text.trim().parse::<i64>().map(|n| n.max(0) as u32).unwrap_or(1),
            Err(_) => 0,
        };
        Self { level }
    }

    #[cfg(test)]
    pub fn at(level: u32) -> Self {
        Self { level }
    }

    fn fatal(&self) -> bool {
        self.level >= 1
    }

    /// Trace each hook invocation.
    fn traced(&self) -> bool {
        self.level >= 2
    }

    /// Trace each extension within each hook.
    fn verbose(&self) -> bool {
        self.level >= 3
    }
}

/// The activated extensions of one run.
#[derive(Debug)]
pub struct ExtensionSet {
    extensions: Vec<Box<dyn Extension>>,
    debug: ExtensionDebug,
}

impl ExtensionSet {
    /// Let every registered extension add its command-line arguments.
    pub fn prepare(mut cmd: Command) -> Command {
        for spec in EXTENSIONS {
            cmd = (spec.prepare)(cmd);
        }
        cmd
    }

    /// Activate the extensions enabled by the parsed arguments.
    pub fn activate(ctxt: &mut Context, matches: &ArgMatches, debug: ExtensionDebug) -> Result<Self> {
        if debug.traced() {
            eprintln!("[ext] calling activate()");
        }
        let mut extensions = Vec::new();
        for spec in EXTENSIONS {
            if debug.verbose() {
                eprintln!("[ext]   activate() for \"{}\"", spec.name);
            }
            match (spec.activate)(ctxt, matches) {
                Ok(Some(ext)) => extensions.push(ext),
                Ok(None) => {}
                Err(e) => {
                    if debug.fatal() {
                        return Err(StrideError::Extension {
                            hook: "activate".into(),
                            extension: spec.name.into(),
                            message: e.to_string(),
                        });
                    }
                    tracing::warn!(
                        extension = spec.name,
                        error = %e,
                        "discarding activate() failure"
                    );
                }
            }
        }
        extensions.sort_by_key(|ext| ext.priority());
        Ok(Self { extensions, debug })
    }

    #[cfg(test)]
    pub fn from_parts(mut extensions: Vec<Box<dyn Extension>>, debug: ExtensionDebug) -> Self {
        extensions.sort_by_key(|ext| ext.priority());
        Self { extensions, debug }
    }

    /// Whether any extensions are active.
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Show every extension the flattened step list; any of them may edit
    /// it.
    pub fn read_steps(&mut self, ctxt: &mut Context, steps: &mut Vec<Step>) -> Result<()> {
        let debug = self.debug;
        if debug.traced() {
            eprintln!("[ext] calling read_steps()");
        }
        for ext in &mut self.extensions {
            if debug.verbose() {
                eprintln!("[ext]   read_steps() for \"{}\"", ext.name());
            }
            let name = ext.name().to_string();
            let outcome = ext.read_steps(ctxt, steps);
            isolate(debug, "read_steps", &name, (), outcome)?;
        }
        Ok(())
    }

    /// Ask the extensions whether to skip a step. Any one saying so wins;
    /// the remaining extensions are still consulted.
    pub fn pre_step(&mut self, ctxt: &mut Context, step: &Step, idx: usize) -> Result<bool> {
        let debug = self.debug;
        if debug.traced() {
            eprintln!("[ext] calling pre_step()");
        }
        let mut skip = false;
        for ext in &mut self.extensions {
            if debug.verbose() {
                eprintln!("[ext]   pre_step() for \"{}\"", ext.name());
            }
            let name = ext.name().to_string();
            let outcome = ext.pre_step(ctxt, step, idx);
            skip |= isolate(debug, "pre_step", &name, false, outcome)?;
        }
        Ok(skip)
    }

    /// Show every extension a step's result, in activation order, never
    /// reversed. Extensions may mutate the result in place.
    pub fn post_step(
        &mut self,
        ctxt: &mut Context,
        step: &Step,
        idx: usize,
        result: &mut StepResult,
    ) -> Result<()> {
        let debug = self.debug;
        if debug.traced() {
            eprintln!("[ext] calling post_step()");
        }
        for ext in &mut self.extensions {
            if debug.verbose() {
                eprintln!("[ext]   post_step() for \"{}\"", ext.name());
            }
            let name = ext.name().to_string();
            let outcome = ext.post_step(ctxt, step, idx, result);
            isolate(debug, "post_step", &name, (), outcome)?;
        }
        Ok(())
    }

    /// Give every extension a look at the run outcome. Failures here are
    /// always discarded; the outcome already exists.
    pub fn finalize(&mut self, ctxt: &mut Context, mut outcome: RunOutcome) -> RunOutcome {
        if self.debug.traced() {
            eprintln!("[ext] calling finalize()");
        }
        for ext in &mut self.extensions {
            if self.debug.verbose() {
                eprintln!("[ext]   finalize() for \"{}\"", ext.name());
            }
            match ext.finalize(ctxt, outcome.clone()) {
                Ok(replaced) => outcome = replaced,
                Err(e) => {
                    tracing::warn!(
                        extension = ext.name(),
                        error = %e,
                        "discarding finalize() failure"
                    );
                }
            }
        }
        outcome
    }
}

/// Apply the failure-isolation policy to one hook invocation.
fn isolate<T>(
    debug: ExtensionDebug,
    hook: &str,
    extension: &str,
    default: T,
    outcome: Result<T>,
) -> Result<T> {
    match outcome {
        Ok(value) => Ok(value),
        Err(e) if debug.fatal() => Err(StrideError::Extension {
            hook: hook.into(),
            extension: extension.into(),
            message: e.to_string(),
        }),
        Err(e) => {
            tracing::warn!(
                hook,
                extension,
                error = %e,
                "discarding extension hook failure"
            );
            Ok(default)
        }
    }
}

fn prepare_timing(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("timing")
            .long("timing")
            .action(ArgAction::SetTrue)
            .help("Report per-step wall-clock timings after the run"),
    )
}

fn activate_timing(
    _ctxt: &mut Context,
    matches: &ArgMatches,
) -> Result<Option<Box<dyn Extension>>> {
    if matches.get_flag("timing") {
        Ok(Some(Box::new(TimingExtension::default())))
    } else {
        Ok(None)
    }
}

/// Reports per-step wall-clock timings after the run.
#[derive(Debug, Default)]
struct TimingExtension {
    started: Option<Instant>,
    timings: Vec<(String, Duration)>,
}

impl Extension for TimingExtension {
    fn name(&self) -> &str {
        "timing"
    }

    fn priority(&self) -> i32 {
        500
    }

    fn pre_step(&mut self, _ctxt: &mut Context, _step: &Step, _idx: usize) -> Result<bool> {
        self.started = Some(Instant::now());
        Ok(false)
    }

    fn post_step(
        &mut self,
        _ctxt: &mut Context,
        step: &Step,
        _idx: usize,
        _result: &mut StepResult,
    ) -> Result<()> {
        if let Some(started) = self.started.take() {
            self.timings.push((step.name.clone(), started.elapsed()));
        }
        Ok(())
    }

    fn finalize(&mut self, ctxt: &mut Context, outcome: RunOutcome) -> Result<RunOutcome> {
        if !self.timings.is_empty() {
            ctxt.emit("Timing:", 1, false);
            for (name, elapsed) in &self.timings {
                ctxt.emit(&format!("  {}: {:.3}s", name, elapsed.as_secs_f64()), 1, false);
            }
        }
        Ok(outcome)
    }
}
