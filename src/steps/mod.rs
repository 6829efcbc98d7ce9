//! Step model and the modifier hook protocol.
//!
//! This module provides the core execution model:
//!
//! - [`Action`] - the capability that performs a step's actual work
//! - [`Modifier`] - a priority-ordered capability wrapping a step's action
//! - [`Step`] - one resolved unit: address, action, modifiers
//! - [`StepResult`] / [`StepState`] - the outcome of one step
//!
//! # The hook protocol
//!
//! For one step, modifiers are held in ascending priority order (stable in
//! declaration order). Execution walks `pre_call` in that order; the first
//! modifier to return a result short-circuits and the action is never
//! invoked. `post_call` then walks the modifiers whose `pre_call` ran, in
//! the exact reverse order, each able to replace the result. Lower-priority
//! modifiers are the outer wrappers: each one sees its own `pre_call`
//! before, and its own `post_call` after, everything of higher priority.

pub mod actions;
pub mod modifiers;
pub mod parser;

pub use parser::{parse_file, ActionSpec, Flattener, ModifierSpec, Restriction};

use crate::address::Address;
use crate::context::Context;
use crate::error::{Result, StrideError};
use serde_yaml::Value;
use std::fmt;

/// Terminal state of one step.
///
/// Ordered by severity; aggregating a group of results takes the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StepState {
    /// The step did not run (condition false, or skipped by an extension).
    Skipped,

    /// The step ran and passed.
    Success,

    /// The step ran and the test condition failed (e.g. nonzero exit).
    Failure,

    /// The step could not run to completion.
    Error,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepState::Skipped => "SKIPPED",
            StepState::Success => "SUCCESS",
            StepState::Failure => "FAILURE",
            StepState::Error => "ERROR",
        };
        write!(f, "{}", s)
    }
}

/// The result of invoking a step's action, after all modifiers have had
/// their say.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Terminal state.
    pub state: StepState,

    /// Detail message, when there is one.
    pub msg: Option<String>,

    /// Exit code of an external process, when one ran.
    pub returncode: Option<i32>,

    // First writer wins; None means "not decided".
    ignore: Option<bool>,
}

impl StepResult {
    /// Create a result in the given state.
    pub fn new(state: StepState) -> Self {
        Self {
            state,
            msg: None,
            returncode: None,
            ignore: None,
        }
    }

    /// Create a result from a child process's exit code. Zero is success,
    /// anything else (including death by signal) is failure.
    pub fn from_returncode(returncode: Option<i32>) -> Self {
        let state = if returncode == Some(0) {
            StepState::Success
        } else {
            StepState::Failure
        };
        Self {
            state,
            msg: None,
            returncode,
            ignore: None,
        }
    }

    /// Create an error result with a detail message.
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            state: StepState::Error,
            msg: Some(msg.into()),
            returncode: None,
            ignore: None,
        }
    }

    /// Attach a detail message.
    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    /// Whether the step counts as passing: skipped or success, or anything
    /// when the result is flagged ignored.
    pub fn ok(&self) -> bool {
        self.ignored() || matches!(self.state, StepState::Skipped | StepState::Success)
    }

    /// Whether a failure in this result is to be ignored.
    pub fn ignored(&self) -> bool {
        self.ignore.unwrap_or(false)
    }

    /// Set the ignore flag. Only the first write takes effect; later
    /// writers see the flag already decided.
    pub fn set_ignore(&mut self, value: bool) {
        if self.ignore.is_none() {
            self.ignore = Some(value);
        }
    }
}

/// What invoking a step produced: a result for ordinary actions, or a list
/// of replacement steps for step actions at flatten time.
#[derive(Debug)]
pub enum Invoked {
    /// An ordinary action ran (or a modifier short-circuited).
    Result(StepResult),

    /// A step action expanded into replacement steps.
    Steps(Vec<Step>),
}

/// A step *action*. Actions perform the actual operation of a test step;
/// each step has exactly one.
///
/// Actions own their parsed configuration and never hold a reference to the
/// [`Context`]; it arrives with every call, so the same step could be
/// invoked any number of times (including zero, under some modifiers).
pub trait Action: fmt::Debug {
    /// The registry key this action was resolved from.
    fn name(&self) -> &str;

    /// Perform the step.
    fn call(&self, ctxt: &mut Context) -> Result<StepResult>;

    /// Expand into replacement steps. Only step actions (see
    /// [`ActionSpec::step_action`]) implement this; it is invoked at flatten
    /// time, not at run time.
    fn expand(&self, _ctxt: &mut Context, _flattener: &mut Flattener) -> Result<Vec<Step>> {
        Err(StrideError::config(
            format!("action \"{}\" does not expand into steps", self.name()),
            None,
        ))
    }
}

/// A step *modifier*. Modifiers wrap a step's action with pre/post behavior
/// and may rewrite the action's configuration before it is constructed.
pub trait Modifier: fmt::Debug {
    /// The registry key this modifier was resolved from.
    fn name(&self) -> &str;

    /// Application order: lower priorities are outer wrappers and are
    /// applied first on the way in, last on the way out.
    fn priority(&self) -> i32;

    /// Called in ascending priority order before the action is constructed.
    /// May return a replacement for the action's raw configuration; the
    /// default returns it unchanged.
    fn action_conf(
        &self,
        _ctxt: &mut Context,
        _action: &ActionSpec,
        config: Value,
        _addr: &Address,
    ) -> Result<Value> {
        Ok(config)
    }

    /// Called in ascending priority order before the action is invoked.
    /// `pre` and `post` are the modifiers of lower and higher priority.
    /// Returning a result short-circuits: the action is never invoked and
    /// processing proceeds directly to `post_call`.
    fn pre_call(
        &self,
        _ctxt: &mut Context,
        _pre: &[Box<dyn Modifier>],
        _post: &[Box<dyn Modifier>],
        _action: &dyn Action,
    ) -> Result<Option<StepResult>> {
        Ok(None)
    }

    /// Called in descending priority order (the exact reverse of the
    /// `pre_call` order) after the action. Returns the result, possibly
    /// replaced; the default passes it through unchanged.
    fn post_call(
        &self,
        _ctxt: &mut Context,
        result: StepResult,
        _action: &dyn Action,
        _post: &[Box<dyn Modifier>],
        _pre: &[Box<dyn Modifier>],
    ) -> Result<StepResult> {
        Ok(result)
    }
}

/// One resolved test step.
#[derive(Debug)]
pub struct Step {
    /// Where the step came from.
    pub address: Address,

    /// Step name; defaults to the action's registry key.
    pub name: String,

    /// Optional human description.
    pub description: Option<String>,

    action: Box<dyn Action>,
    // Ascending priority, stable in declaration order.
    modifiers: Vec<Box<dyn Modifier>>,
}

impl Step {
    /// Assemble a resolved step.
    pub fn new(
        address: Address,
        action: Box<dyn Action>,
        modifiers: Vec<Box<dyn Modifier>>,
        name: Option<String>,
        description: Option<String>,
    ) -> Self {
        let name = name.unwrap_or_else(|| action.name().to_string());
        Self {
            address,
            name,
            description,
            action,
            modifiers,
        }
    }

    /// The step's action.
    pub fn action(&self) -> &dyn Action {
        self.action.as_ref()
    }

    /// The step's modifiers, in ascending priority order.
    pub fn modifiers(&self) -> &[Box<dyn Modifier>] {
        &self.modifiers
    }

    /// Invoke an ordinary step: the full modifier/action protocol.
    pub fn call(&self, ctxt: &mut Context) -> Result<StepResult> {
        match self.invoke(ctxt, |action, ctxt| {
            // An action error becomes an error result rather than aborting
            // the hook chain; post_call still runs.
            match action.call(ctxt) {
                Ok(result) => Ok(Invoked::Result(result)),
                Err(e) => Ok(Invoked::Result(StepResult::error(e.to_string()))),
            }
        })? {
            Invoked::Result(result) => Ok(result),
            Invoked::Steps(_) => Err(StrideError::config(
                format!("step action \"{}\" invoked at run time", self.name),
                Some(&self.address),
            )),
        }
    }

    /// Invoke a step action at flatten time, producing replacement steps.
    /// A modifier chain that short-circuits with a passing result (e.g. a
    /// false condition) expands to zero steps.
    pub(crate) fn expand(
        &self,
        ctxt: &mut Context,
        flattener: &mut Flattener,
    ) -> Result<Vec<Step>> {
        match self.invoke(ctxt, |action, ctxt| {
            action.expand(ctxt, flattener).map(Invoked::Steps)
        })? {
            Invoked::Steps(steps) => Ok(steps),
            Invoked::Result(result) if result.ok() => Ok(Vec::new()),
            Invoked::Result(result) => Err(StrideError::config(
                format!(
                    "step action \"{}\" blocked by modifier result {}",
                    self.name, result.state
                ),
                Some(&self.address),
            )),
        }
    }

    /// The hook protocol around an arbitrary action invocation.
    fn invoke(
        &self,
        ctxt: &mut Context,
        invoke_action: impl FnOnce(&dyn Action, &mut Context) -> Result<Invoked>,
    ) -> Result<Invoked> {
        // Walk pre_call in ascending order; remember how far we got.
        let mut ran = self.modifiers.len();
        let mut invoked = None;
        for i in 0..self.modifiers.len() {
            let (pre, rest) = self.modifiers.split_at(i);
            let Some((current, post)) = rest.split_first() else {
                break;
            };
            if let Some(result) = current.pre_call(ctxt, pre, post, self.action.as_ref())? {
                ran = i + 1;
                invoked = Some(Invoked::Result(result));
                break;
            }
        }

        let mut invoked = match invoked {
            Some(short_circuit) => short_circuit,
            None => invoke_action(self.action.as_ref(), ctxt)?,
        };

        // Walk post_call in exact reverse over the modifiers whose pre_call
        // ran. A step-expansion outcome carries no result, so the chain is
        // a no-op for it.
        for j in (0..ran).rev() {
            invoked = match invoked {
                Invoked::Result(result) => {
                    let (pre, rest) = self.modifiers.split_at(j);
                    let Some((current, post)) = rest.split_first() else {
                        return Ok(Invoked::Result(result));
                    };
                    Invoked::Result(current.post_call(
                        ctxt,
                        result,
                        self.action.as_ref(),
                        post,
                        pre,
                    )?)
                }
                steps @ Invoked::Steps(_) => return Ok(steps),
            };
        }

        Ok(invoked)
    }
}
