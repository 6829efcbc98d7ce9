//! Built-in modifiers.
//!
//! - `when` - skip the step unless a condition over the variables holds
//! - `ignore-errors` - let a failing step count as passing

use crate::address::Address;
use crate::context::Context;
use crate::error::{Result, StrideError};
use crate::render::{type_name, Expression};
use crate::steps::{Action, Modifier, StepResult, StepState};
use serde_yaml::Value;

/// Priority of the `when` modifier. Conditions run outermost so that a
/// false condition costs nothing.
pub const CONDITIONAL_PRIORITY: i32 = 200;

/// Priority of the `ignore-errors` modifier.
pub const IGNORE_ERRORS_PRIORITY: i32 = 300;

/// Skip the step unless a condition holds. Compatible with every action
/// class; a false condition on a step action suppresses its expansion.
#[derive(Debug)]
pub struct ConditionalModifier {
    condition: Expression,
}

pub(crate) fn build_when(config: &Value, addr: &Address) -> Result<Box<dyn Modifier>> {
    Ok(Box::new(ConditionalModifier {
        condition: Expression::parse(config, addr)?,
    }))
}

impl Modifier for ConditionalModifier {
    fn name(&self) -> &str {
        "when"
    }

    fn priority(&self) -> i32 {
        CONDITIONAL_PRIORITY
    }

    fn pre_call(
        &self,
        ctxt: &mut Context,
        _pre: &[Box<dyn Modifier>],
        _post: &[Box<dyn Modifier>],
        _action: &dyn Action,
    ) -> Result<Option<StepResult>> {
        if self.condition.eval(&ctxt.variables) {
            Ok(None)
        } else {
            Ok(Some(StepResult::new(StepState::Skipped)))
        }
    }
}

/// Let a failing step count as passing. Ordinary actions only; ignoring a
/// failed expansion would leave the step list undefined.
#[derive(Debug)]
pub struct IgnoreErrorsModifier {
    ignore: bool,
}

pub(crate) fn build_ignore_errors(config: &Value, addr: &Address) -> Result<Box<dyn Modifier>> {
    let ignore = match config {
        Value::Bool(b) => *b,
        other => {
            return Err(StrideError::config(
                format!(
                    "Bad configuration for modifier \"ignore-errors\": expecting boolean, not {}",
                    type_name(other)
                ),
                Some(addr),
            ))
        }
    };
    Ok(Box::new(IgnoreErrorsModifier { ignore }))
}

impl Modifier for IgnoreErrorsModifier {
    fn name(&self) -> &str {
        "ignore-errors"
    }

    fn priority(&self) -> i32 {
        IGNORE_ERRORS_PRIORITY
    }

    fn post_call(
        &self,
        _ctxt: &mut Context,
        mut result: StepResult,
        _action: &dyn Action,
        _post: &[Box<dyn Modifier>],
        _pre: &[Box<dyn Modifier>],
    ) -> Result<StepResult> {
        result.set_ignore(self.ignore);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use std::path::PathBuf;

    fn context() -> Context {
        let env = Environment::from_parts(std::iter::empty(), PathBuf::from("/work"));
        Context::new(0, false, env)
    }

    fn addr() -> Address {
        Address::new("test.yml", 0, None)
    }

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[derive(Debug)]
    struct NullAction;
    impl Action for NullAction {
        fn name(&self) -> &str {
            "null"
        }
        fn call(&self, _ctxt: &mut Context) -> Result<StepResult> {
            Ok(StepResult::new(StepState::Success))
        }
    }

    #[test]
    fn when_true_lets_the_step_run() {
        let mut ctxt = context();
        ctxt.variables.set("flag", Value::Bool(true));
        let m = build_when(&yaml("flag"), &addr()).unwrap();
        let out = m.pre_call(&mut ctxt, &[], &[], &NullAction).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn when_false_short_circuits_to_skipped() {
        let mut ctxt = context();
        let m = build_when(&yaml("flag"), &addr()).unwrap();
        let out = m.pre_call(&mut ctxt, &[], &[], &NullAction).unwrap();
        assert_eq!(out.unwrap().state, StepState::Skipped);
    }

    #[test]
    fn when_comparison() {
        let mut ctxt = context();
        ctxt.variables
            .set("branch", Value::String("main".into()));
        let m = build_when(&yaml("branch == 'main'"), &addr()).unwrap();
        assert!(m.pre_call(&mut ctxt, &[], &[], &NullAction).unwrap().is_none());
    }

    #[test]
    fn when_rejects_mappings() {
        assert!(build_when(&yaml("{a: 1}"), &addr()).is_err());
    }

    #[test]
    fn ignore_errors_flags_the_result() {
        let mut ctxt = context();
        let m = build_ignore_errors(&Value::Bool(true), &addr()).unwrap();
        let result = m
            .post_call(
                &mut ctxt,
                StepResult::new(StepState::Failure),
                &NullAction,
                &[],
                &[],
            )
            .unwrap();
        assert!(result.ok());
        assert!(result.ignored());
        assert_eq!(result.state, StepState::Failure);
    }

    #[test]
    fn ignore_errors_false_is_explicit_no() {
        let mut ctxt = context();
        let m = build_ignore_errors(&Value::Bool(false), &addr()).unwrap();
        let result = m
            .post_call(
                &mut ctxt,
                StepResult::new(StepState::Failure),
                &NullAction,
                &[],
                &[],
            )
            .unwrap();
        assert!(!result.ok());
    }

    #[test]
    fn ignore_errors_requires_a_boolean() {
        assert!(build_ignore_errors(&yaml("yes please"), &addr()).is_err());
    }

    #[test]
    fn priorities_put_conditions_outermost() {
        assert!(CONDITIONAL_PRIORITY < IGNORE_ERRORS_PRIORITY);
    }
}
