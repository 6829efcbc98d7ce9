//! The run context.
//!
//! A [`Context`] is the single mutable execution environment shared by every
//! action, modifier, and extension hook over the course of one run. It is
//! created once, owned by the engine, and passed by `&mut` reference to each
//! hook in turn; execution is strictly sequential, so no synchronization is
//! involved and no hook ever holds on to it.

use crate::environment::Environment;
use crate::render::Variables;

/// The mutable execution environment for one run.
#[derive(Debug)]
pub struct Context {
    /// Output verbosity; 0 is silent, 1 is normal.
    pub verbose: u32,

    /// Whether debug output is enabled.
    pub debug: bool,

    /// Template variables, with per-variable sensitivity.
    pub variables: Variables,

    /// Child-process environment, sensitivity channel, and cwd.
    pub environment: Environment,
}

impl Context {
    /// Create a context around an environment.
    pub fn new(verbose: u32, debug: bool, environment: Environment) -> Self {
        Self {
            verbose,
            debug,
            variables: Variables::new(),
            environment,
        }
    }

    /// Emit a message to the user. Ordinary messages go to stdout when
    /// `verbose` is at least `level`; debug messages go to stderr only when
    /// the debug flag is set.
    pub fn emit(&self, msg: &str, level: u32, debug: bool) {
        if debug {
            if self.debug {
                eprintln!("{}", msg);
            }
        } else if self.verbose >= level {
            println!("{}", msg);
        }
    }

    /// Dump the variable and environment mappings to stderr with sensitive
    /// values masked. Only active when the debug flag is set.
    pub fn dump(&self) {
        if !self.debug {
            return;
        }
        self.emit("Variables:", 0, true);
        for (name, value) in self.variables.masked() {
            self.emit(&format!("  {} = {}", name, value), 0, true);
        }
        self.emit("Environment:", 0, true);
        for (name, value) in self.environment.masked() {
            self.emit(&format!("  {} = {}", name, value), 0, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value;
    use std::path::PathBuf;

    fn context() -> Context {
        let env = Environment::from_parts(std::iter::empty(), PathBuf::from("/work"));
        Context::new(1, false, env)
    }

    #[test]
    fn variables_start_empty() {
        let ctxt = context();
        assert!(ctxt.variables.is_empty());
    }

    #[test]
    fn variable_sensitivity_is_monotonic() {
        let mut ctxt = context();
        ctxt.variables.set("token", Value::String("abc".into()));
        ctxt.variables.declare_sensitive("token");
        ctxt.variables.set("token", Value::String("def".into()));
        assert!(ctxt.variables.is_sensitive("token"));
        assert_eq!(ctxt.variables.masked()[0].1, crate::sensitive::MASK);
    }
}
