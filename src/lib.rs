//! Stride - declarative test-step runner.
//!
//! Stride runs the steps of a declarative YAML test description in order:
//! external commands, variable and environment updates, working-directory
//! changes, and inclusions of other step files. Steps can be wrapped by
//! modifiers (conditions, error tolerance) and the run as a whole observed
//! by extensions.
//!
//! # Modules
//!
//! - [`address`] - Step locations for diagnostics
//! - [`cli`] - Command-line interface and argument parsing
//! - [`context`] - The mutable execution environment of one run
//! - [`environment`] - Child-process environment and command spawning
//! - [`error`] - Error types and result aliases
//! - [`extensions`] - Run-observing extensions
//! - [`render`] - `${var}` templates and `when` expressions
//! - [`runner`] - The run engine and outcome aggregation
//! - [`sensitive`] - Sensitivity-aware name/value mappings
//! - [`steps`] - Step resolution, actions, and modifiers
//!
//! # Example
//!
//! ```
//! use serde_yaml::Value;
//! use stride::address::Address;
//! use stride::render::{Template, Variables};
//!
//! // Render a command against the run's variables
//! let mut vars = Variables::new();
//! vars.set("mode", Value::String("release".into()));
//! let template = Template::parse(&Value::String("build --profile ${mode}".into()));
//! let addr = Address::new("test.yml", 0, None);
//! assert_eq!(
//!     template.render_string(&vars, &addr).unwrap(),
//!     "build --profile release"
//! );
//! ```
//!
//! For end-to-end runs of step files, see the integration tests.

pub mod address;
pub mod cli;
pub mod context;
pub mod environment;
pub mod error;
pub mod extensions;
pub mod render;
pub mod runner;
pub mod sensitive;
pub mod steps;

pub use error::{Result, StrideError};
