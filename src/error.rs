//! Error types for Stride operations.
//!
//! This module defines [`StrideError`], the primary error type used
//! throughout the crate, and a [`Result`] type alias for convenience.
//!
//! # Error Handling Strategy
//!
//! - Use `StrideError` for domain-specific errors that need distinct handling
//! - Use `anyhow::Error` (via `StrideError::Other`) for unexpected errors
//! - Errors that originate from a step carry the step's [`Address`] rendered
//!   into the message so the offending location is always identifiable
//!
//! [`Address`]: crate::address::Address

use thiserror::Error;

/// Core error type for Stride operations.
#[derive(Debug, Error)]
pub enum StrideError {
    /// Malformed step description: missing or ambiguous action, invalid
    /// configuration shape, unresolved include, include cycle.
    #[error("{message}")]
    Config { message: String },

    /// Template or expression evaluation failed while preparing a step.
    #[error("Render error: {message}")]
    Render { message: String },

    /// A child process could not be spawned at all.
    #[error("Failed to execute command {command:?}: {message}")]
    Spawn { command: String, message: String },

    /// An extension hook failed while debug escalation was enabled.
    #[error("Extension failure calling \"{hook}()\" for extension \"{extension}\": {message}")]
    Extension {
        hook: String,
        extension: String,
        message: String,
    },

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic wrapped error for anyhow interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StrideError {
    /// Build a configuration error, appending the step address when known.
    pub fn config(message: impl Into<String>, addr: Option<&crate::address::Address>) -> Self {
        let message = message.into();
        match addr {
            Some(addr) => StrideError::Config {
                message: format!("{} ({})", message, addr),
            },
            None => StrideError::Config { message },
        }
    }

    /// Build a render error, appending the step address when known.
    pub fn render(message: impl Into<String>, addr: Option<&crate::address::Address>) -> Self {
        let message = message.into();
        match addr {
            Some(addr) => StrideError::Render {
                message: format!("{} ({})", message, addr),
            },
            None => StrideError::Render { message },
        }
    }
}

/// Result type alias for Stride operations.
pub type Result<T> = std::result::Result<T, StrideError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;

    #[test]
    fn config_error_without_address() {
        let err = StrideError::config("no action specified", None);
        assert_eq!(err.to_string(), "no action specified");
    }

    #[test]
    fn config_error_appends_address() {
        let addr = Address::new("test.yml", 2, None);
        let err = StrideError::config("no action specified", Some(&addr));
        assert_eq!(err.to_string(), "no action specified (test.yml step 3)");
    }

    #[test]
    fn render_error_appends_address() {
        let addr = Address::new("test.yml", 0, Some("smoke".into()));
        let err = StrideError::render("undefined variable \"x\"", Some(&addr));
        let msg = err.to_string();
        assert!(msg.starts_with("Render error:"));
        assert!(msg.contains("test.yml[smoke] step 1"));
    }

    #[test]
    fn extension_error_names_hook_and_extension() {
        let err = StrideError::Extension {
            hook: "pre_step".into(),
            extension: "timing".into(),
            message: "boom".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("pre_step"));
        assert!(msg.contains("timing"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn io_error_converts_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: StrideError = io_err.into();
        assert!(matches!(err, StrideError::Io(_)));
    }
}
