//! Step addresses.
//!
//! An [`Address`] records where a step came from: the source file, the
//! zero-based index within that file (or within a keyed list in that file),
//! and the optional key. Addresses are created during parsing, never
//! mutated, and exist purely so that errors and diagnostics can point at the
//! offending step.

use std::fmt;

/// The location of a step within a test description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Source file the step was read from.
    pub source: String,

    /// Zero-based index of the step within the source (or keyed list).
    pub index: usize,

    /// Key within the source, when the file is a mapping of step lists.
    pub key: Option<String>,
}

impl Address {
    /// Create an address.
    pub fn new(source: impl Into<String>, index: usize, key: Option<String>) -> Self {
        Self {
            source: source.into(),
            index,
            key,
        }
    }
}

impl fmt::Display for Address {
    /// Renders as a 1-based human-readable locator, e.g. `test.yml step 3`
    /// or `test.yml[smoke] step 3`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}[{}] step {}", self.source, key, self.index + 1),
            None => write!(f, "{} step {}", self.source, self.index + 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_one_based() {
        let addr = Address::new("test.yml", 0, None);
        assert_eq!(addr.to_string(), "test.yml step 1");
    }

    #[test]
    fn display_includes_key() {
        let addr = Address::new("test.yml", 4, Some("smoke".into()));
        assert_eq!(addr.to_string(), "test.yml[smoke] step 5");
    }

    #[test]
    fn addresses_compare_by_value() {
        let a = Address::new("a.yml", 1, None);
        let b = Address::new("a.yml", 1, None);
        assert_eq!(a, b);
    }
}
