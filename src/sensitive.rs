//! Sensitivity-aware mappings.
//!
//! A [`SensitiveMap`] is an insertion-ordered mapping in which individual
//! entries can be flagged sensitive. Sensitivity controls *visibility*, not
//! usability: the live mapping always holds the real values (templates and
//! child processes see them), while any display path goes through
//! [`SensitiveMap::masked`], which substitutes [`MASK`] for flagged entries.
//!
//! Sensitivity is monotonic. Once a name is declared sensitive it stays
//! sensitive for the rest of the run, even if its value is removed or
//! replaced.

use std::collections::BTreeSet;

/// Fixed redaction marker substituted for sensitive values in display output.
pub const MASK: &str = "[REDACTED]";

/// Convert a value into its display form for masked dumps.
pub trait DisplayValue {
    fn display(&self) -> String;
}

impl DisplayValue for String {
    fn display(&self) -> String {
        self.clone()
    }
}

impl DisplayValue for serde_yaml::Value {
    fn display(&self) -> String {
        match self {
            serde_yaml::Value::Null => String::new(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::String(s) => s.clone(),
            other => serde_yaml::to_string(other)
                .unwrap_or_default()
                .trim_end()
                .to_string(),
        }
    }
}

/// An insertion-ordered mapping with per-entry sensitivity flags.
#[derive(Debug, Clone, Default)]
pub struct SensitiveMap<V> {
    entries: Vec<(String, V)>,
    sensitive: BTreeSet<String>,
}

impl<V> SensitiveMap<V> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            sensitive: BTreeSet::new(),
        }
    }

    /// Number of entries with a value.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a value by name.
    pub fn get(&self, name: &str) -> Option<&V> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Whether a value exists for the name.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == name)
    }

    /// Set a value, preserving the entry's position if it already exists.
    pub fn set(&mut self, name: impl Into<String>, value: V) {
        let name = name.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Remove a value. The sensitivity flag, if any, is retained.
    pub fn remove(&mut self, name: &str) -> Option<V> {
        let pos = self.entries.iter().position(|(k, _)| k == name)?;
        Some(self.entries.remove(pos).1)
    }

    /// Flag a name as sensitive. The name need not currently have a value,
    /// and the flag can never be cleared.
    pub fn declare_sensitive(&mut self, name: impl Into<String>) {
        self.sensitive.insert(name.into());
    }

    /// Whether a name is flagged sensitive.
    pub fn is_sensitive(&self, name: &str) -> bool {
        self.sensitive.contains(name)
    }

    /// The set of sensitive names, including names without a value.
    pub fn sensitive_names(&self) -> impl Iterator<Item = &str> {
        self.sensitive.iter().map(String::as_str)
    }

    /// Iterate over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<V: DisplayValue> SensitiveMap<V> {
    /// Render the map for display, substituting [`MASK`] for sensitive
    /// values. This is the only sanctioned way to show the map to a user.
    pub fn masked(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| {
                let shown = if self.sensitive.contains(k) {
                    MASK.to_string()
                } else {
                    v.display()
                };
                (k.clone(), shown)
            })
            .collect()
    }
}

impl<V> FromIterator<(String, V)> for SensitiveMap<V> {
    fn from_iter<T: IntoIterator<Item = (String, V)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.set(k, v);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut map = SensitiveMap::new();
        map.set("x", "1".to_string());
        assert_eq!(map.get("x"), Some(&"1".to_string()));
        assert!(map.contains("x"));
        assert!(!map.contains("y"));
    }

    #[test]
    fn set_preserves_insertion_order() {
        let mut map = SensitiveMap::new();
        map.set("b", "1".to_string());
        map.set("a", "2".to_string());
        map.set("b", "3".to_string());
        let names: Vec<_> = map.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn masked_substitutes_marker_for_sensitive_values() {
        let mut map = SensitiveMap::new();
        map.set("PASSWORD", "hunter2".to_string());
        map.set("USER", "alice".to_string());
        map.declare_sensitive("PASSWORD");

        let shown = map.masked();
        assert_eq!(shown[0], ("PASSWORD".to_string(), MASK.to_string()));
        assert_eq!(shown[1], ("USER".to_string(), "alice".to_string()));
        // The live value is untouched.
        assert_eq!(map.get("PASSWORD"), Some(&"hunter2".to_string()));
    }

    #[test]
    fn sensitivity_survives_removal_and_reset() {
        let mut map = SensitiveMap::new();
        map.set("TOKEN", "abc".to_string());
        map.declare_sensitive("TOKEN");
        map.remove("TOKEN");
        assert!(map.is_sensitive("TOKEN"));

        map.set("TOKEN", "def".to_string());
        let shown = map.masked();
        assert_eq!(shown[0].1, MASK);
    }

    #[test]
    fn sensitivity_without_value() {
        let mut map: SensitiveMap<String> = SensitiveMap::new();
        map.declare_sensitive("GHOST");
        assert!(map.is_sensitive("GHOST"));
        assert!(!map.contains("GHOST"));
        assert_eq!(map.sensitive_names().collect::<Vec<_>>(), vec!["GHOST"]);
    }

    #[test]
    fn yaml_values_display_scalars_plainly() {
        let mut map = SensitiveMap::new();
        map.set("n", serde_yaml::Value::Number(42.into()));
        map.set("b", serde_yaml::Value::Bool(true));
        map.set("s", serde_yaml::Value::String("hi".into()));
        let shown = map.masked();
        assert_eq!(shown[0].1, "42");
        assert_eq!(shown[1].1, "true");
        assert_eq!(shown[2].1, "hi");
    }
}
