use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tokenizer::canonical_key;

/// A command template and the policy for forwarding input to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    /// Space separated command template; the first token is the program.
    #[serde(default)]
    pub command: String,
    /// Append the unconsumed input tokens to the arguments.
    #[serde(default)]
    pub pass_args: bool,
    /// Feed the unconsumed input text to the process on stdin.
    /// Ignored when `pass_args` is set.
    #[serde(default)]
    pub pass_stdin: bool,
    /// Expand `$NAME` / `${NAME}` in the template tokens.
    #[serde(default)]
    pub expand_env: bool,
}

impl Pattern {
    /// Creates a pattern with all policy flags off.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Sets `pass_args`.
    #[must_use]
    pub fn pass_args(mut self, value: bool) -> Self {
        self.pass_args = value;
        self
    }

    /// Sets `pass_stdin`.
    #[must_use]
    pub fn pass_stdin(mut self, value: bool) -> Self {
        self.pass_stdin = value;
        self
    }

    /// Sets `expand_env`.
    #[must_use]
    pub fn expand_env(mut self, value: bool) -> Self {
        self.expand_env = value;
        self
    }

    /// Both forwarding flags are set; `pass_args` wins and stdin is never fed.
    #[must_use]
    pub const fn has_conflicting_policy(&self) -> bool {
        self.pass_args && self.pass_stdin
    }
}

/// Errors raised while assembling a [`PatternTable`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    /// Two keys collapse to the same canonical form.
    #[error("duplicate pattern key {canonical:?} (from {raw:?})")]
    DuplicateKey {
        /// Key as written.
        raw: String,
        /// Canonical form already present in the table.
        canonical: String,
    },
}

/// Read-only mapping from canonical key to [`Pattern`], in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternTable {
    entries: IndexMap<String, Pattern>,
}

impl PatternTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from `(key, pattern)` pairs.
    pub fn from_entries<K, I>(entries: I) -> Result<Self, TableError>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Pattern)>,
    {
        let mut table = Self::new();
        for (key, pattern) in entries {
            table.insert(key.as_ref(), pattern)?;
        }
        Ok(table)
    }

    /// Inserts a pattern under the canonical form of `key`.
    pub fn insert(&mut self, key: &str, pattern: Pattern) -> Result<(), TableError> {
        let canonical = canonical_key(key);
        if self.entries.contains_key(&canonical) {
            return Err(TableError::DuplicateKey {
                raw: key.to_string(),
                canonical,
            });
        }
        self.entries.insert(canonical, pattern);
        Ok(())
    }

    /// Looks up a canonical key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Pattern> {
        self.entries.get(key)
    }

    /// Whether the canonical key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no patterns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates patterns in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Pattern)> {
        self.entries.iter().map(|(key, pattern)| (key.as_str(), pattern))
    }

    /// Keys whose pattern sets both `pass_args` and `pass_stdin`.
    #[must_use]
    pub fn conflicting_policies(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, pattern)| pattern.has_conflicting_policy())
            .map(|(key, _)| key)
            .collect()
    }

    /// Keys whose command template has no tokens.
    #[must_use]
    pub fn empty_commands(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, pattern)| canonical_key(&pattern.command).is_empty())
            .map(|(key, _)| key)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_canonicalized() {
        let mut table = PatternTable::new();
        table.insert("  say \t hello ", Pattern::new("cat")).unwrap();
        assert!(table.contains_key("say hello"));
        assert!(!table.contains_key("  say \t hello "));
    }

    #[test]
    fn rejects_keys_with_same_canonical_form() {
        let err = PatternTable::from_entries([
            ("say hello", Pattern::new("cat")),
            ("say  hello", Pattern::new("echo")),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            TableError::DuplicateKey {
                raw: "say  hello".into(),
                canonical: "say hello".into()
            }
        );
    }

    #[test]
    fn keys_are_case_sensitive() {
        let table =
            PatternTable::from_entries([("Deploy", Pattern::new("a")), ("deploy", Pattern::new("b"))])
                .unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn reports_suspicious_patterns() {
        let table = PatternTable::from_entries([
            ("both", Pattern::new("cat").pass_args(true).pass_stdin(true)),
            ("blank", Pattern::new("  ")),
            ("fine", Pattern::new("date")),
        ])
        .unwrap();
        assert_eq!(table.conflicting_policies(), vec!["both"]);
        assert_eq!(table.empty_commands(), vec!["blank"]);
    }

    #[test]
    fn pattern_flags_default_to_false() {
        let pattern: Pattern = serde_json::from_str(r#"{"command":"ls -l"}"#).unwrap();
        assert_eq!(pattern, Pattern::new("ls -l"));
    }
}
