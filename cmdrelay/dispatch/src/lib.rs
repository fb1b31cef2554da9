#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Command pattern matching and invocation building.
//!
//! Text is split into whitespace tokens, the longest token prefix that is a
//! configured pattern key is selected, and the pattern's policy decides how
//! the remaining input becomes process arguments or standard input.

/// Invocation construction from a matched pattern.
pub mod builder;
/// Environment-variable expansion of command templates.
pub mod env;
/// Longest-prefix key matching.
pub mod matcher;
/// Pattern definitions and the pattern table.
pub mod pattern;
/// Whitespace tokenization.
pub mod tokenizer;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

pub use builder::{build_invocation, Invocation};
pub use env::{Environment, ProcessEnv};
pub use matcher::{longest_match, PatternLookup};
pub use pattern::{Pattern, PatternTable, TableError};
pub use tokenizer::{canonical_key, remainder_after, tokenize};

/// Errors produced while dispatching a message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No token prefix of the input, nor the empty key, is configured.
    #[error("input text is not in dictionary: {input:?}")]
    NoMatch {
        /// The text that failed to match.
        input: String,
    },
    /// A pattern matched but produced an unusable invocation.
    #[error("invalid invocation: {0}")]
    InvalidInvocation(String),
}

/// Successful dispatch: the matched key and the invocation to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dispatch {
    /// Canonical key that matched.
    pub key: String,
    /// Process to execute.
    pub invocation: Invocation,
}

/// Maps inbound text to invocations using a shared, read-only pattern table.
#[derive(Debug, Clone)]
pub struct Dispatcher<E = ProcessEnv> {
    table: Arc<PatternTable>,
    env: E,
}

impl Dispatcher<ProcessEnv> {
    /// Creates a dispatcher expanding templates from the process environment.
    #[must_use]
    pub fn new(table: Arc<PatternTable>) -> Self {
        Self {
            table,
            env: ProcessEnv,
        }
    }
}

impl<E: Environment> Dispatcher<E> {
    /// Creates a dispatcher with a custom environment source.
    #[must_use]
    pub fn with_env(table: Arc<PatternTable>, env: E) -> Self {
        Self { table, env }
    }

    /// The pattern table in use.
    #[must_use]
    pub fn table(&self) -> &PatternTable {
        &self.table
    }

    /// Tokenizes `text`, selects the longest matching key, and builds its invocation.
    pub fn dispatch(&self, text: &str) -> Result<Dispatch, DispatchError> {
        let tokens = tokenize(text);
        let key = longest_match(self.table.as_ref(), &tokens).ok_or_else(|| {
            DispatchError::NoMatch {
                input: text.to_string(),
            }
        })?;
        let pattern = self
            .table
            .get(&key)
            .ok_or_else(|| DispatchError::NoMatch {
                input: text.to_string(),
            })?;
        let invocation = build_invocation(pattern, &key, text, &self.env)?;
        Ok(Dispatch { key, invocation })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn table() -> Arc<PatternTable> {
        let mut table = PatternTable::new();
        table
            .insert("echo", Pattern::new("echo").pass_args(true))
            .unwrap();
        table
            .insert("say hello", Pattern::new("cat").pass_stdin(true))
            .unwrap();
        table
            .insert("greet", Pattern::new("echo hi $WHO").expand_env(true))
            .unwrap();
        Arc::new(table)
    }

    #[test]
    fn dispatches_pass_args() {
        let dispatcher = Dispatcher::new(table());
        let dispatch = dispatcher.dispatch("echo  one\ttwo").unwrap();
        assert_eq!(dispatch.key, "echo");
        assert_eq!(dispatch.invocation.argv(), ["echo", "one", "two"]);
        assert_eq!(dispatch.invocation.stdin(), None);
    }

    #[test]
    fn dispatches_pass_stdin() {
        let dispatcher = Dispatcher::new(table());
        let dispatch = dispatcher.dispatch("say hello to   the world").unwrap();
        assert_eq!(dispatch.key, "say hello");
        assert_eq!(dispatch.invocation.argv(), ["cat"]);
        assert_eq!(dispatch.invocation.stdin(), Some("to   the world"));
    }

    #[test]
    fn reports_miss() {
        let dispatcher = Dispatcher::new(table());
        let err = dispatcher.dispatch("say goodbye").unwrap_err();
        assert_eq!(
            err,
            DispatchError::NoMatch {
                input: "say goodbye".into()
            }
        );
    }

    #[test]
    fn expands_with_supplied_environment() {
        let env = HashMap::from([("WHO".to_string(), "ops".to_string())]);
        let dispatcher = Dispatcher::with_env(table(), env);
        let dispatch = dispatcher.dispatch("greet ignored").unwrap();
        assert_eq!(dispatch.invocation.argv(), ["echo", "hi", "ops"]);
    }

    #[test]
    fn dispatcher_is_shareable_across_threads() {
        let dispatcher = Arc::new(Dispatcher::new(table()));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let dispatcher = Arc::clone(&dispatcher);
                std::thread::spawn(move || {
                    dispatcher
                        .dispatch(&format!("echo {i}"))
                        .unwrap()
                        .invocation
                        .argv()
                        .to_vec()
                })
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap(), vec!["echo".to_string(), i.to_string()]);
        }
    }
}
