use serde::Serialize;

use crate::{
    env::{expand, Environment},
    pattern::Pattern,
    tokenizer::{remainder_after, tokenize},
    DispatchError,
};

/// Fully resolved process invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    argv: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdin: Option<String>,
}

impl Invocation {
    /// Creates an invocation, rejecting an empty argument vector.
    pub fn new(argv: Vec<String>, stdin: Option<String>) -> Result<Self, DispatchError> {
        if argv.is_empty() {
            return Err(DispatchError::InvalidInvocation(
                "command to execute is not specified".into(),
            ));
        }
        Ok(Self { argv, stdin })
    }

    /// Program followed by its arguments. Never empty.
    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Program to execute.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    /// Arguments after the program.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }

    /// Payload to write to the process's standard input.
    #[must_use]
    pub fn stdin(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    /// Splits into argument vector and stdin payload.
    #[must_use]
    pub fn into_parts(self) -> (Vec<String>, Option<String>) {
        (self.argv, self.stdin)
    }
}

fn template_tokens(pattern: &Pattern, env: &impl Environment) -> Vec<String> {
    let tokens = tokenize(&pattern.command);
    if !pattern.expand_env {
        return tokens;
    }
    tokens
        .iter()
        .map(|token| expand(token, env))
        .filter(|token| !token.is_empty())
        .collect()
}

/// Builds the invocation for `pattern`, matched by `matched_key` against `text`.
///
/// The tokens of `matched_key` are consumed from the start of `text`. With
/// `pass_args` the remaining tokens are appended to the template; otherwise,
/// with `pass_stdin`, the remaining text (whitespace preserved) becomes stdin.
/// `pass_args` takes precedence when both are set.
pub fn build_invocation(
    pattern: &Pattern,
    matched_key: &str,
    text: &str,
    env: &impl Environment,
) -> Result<Invocation, DispatchError> {
    let n_matched = tokenize(matched_key).len();
    let mut argv = template_tokens(pattern, env);
    let mut stdin = None;
    if pattern.pass_args {
        argv.extend(tokenize(text).into_iter().skip(n_matched));
    } else if pattern.pass_stdin {
        stdin = remainder_after(text, n_matched).map(str::to_string);
    }
    Invocation::new(argv, stdin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::ProcessEnv;
    use std::collections::HashMap;

    #[test]
    fn pass_args_appends_unconsumed_tokens() {
        let pattern = Pattern::new("echo hi").pass_args(true);
        let invocation =
            build_invocation(&pattern, "foo", "foo extra1  extra2", &ProcessEnv).unwrap();
        assert_eq!(invocation.argv(), ["echo", "hi", "extra1", "extra2"]);
        assert_eq!(invocation.stdin(), None);
        assert_eq!(invocation.program(), "echo");
        assert_eq!(invocation.args(), ["hi", "extra1", "extra2"]);
    }

    #[test]
    fn pass_stdin_forwards_remaining_text() {
        let pattern = Pattern::new("cat").pass_stdin(true);
        let invocation =
            build_invocation(&pattern, "foo", "foo  some remaining   text", &ProcessEnv).unwrap();
        assert_eq!(invocation.argv(), ["cat"]);
        assert_eq!(invocation.stdin(), Some("some remaining   text"));
    }

    #[test]
    fn pass_stdin_without_remainder_has_no_stdin() {
        let pattern = Pattern::new("cat").pass_stdin(true);
        let invocation = build_invocation(&pattern, "foo", "foo  ", &ProcessEnv).unwrap();
        assert_eq!(invocation.stdin(), None);
    }

    #[test]
    fn empty_key_forwards_whole_input() {
        let args = Pattern::new("echo").pass_args(true);
        let invocation = build_invocation(&args, "", "anything at all", &ProcessEnv).unwrap();
        assert_eq!(invocation.argv(), ["echo", "anything", "at", "all"]);

        let stdin = Pattern::new("wc -w").pass_stdin(true);
        let invocation = build_invocation(&stdin, "", "anything at all", &ProcessEnv).unwrap();
        assert_eq!(invocation.stdin(), Some("anything at all"));
    }

    #[test]
    fn pass_args_takes_precedence_over_stdin() {
        let pattern = Pattern::new("echo").pass_args(true).pass_stdin(true);
        let invocation = build_invocation(&pattern, "foo", "foo a b", &ProcessEnv).unwrap();
        assert_eq!(invocation.argv(), ["echo", "a", "b"]);
        assert_eq!(invocation.stdin(), None);
    }

    #[test]
    fn no_policy_ignores_input() {
        let pattern = Pattern::new("date -u");
        let invocation = build_invocation(&pattern, "now", "now please", &ProcessEnv).unwrap();
        assert_eq!(invocation.argv(), ["date", "-u"]);
        assert_eq!(invocation.stdin(), None);
    }

    #[test]
    fn empty_command_is_invalid() {
        let err = build_invocation(&Pattern::new(""), "foo", "foo", &ProcessEnv).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidInvocation(_)));
        assert_eq!(
            err.to_string(),
            "invalid invocation: command to execute is not specified"
        );
    }

    #[test]
    fn empty_command_with_passed_args_uses_first_arg_as_program() {
        let pattern = Pattern::new("").pass_args(true);
        let invocation = build_invocation(&pattern, "run", "run ls -la", &ProcessEnv).unwrap();
        assert_eq!(invocation.argv(), ["ls", "-la"]);
    }

    #[test]
    fn expand_env_applies_per_token() {
        let env = HashMap::from([
            ("TOOL".to_string(), "/opt/bin/tool".to_string()),
            ("FLAGS".to_string(), "--fast --quiet".to_string()),
        ]);
        let pattern = Pattern::new("$TOOL ${FLAGS} $UNSET run").expand_env(true);
        let invocation = build_invocation(&pattern, "go", "go", &env).unwrap();
        assert_eq!(invocation.argv(), ["/opt/bin/tool", "--fast --quiet", "run"]);
    }

    #[test]
    fn template_is_literal_without_expand_env() {
        let env = HashMap::from([("TOOL".to_string(), "x".to_string())]);
        let invocation = build_invocation(&Pattern::new("echo $TOOL"), "go", "go", &env).unwrap();
        assert_eq!(invocation.argv(), ["echo", "$TOOL"]);
    }

    #[test]
    fn serializes_without_absent_stdin() {
        let invocation = Invocation::new(vec!["date".into()], None).unwrap();
        assert_eq!(
            serde_json::to_value(&invocation).unwrap(),
            serde_json::json!({ "argv": ["date"] })
        );
    }
}
