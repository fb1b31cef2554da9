use once_cell::sync::Lazy;
use regex::Regex;

/// Runs of space, tab, newline, vertical tab, form feed, or carriage return.
static SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\t\n\x0B\x0C\r ]+").expect("separator pattern is valid"));

/// Splits `text` on separator runs, discarding empty tokens.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    SEPARATORS
        .split(text)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Canonical form of a key: its tokens joined by single spaces.
#[must_use]
pub fn canonical_key(text: &str) -> String {
    tokenize(text).join(" ")
}

/// Returns the unsplit text that follows the first `n` tokens of `text`.
///
/// The separator run after the `n`-th token is not part of the remainder;
/// separators inside the remainder are kept verbatim. With `n == 0` the
/// whole text is the remainder. `None` when nothing is left.
#[must_use]
pub fn remainder_after(text: &str, n: usize) -> Option<&str> {
    if n == 0 {
        return (!text.is_empty()).then_some(text);
    }
    let mut seen = 0;
    for sep in SEPARATORS.find_iter(text) {
        if sep.start() == 0 {
            continue;
        }
        seen += 1;
        if seen == n {
            let rest = &text[sep.end()..];
            return (!rest.is_empty()).then_some(rest);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_runs() {
        assert_eq!(tokenize("a   b\tc\n d"), vec!["a", "b", "c", "d"]);
        assert_eq!(tokenize("\x0Bx\x0Cy\r\n"), vec!["x", "y"]);
    }

    #[test]
    fn empty_and_blank_text_have_no_tokens() {
        assert!(tokenize("").is_empty());
        assert!(tokenize(" \t\n ").is_empty());
    }

    #[test]
    fn non_ascii_whitespace_is_not_a_separator() {
        assert_eq!(tokenize("a\u{a0}b c"), vec!["a\u{a0}b", "c"]);
    }

    #[test]
    fn tokenize_is_idempotent() {
        for text in [
            "",
            "   ",
            "foo",
            "  foo bar  ",
            "a\t\tb\nc\r\n d",
            "x\x0B\x0Cy  z",
            "héllo   wörld",
        ] {
            let once = tokenize(text);
            assert_eq!(tokenize(&once.join(" ")), once, "input {text:?}");
        }
    }

    #[test]
    fn canonicalizes_keys() {
        assert_eq!(canonical_key("  say \t hello "), "say hello");
        assert_eq!(canonical_key(""), "");
    }

    #[test]
    fn remainder_keeps_internal_whitespace() {
        let text = "foo  some remaining   text";
        assert_eq!(remainder_after(text, 1), Some("some remaining   text"));
        assert_eq!(remainder_after(text, 2), Some("remaining   text"));
        assert_eq!(remainder_after(text, 4), None);
    }

    #[test]
    fn remainder_skips_leading_separators() {
        assert_eq!(remainder_after("  foo bar", 1), Some("bar"));
    }

    #[test]
    fn remainder_keeps_trailing_whitespace() {
        assert_eq!(remainder_after("foo bar \n", 1), Some("bar \n"));
    }

    #[test]
    fn remainder_absent_when_only_key_or_trailing_separator() {
        assert_eq!(remainder_after("foo", 1), None);
        assert_eq!(remainder_after("foo   ", 1), None);
    }

    #[test]
    fn zero_consumed_tokens_yield_whole_text() {
        assert_eq!(remainder_after(" all of it ", 0), Some(" all of it "));
        assert_eq!(remainder_after("", 0), None);
    }
}
