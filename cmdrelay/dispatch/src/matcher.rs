use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use crate::pattern::{Pattern, PatternTable};

/// Key lookup used by [`longest_match`], independent of how patterns are stored.
pub trait PatternLookup {
    /// Whether `key` (canonical form) is configured.
    fn contains_key(&self, key: &str) -> bool;
}

impl PatternLookup for PatternTable {
    fn contains_key(&self, key: &str) -> bool {
        Self::contains_key(self, key)
    }
}

impl<S: BuildHasher> PatternLookup for HashMap<String, Pattern, S> {
    fn contains_key(&self, key: &str) -> bool {
        Self::contains_key(self, key)
    }
}

impl PatternLookup for BTreeMap<String, Pattern> {
    fn contains_key(&self, key: &str) -> bool {
        Self::contains_key(self, key)
    }
}

/// Returns the longest configured key formed by a prefix of `tokens`.
///
/// Every prefix is tried, so a longer match always replaces a shorter one.
/// When no prefix matches, the empty key matches if it is configured.
/// `None` is a dispatch miss.
pub fn longest_match<L>(table: &L, tokens: &[String]) -> Option<String>
where
    L: PatternLookup + ?Sized,
{
    let mut best: Option<String> = None;
    let mut candidate = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            candidate.push(' ');
        }
        candidate.push_str(token);
        if table.contains_key(&candidate) {
            best = Some(candidate.clone());
        }
    }
    best.or_else(|| table.contains_key("").then(String::new))
}
