/// Counts messages admitted by one relay loop and enforces an optional limit.
///
/// Owned by the loop and passed by `&mut`, never shared.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageBudget {
    limit: Option<u64>,
    admitted: u64,
}

impl MessageBudget {
    /// A budget that never runs out.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            limit: None,
            admitted: 0,
        }
    }

    /// A budget admitting at most `limit` messages.
    #[must_use]
    pub const fn limited(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            admitted: 0,
        }
    }

    /// Interprets a configured maximum, where `0` means unlimited.
    #[must_use]
    pub const fn from_setting(max_messages: u64) -> Self {
        if max_messages == 0 {
            Self::unlimited()
        } else {
            Self::limited(max_messages)
        }
    }

    /// Counts one received message and returns its position in the run, from 1.
    ///
    /// Callers check [`Self::is_exhausted`] before pulling a message, so a
    /// message is never received that the budget cannot take.
    pub fn admit(&mut self) -> u64 {
        self.admitted += 1;
        self.admitted
    }

    /// Whether no further message can be admitted.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.limit.is_some_and(|limit| self.admitted >= limit)
    }

    /// Messages admitted so far.
    #[must_use]
    pub const fn admitted(&self) -> u64 {
        self.admitted
    }

    /// Messages still admissible, `None` when unlimited.
    #[must_use]
    pub fn remaining(&self) -> Option<u64> {
        self.limit.map(|limit| limit.saturating_sub(self.admitted))
    }
}
