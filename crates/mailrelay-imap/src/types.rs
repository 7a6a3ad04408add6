//! Core IMAP types.
//!
//! Sequence numbers, message flags and the mailbox status reported by SELECT.

use std::num::NonZeroU32;

/// Message sequence number.
///
/// Sequence numbers are assigned to messages in a mailbox starting from 1.
/// They are ephemeral and change when messages are expunged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeqNum(pub NonZeroU32);

impl SeqNum {
    /// Creates a new sequence number.
    ///
    /// Returns `None` if the value is 0.
    #[must_use]
    pub fn new(n: u32) -> Option<Self> {
        NonZeroU32::new(n).map(Self)
    }

    /// Returns the underlying value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl std::fmt::Display for SeqNum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    /// `\Seen` - message has been read.
    Seen,
    /// `\Answered` - message has been answered.
    Answered,
    /// `\Flagged` - message is flagged for attention.
    Flagged,
    /// `\Deleted` - message is marked for removal.
    Deleted,
    /// `\Draft` - message is a draft.
    Draft,
    /// Server or user defined keyword.
    Keyword(String),
}

impl Flag {
    /// Returns the wire representation of the flag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Keyword(k) => k,
        }
    }

    /// Parses a flag from its wire representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "\\seen" => Self::Seen,
            "\\answered" => Self::Answered,
            "\\flagged" => Self::Flagged,
            "\\deleted" => Self::Deleted,
            "\\draft" => Self::Draft,
            _ => Self::Keyword(s.to_string()),
        }
    }
}

/// Mailbox state reported by SELECT.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    /// Number of messages in the mailbox.
    pub exists: u32,
    /// Number of messages with the `\Recent` flag.
    pub recent: u32,
    /// Whether the server opened the mailbox read-only.
    pub read_only: bool,
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_num_rejects_zero() {
        assert!(SeqNum::new(0).is_none());
        assert_eq!(SeqNum::new(7).unwrap().get(), 7);
        assert_eq!(SeqNum::new(42).unwrap().to_string(), "42");
    }

    #[test]
    fn test_flag_round_trip_names() {
        assert_eq!(Flag::Seen.as_str(), "\\Seen");
        assert_eq!(Flag::parse("\\SEEN"), Flag::Seen);
        assert_eq!(Flag::parse("$Forwarded"), Flag::Keyword("$Forwarded".into()));
    }
}
