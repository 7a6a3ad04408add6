//! IMAP command builder.
//!
//! This module provides types and serialization for the IMAP commands the
//! client issues.

mod tag_generator;

use crate::types::{Flag, SeqNum};

pub use tag_generator::TagGenerator;

/// IMAP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// CAPABILITY command.
    Capability,
    /// NOOP command.
    Noop,
    /// LOGOUT command.
    Logout,
    /// LOGIN command.
    Login {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
    /// SELECT command.
    Select {
        /// Mailbox to select.
        mailbox: String,
    },
    /// CLOSE command.
    Close,
    /// SEARCH command.
    Search {
        /// Search criteria.
        criteria: SearchCriteria,
    },
    /// FETCH command for a single message.
    Fetch {
        /// Message sequence number.
        seq: SeqNum,
        /// Items to fetch.
        items: Vec<FetchAttribute>,
    },
    /// STORE command for a single message.
    Store {
        /// Message sequence number.
        seq: SeqNum,
        /// Store action.
        action: StoreAction,
        /// Silent mode (no untagged FETCH response).
        silent: bool,
    },
}

/// SEARCH criteria.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchCriteria {
    /// All messages.
    All,
    /// Messages without the `\Seen` flag.
    Unseen,
    /// Messages with the `\Seen` flag.
    Seen,
    /// Messages whose From header contains the string.
    From(String),
}

/// FETCH attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchAttribute {
    /// Message flags.
    Flags,
    /// Full message, sets `\Seen` as a side effect.
    Rfc822,
    /// Full message without touching `\Seen` (`BODY.PEEK[]`).
    BodyPeek,
}

/// STORE action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAction {
    /// Add flags (`+FLAGS`).
    Add(Vec<Flag>),
    /// Remove flags (`-FLAGS`).
    Remove(Vec<Flag>),
    /// Replace flags (`FLAGS`).
    Replace(Vec<Flag>),
}

impl Command {
    /// Serializes the command to bytes with the given tag.
    #[must_use]
    pub fn serialize(&self, tag: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(tag.as_bytes());
        buf.push(b' ');

        match self {
            Self::Capability => buf.extend_from_slice(b"CAPABILITY"),
            Self::Noop => buf.extend_from_slice(b"NOOP"),
            Self::Logout => buf.extend_from_slice(b"LOGOUT"),
            Self::Close => buf.extend_from_slice(b"CLOSE"),

            Self::Login { username, password } => {
                buf.extend_from_slice(b"LOGIN ");
                write_astring(&mut buf, username);
                buf.push(b' ');
                write_astring(&mut buf, password);
            }

            Self::Select { mailbox } => {
                buf.extend_from_slice(b"SELECT ");
                write_astring(&mut buf, mailbox);
            }

            Self::Search { criteria } => {
                buf.extend_from_slice(b"SEARCH ");
                write_search_criteria(&mut buf, criteria);
            }

            Self::Fetch { seq, items } => {
                buf.extend_from_slice(format!("FETCH {seq} ").as_bytes());
                let many = items.len() > 1;
                if many {
                    buf.push(b'(');
                }
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        buf.push(b' ');
                    }
                    buf.extend_from_slice(item.as_str().as_bytes());
                }
                if many {
                    buf.push(b')');
                }
            }

            Self::Store {
                seq,
                action,
                silent,
            } => {
                buf.extend_from_slice(format!("STORE {seq} ").as_bytes());
                write_store_action(&mut buf, action, *silent);
            }
        }

        buf.extend_from_slice(b"\r\n");
        buf
    }

    /// Returns a log-safe rendering of the command (credentials masked).
    #[must_use]
    pub fn redacted(&self) -> String {
        match self {
            Self::Login { username, .. } => format!("LOGIN {username} ****"),
            other => {
                let bytes = other.serialize("");
                String::from_utf8_lossy(&bytes).trim().to_string()
            }
        }
    }
}

impl FetchAttribute {
    /// Returns the wire name of the attribute.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Flags => "FLAGS",
            Self::Rfc822 => "RFC822",
            Self::BodyPeek => "BODY.PEEK[]",
        }
    }
}

/// Writes an astring (atom or quoted string).
fn write_astring(buf: &mut Vec<u8>, s: &str) {
    if s.is_empty() || s.bytes().any(needs_quoting) {
        buf.push(b'"');
        for b in s.bytes() {
            if b == b'"' || b == b'\\' {
                buf.push(b'\\');
            }
            buf.push(b);
        }
        buf.push(b'"');
    } else {
        buf.extend_from_slice(s.as_bytes());
    }
}

/// Returns true if the byte cannot appear in an atom.
const fn needs_quoting(b: u8) -> bool {
    matches!(
        b,
        b' ' | b'"' | b'\\' | b'(' | b')' | b'{' | b'%' | b'*' | b']'
    ) || b < 0x20
        || b >= 0x7F
}

fn write_search_criteria(buf: &mut Vec<u8>, criteria: &SearchCriteria) {
    match criteria {
        SearchCriteria::All => buf.extend_from_slice(b"ALL"),
        SearchCriteria::Unseen => buf.extend_from_slice(b"UNSEEN"),
        SearchCriteria::Seen => buf.extend_from_slice(b"SEEN"),
        SearchCriteria::From(addr) => {
            buf.extend_from_slice(b"FROM ");
            write_astring(buf, addr);
        }
    }
}

fn write_store_action(buf: &mut Vec<u8>, action: &StoreAction, silent: bool) {
    let (prefix, flags) = match action {
        StoreAction::Add(flags) => ("+FLAGS", flags),
        StoreAction::Remove(flags) => ("-FLAGS", flags),
        StoreAction::Replace(flags) => ("FLAGS", flags),
    };
    buf.extend_from_slice(prefix.as_bytes());
    if silent {
        buf.extend_from_slice(b".SILENT");
    }
    buf.extend_from_slice(b" (");
    for (i, flag) in flags.iter().enumerate() {
        if i > 0 {
            buf.push(b' ');
        }
        buf.extend_from_slice(flag.as_str().as_bytes());
    }
    buf.push(b')');
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

    fn seq(n: u32) -> SeqNum {
        SeqNum::new(n).unwrap()
    }

    #[test]
    fn test_login_quotes_special_characters() {
        let cmd = Command::Login {
            username: "brev@example.org".to_string(),
            password: "pa ss\"word".to_string(),
        };
        assert_eq!(
            cmd.serialize("A0001"),
            b"A0001 LOGIN brev@example.org \"pa ss\\\"word\"\r\n"
        );
    }

    #[test]
    fn test_login_redacts_password() {
        let cmd = Command::Login {
            username: "brev@example.org".to_string(),
            password: "secret".to_string(),
        };
        assert_eq!(cmd.redacted(), "LOGIN brev@example.org ****");
        assert!(!cmd.redacted().contains("secret"));
    }

    #[test]
    fn test_select_inbox() {
        let cmd = Command::Select {
            mailbox: "INBOX".to_string(),
        };
        assert_eq!(cmd.serialize("A0002"), b"A0002 SELECT INBOX\r\n");
    }

    #[test]
    fn test_search_unseen() {
        let cmd = Command::Search {
            criteria: SearchCriteria::Unseen,
        };
        assert_eq!(cmd.serialize("A0003"), b"A0003 SEARCH UNSEEN\r\n");
    }

    #[test]
    fn test_search_from_quotes_value() {
        let cmd = Command::Search {
            criteria: SearchCriteria::From("Jane Doe".to_string()),
        };
        assert_eq!(cmd.serialize("A0004"), b"A0004 SEARCH FROM \"Jane Doe\"\r\n");
    }

    #[test]
    fn test_fetch_single_and_multiple_items() {
        let single = Command::Fetch {
            seq: seq(3),
            items: vec![FetchAttribute::BodyPeek],
        };
        assert_eq!(single.serialize("A0005"), b"A0005 FETCH 3 BODY.PEEK[]\r\n");

        let multiple = Command::Fetch {
            seq: seq(3),
            items: vec![FetchAttribute::Flags, FetchAttribute::Rfc822],
        };
        assert_eq!(
            multiple.serialize("A0006"),
            b"A0006 FETCH 3 (FLAGS RFC822)\r\n"
        );
    }

    #[test]
    fn test_store_add_seen() {
        let cmd = Command::Store {
            seq: seq(12),
            action: StoreAction::Add(vec![Flag::Seen]),
            silent: false,
        };
        assert_eq!(cmd.serialize("A0007"), b"A0007 STORE 12 +FLAGS (\\Seen)\r\n");
    }

    #[test]
    fn test_store_remove_silent() {
        let cmd = Command::Store {
            seq: seq(1),
            action: StoreAction::Remove(vec![Flag::Seen, Flag::Flagged]),
            silent: true,
        };
        assert_eq!(
            cmd.serialize("A0008"),
            b"A0008 STORE 1 -FLAGS.SILENT (\\Seen \\Flagged)\r\n"
        );
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(Command::Noop.serialize("A0009"), b"A0009 NOOP\r\n");
        assert_eq!(Command::Logout.serialize("A0010"), b"A0010 LOGOUT\r\n");
        assert_eq!(Command::Close.serialize("A0011"), b"A0011 CLOSE\r\n");
    }
}
