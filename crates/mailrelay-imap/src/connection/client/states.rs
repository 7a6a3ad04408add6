//! Type-state markers for IMAP client connection states.
//!
//! `Selected` carries runtime state about the selected mailbox.

use std::sync::Arc;

use crate::types::MailboxStatus;

/// Marker type for the not-authenticated state.
///
/// In this state, only LOGIN is valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotAuthenticated;

/// Marker type for the authenticated state.
///
/// In this state, SELECT is valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authenticated;

/// State for a selected mailbox.
#[derive(Debug, Clone)]
pub struct Selected {
    pub(crate) mailbox: Arc<str>,
    pub(crate) status: MailboxStatus,
}

impl Selected {
    /// Creates a new Selected state.
    #[must_use]
    pub fn new(mailbox: impl Into<Arc<str>>, status: MailboxStatus) -> Self {
        Self {
            mailbox: mailbox.into(),
            status,
        }
    }

    /// Returns the name of the selected mailbox.
    #[must_use]
    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    /// Returns the mailbox status snapshot from SELECT.
    #[must_use]
    pub const fn status(&self) -> &MailboxStatus {
        &self.status
    }
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

    fn _assert_send<T: Send>() {}
    fn _assert_sync<T: Sync>() {}

    #[test]
    fn test_state_markers_are_send_sync() {
        _assert_send::<NotAuthenticated>();
        _assert_sync::<NotAuthenticated>();
        _assert_send::<Authenticated>();
        _assert_sync::<Authenticated>();
        _assert_send::<Selected>();
        _assert_sync::<Selected>();
    }

    #[test]
    fn test_selected_state_accessors() {
        let status = MailboxStatus {
            exists: 42,
            recent: 3,
            read_only: false,
        };
        let selected = Selected::new("INBOX", status);

        assert_eq!(selected.mailbox(), "INBOX");
        assert_eq!(selected.status().exists, 42);
        assert_eq!(selected.status().recent, 3);
        assert!(!selected.status().read_only);
    }
}
