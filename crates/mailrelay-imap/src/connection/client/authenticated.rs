//! Implementation for the authenticated state.

use tokio::io::{AsyncRead, AsyncWrite};

use super::Client;
use super::states::{Authenticated, Selected};
use crate::Result;
use crate::command::Command;
use crate::response::{Response, UntaggedResponse};
use crate::types::MailboxStatus;

impl<S> Client<S, Authenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Selects a mailbox for read-write access.
    ///
    /// Consumes self and returns a selected client on success.
    pub async fn select(mut self, mailbox: &str) -> Result<(Client<S, Selected>, MailboxStatus)> {
        let responses = self
            .run(&Command::Select {
                mailbox: mailbox.to_string(),
            })
            .await?;
        let status = parse_mailbox_status(&responses);

        Ok((self.transition(Selected::new(mailbox, status)), status))
    }
}

/// Collects EXISTS, RECENT and the read-only response code from a SELECT.
pub(super) fn parse_mailbox_status(responses: &[Response]) -> MailboxStatus {
    let mut status = MailboxStatus::default();

    for response in responses {
        match response {
            Response::Untagged(UntaggedResponse::Exists(n)) => status.exists = *n,
            Response::Untagged(UntaggedResponse::Recent(n)) => status.recent = *n,
            Response::Tagged { text, .. } => {
                status.read_only = text.to_ascii_uppercase().starts_with("[READ-ONLY]");
            }
            _ => {}
        }
    }

    status
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
    fn test_parse_mailbox_status() {
        let responses = vec![
            Response::parse(b"* 172 EXISTS\r\n").unwrap(),
            Response::parse(b"* 1 RECENT\r\n").unwrap(),
            Response::parse(b"* FLAGS (\\Answered \\Seen)\r\n").unwrap(),
            Response::parse(b"A0002 OK [READ-WRITE] SELECT completed\r\n").unwrap(),
        ];
        let status = parse_mailbox_status(&responses);

        assert_eq!(status.exists, 172);
        assert_eq!(status.recent, 1);
        assert!(!status.read_only);
    }

    #[test]
    fn test_parse_mailbox_status_read_only() {
        let responses = vec![Response::parse(b"A0002 OK [READ-ONLY] done\r\n").unwrap()];
        assert!(parse_mailbox_status(&responses).read_only);
    }
}
