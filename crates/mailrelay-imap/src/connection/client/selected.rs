//! Implementation for the selected state.

use tokio::io::{AsyncRead, AsyncWrite};

use super::Client;
use super::states::{Authenticated, Selected};
use crate::command::{Command, FetchAttribute, SearchCriteria, StoreAction};
use crate::response::{Response, UntaggedResponse};
use crate::types::{MailboxStatus, SeqNum};
use crate::{Error, Result};

impl<S> Client<S, Selected>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Returns the selected mailbox name.
    #[must_use]
    pub fn mailbox(&self) -> &str {
        self.state.mailbox()
    }

    /// Returns the status snapshot taken at SELECT time.
    #[must_use]
    pub const fn mailbox_status(&self) -> &MailboxStatus {
        self.state.status()
    }

    /// Closes the current mailbox and returns to authenticated state.
    pub async fn close(mut self) -> Result<Client<S, Authenticated>> {
        self.run(&Command::Close).await?;
        Ok(self.transition(Authenticated))
    }

    /// Searches for messages matching the criteria.
    ///
    /// Returns sequence numbers in server order.
    pub async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<SeqNum>> {
        let responses = self
            .run(&Command::Search {
                criteria: criteria.clone(),
            })
            .await?;

        let mut results = Vec::new();
        for response in responses {
            if let Response::Untagged(UntaggedResponse::Search(ids)) = response {
                results.extend(ids);
            }
        }
        Ok(results)
    }

    /// Fetches the full raw message without setting `\Seen`.
    pub async fn fetch_message(&mut self, seq: SeqNum) -> Result<Vec<u8>> {
        let responses = self
            .run(&Command::Fetch {
                seq,
                items: vec![FetchAttribute::BodyPeek],
            })
            .await?;

        responses
            .into_iter()
            .find_map(|response| match response {
                Response::Untagged(UntaggedResponse::Fetch {
                    seq: got,
                    body: Some(body),
                }) if got == seq => Some(body),
                _ => None,
            })
            .ok_or(Error::MissingBody(seq))
    }

    /// Alters the flags of one message.
    pub async fn store(&mut self, seq: SeqNum, action: &StoreAction) -> Result<()> {
        self.run(&Command::Store {
            seq,
            action: action.clone(),
            silent: true,
        })
        .await?;
        Ok(())
    }
}
