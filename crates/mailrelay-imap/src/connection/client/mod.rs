//! Type-state IMAP client connection.
//!
//! The connection states are:
//!
//! - `NotAuthenticated`: after the greeting
//! - `Authenticated`: after a successful LOGIN
//! - `Selected`: after a successful SELECT
//!
//! Each state only exposes methods that are valid for that state.

#![allow(clippy::missing_errors_doc)]

mod authenticated;
mod not_authenticated;
mod selected;
mod states;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

pub use self::states::{Authenticated, NotAuthenticated, Selected};
use super::framed::{FramedStream, ResponseAccumulator};
use crate::command::{Command, TagGenerator};
use crate::response::{Response, Status, UntaggedResponse};
use crate::{Error, Result};

/// IMAP client connection with type-state.
///
/// The type parameter `State` tracks the connection state at compile time.
pub struct Client<S, State> {
    pub(crate) stream: FramedStream<S>,
    pub(crate) tag_gen: TagGenerator,
    pub(crate) capabilities: Vec<String>,
    pub(crate) state: State,
}

impl<S, State: std::fmt::Debug> std::fmt::Debug for Client<S, State> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("tag_gen", &self.tag_gen)
            .field("capabilities", &self.capabilities)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Shared implementation for all states.
impl<S, State> Client<S, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Returns the capabilities the server has announced so far.
    #[must_use]
    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    /// Returns true if the server announced the capability (case-insensitive).
    #[must_use]
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.eq_ignore_ascii_case(name))
    }

    /// Sends a NOOP command, used as a liveness probe.
    pub async fn noop(&mut self) -> Result<()> {
        self.run(&Command::Noop).await?;
        Ok(())
    }

    /// Sends LOGOUT and drops the connection.
    ///
    /// The server answers with `* BYE` before the tagged OK; both count as
    /// success.
    pub async fn logout(mut self) -> Result<()> {
        match self.run(&Command::Logout).await {
            Ok(_) | Err(Error::Bye(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Issues a command and waits for its tagged completion.
    ///
    /// Returns all responses (untagged first, tagged last) when the
    /// completion is OK.
    pub(crate) async fn run(&mut self, command: &Command) -> Result<Vec<Response>> {
        let tag = self.tag_gen.next_tag();
        debug!(tag = %tag, command = %command.redacted(), "IMAP command");

        self.stream.write_command(&command.serialize(&tag)).await?;

        let mut accumulator = ResponseAccumulator::new(tag.as_str());
        let responses = accumulator.read_until_tagged(&mut self.stream).await?;
        self.absorb_capabilities(&responses);
        Self::check_tagged_ok(&responses, &tag)?;
        Ok(responses)
    }

    fn absorb_capabilities(&mut self, responses: &[Response]) {
        for response in responses {
            if let Response::Untagged(UntaggedResponse::Capability(caps)) = response {
                self.capabilities.clone_from(caps);
            }
        }
    }

    /// Checks that the tagged response is OK.
    pub(crate) fn check_tagged_ok(responses: &[Response], tag: &str) -> Result<()> {
        for response in responses.iter().rev() {
            if let Response::Tagged {
                tag: resp_tag,
                status,
                text,
            } = response
                && resp_tag == tag
            {
                return match status {
                    Status::Ok | Status::PreAuth => Ok(()),
                    Status::No => Err(Error::No(text.clone())),
                    Status::Bad => Err(Error::Bad(text.clone())),
                    Status::Bye => Err(Error::Bye(text.clone())),
                };
            }
        }

        Err(Error::Protocol("missing tagged response".to_string()))
    }

    /// Moves the connection into another state.
    pub(crate) fn transition<Next>(self, state: Next) -> Client<S, Next> {
        Client {
            stream: self.stream,
            tag_gen: self.tag_gen,
            capabilities: self.capabilities,
            state,
        }
    }
}
