//! Implementation for the not-authenticated state.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::Client;
use super::states::{Authenticated, NotAuthenticated};
use crate::command::{Command, TagGenerator};
use crate::connection::framed::FramedStream;
use crate::response::{Response, Status, UntaggedResponse};
use crate::{Error, Result};

impl<S> Client<S, NotAuthenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new client from a connected stream.
    ///
    /// Reads the server greeting. A `BYE` greeting is an error.
    pub async fn from_stream(stream: S) -> Result<Self> {
        let mut framed = FramedStream::new(stream);

        match framed.read_response().await? {
            Response::Untagged(UntaggedResponse::Status {
                status: Status::Ok | Status::PreAuth,
                text,
            }) => debug!(greeting = %text, "IMAP greeting"),
            Response::Untagged(UntaggedResponse::Status {
                status: Status::Bye,
                text,
            }) => return Err(Error::Bye(text)),
            other => {
                return Err(Error::Protocol(format!("unexpected greeting: {other:?}")));
            }
        }

        Ok(Self {
            stream: framed,
            tag_gen: TagGenerator::default(),
            capabilities: Vec::new(),
            state: NotAuthenticated,
        })
    }

    /// Authenticates with the server using LOGIN.
    ///
    /// A `NO` completion is reported as [`Error::Auth`].
    pub async fn login(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<S, Authenticated>> {
        let command = Command::Login {
            username: username.to_string(),
            password: password.to_string(),
        };

        match self.run(&command).await {
            Ok(_) => {}
            Err(Error::No(text)) => return Err(Error::Auth(text)),
            Err(e) => return Err(e),
        }

        debug!(username, "IMAP login succeeded");
        Ok(self.transition(Authenticated))
    }
}
