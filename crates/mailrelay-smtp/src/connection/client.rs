//! Type-state SMTP client.

use std::io;
use std::marker::PhantomData;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

use super::{ServerInfo, SmtpStream};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::{Address, AuthMechanism, Extension, Reply, ReplyCode};

/// Type-state marker for connected state.
#[derive(Debug)]
pub struct Connected;

/// Type-state marker for authenticated state.
#[derive(Debug)]
pub struct Authenticated;

/// Type-state marker for mail transaction started.
#[derive(Debug)]
pub struct MailTransaction;

/// Type-state marker for recipient added.
#[derive(Debug)]
pub struct RecipientAdded;

/// Type-state marker for data mode.
#[derive(Debug)]
pub struct Data;

/// SMTP client with type-state pattern.
#[derive(Debug)]
pub struct Client<S, State> {
    reader: BufReader<S>,
    server_info: ServerInfo,
    _state: PhantomData<State>,
}

impl<S> Client<S, Connected>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a client from a stream and reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the greeting fails or the server refuses
    /// the session.
    pub async fn from_stream(stream: S) -> Result<Self> {
        let mut reader = BufReader::new(stream);
        let greeting = read_reply(&mut reader).await?;
        if !greeting.is_success() {
            return Err(Error::smtp_error(
                greeting.code.as_u16(),
                greeting.message_text(),
            ));
        }

        let hostname = greeting
            .message
            .first()
            .and_then(|msg| msg.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();
        debug!(server = %hostname, "SMTP greeting");

        Ok(Self {
            reader,
            server_info: ServerInfo {
                hostname,
                extensions: Vec::new(),
            },
            _state: PhantomData,
        })
    }

    /// Sends EHLO and discovers server capabilities.
    ///
    /// # Errors
    ///
    /// Returns an error if the EHLO command fails.
    pub async fn ehlo(mut self, client_hostname: &str) -> Result<Self> {
        let reply = self
            .expect_success(Command::Ehlo {
                hostname: client_hostname.to_string(),
            })
            .await?;

        // The first line repeats the greeting; extensions follow.
        self.server_info.extensions = reply
            .message
            .iter()
            .skip(1)
            .map(|line| Extension::parse(line))
            .collect();
        Ok(self)
    }

    /// Authenticates with the preferred mechanism the server offers.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication fails.
    pub async fn authenticate(
        self,
        username: &str,
        password: &str,
    ) -> Result<Client<S, Authenticated>> {
        match self.server_info.preferred_auth() {
            AuthMechanism::Plain => self.auth_plain(username, password).await,
            AuthMechanism::Login => self.auth_login(username, password).await,
        }
    }

    /// Authenticates using the PLAIN mechanism with an initial response.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication fails.
    pub async fn auth_plain(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<S, Authenticated>> {
        let credentials = format!("\0{username}\0{password}");
        self.expect_success(Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some(STANDARD.encode(credentials.as_bytes())),
        })
        .await?;

        debug!(username, "SMTP AUTH PLAIN succeeded");
        Ok(self.transition())
    }

    /// Authenticates using the LOGIN mechanism (two 334 challenges).
    ///
    /// # Errors
    ///
    /// Returns an error if authentication fails.
    pub async fn auth_login(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<S, Authenticated>> {
        let steps = [
            Command::Auth {
                mechanism: AuthMechanism::Login,
                initial_response: None,
            },
            Command::AuthResponse(STANDARD.encode(username.as_bytes())),
        ];
        for command in steps {
            let reply = self.send_command(command).await?;
            if reply.code != ReplyCode::AUTH_CONTINUE {
                return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
            }
        }

        self.expect_success(Command::AuthResponse(STANDARD.encode(password.as_bytes())))
            .await?;

        debug!(username, "SMTP AUTH LOGIN succeeded");
        Ok(self.transition())
    }
}

impl Client<SmtpStream, Connected> {
    /// Upgrades the connection to TLS using STARTTLS and repeats EHLO.
    ///
    /// # Errors
    ///
    /// Returns an error if STARTTLS is not supported or if the upgrade fails.
    pub async fn starttls(mut self, server_hostname: &str, client_hostname: &str) -> Result<Self> {
        if !self.server_info.supports_starttls() {
            return Err(Error::NotSupported("STARTTLS".into()));
        }

        self.expect_success(Command::StartTls).await?;

        let stream = self.reader.into_inner().upgrade_to_tls(server_hostname).await?;
        let upgraded = Self {
            reader: BufReader::new(stream),
            server_info: ServerInfo {
                hostname: self.server_info.hostname,
                extensions: Vec::new(),
            },
            _state: PhantomData,
        };

        upgraded.ehlo(client_hostname).await
    }
}

impl<S> Client<S, Authenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Sends NOOP, used as a liveness probe between transactions.
    ///
    /// # Errors
    ///
    /// Returns an error if the server does not answer 250.
    pub async fn noop(&mut self) -> Result<()> {
        self.expect_success(Command::Noop).await?;
        Ok(())
    }

    /// Starts a mail transaction.
    ///
    /// Announces the message size when the server advertises SIZE.
    ///
    /// # Errors
    ///
    /// Returns an error if the MAIL FROM command fails.
    pub async fn mail_from(
        mut self,
        from: &Address,
        size: Option<usize>,
    ) -> Result<Client<S, MailTransaction>> {
        let size = size.and_then(|len| self.announced_size(len));
        self.expect_success(Command::MailFrom {
            from: from.clone(),
            size,
        })
        .await?;

        Ok(self.transition())
    }

    /// Runs one complete transaction: MAIL FROM, RCPT TO for each recipient,
    /// DATA and the message body.
    ///
    /// The session stays usable after a refused transaction: a reply-level
    /// rejection is followed by RSET. Only connection-level failures (see
    /// [`Error::is_connection_lost`]) and protocol errors leave it unusable.
    ///
    /// # Errors
    ///
    /// Returns an error if the message exceeds the advertised size, there
    /// are no recipients, or any step is rejected.
    pub async fn send_mail(
        &mut self,
        from: &Address,
        recipients: &[Address],
        message: &[u8],
    ) -> Result<()> {
        if let Some(limit) = self.server_info.max_message_size()
            && limit > 0
            && message.len() > limit
        {
            return Err(Error::MessageTooLarge {
                size: message.len(),
                limit,
            });
        }

        if recipients.is_empty() {
            return Err(Error::InvalidAddress("no recipients".into()));
        }

        match self.transaction(from, recipients, message).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_connection_lost() || matches!(e, Error::Protocol(_)) => Err(e),
            Err(e) => {
                debug!(error = %e, "SMTP transaction refused, resetting");
                let reply = self.send_command(Command::Rset).await?;
                if !reply.is_success() {
                    return Err(Error::Protocol(format!(
                        "RSET refused after failed transaction: {} {}",
                        reply.code.as_u16(),
                        reply.message_text()
                    )));
                }
                Err(e)
            }
        }
    }

    async fn transaction(
        &mut self,
        from: &Address,
        recipients: &[Address],
        message: &[u8],
    ) -> Result<()> {
        let size = self.announced_size(message.len());
        self.expect_success(Command::MailFrom {
            from: from.clone(),
            size,
        })
        .await?;
        for to in recipients {
            self.expect_success(Command::RcptTo { to: to.clone() })
                .await?;
        }

        let reply = self.send_command(Command::Data).await?;
        if reply.code != ReplyCode::START_DATA {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }
        self.write_data(message).await
    }
}

impl<S> Client<S, MailTransaction>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Adds a recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: &Address) -> Result<Client<S, RecipientAdded>> {
        self.expect_success(Command::RcptTo { to: to.clone() })
            .await?;
        Ok(self.transition())
    }

    /// Aborts the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RSET command fails.
    pub async fn reset(mut self) -> Result<Client<S, Authenticated>> {
        self.expect_success(Command::Rset).await?;
        Ok(self.transition())
    }
}

impl<S> Client<S, RecipientAdded>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Adds another recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: &Address) -> Result<Self> {
        self.expect_success(Command::RcptTo { to: to.clone() })
            .await?;
        Ok(self)
    }

    /// Begins sending message data.
    ///
    /// # Errors
    ///
    /// Returns an error unless the server answers 354.
    pub async fn data(mut self) -> Result<Client<S, Data>> {
        let reply = self.send_command(Command::Data).await?;

        if reply.code != ReplyCode::START_DATA {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        Ok(self.transition())
    }

    /// Aborts the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RSET command fails.
    pub async fn reset(mut self) -> Result<Client<S, Authenticated>> {
        self.expect_success(Command::Rset).await?;
        Ok(self.transition())
    }
}

impl<S> Client<S, Data>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Sends the message content and completes the transaction.
    ///
    /// Line endings are normalized to CRLF, lines starting with `.` are
    /// dot-stuffed and the terminating `.` line is appended.
    ///
    /// # Errors
    ///
    /// Returns an error if sending the message fails or server rejects it.
    pub async fn send_message(mut self, message: &[u8]) -> Result<Client<S, Authenticated>> {
        self.write_data(message).await?;
        Ok(self.transition())
    }
}

// Common implementation for all states
impl<S, State> Client<S, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Returns the server information.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Sends QUIT and closes the connection (available in any state).
    ///
    /// # Errors
    ///
    /// Returns an error if the QUIT command fails.
    pub async fn quit(mut self) -> Result<()> {
        let reply = self.send_command(Command::Quit).await?;

        if !reply.is_success() && reply.code != ReplyCode::CLOSING {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        Ok(())
    }

    /// SIZE parameter for MAIL FROM, only when the server advertises SIZE.
    fn announced_size(&self, len: usize) -> Option<usize> {
        self.server_info
            .extensions
            .iter()
            .any(|ext| matches!(ext, Extension::Size(_)))
            .then_some(len)
    }

    /// Writes the DATA payload and checks the final reply.
    async fn write_data(&mut self, message: &[u8]) -> Result<()> {
        let payload = encode_data(message);
        let stream = self.reader.get_mut();
        stream.write_all(&payload).await?;
        stream.flush().await?;

        let reply = read_reply(&mut self.reader).await?;
        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        debug!(bytes = message.len(), "SMTP message accepted");
        Ok(())
    }

    async fn send_command(&mut self, cmd: Command) -> Result<Reply> {
        let stream = self.reader.get_mut();
        stream.write_all(&cmd.serialize()).await?;
        stream.flush().await?;
        read_reply(&mut self.reader).await
    }

    async fn expect_success(&mut self, cmd: Command) -> Result<Reply> {
        let reply = self.send_command(cmd).await?;
        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }
        Ok(reply)
    }

    fn transition<Next>(self) -> Client<S, Next> {
        Client {
            reader: self.reader,
            server_info: self.server_info,
            _state: PhantomData,
        }
    }
}

/// Reads one (possibly multi-line) reply.
async fn read_reply<S>(reader: &mut BufReader<S>) -> Result<Reply>
where
    S: AsyncRead + Unpin,
{
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed",
            )));
        }

        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        let is_last = is_last_reply_line(line);
        lines.push(line.to_string());
        if is_last {
            break;
        }
    }

    parse_reply(&lines)
}

/// Encodes a message for the DATA phase.
fn encode_data(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + message.len() / 64 + 5);
    let body = message
        .strip_suffix(b"\r\n")
        .or_else(|| message.strip_suffix(b"\n"))
        .unwrap_or(message);

    if !body.is_empty() {
        for line in body.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.first() == Some(&b'.') {
                out.push(b'.');
            }
            out.extend_from_slice(line);
            out.extend_from_slice(b"\r\n");
        }
    }

    out.extend_from_slice(b".\r\n");
    out
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
    use tokio_test::io::Builder;

    #[test]
    fn test_encode_data_normalizes_and_stuffs() {
        assert_eq!(
            encode_data(b"Subject: x\n\n.hidden\r\nend\n"),
            b"Subject: x\r\n\r\n..hidden\r\nend\r\n.\r\n"
        );
    }

    #[test]
    fn test_encode_data_empty() {
        assert_eq!(encode_data(b""), b".\r\n");
    }

    #[tokio::test]
    async fn test_greeting_rejected() {
        let mock = Builder::new().read(b"554 No SMTP service here\r\n").build();
        let err = Client::from_stream(mock).await.unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_eof_during_reply_is_io_error() {
        let mock = Builder::new().read(b"220-smtp.x.org\r\n").build();
        let err = Client::from_stream(mock).await.unwrap_err();
        assert!(err.is_connection_lost());
    }

    #[tokio::test]
    async fn test_auth_login_flow() {
        let mock = Builder::new()
            .read(b"220 smtp.x.org ESMTP\r\n")
            .write(b"EHLO relay.x.org\r\n")
            .read(b"250-smtp.x.org\r\n250 AUTH LOGIN\r\n")
            .write(b"AUTH LOGIN\r\n")
            .read(b"334 VXNlcm5hbWU6\r\n")
            .write(b"dXNlcg==\r\n")
            .read(b"334 UGFzc3dvcmQ6\r\n")
            .write(b"cGFzcw==\r\n")
            .read(b"235 Authentication succeeded\r\n")
            .build();

        let client = Client::from_stream(mock).await.unwrap();
        let client = client.ehlo("relay.x.org").await.unwrap();
        assert_eq!(client.server_info().hostname, "smtp.x.org");
        client.authenticate("user", "pass").await.unwrap();
    }

    #[tokio::test]
    async fn test_auth_plain_rejected() {
        let mock = Builder::new()
            .read(b"220 smtp.x.org ESMTP\r\n")
            .write(b"EHLO relay.x.org\r\n")
            .read(b"250-smtp.x.org\r\n250 AUTH PLAIN LOGIN\r\n")
            .write(b"AUTH PLAIN AHVzZXIAYmFk\r\n")
            .read(b"535 5.7.8 Authentication credentials invalid\r\n")
            .build();

        let client = Client::from_stream(mock).await.unwrap();
        let client = client.ehlo("relay.x.org").await.unwrap();
        let err = client.authenticate("user", "bad").await.unwrap_err();
        assert!(matches!(err, Error::SmtpError { code: 535, .. }));
    }

    #[tokio::test]
    async fn test_message_too_large_is_rejected_locally() {
        let mock = Builder::new()
            .read(b"220 smtp.x.org ESMTP\r\n")
            .write(b"EHLO relay.x.org\r\n")
            .read(b"250-smtp.x.org\r\n250-SIZE 10\r\n250 AUTH PLAIN\r\n")
            .write(b"AUTH PLAIN AHUAcA==\r\n")
            .read(b"235 ok\r\n")
            .build();

        let client = Client::from_stream(mock).await.unwrap();
        let client = client.ehlo("relay.x.org").await.unwrap();
        let mut client = client.authenticate("u", "p").await.unwrap();

        let from = Address::new("relay@x.org").unwrap();
        let to = Address::new("a@x.org").unwrap();
        let err = client
            .send_mail(&from, &[to], b"this message is too long")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge { limit: 10, .. }));
        assert!(!err.is_connection_lost());
    }
}
