//! Mailbox and relay connection handles.
//!
//! Each handle owns at most one live session. A session whose in-flight
//! operation failed at the connection level is dropped, never reused; the
//! next [`ensure_alive`](Inbox::ensure_alive) opens a fresh one.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use mailrelay_imap::{
    Client as ImapClient, ImapStream, SearchCriteria, Selected, SeqNum, StoreAction,
};
use mailrelay_imap::{Flag, connection as imap_connection};
use mailrelay_smtp::{Address, Authenticated, Client as SmtpClient, SmtpStream};
use tracing::{debug, info, warn};

use crate::config::{Credentials, ImapConfig, Security, SmtpConfig};
use crate::error::{Error, Result};

/// Outcome of closing a handle. Informational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Teardown {
    /// There was no session to close.
    AlreadyClosed,
    /// The session was closed cleanly.
    Closed,
    /// The goodbye exchange failed; the session is gone regardless.
    Failed(String),
}

/// Read side: the watched mailbox.
#[async_trait]
pub trait Inbox: Send {
    /// Closes any current session and opens a fresh, selected one.
    async fn connect(&mut self) -> Result<()>;

    /// Probes the session and reconnects when it is missing or dead.
    async fn ensure_alive(&mut self) -> Result<()>;

    /// Sequence numbers of messages without `\Seen`, in server order.
    async fn search_unseen(&mut self) -> Result<Vec<SeqNum>>;

    /// Full raw message, without setting `\Seen`.
    async fn fetch(&mut self, seq: SeqNum) -> Result<Vec<u8>>;

    /// Sets `\Seen` on a message.
    async fn mark_seen(&mut self, seq: SeqNum) -> Result<()>;

    /// Closes the session.
    async fn close(&mut self) -> Teardown;
}

/// Write side: the outgoing relay.
#[async_trait]
pub trait Outbox: Send {
    /// Closes any current session and opens a fresh, authenticated one.
    async fn connect(&mut self) -> Result<()>;

    /// Probes the session and reconnects when it is missing or dead.
    async fn ensure_alive(&mut self) -> Result<()>;

    /// Sends a complete message to one envelope recipient.
    async fn send(&mut self, recipient: &str, message: &[u8]) -> Result<()>;

    /// Closes the session.
    async fn close(&mut self) -> Teardown;
}

/// Both handles, owned together by the service.
#[derive(Debug)]
pub struct Transport<I, O> {
    /// Mailbox handle.
    pub inbox: I,
    /// Relay handle.
    pub outbox: O,
}

impl<I: Inbox, O: Outbox> Transport<I, O> {
    /// Bundles two handles.
    pub const fn new(inbox: I, outbox: O) -> Self {
        Self { inbox, outbox }
    }

    /// Opens both sessions, closing whatever was opened if either fails.
    ///
    /// # Errors
    ///
    /// Returns the first connection error.
    pub async fn connect(&mut self) -> Result<()> {
        if let Err(e) = self.inbox.connect().await {
            self.close().await;
            return Err(e);
        }
        if let Err(e) = self.outbox.connect().await {
            self.close().await;
            return Err(e);
        }
        Ok(())
    }

    /// Runs the liveness check on both handles.
    ///
    /// # Errors
    ///
    /// Returns an error if a dead handle cannot be re-established.
    pub async fn ensure_alive(&mut self) -> Result<()> {
        self.inbox.ensure_alive().await?;
        self.outbox.ensure_alive().await
    }

    /// Reconnects both handles, logging failures instead of returning them.
    pub async fn reconnect_best_effort(&mut self) {
        if let Err(e) = self.inbox.connect().await {
            warn!(error = %e, "Mailbox reconnect failed");
        }
        if let Err(e) = self.outbox.connect().await {
            warn!(error = %e, "Relay reconnect failed");
        }
    }

    /// Closes both handles.
    pub async fn close(&mut self) {
        let inbox = self.inbox.close().await;
        let outbox = self.outbox.close().await;
        debug!(?inbox, ?outbox, "Transport closed");
    }
}

/// Bounds a fallible operation by `limit`.
async fn with_timeout<T, E>(
    limit: Duration,
    operation: &'static str,
    future: impl Future<Output = std::result::Result<T, E>> + Send,
) -> Result<T>
where
    Error: From<E>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| Error::Timeout {
            operation,
            after: limit,
        })?
        .map_err(Error::from)
}

type SelectedClient = ImapClient<ImapStream, Selected>;

/// IMAP-backed [`Inbox`].
#[derive(Debug)]
pub struct ImapInbox {
    config: ImapConfig,
    credentials: Credentials,
    timeout: Duration,
    client: Option<SelectedClient>,
}

impl ImapInbox {
    /// Creates a disconnected handle.
    #[must_use]
    pub const fn new(config: ImapConfig, credentials: Credentials, timeout: Duration) -> Self {
        Self {
            config,
            credentials,
            timeout,
            client: None,
        }
    }

    /// Returns true while a session is held.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn session(&mut self) -> Result<&mut SelectedClient> {
        self.client.as_mut().ok_or(Error::NotConnected("mailbox"))
    }

    /// Drops the session when `result` shows it is unusable.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result
            && e.is_connection_lost()
        {
            warn!(error = %e, "Dropping mailbox session");
            self.client = None;
        }
        result
    }
}

async fn open_mailbox(config: &ImapConfig, credentials: &Credentials) -> Result<SelectedClient> {
    let (host, port) = (config.host.as_str(), config.port());
    let stream = match config.security {
        Security::Tls => imap_connection::connect_tls(host, port).await?,
        Security::None => imap_connection::connect_plain(host, port).await?,
        Security::StartTls => {
            return Err(Error::Config(
                "STARTTLS is not supported for the mailbox".to_string(),
            ));
        }
    };

    let client = ImapClient::from_stream(stream)
        .await?
        .login(&credentials.username, &credentials.password)
        .await?;
    let (client, status) = client.select(&config.mailbox).await?;

    info!(
        host,
        security = config.security.display_name(),
        mailbox = %config.mailbox,
        exists = status.exists,
        "Mailbox connected"
    );
    Ok(client)
}

#[async_trait]
impl Inbox for ImapInbox {
    async fn connect(&mut self) -> Result<()> {
        self.close().await;
        let client = with_timeout(
            self.timeout,
            "mailbox connect",
            open_mailbox(&self.config, &self.credentials),
        )
        .await?;
        self.client = Some(client);
        Ok(())
    }

    async fn ensure_alive(&mut self) -> Result<()> {
        let timeout = self.timeout;
        let alive = match self.client.as_mut() {
            Some(client) => match with_timeout(timeout, "mailbox NOOP", client.noop()).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Mailbox connection lost, reconnecting");
                    false
                }
            },
            None => {
                warn!("Mailbox not connected, reconnecting");
                false
            }
        };

        if !alive {
            self.client = None;
            self.connect().await?;
        }
        Ok(())
    }

    async fn search_unseen(&mut self) -> Result<Vec<SeqNum>> {
        let timeout = self.timeout;
        let result = match self.session() {
            Ok(client) => {
                with_timeout(timeout, "SEARCH", client.search(&SearchCriteria::Unseen)).await
            }
            Err(e) => Err(e),
        };
        self.settle(result)
    }

    async fn fetch(&mut self, seq: SeqNum) -> Result<Vec<u8>> {
        let timeout = self.timeout;
        let result = match self.session() {
            Ok(client) => with_timeout(timeout, "FETCH", client.fetch_message(seq)).await,
            Err(e) => Err(e),
        };
        self.settle(result)
    }

    async fn mark_seen(&mut self, seq: SeqNum) -> Result<()> {
        let timeout = self.timeout;
        let action = StoreAction::Add(vec![Flag::Seen]);
        let result = match self.session() {
            Ok(client) => with_timeout(timeout, "STORE", client.store(seq, &action)).await,
            Err(e) => Err(e),
        };
        self.settle(result)
    }

    async fn close(&mut self) -> Teardown {
        let teardown = match self.client.take() {
            None => Teardown::AlreadyClosed,
            Some(client) => match with_timeout(self.timeout, "LOGOUT", client.logout()).await {
                Ok(()) => Teardown::Closed,
                Err(e) => Teardown::Failed(e.to_string()),
            },
        };
        debug!(?teardown, "Mailbox teardown");
        teardown
    }
}

type RelayClient = SmtpClient<SmtpStream, Authenticated>;

/// SMTP-backed [`Outbox`].
#[derive(Debug)]
pub struct SmtpOutbox {
    config: SmtpConfig,
    credentials: Credentials,
    from: Address,
    timeout: Duration,
    client: Option<RelayClient>,
}

impl SmtpOutbox {
    /// Creates a disconnected handle sending as `from`.
    ///
    /// # Errors
    ///
    /// Returns an error if `from` is not a usable envelope address.
    pub fn new(
        config: SmtpConfig,
        credentials: Credentials,
        from: &str,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            config,
            credentials,
            from: Address::new(from)?,
            timeout,
            client: None,
        })
    }

    /// Returns true while a session is held.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Drops the session when `result` shows it is unusable. A refused
    /// transaction has already been reset and keeps the session.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result
            && e.is_connection_lost()
        {
            warn!(error = %e, "Dropping relay session");
            self.client = None;
        }
        result
    }
}

async fn open_relay(config: &SmtpConfig, credentials: &Credentials) -> Result<RelayClient> {
    let (host, port) = (config.host.as_str(), config.port());
    let stream = match config.security {
        Security::Tls => mailrelay_smtp::connection::connect_tls(host, port).await?,
        Security::StartTls | Security::None => {
            mailrelay_smtp::connection::connect(host, port).await?
        }
    };

    let client = SmtpClient::from_stream(stream)
        .await?
        .ehlo(&config.helo_name)
        .await?;
    let client = if config.security == Security::StartTls {
        client.starttls(host, &config.helo_name).await?
    } else {
        client
    };

    let mechanism = client.server_info().preferred_auth();
    let client = client
        .authenticate(&credentials.username, &credentials.password)
        .await?;

    info!(
        host,
        security = config.security.display_name(),
        ?mechanism,
        "Relay connected"
    );
    Ok(client)
}

#[async_trait]
impl Outbox for SmtpOutbox {
    async fn connect(&mut self) -> Result<()> {
        self.close().await;
        let client = with_timeout(
            self.timeout,
            "relay connect",
            open_relay(&self.config, &self.credentials),
        )
        .await?;
        self.client = Some(client);
        Ok(())
    }

    async fn ensure_alive(&mut self) -> Result<()> {
        let timeout = self.timeout;
        let alive = match self.client.as_mut() {
            Some(client) => match with_timeout(timeout, "relay NOOP", client.noop()).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Relay connection lost, reconnecting");
                    false
                }
            },
            None => {
                warn!("Relay not connected, reconnecting");
                false
            }
        };

        if !alive {
            self.client = None;
            self.connect().await?;
        }
        Ok(())
    }

    async fn send(&mut self, recipient: &str, message: &[u8]) -> Result<()> {
        let to = Address::new(recipient)?;
        let timeout = self.timeout;
        let client = self.client.as_mut().ok_or(Error::NotConnected("relay"))?;
        let result = with_timeout(
            timeout,
            "send",
            client.send_mail(&self.from, std::slice::from_ref(&to), message),
        )
        .await;
        self.settle(result)
    }

    async fn close(&mut self) -> Teardown {
        let teardown = match self.client.take() {
            None => Teardown::AlreadyClosed,
            Some(client) => match with_timeout(self.timeout, "QUIT", client.quit()).await {
                Ok(()) => Teardown::Closed,
                Err(e) => Teardown::Failed(e.to_string()),
            },
        };
        debug!(?teardown, "Relay teardown");
        teardown
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
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Serves one connection: writes `greeting`, then answers each received
    /// line with `respond(line)`. Returns every line received.
    async fn scripted_server(
        greeting: &'static str,
        respond: fn(&str) -> Option<&'static str>,
    ) -> (u16, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            let mut seen = Vec::new();

            write.write_all(greeting.as_bytes()).await.unwrap();
            while let Ok(Some(line)) = lines.next_line().await {
                let reply = respond(&line);
                seen.push(line);
                if let Some(reply) = reply {
                    if write.write_all(reply.as_bytes()).await.is_err() {
                        break;
                    }
                }
            }
            seen
        });

        (port, handle)
    }

    fn credentials() -> Credentials {
        Credentials::new("relay@x.org", "secret")
    }

    fn imap_config(port: u16) -> ImapConfig {
        ImapConfig {
            host: "127.0.0.1".to_string(),
            port: Some(port),
            security: Security::None,
            mailbox: "INBOX".to_string(),
        }
    }

    fn smtp_config(port: u16) -> SmtpConfig {
        SmtpConfig {
            host: "127.0.0.1".to_string(),
            port: Some(port),
            security: Security::None,
            helo_name: "relay.x.org".to_string(),
        }
    }

    fn imap_responder(line: &str) -> Option<&'static str> {
        let (_, command) = line.split_once(' ')?;
        let reply = match command {
            c if c.starts_with("LOGIN") => "A0000 OK LOGIN completed\r\n",
            c if c.starts_with("SELECT") => "* 2 EXISTS\r\nA0001 OK [READ-WRITE] SELECT completed\r\n",
            "SEARCH UNSEEN" => "* SEARCH 2\r\nA0002 OK SEARCH completed\r\n",
            "FETCH 2 BODY.PEEK[]" => "* 2 FETCH (BODY[] {9}\r\nSubject: )\r\nA0003 OK FETCH completed\r\n",
            "STORE 2 +FLAGS.SILENT (\\Seen)" => "A0004 OK STORE completed\r\n",
            "LOGOUT" => "* BYE logging out\r\nA0005 OK LOGOUT completed\r\n",
            _ => return None,
        };
        Some(reply)
    }

    #[tokio::test]
    async fn test_imap_inbox_session() {
        let (port, server) = scripted_server("* OK IMAP ready\r\n", imap_responder).await;
        let mut inbox = ImapInbox::new(imap_config(port), credentials(), Duration::from_secs(5));

        assert_eq!(inbox.close().await, Teardown::AlreadyClosed);
        inbox.connect().await.unwrap();
        assert!(inbox.is_connected());

        let unseen = inbox.search_unseen().await.unwrap();
        assert_eq!(unseen.iter().map(|s| s.get()).collect::<Vec<_>>(), vec![2]);

        let seq = unseen[0];
        assert_eq!(inbox.fetch(seq).await.unwrap(), b"Subject: ");
        inbox.mark_seen(seq).await.unwrap();
        assert_eq!(inbox.close().await, Teardown::Closed);
        assert!(!inbox.is_connected());

        let lines = server.await.unwrap();
        assert_eq!(
            lines,
            vec![
                "A0000 LOGIN relay@x.org secret",
                "A0001 SELECT INBOX",
                "A0002 SEARCH UNSEEN",
                "A0003 FETCH 2 BODY.PEEK[]",
                "A0004 STORE 2 +FLAGS.SILENT (\\Seen)",
                "A0005 LOGOUT",
            ]
        );
    }

    fn bodiless_fetch_responder(line: &str) -> Option<&'static str> {
        if line.ends_with("FETCH 2 BODY.PEEK[]") {
            return Some("A0003 OK FETCH completed\r\n");
        }
        imap_responder(line)
    }

    #[tokio::test]
    async fn test_imap_missing_body_keeps_session() {
        let (port, server) = scripted_server("* OK IMAP ready\r\n", bodiless_fetch_responder).await;
        let mut inbox = ImapInbox::new(imap_config(port), credentials(), Duration::from_secs(5));
        inbox.connect().await.unwrap();

        let seq = inbox.search_unseen().await.unwrap()[0];
        let err = inbox.fetch(seq).await.unwrap_err();
        assert!(matches!(err, Error::Imap(mailrelay_imap::Error::MissingBody(_))));
        assert!(!err.is_connection_lost());
        assert!(inbox.is_connected());

        inbox.mark_seen(seq).await.unwrap();
        assert_eq!(inbox.close().await, Teardown::Closed);
        assert_eq!(server.await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_imap_operations_require_session() {
        let mut inbox = ImapInbox::new(imap_config(1), credentials(), Duration::from_secs(1));
        let err = inbox.search_unseen().await.unwrap_err();
        assert!(matches!(err, Error::NotConnected("mailbox")));
        assert!(err.is_connection_lost());
    }

    #[tokio::test]
    async fn test_imap_starttls_rejected() {
        let mut config = imap_config(1);
        config.security = Security::StartTls;
        let mut inbox = ImapInbox::new(config, credentials(), Duration::from_secs(1));
        assert!(matches!(inbox.connect().await, Err(Error::Config(_))));
    }

    fn smtp_responder(line: &str) -> Option<&'static str> {
        thread_local! {
            static IN_DATA: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
        }
        if IN_DATA.get() {
            if line == "." {
                IN_DATA.set(false);
                return Some("250 2.0.0 queued\r\n");
            }
            return None;
        }

        Some(match line {
            l if l.starts_with("EHLO") => "250-smtp.x.org\r\n250 AUTH LOGIN PLAIN\r\n",
            l if l.starts_with("AUTH PLAIN") => "235 2.7.0 accepted\r\n",
            "MAIL FROM:<relay@x.org>" => "250 2.1.0 ok\r\n",
            "RCPT TO:<a@x.org>" => "250 2.1.5 ok\r\n",
            "RCPT TO:<nobody@x.org>" => "550 5.1.1 no such user\r\n",
            "DATA" => {
                IN_DATA.set(true);
                "354 go ahead\r\n"
            }
            "NOOP" | "RSET" => "250 2.0.0 ok\r\n",
            "QUIT" => "221 2.0.0 bye\r\n",
            _ => "500 5.5.1 unrecognized\r\n",
        })
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_smtp_outbox_session() {
        let (port, server) = scripted_server("220 smtp.x.org ESMTP\r\n", smtp_responder).await;
        let mut outbox =
            SmtpOutbox::new(smtp_config(port), credentials(), "relay@x.org", Duration::from_secs(5))
                .unwrap();

        outbox.connect().await.unwrap();
        outbox.ensure_alive().await.unwrap();
        outbox.send("a@x.org", b"Subject: hi\r\n\r\nbody\r\n").await.unwrap();
        assert!(outbox.is_connected());

        let err = outbox.send("nobody@x.org", b"Subject: hi\r\n\r\nbody\r\n").await.unwrap_err();
        assert!(matches!(err, Error::Smtp(_)));
        assert!(!err.is_connection_lost());
        assert!(outbox.is_connected());

        // The refused transaction was reset; the same session delivers again.
        outbox.send("a@x.org", b"Subject: again\r\n\r\nbody\r\n").await.unwrap();
        assert_eq!(outbox.close().await, Teardown::Closed);

        let lines = server.await.unwrap();
        assert_eq!(lines[0], "EHLO relay.x.org");
        assert!(lines[1].starts_with("AUTH PLAIN "));
        assert_eq!(
            &lines[2..9],
            [
                "NOOP",
                "MAIL FROM:<relay@x.org>",
                "RCPT TO:<a@x.org>",
                "DATA",
                "Subject: hi",
                "",
                "body",
            ]
        );
        assert_eq!(
            &lines[10..],
            [
                "MAIL FROM:<relay@x.org>",
                "RCPT TO:<nobody@x.org>",
                "RSET",
                "MAIL FROM:<relay@x.org>",
                "RCPT TO:<a@x.org>",
                "DATA",
                "Subject: again",
                "",
                "body",
                ".",
                "QUIT",
            ]
        );
    }

    #[tokio::test]
    async fn test_smtp_invalid_from() {
        let result = SmtpOutbox::new(smtp_config(1), credentials(), "not an address", Duration::from_secs(1));
        assert!(matches!(result, Err(Error::Smtp(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, Error>(())
        };
        let err = with_timeout(Duration::from_secs(1), "liveness", slow).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { operation: "liveness", .. }));
        assert!(err.is_connection_lost());

        let fast = async { Ok::<_, Error>(7) };
        assert_eq!(with_timeout(Duration::from_secs(1), "liveness", fast).await.unwrap(), 7);
    }
}
