//! In-memory mailbox and relay doubles shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::path::Path;

use async_trait::async_trait;
use mailrelay_core::{Error, Inbox, Outbox, RelayConfig, Result, Teardown};
use mailrelay_imap::SeqNum;
use mailrelay_mime::Message;

/// Roster with two eligible subscribers and rows that must be filtered out.
pub const ROSTER_CSV: &str = "\
Name,Status,Membership,Child,Home Email
Anna,active,member,false,a@x.org
Bo,Active,MEMBER,False, b@x.org
Cilla,inactive,member,false,c@x.org
Dan,active,guest,false,d@x.org
Eva,active,member,true,e@x.org
Frej,active,member,false,
";

/// A stored message.
#[derive(Debug, Clone)]
pub struct Stored {
    pub raw: Vec<u8>,
    pub seen: bool,
}

/// Mailbox double.
#[derive(Debug, Default)]
pub struct FakeInbox {
    pub messages: Vec<Stored>,
    pub connected: bool,
    pub connects: usize,
    pub closes: usize,
    pub searches: usize,
    pub fail_connect: bool,
    pub fail_search: bool,
}

impl FakeInbox {
    pub fn deliver(&mut self, raw: impl Into<Vec<u8>>) {
        self.messages.push(Stored {
            raw: raw.into(),
            seen: false,
        });
    }

    fn slot(&mut self, seq: SeqNum) -> Result<&mut Stored> {
        let index = seq.get() as usize - 1;
        self.messages
            .get_mut(index)
            .ok_or_else(|| Error::Config(format!("no message {seq}")))
    }
}

#[async_trait]
impl Inbox for FakeInbox {
    async fn connect(&mut self) -> Result<()> {
        self.connects += 1;
        if self.fail_connect {
            self.connected = false;
            return Err(Error::NotConnected("mailbox"));
        }
        self.connected = true;
        Ok(())
    }

    async fn ensure_alive(&mut self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            self.connect().await
        }
    }

    async fn search_unseen(&mut self) -> Result<Vec<SeqNum>> {
        self.searches += 1;
        if self.fail_search {
            return Err(Error::NotConnected("mailbox"));
        }
        Ok(self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| !m.seen)
            .filter_map(|(i, _)| SeqNum::new(u32::try_from(i + 1).unwrap()))
            .collect())
    }

    async fn fetch(&mut self, seq: SeqNum) -> Result<Vec<u8>> {
        Ok(self.slot(seq)?.raw.clone())
    }

    async fn mark_seen(&mut self, seq: SeqNum) -> Result<()> {
        self.slot(seq)?.seen = true;
        Ok(())
    }

    async fn close(&mut self) -> Teardown {
        self.closes += 1;
        if std::mem::take(&mut self.connected) {
            Teardown::Closed
        } else {
            Teardown::AlreadyClosed
        }
    }
}

/// Relay double recording every delivered message.
#[derive(Debug, Default)]
pub struct FakeOutbox {
    pub sent: Vec<(String, Vec<u8>)>,
    pub reject: Vec<String>,
    pub connected: bool,
    pub connects: usize,
    pub closes: usize,
}

impl FakeOutbox {
    /// Parsed messages delivered to `recipient`.
    pub fn sent_to(&self, recipient: &str) -> Vec<Message> {
        self.sent
            .iter()
            .filter(|(to, _)| to == recipient)
            .map(|(_, raw)| Message::parse(raw))
            .collect()
    }
}

#[async_trait]
impl Outbox for FakeOutbox {
    async fn connect(&mut self) -> Result<()> {
        self.connects += 1;
        self.connected = true;
        Ok(())
    }

    async fn ensure_alive(&mut self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            self.connect().await
        }
    }

    async fn send(&mut self, recipient: &str, message: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected("relay"));
        }
        // A refusal leaves the session usable, as a real relay does after RSET.
        if self.reject.iter().any(|r| r == recipient) {
            return Err(Error::Smtp(mailrelay_smtp::Error::smtp_error(
                550,
                "mailbox unavailable",
            )));
        }
        self.sent.push((recipient.to_string(), message.to_vec()));
        Ok(())
    }

    async fn close(&mut self) -> Teardown {
        self.closes += 1;
        if std::mem::take(&mut self.connected) {
            Teardown::Closed
        } else {
            Teardown::AlreadyClosed
        }
    }
}

/// Configuration pointing at `roster`.
pub fn config(roster: &Path) -> RelayConfig {
    let json = serde_json::json!({
        "email": "relay@x.org",
        "admin_email": "admin@x.org",
        "imap": { "host": "imap.x.org" },
        "smtp": { "host": "smtp.x.org" },
        "roster_path": roster,
    });
    RelayConfig::from_json(&json.to_string()).unwrap()
}

/// Raw administrator newsletter with HTML and plain alternatives.
pub fn newsletter(subject: &str) -> Vec<u8> {
    format!(
        "From: Admin <admin@x.org>\r\n\
         Subject: {subject}\r\n\
         Content-Type: multipart/alternative; boundary=alt\r\n\
         \r\n\
         --alt\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         Hello members\r\n\
         --alt\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         \r\n\
         <p>Hello members</p>\r\n\
         --alt--\r\n"
    )
    .into_bytes()
}

/// Raw single-part text message.
pub fn plain(from: &str, subject: &str, body: &str) -> Vec<u8> {
    format!("From: {from}\r\nSubject: {subject}\r\nContent-Type: text/plain\r\n\r\n{body}")
        .into_bytes()
}

/// Text of the first leaf of a built message.
pub fn body_text(message: &Message) -> String {
    message
        .root()
        .walk()
        .find(|part| !part.is_multipart())
        .map(mailrelay_mime::Part::text)
        .unwrap_or_default()
}
