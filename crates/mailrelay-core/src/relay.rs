//! Poll-and-dispatch cycle.
//!
//! Each unseen message is fetched, marked seen, classified by sender, then
//! either broadcast to the roster (administrator) or forwarded to the
//! administrator (subscriber). Per-message failures are logged and counted;
//! only failures before the first message escape the cycle.

use mailrelay_imap::SeqNum;
use mailrelay_mime::{Message, MessageBuilder};
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::error::Result;
use crate::extract::{ExtractedContent, extract, extract_plain_text};
use crate::roster::RosterStore;
use crate::transport::{Inbox, Outbox, Transport};

/// Subject used when a message carries none.
pub const NO_SUBJECT: &str = "No Subject";
/// Sender used when a message carries no `From`.
pub const UNKNOWN_SENDER: &str = "Unknown Sender";
/// Broadcast body when the trigger message has no renderable text.
pub const FALLBACK_BODY: &str = "Email forwarded from admin";

/// Who sent a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderRole {
    /// The administrator.
    Admin,
    /// Someone on the roster.
    Subscriber,
    /// Anyone else.
    Unknown,
}

/// Classifies `from` by case-insensitive substring match.
///
/// The administrator match takes precedence over roster matches.
#[must_use]
pub fn classify_sender(from: &str, admin: &str, subscribers: &[String]) -> SenderRole {
    let from = from.to_lowercase();
    if from.contains(&admin.to_lowercase()) {
        SenderRole::Admin
    } else if subscribers
        .iter()
        .any(|subscriber| from.contains(&subscriber.to_lowercase()))
    {
        SenderRole::Subscriber
    } else {
        SenderRole::Unknown
    }
}

/// Result of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Number of subscribers the message was delivered to.
    pub sent: usize,
    /// Subscribers whose send failed, in roster order.
    pub failed: Vec<String>,
}

impl BroadcastOutcome {
    /// Number of subscribers attempted.
    #[must_use]
    pub fn total(&self) -> usize {
        self.sent + self.failed.len()
    }

    /// Body of the status reply sent to the administrator.
    #[must_use]
    pub fn summary(&self, subject: &str) -> String {
        if self.failed.is_empty() {
            format!(
                "Everything worked! Newsletter '{subject}' successfully sent to all {} subscribers.",
                self.sent
            )
        } else {
            format!(
                "Newsletter '{subject}' sent to {}/{} subscribers.\n\nFailed to send to:\n{}",
                self.sent,
                self.total(),
                self.failed.join("\n")
            )
        }
    }
}

/// Tally of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// The roster was empty so nothing was polled.
    pub roster_empty: bool,
    /// Unseen messages found.
    pub seen: usize,
    /// Broadcasts performed.
    pub broadcasts: usize,
    /// Messages forwarded to the administrator.
    pub forwards: usize,
    /// Administrator messages without the trigger token.
    pub skipped: usize,
    /// Messages from unknown senders.
    pub ignored: usize,
    /// Messages whose fetch, mark-seen or forward failed.
    pub failed: usize,
}

/// What happened to a single message.
enum Dispatch {
    Broadcast,
    Forwarded,
    Skipped,
    Ignored,
}

/// Classifies and relays messages.
#[derive(Debug, Clone)]
pub struct RelayEngine {
    email: String,
    admin_email: String,
    trigger_token: String,
}

impl RelayEngine {
    /// Creates an engine sending as `email`.
    #[must_use]
    pub fn new(
        email: impl Into<String>,
        admin_email: impl Into<String>,
        trigger_token: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            admin_email: admin_email.into(),
            trigger_token: trigger_token.into(),
        }
    }

    /// Creates an engine from the service configuration.
    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            config.email.as_str(),
            config.admin_email.as_str(),
            config.trigger_token.as_str(),
        )
    }

    /// Returns true when `subject` asks for a broadcast.
    #[must_use]
    pub fn is_trigger(&self, subject: &str) -> bool {
        subject
            .to_lowercase()
            .contains(&self.trigger_token.to_lowercase())
    }

    /// Runs one cycle: roster refresh, liveness check, then every unseen
    /// message in server order.
    ///
    /// # Errors
    ///
    /// Returns an error if the liveness check cannot restore a handle or the
    /// search fails. Per-message failures are counted, not returned.
    pub async fn run_cycle<I: Inbox, O: Outbox>(
        &self,
        transport: &mut Transport<I, O>,
        roster: &mut RosterStore,
    ) -> Result<CycleReport> {
        roster.refresh();
        let subscribers = roster.snapshot();
        if subscribers.is_empty() {
            warn!("Roster is empty, skipping poll");
            return Ok(CycleReport {
                roster_empty: true,
                ..CycleReport::default()
            });
        }

        transport.ensure_alive().await?;
        let unseen = transport.inbox.search_unseen().await?;

        let mut report = CycleReport {
            seen: unseen.len(),
            ..CycleReport::default()
        };
        if !unseen.is_empty() {
            info!(count = unseen.len(), "Found unseen messages");
        }

        for seq in unseen {
            match self.process(transport, &subscribers, seq).await {
                Ok(Dispatch::Broadcast) => report.broadcasts += 1,
                Ok(Dispatch::Forwarded) => report.forwards += 1,
                Ok(Dispatch::Skipped) => report.skipped += 1,
                Ok(Dispatch::Ignored) => report.ignored += 1,
                Err(e) => {
                    error!(%seq, error = %e, "Failed to process message");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn process<I: Inbox, O: Outbox>(
        &self,
        transport: &mut Transport<I, O>,
        subscribers: &[String],
        seq: SeqNum,
    ) -> Result<Dispatch> {
        let raw = transport.inbox.fetch(seq).await?;
        let message = Message::parse(&raw);
        transport.inbox.mark_seen(seq).await?;

        let sender = message.from().unwrap_or_else(|| UNKNOWN_SENDER.to_string());
        let subject = message.subject().unwrap_or_else(|| NO_SUBJECT.to_string());

        match classify_sender(&sender, &self.admin_email, subscribers) {
            SenderRole::Admin if self.is_trigger(&subject) => {
                info!(%subject, subscribers = subscribers.len(), "Broadcasting newsletter");
                let content = extract(&message);
                let outcome = self
                    .broadcast(&mut transport.outbox, subscribers, &subject, &content)
                    .await;
                self.send_status(&mut transport.outbox, &subject, &outcome)
                    .await;
                Ok(Dispatch::Broadcast)
            }
            SenderRole::Admin => {
                info!(%subject, "Administrator message without trigger, skipping");
                Ok(Dispatch::Skipped)
            }
            SenderRole::Subscriber => {
                info!(%sender, %subject, "Forwarding subscriber message");
                self.forward(&mut transport.outbox, &message, &sender, &subject)
                    .await?;
                Ok(Dispatch::Forwarded)
            }
            SenderRole::Unknown => {
                debug!(%sender, %subject, "Ignoring message from unknown sender");
                Ok(Dispatch::Ignored)
            }
        }
    }

    /// Sends `content` to every subscriber, reconnecting the relay after
    /// each failed send.
    pub async fn broadcast<O: Outbox>(
        &self,
        outbox: &mut O,
        subscribers: &[String],
        subject: &str,
        content: &ExtractedContent,
    ) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome::default();

        for subscriber in subscribers {
            let result = match self.compose_broadcast(subscriber, subject, content) {
                Ok(message) => outbox.send(subscriber, message.as_bytes()).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    debug!(%subscriber, "Newsletter sent");
                    outcome.sent += 1;
                }
                Err(e) => {
                    warn!(%subscriber, error = %e, "Newsletter send failed");
                    outcome.failed.push(subscriber.clone());
                    if let Err(e) = outbox.connect().await {
                        error!(error = %e, "Relay reconnect after failed send failed");
                    }
                }
            }
        }

        info!(
            sent = outcome.sent,
            failed = outcome.failed.len(),
            "Broadcast finished"
        );
        outcome
    }

    fn compose_broadcast(
        &self,
        to: &str,
        subject: &str,
        content: &ExtractedContent,
    ) -> Result<String> {
        let builder = MessageBuilder::new()
            .from(self.email.as_str())
            .to(to)
            .subject(subject);
        let builder = match (&content.html, &content.text) {
            (Some(html), _) => builder.html_body(html.as_str()),
            (None, Some(text)) => builder.text_body(text.as_str()),
            (None, None) => builder.text_body(FALLBACK_BODY),
        };

        Ok(content
            .attachments
            .iter()
            .cloned()
            .fold(builder, MessageBuilder::attach)
            .build()?)
    }

    async fn send_status<O: Outbox>(&self, outbox: &mut O, subject: &str, outcome: &BroadcastOutcome) {
        let result = match self.compose_text(
            &format!("Newsletter Status: {subject}"),
            &outcome.summary(subject),
        ) {
            Ok(message) => outbox.send(&self.admin_email, message.as_bytes()).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            error!(error = %e, "Failed to send status reply");
        }
    }

    async fn forward<O: Outbox>(
        &self,
        outbox: &mut O,
        message: &Message,
        sender: &str,
        subject: &str,
    ) -> Result<()> {
        let text = extract_plain_text(message).unwrap_or_default();
        let body = format!("Original sender: {sender}\nOriginal subject: {subject}\n\n{text}");
        let message = self.compose_text(&format!("[FROM SUBSCRIBER] {subject}"), &body)?;
        outbox.send(&self.admin_email, message.as_bytes()).await
    }

    fn compose_text(&self, subject: &str, body: &str) -> Result<String> {
        Ok(MessageBuilder::new()
            .from(self.email.as_str())
            .to(self.admin_email.as_str())
            .subject(subject)
            .text_body(body)
            .build()?)
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
    use crate::transport::Teardown;
    use async_trait::async_trait;
    use proptest::prelude::*;

    #[derive(Default)]
    struct RecordingOutbox {
        reject: Vec<String>,
        sent: Vec<(String, Vec<u8>)>,
        connects: usize,
    }

    #[async_trait]
    impl Outbox for RecordingOutbox {
        async fn connect(&mut self) -> Result<()> {
            self.connects += 1;
            Ok(())
        }

        async fn ensure_alive(&mut self) -> Result<()> {
            Ok(())
        }

        async fn send(&mut self, recipient: &str, message: &[u8]) -> Result<()> {
            if self.reject.iter().any(|r| r == recipient) {
                return Err(crate::Error::NotConnected("relay"));
            }
            self.sent.push((recipient.to_string(), message.to_vec()));
            Ok(())
        }

        async fn close(&mut self) -> Teardown {
            Teardown::Closed
        }
    }

    fn engine() -> RelayEngine {
        RelayEngine::new("relay@x.org", "admin@x.org", "samlingsbrev")
    }

    fn roster(entries: &[&str]) -> Vec<String> {
        entries.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_classify_sender() {
        let subscribers = roster(&["alice@x.org", "bob@x.org"]);
        assert_eq!(
            classify_sender("Admin <ADMIN@x.org>", "admin@x.org", &subscribers),
            SenderRole::Admin
        );
        assert_eq!(
            classify_sender("Alice <Alice@X.org>", "admin@x.org", &subscribers),
            SenderRole::Subscriber
        );
        assert_eq!(
            classify_sender("eve@x.org", "admin@x.org", &subscribers),
            SenderRole::Unknown
        );
    }

    #[test]
    fn test_classify_admin_wins_over_roster() {
        let subscribers = roster(&["admin@x.org"]);
        assert_eq!(
            classify_sender("admin@x.org", "admin@x.org", &subscribers),
            SenderRole::Admin
        );
    }

    #[test]
    fn test_classify_substring_approximation() {
        let subscribers = roster(&["al@x.org"]);
        assert_eq!(
            classify_sender("hal@x.org", "admin@x.org", &subscribers),
            SenderRole::Subscriber
        );
    }

    #[test]
    fn test_is_trigger() {
        let engine = engine();
        assert!(engine.is_trigger("Församlingsbrev March"));
        assert!(engine.is_trigger("SAMLINGSBREV"));
        assert!(!engine.is_trigger("Staff meeting notes"));
    }

    #[test]
    fn test_summary_all_sent() {
        let outcome = BroadcastOutcome {
            sent: 2,
            failed: Vec::new(),
        };
        assert_eq!(
            outcome.summary("March"),
            "Everything worked! Newsletter 'March' successfully sent to all 2 subscribers."
        );
    }

    #[test]
    fn test_summary_with_failures() {
        let outcome = BroadcastOutcome {
            sent: 1,
            failed: roster(&["b@x.org", "c@x.org"]),
        };
        assert_eq!(
            outcome.summary("March"),
            "Newsletter 'March' sent to 1/3 subscribers.\n\nFailed to send to:\nb@x.org\nc@x.org"
        );
    }

    #[tokio::test]
    async fn test_broadcast_partial_failure() {
        let mut outbox = RecordingOutbox {
            reject: roster(&["b@x.org"]),
            ..RecordingOutbox::default()
        };
        let content = ExtractedContent {
            text: Some("hello".to_string()),
            ..ExtractedContent::default()
        };

        let outcome = engine()
            .broadcast(&mut outbox, &roster(&["a@x.org", "b@x.org", "c@x.org"]), "March", &content)
            .await;

        assert_eq!(outcome.sent, 2);
        assert_eq!(outcome.failed, vec!["b@x.org"]);
        assert_eq!(outbox.connects, 1);
        let recipients: Vec<_> = outbox.sent.iter().map(|(to, _)| to.as_str()).collect();
        assert_eq!(recipients, vec!["a@x.org", "c@x.org"]);
    }

    #[tokio::test]
    async fn test_broadcast_fallback_body() {
        let mut outbox = RecordingOutbox::default();
        engine()
            .broadcast(&mut outbox, &roster(&["a@x.org"]), "March", &ExtractedContent::default())
            .await;

        let sent = Message::parse(&outbox.sent[0].1);
        let body = sent.root().parts()[0].text();
        assert_eq!(body, FALLBACK_BODY);
    }

    #[tokio::test]
    async fn test_broadcast_prefers_html_and_keeps_attachments() {
        let mut outbox = RecordingOutbox::default();
        let content = ExtractedContent {
            html: Some("<p>hi</p>".to_string()),
            text: Some("hi".to_string()),
            attachments: vec![mailrelay_mime::Attachment::new(
                "agenda.pdf",
                mailrelay_mime::ContentType::new("application", "pdf"),
                b"%PDF-".to_vec(),
            )],
        };
        engine()
            .broadcast(&mut outbox, &roster(&["a@x.org"]), "March", &content)
            .await;

        let sent = Message::parse(&outbox.sent[0].1);
        assert_eq!(sent.to().as_deref(), Some("a@x.org"));
        assert_eq!(sent.from().as_deref(), Some("relay@x.org"));
        let parts = sent.root().parts();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].content_type().is("text", "html"));
        assert_eq!(parts[0].text(), "<p>hi</p>");
        assert_eq!(parts[1].filename().as_deref(), Some("agenda.pdf"));
        assert_eq!(parts[1].body_bytes(), b"%PDF-");
    }

    proptest! {
        #[test]
        fn prop_outcome_accounts_for_every_subscriber(
            flags in proptest::collection::vec(any::<bool>(), 0..12)
        ) {
            let subscribers: Vec<String> =
                (0..flags.len()).map(|i| format!("s{i}@x.org")).collect();
            let reject = subscribers
                .iter()
                .zip(&flags)
                .filter(|(_, fail)| **fail)
                .map(|(s, _)| s.clone())
                .collect();
            let mut outbox = RecordingOutbox { reject, ..RecordingOutbox::default() };

            let outcome = tokio_test::block_on(engine().broadcast(
                &mut outbox,
                &subscribers,
                "March",
                &ExtractedContent::default(),
            ));

            prop_assert_eq!(outcome.total(), subscribers.len());
            prop_assert_eq!(outcome.failed.len(), flags.iter().filter(|f| **f).count());
        }
    }
}
