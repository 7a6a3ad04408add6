//! End-to-end relay cycles against in-memory mailbox and relay doubles.

#![allow(clippy::unwrap_used)]

mod common;

use common::{FakeInbox, FakeOutbox, ROSTER_CSV, body_text, config, newsletter, plain};
use mailrelay_core::{RelayService, Transport};
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    service: RelayService<FakeInbox, FakeOutbox>,
}

impl Fixture {
    async fn started() -> Self {
        let dir = TempDir::new().unwrap();
        let roster = dir.path().join("roster.csv");
        std::fs::write(&roster, ROSTER_CSV).unwrap();

        let transport = Transport::new(FakeInbox::default(), FakeOutbox::default());
        let mut service = RelayService::new(config(&roster), transport);
        service.start().await.unwrap();
        Self { dir, service }
    }

    fn inbox(&mut self) -> &mut FakeInbox {
        &mut self.service.transport_mut().inbox
    }

    fn outbox(&mut self) -> &mut FakeOutbox {
        &mut self.service.transport_mut().outbox
    }
}

#[tokio::test]
async fn test_start_loads_filtered_roster() {
    let fixture = Fixture::started().await;
    assert_eq!(&*fixture.service.roster().snapshot(), ["a@x.org", "b@x.org"]);
    assert!(fixture.service.transport().inbox.connected);
    assert!(fixture.service.transport().outbox.connected);
}

#[tokio::test]
async fn test_scenario_a_broadcast_to_everyone() {
    let mut fixture = Fixture::started().await;
    fixture
        .inbox()
        .deliver(newsletter("=?utf-8?Q?F=C3=B6rsamlingsbrev_March?="));

    let report = fixture.service.run_cycle().await.unwrap();
    assert_eq!(report.seen, 1);
    assert_eq!(report.broadcasts, 1);
    assert_eq!(report.failed, 0);
    assert!(fixture.inbox().messages[0].seen);

    let outbox = &fixture.service.transport().outbox;
    let recipients: Vec<_> = outbox.sent.iter().map(|(to, _)| to.as_str()).collect();
    assert_eq!(recipients, ["a@x.org", "b@x.org", "admin@x.org"]);

    for subscriber in ["a@x.org", "b@x.org"] {
        let received = outbox.sent_to(subscriber);
        assert_eq!(received.len(), 1);
        let message = &received[0];
        assert_eq!(message.subject().as_deref(), Some("Församlingsbrev March"));
        let body = &message.root().parts()[0];
        assert!(body.content_type().is("text", "html"));
        assert_eq!(body.text(), "<p>Hello members</p>");
    }

    let status = &outbox.sent_to("admin@x.org")[0];
    assert_eq!(
        status.subject().as_deref(),
        Some("Newsletter Status: Församlingsbrev March")
    );
    assert_eq!(
        body_text(status),
        "Everything worked! Newsletter 'Församlingsbrev March' successfully sent to all 2 subscribers."
    );
}

#[tokio::test]
async fn test_scenario_b_partial_failure_is_reported() {
    let mut fixture = Fixture::started().await;
    fixture.outbox().reject.push("b@x.org".to_string());
    fixture.inbox().deliver(newsletter("Samlingsbrev April"));

    let report = fixture.service.run_cycle().await.unwrap();
    assert_eq!(report.broadcasts, 1);

    let outbox = &fixture.service.transport().outbox;
    assert_eq!(outbox.sent_to("a@x.org").len(), 1);
    assert!(outbox.sent_to("b@x.org").is_empty());
    // One reconnect at startup, one after the failed send.
    assert_eq!(outbox.connects, 2);

    let status = &outbox.sent_to("admin@x.org")[0];
    assert_eq!(
        body_text(status),
        "Newsletter 'Samlingsbrev April' sent to 1/2 subscribers.\n\nFailed to send to:\nb@x.org"
    );
}

#[tokio::test]
async fn test_failed_status_reply_is_only_logged() {
    let mut fixture = Fixture::started().await;
    fixture.outbox().reject.push("admin@x.org".to_string());
    fixture.inbox().deliver(newsletter("Samlingsbrev April"));

    let report = fixture.service.run_cycle().await.unwrap();
    assert_eq!(report.broadcasts, 1);
    assert_eq!(report.failed, 0);

    let outbox = &fixture.service.transport().outbox;
    assert_eq!(outbox.sent_to("a@x.org").len(), 1);
    assert_eq!(outbox.sent_to("b@x.org").len(), 1);
    assert!(outbox.sent_to("admin@x.org").is_empty());
    assert_eq!(outbox.connects, 1);
}

#[tokio::test]
async fn test_scenario_c_admin_without_trigger_sends_nothing() {
    let mut fixture = Fixture::started().await;
    fixture
        .inbox()
        .deliver(plain("admin@x.org", "Staff meeting notes", "Agenda attached."));

    let report = fixture.service.run_cycle().await.unwrap();
    assert_eq!(report.seen, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.broadcasts, 0);
    assert!(fixture.service.transport().outbox.sent.is_empty());
    assert!(fixture.inbox().messages[0].seen);
}

#[tokio::test]
async fn test_scenario_d_subscriber_mail_is_forwarded() {
    let mut fixture = Fixture::started().await;
    fixture.inbox().deliver(plain(
        "Alice <A@x.org>",
        "Question about the trip",
        "When do we leave?",
    ));

    let report = fixture.service.run_cycle().await.unwrap();
    assert_eq!(report.forwards, 1);
    assert_eq!(report.broadcasts, 0);

    let outbox = &fixture.service.transport().outbox;
    assert_eq!(outbox.sent.len(), 1);
    let forwarded = &outbox.sent_to("admin@x.org")[0];
    assert_eq!(
        forwarded.subject().as_deref(),
        Some("[FROM SUBSCRIBER] Question about the trip")
    );
    assert_eq!(
        body_text(forwarded),
        "Original sender: Alice <A@x.org>\nOriginal subject: Question about the trip\n\nWhen do we leave?"
    );
}

#[tokio::test]
async fn test_refused_forward_does_not_stop_the_cycle() {
    let mut fixture = Fixture::started().await;
    fixture.outbox().reject.push("admin@x.org".to_string());
    fixture.inbox().deliver(plain("a@x.org", "Question", "When do we leave?"));
    fixture.inbox().deliver(newsletter("Samlingsbrev June"));

    let report = fixture.service.run_cycle().await.unwrap();
    assert_eq!(report.seen, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.forwards, 0);
    assert_eq!(report.broadcasts, 1);
    assert!(fixture.inbox().messages.iter().all(|m| m.seen));

    let outbox = &fixture.service.transport().outbox;
    assert_eq!(outbox.sent_to("a@x.org").len(), 1);
    assert_eq!(outbox.sent_to("b@x.org").len(), 1);
    // A refused forward does not reconnect the relay.
    assert_eq!(outbox.connects, 1);
    assert!(outbox.connected);
}

#[tokio::test]
async fn test_scenario_e_deleted_roster_keeps_snapshot() {
    let mut fixture = Fixture::started().await;
    std::fs::remove_file(fixture.dir.path().join("roster.csv")).unwrap();

    fixture.inbox().deliver(newsletter("Samlingsbrev May"));
    let report = fixture.service.run_cycle().await.unwrap();

    assert_eq!(report.broadcasts, 1);
    assert_eq!(fixture.service.roster().len(), 2);
    let outbox = &fixture.service.transport().outbox;
    assert_eq!(outbox.sent_to("a@x.org").len(), 1);
    assert_eq!(outbox.sent_to("b@x.org").len(), 1);
}

#[tokio::test]
async fn test_unknown_sender_is_ignored() {
    let mut fixture = Fixture::started().await;
    fixture
        .inbox()
        .deliver(plain("spam@elsewhere.com", "Samlingsbrev", "buy now"));

    let report = fixture.service.run_cycle().await.unwrap();
    assert_eq!(report.ignored, 1);
    assert!(fixture.service.transport().outbox.sent.is_empty());
    assert!(fixture.inbox().messages[0].seen);
}

#[tokio::test]
async fn test_missing_headers_use_defaults() {
    let mut fixture = Fixture::started().await;
    fixture
        .inbox()
        .deliver(b"Content-Type: text/plain\r\n\r\nno headers at all".to_vec());

    let report = fixture.service.run_cycle().await.unwrap();
    assert_eq!(report.ignored, 1);
}

#[tokio::test]
async fn test_messages_processed_in_server_order() {
    let mut fixture = Fixture::started().await;
    fixture.inbox().deliver(plain("a@x.org", "first", "1"));
    fixture.inbox().deliver(plain("b@x.org", "second", "2"));

    let report = fixture.service.run_cycle().await.unwrap();
    assert_eq!(report.forwards, 2);

    let subjects: Vec<_> = fixture
        .service
        .transport()
        .outbox
        .sent_to("admin@x.org")
        .iter()
        .filter_map(mailrelay_mime::Message::subject)
        .collect();
    assert_eq!(subjects, ["[FROM SUBSCRIBER] first", "[FROM SUBSCRIBER] second"]);

    let again = fixture.service.run_cycle().await.unwrap();
    assert_eq!(again.seen, 0);
}

#[tokio::test]
async fn test_empty_roster_skips_poll() {
    let mut fixture = Fixture::started().await;
    let roster = fixture.dir.path().join("roster.csv");
    std::fs::write(&roster, "Status,Membership,Child,Home Email\n").unwrap();
    let file = std::fs::File::options().write(true).open(&roster).unwrap();
    file.set_modified(std::time::SystemTime::UNIX_EPOCH).unwrap();

    fixture.inbox().deliver(newsletter("Samlingsbrev"));
    let report = fixture.service.run_cycle().await.unwrap();

    assert!(report.roster_empty);
    assert_eq!(fixture.inbox().searches, 0);
    assert!(!fixture.inbox().messages[0].seen);
}

#[tokio::test]
async fn test_search_failure_escapes_cycle() {
    let mut fixture = Fixture::started().await;
    fixture.inbox().fail_search = true;
    assert!(fixture.service.run_cycle().await.is_err());
}

#[tokio::test]
async fn test_dead_relay_is_revived_by_liveness_check() {
    let mut fixture = Fixture::started().await;
    fixture.outbox().connected = false;
    fixture.inbox().deliver(plain("a@x.org", "hi", "hello"));

    let report = fixture.service.run_cycle().await.unwrap();
    assert_eq!(report.forwards, 1);
    assert_eq!(fixture.outbox().connects, 2);
}
