//! Startup, retry and shutdown behaviour of the relay service.

#![allow(clippy::unwrap_used)]

mod common;

use std::time::Duration;

use common::{FakeInbox, FakeOutbox, ROSTER_CSV, config, plain};
use mailrelay_core::{Error, RelayService, Transport, shutdown_channel};
use tempfile::TempDir;

fn service(dir: &TempDir, inbox: FakeInbox) -> RelayService<FakeInbox, FakeOutbox> {
    let roster = dir.path().join("roster.csv");
    RelayService::new(
        config(&roster),
        Transport::new(inbox, FakeOutbox::default()),
    )
}

#[tokio::test]
async fn test_missing_roster_is_fatal_and_closes_handles() {
    let dir = TempDir::new().unwrap();
    let mut service = service(&dir, FakeInbox::default());

    let err = service.start().await.unwrap_err();
    assert!(matches!(err, Error::Io(_)));

    let transport = service.transport();
    assert!(!transport.inbox.connected);
    assert!(!transport.outbox.connected);
    assert_eq!(transport.inbox.closes, 1);
    assert_eq!(transport.outbox.closes, 1);
}

#[tokio::test]
async fn test_connect_failure_is_fatal() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("roster.csv"), ROSTER_CSV).unwrap();
    let inbox = FakeInbox {
        fail_connect: true,
        ..FakeInbox::default()
    };
    let mut service = service(&dir, inbox);

    let (_trigger, shutdown) = shutdown_channel();
    assert!(service.run(shutdown).await.is_err());
    assert_eq!(service.transport().outbox.connects, 0);
    assert!(service.roster().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_run_until_shutdown() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("roster.csv"), ROSTER_CSV).unwrap();
    let mut inbox = FakeInbox::default();
    inbox.deliver(plain("b@x.org", "hello", "hi"));
    let mut service = service(&dir, inbox);

    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(25)).await;
        trigger.trigger();
    });
    service.run(shutdown).await.unwrap();

    let transport = service.transport();
    // Cycles at 0s, 10s and 20s.
    assert_eq!(transport.inbox.searches, 3);
    assert_eq!(transport.outbox.sent.len(), 1);
    assert!(transport.inbox.messages[0].seen);
    assert!(!transport.inbox.connected);
    assert!(!transport.outbox.connected);
}

#[tokio::test(start_paused = true)]
async fn test_failed_cycle_reconnects_and_waits_retry_delay() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("roster.csv"), ROSTER_CSV).unwrap();
    let inbox = FakeInbox {
        fail_search: true,
        ..FakeInbox::default()
    };
    let mut service = service(&dir, inbox);

    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(90)).await;
        trigger.trigger();
    });
    service.run(shutdown).await.unwrap();

    let transport = service.transport();
    // Cycles at 0s and 60s, each followed by a reconnect of both handles.
    assert_eq!(transport.inbox.searches, 2);
    assert_eq!(transport.inbox.connects, 3);
    assert_eq!(transport.outbox.connects, 3);
}

#[tokio::test]
async fn test_shutdown_before_first_cycle() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("roster.csv"), ROSTER_CSV).unwrap();
    let mut service = service(&dir, FakeInbox::default());

    let (trigger, shutdown) = shutdown_channel();
    trigger.trigger();
    service.run(shutdown).await.unwrap();

    assert_eq!(service.transport().inbox.searches, 0);
    assert_eq!(service.transport().inbox.closes, 1);
}
