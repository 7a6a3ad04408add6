//! Relay cycles delivered through a real SMTP session against a scripted
//! relay server.

#![allow(clippy::unwrap_used)]

mod common;

use std::time::Duration;

use common::{FakeInbox, ROSTER_CSV, config, newsletter, plain};
use mailrelay_core::{Credentials, RelayService, Security, SmtpConfig, SmtpOutbox, Transport};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Accepts exactly one connection. The first RCPT for the administrator is
/// refused, every later one accepted. Returns the command lines received.
async fn relay_server() -> (u16, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut commands = Vec::new();
        let mut in_data = false;
        let mut admin_refused = false;

        write.write_all(b"220 smtp.x.org ESMTP\r\n").await.unwrap();
        while let Ok(Some(line)) = lines.next_line().await {
            if in_data {
                if line == "." {
                    in_data = false;
                    write.write_all(b"250 2.0.0 queued\r\n").await.unwrap();
                }
                continue;
            }

            let reply: &[u8] = match line.as_str() {
                l if l.starts_with("EHLO") => b"250-smtp.x.org\r\n250 AUTH PLAIN\r\n",
                l if l.starts_with("AUTH PLAIN") => b"235 2.7.0 accepted\r\n",
                "RCPT TO:<admin@x.org>" if !admin_refused => {
                    admin_refused = true;
                    b"452 4.2.2 mailbox full\r\n"
                }
                l if l.starts_with("MAIL FROM") || l.starts_with("RCPT TO") => b"250 ok\r\n",
                "DATA" => {
                    in_data = true;
                    b"354 go ahead\r\n"
                }
                "NOOP" | "RSET" => b"250 ok\r\n",
                "QUIT" => b"221 bye\r\n",
                _ => b"500 unrecognized\r\n",
            };
            commands.push(line);
            if write.write_all(reply).await.is_err() {
                break;
            }
        }
        commands
    });

    (port, handle)
}

#[tokio::test]
async fn test_refused_forward_keeps_session_for_broadcast() {
    let dir = TempDir::new().unwrap();
    let roster = dir.path().join("roster.csv");
    std::fs::write(&roster, ROSTER_CSV).unwrap();

    let (port, server) = relay_server().await;
    let smtp = SmtpConfig {
        host: "127.0.0.1".to_string(),
        port: Some(port),
        security: Security::None,
        helo_name: "relay.x.org".to_string(),
    };
    let outbox = SmtpOutbox::new(
        smtp,
        Credentials::new("relay@x.org", "secret"),
        "relay@x.org",
        Duration::from_secs(5),
    )
    .unwrap();

    let mut inbox = FakeInbox::default();
    inbox.deliver(plain("a@x.org", "Question", "When do we leave?"));
    inbox.deliver(newsletter("Samlingsbrev June"));

    let mut service = RelayService::new(config(&roster), Transport::new(inbox, outbox));
    service.start().await.unwrap();

    let report = service.run_cycle().await.unwrap();
    assert_eq!(report.seen, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.forwards, 0);
    assert_eq!(report.broadcasts, 1);
    assert!(service.transport().outbox.is_connected());
    assert!(service.transport().inbox.messages.iter().all(|m| m.seen));

    service.transport_mut().close().await;
    let commands = server.await.unwrap();
    let recipients: Vec<_> = commands
        .iter()
        .filter(|c| c.starts_with("RCPT TO") || *c == "RSET")
        .map(String::as_str)
        .collect();
    assert_eq!(
        recipients,
        [
            "RCPT TO:<admin@x.org>",
            "RSET",
            "RCPT TO:<a@x.org>",
            "RCPT TO:<b@x.org>",
            "RCPT TO:<admin@x.org>",
        ]
    );
    assert_eq!(commands.last().map(String::as_str), Some("QUIT"));
}
