//! Integration tests for the IMAP client.
//!
//! A scripted mock stream plays the server side of a complete polling
//! session; the mock fails the test if the client writes anything other
//! than the expected command bytes.

#![allow(clippy::unwrap_used)]

use tokio_test::io::Builder;

use mailrelay_imap::{Client, Error, Flag, SearchCriteria, SeqNum, StoreAction};

const MESSAGE: &[u8] = b"From: admin@x.org\r\nSubject: Hello\r\n\r\nBody\r\n";

fn literal_fetch(seq: u32, body: &[u8]) -> Vec<u8> {
    let mut out = format!("* {seq} FETCH (BODY[] {{{}}}\r\n", body.len()).into_bytes();
    out.extend_from_slice(body);
    out.extend_from_slice(b")\r\n");
    out
}

#[tokio::test]
async fn test_full_polling_session() {
    let fetch = literal_fetch(2, MESSAGE);
    let mock = Builder::new()
        .read(b"* OK [CAPABILITY IMAP4rev1] ready\r\n")
        .write(b"A0000 LOGIN relay@x.org secret\r\n")
        .read(b"* CAPABILITY IMAP4rev1 IDLE\r\n")
        .read(b"A0000 OK LOGIN completed\r\n")
        .write(b"A0001 SELECT INBOX\r\n")
        .read(b"* 3 EXISTS\r\n* 0 RECENT\r\n")
        .read(b"A0001 OK [READ-WRITE] SELECT completed\r\n")
        .write(b"A0002 SEARCH UNSEEN\r\n")
        .read(b"* SEARCH 2\r\nA0002 OK SEARCH completed\r\n")
        .write(b"A0003 FETCH 2 BODY.PEEK[]\r\n")
        .read(&fetch)
        .read(b"A0003 OK FETCH completed\r\n")
        .write(b"A0004 STORE 2 +FLAGS.SILENT (\\Seen)\r\n")
        .read(b"A0004 OK STORE completed\r\n")
        .write(b"A0005 NOOP\r\n")
        .read(b"A0005 OK NOOP completed\r\n")
        .write(b"A0006 LOGOUT\r\n")
        .read(b"* BYE logging out\r\n")
        .build();

    let client = Client::from_stream(mock).await.unwrap();
    let client = client.login("relay@x.org", "secret").await.unwrap();
    assert!(client.has_capability("idle"));

    let (mut client, status) = client.select("INBOX").await.unwrap();
    assert_eq!(status.exists, 3);
    assert_eq!(client.mailbox(), "INBOX");

    let unseen = client.search(&SearchCriteria::Unseen).await.unwrap();
    assert_eq!(unseen, vec![SeqNum::new(2).unwrap()]);

    let raw = client.fetch_message(unseen[0]).await.unwrap();
    assert_eq!(raw, MESSAGE);

    client
        .store(unseen[0], &StoreAction::Add(vec![Flag::Seen]))
        .await
        .unwrap();
    client.noop().await.unwrap();
    client.logout().await.unwrap();
}

#[tokio::test]
async fn test_login_rejected_is_auth_error() {
    let mock = Builder::new()
        .read(b"* OK ready\r\n")
        .write(b"A0000 LOGIN relay@x.org wrong\r\n")
        .read(b"A0000 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n")
        .build();

    let client = Client::from_stream(mock).await.unwrap();
    let err = client.login("relay@x.org", "wrong").await.unwrap_err();
    assert!(matches!(err, Error::Auth(text) if text.contains("Invalid credentials")));
}

#[tokio::test]
async fn test_bye_greeting_is_rejected() {
    let mock = Builder::new().read(b"* BYE too many connections\r\n").build();

    let err = Client::from_stream(mock).await.unwrap_err();
    assert!(matches!(err, Error::Bye(_)));
    assert!(err.is_connection_lost());
}

#[tokio::test]
async fn test_select_missing_mailbox() {
    let mock = Builder::new()
        .read(b"* OK ready\r\n")
        .write(b"A0000 LOGIN u p\r\n")
        .read(b"A0000 OK done\r\n")
        .write(b"A0001 SELECT Nowhere\r\n")
        .read(b"A0001 NO Mailbox doesn't exist\r\n")
        .build();

    let client = Client::from_stream(mock).await.unwrap();
    let client = client.login("u", "p").await.unwrap();
    let err = client.select("Nowhere").await.unwrap_err();
    assert!(matches!(err, Error::No(_)));
    assert!(!err.is_connection_lost());
}

#[tokio::test]
async fn test_noop_on_dropped_connection_is_connection_lost() {
    let mock = Builder::new()
        .read(b"* OK ready\r\n")
        .write(b"A0000 LOGIN u p\r\n")
        .read(b"A0000 OK done\r\n")
        .write(b"A0001 SELECT INBOX\r\n")
        .read(b"A0001 OK done\r\n")
        .write(b"A0002 NOOP\r\n")
        .build();

    let client = Client::from_stream(mock).await.unwrap();
    let client = client.login("u", "p").await.unwrap();
    let (mut client, _) = client.select("INBOX").await.unwrap();

    let err = client.noop().await.unwrap_err();
    assert!(err.is_connection_lost());
}

#[tokio::test]
async fn test_fetch_without_body_keeps_session() {
    let mock = Builder::new()
        .read(b"* OK ready\r\n")
        .write(b"A0000 LOGIN u p\r\n")
        .read(b"A0000 OK done\r\n")
        .write(b"A0001 SELECT INBOX\r\n")
        .read(b"A0001 OK done\r\n")
        .write(b"A0002 FETCH 9 BODY.PEEK[]\r\n")
        .read(b"A0002 OK FETCH completed\r\n")
        .write(b"A0003 NOOP\r\n")
        .read(b"A0003 OK NOOP completed\r\n")
        .build();

    let client = Client::from_stream(mock).await.unwrap();
    let client = client.login("u", "p").await.unwrap();
    let (mut client, _) = client.select("INBOX").await.unwrap();

    let seq = SeqNum::new(9).unwrap();
    let err = client.fetch_message(seq).await.unwrap_err();
    assert!(matches!(err, Error::MissingBody(got) if got == seq));
    assert!(!err.is_connection_lost());
    client.noop().await.unwrap();
}
