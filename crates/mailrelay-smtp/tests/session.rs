//! End-to-end SMTP session against a scripted server.

#![allow(clippy::unwrap_used)]

use tokio_test::io::Builder;

use mailrelay_smtp::{Address, Client, Error};

fn addr(s: &str) -> Address {
    Address::new(s).unwrap()
}

#[tokio::test]
async fn test_relay_session() {
    let mock = Builder::new()
        .read(b"220 smtp.x.org ESMTP Postfix\r\n")
        .write(b"EHLO relay.x.org\r\n")
        .read(b"250-smtp.x.org\r\n250-SIZE 1000\r\n250-AUTH PLAIN LOGIN\r\n250 8BITMIME\r\n")
        .write(b"AUTH PLAIN AHJlbGF5QHgub3JnAHNlY3JldA==\r\n")
        .read(b"235 2.7.0 Authentication successful\r\n")
        .write(b"MAIL FROM:<relay@x.org> SIZE=29\r\n")
        .read(b"250 2.1.0 Ok\r\n")
        .write(b"RCPT TO:<a@x.org>\r\n")
        .read(b"250 2.1.5 Ok\r\n")
        .write(b"DATA\r\n")
        .read(b"354 End data with <CR><LF>.<CR><LF>\r\n")
        .write(b"Subject: Hi\r\n\r\n..dotted\r\nbye\r\n.\r\n")
        .read(b"250 2.0.0 Ok: queued as 4F1\r\n")
        .write(b"NOOP\r\n")
        .read(b"250 2.0.0 Ok\r\n")
        .write(b"QUIT\r\n")
        .read(b"221 2.0.0 Bye\r\n")
        .build();

    let client = Client::from_stream(mock).await.unwrap();
    let client = client.ehlo("relay.x.org").await.unwrap();
    assert_eq!(client.server_info().max_message_size(), Some(1000));

    let mut client = client.authenticate("relay@x.org", "secret").await.unwrap();
    let message = b"Subject: Hi\r\n\r\n.dotted\r\nbye\r\n";
    assert_eq!(message.len(), 29);

    client
        .send_mail(&addr("relay@x.org"), &[addr("a@x.org")], message)
        .await
        .unwrap();
    client.noop().await.unwrap();
    client.quit().await.unwrap();
}

#[tokio::test]
async fn test_rejected_recipient() {
    let mock = Builder::new()
        .read(b"220 smtp.x.org ESMTP\r\n")
        .write(b"EHLO relay.x.org\r\n")
        .read(b"250-smtp.x.org\r\n250 AUTH PLAIN\r\n")
        .write(b"AUTH PLAIN AHUAcA==\r\n")
        .read(b"235 ok\r\n")
        .write(b"MAIL FROM:<relay@x.org>\r\n")
        .read(b"250 ok\r\n")
        .write(b"RCPT TO:<gone@x.org>\r\n")
        .read(b"550 5.1.1 <gone@x.org>: Recipient address rejected\r\n")
        .write(b"RSET\r\n")
        .read(b"250 2.0.0 Ok\r\n")
        .write(b"MAIL FROM:<relay@x.org>\r\n")
        .read(b"250 ok\r\n")
        .write(b"RCPT TO:<a@x.org>\r\n")
        .read(b"250 ok\r\n")
        .write(b"DATA\r\n")
        .read(b"354 go ahead\r\n")
        .write(b"x\r\n.\r\n")
        .read(b"250 queued\r\n")
        .build();

    let client = Client::from_stream(mock).await.unwrap();
    let client = client.ehlo("relay.x.org").await.unwrap();
    let mut client = client.authenticate("u", "p").await.unwrap();

    let err = client
        .send_mail(&addr("relay@x.org"), &[addr("gone@x.org")], b"x\r\n")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SmtpError { code: 550, .. }));
    assert!(err.is_permanent());
    assert!(!err.is_connection_lost());

    client
        .send_mail(&addr("relay@x.org"), &[addr("a@x.org")], b"x\r\n")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rejected_data_is_reset() {
    let mock = Builder::new()
        .read(b"220 smtp.x.org ESMTP\r\n")
        .write(b"EHLO relay.x.org\r\n")
        .read(b"250-smtp.x.org\r\n250 AUTH PLAIN\r\n")
        .write(b"AUTH PLAIN AHUAcA==\r\n")
        .read(b"235 ok\r\n")
        .write(b"MAIL FROM:<relay@x.org>\r\n")
        .read(b"250 ok\r\n")
        .write(b"RCPT TO:<a@x.org>\r\n")
        .read(b"250 ok\r\n")
        .write(b"DATA\r\n")
        .read(b"354 go ahead\r\n")
        .write(b"spam\r\n.\r\n")
        .read(b"554 5.7.1 Message rejected\r\n")
        .write(b"RSET\r\n")
        .read(b"250 ok\r\n")
        .write(b"NOOP\r\n")
        .read(b"250 ok\r\n")
        .build();

    let client = Client::from_stream(mock).await.unwrap();
    let client = client.ehlo("relay.x.org").await.unwrap();
    let mut client = client.authenticate("u", "p").await.unwrap();

    let err = client
        .send_mail(&addr("relay@x.org"), &[addr("a@x.org")], b"spam\r\n")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SmtpError { code: 554, .. }));
    client.noop().await.unwrap();
}

#[tokio::test]
async fn test_noop_after_server_timeout() {
    let mock = Builder::new()
        .read(b"220 smtp.x.org ESMTP\r\n")
        .write(b"EHLO relay.x.org\r\n")
        .read(b"250 smtp.x.org\r\n")
        .write(b"AUTH LOGIN\r\n")
        .read(b"334 VXNlcm5hbWU6\r\n")
        .write(b"dQ==\r\n")
        .read(b"334 UGFzc3dvcmQ6\r\n")
        .write(b"cA==\r\n")
        .read(b"235 ok\r\n")
        .write(b"NOOP\r\n")
        .read(b"421 4.4.2 smtp.x.org Error: timeout exceeded\r\n")
        .build();

    let client = Client::from_stream(mock).await.unwrap();
    let client = client.ehlo("relay.x.org").await.unwrap();
    let mut client = client.authenticate("u", "p").await.unwrap();

    let err = client.noop().await.unwrap_err();
    assert!(err.is_connection_lost());
}
