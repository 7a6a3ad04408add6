//! Renderable content recovered from an incoming message.

use mailrelay_mime::{Attachment, Message, Part};
use tracing::debug;

/// Bodies and attachments taken from one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedContent {
    /// First eligible `text/html` body.
    pub html: Option<String>,
    /// First eligible `text/plain` body.
    pub text: Option<String>,
    /// Attachments in discovery order.
    pub attachments: Vec<Attachment>,
}

impl ExtractedContent {
    /// Returns true when nothing renderable was found.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.html.is_none() && self.text.is_none() && self.attachments.is_empty()
    }
}

/// What a leaf part contributes to the extraction.
enum Role {
    Attachment(String),
    Text,
    Html,
    Skip,
}

fn classify(part: &Part) -> Role {
    if part.is_multipart() {
        return Role::Skip;
    }

    let content_type = part.content_type();
    let is_text = content_type.is("text", "plain");
    let is_html = content_type.is("text", "html");

    if let Some(filename) = part.filename()
        && (part.is_attachment() || !(is_text || is_html))
    {
        return Role::Attachment(filename);
    }

    if part.is_attachment() {
        Role::Skip
    } else if is_text {
        Role::Text
    } else if is_html {
        Role::Html
    } else {
        Role::Skip
    }
}

/// Extracts the preferred bodies and all attachments from `message`.
///
/// A single-part message is its own plain-text body regardless of its
/// declared type. Decoding never fails: undecodable transfer encodings fall
/// back to the raw bytes, and undecodable charsets to Latin-1.
#[must_use]
pub fn extract(message: &Message) -> ExtractedContent {
    let root = message.root();
    if !root.is_multipart() {
        return ExtractedContent {
            text: Some(root.text()),
            ..ExtractedContent::default()
        };
    }

    let mut content = ExtractedContent::default();
    for part in root.walk() {
        match classify(part) {
            Role::Attachment(filename) => content.attachments.push(Attachment::new(
                filename,
                part.content_type(),
                part.body_bytes(),
            )),
            Role::Text if content.text.is_none() => content.text = Some(part.text()),
            Role::Html if content.html.is_none() => content.html = Some(part.text()),
            Role::Text | Role::Html | Role::Skip => {}
        }
    }

    debug!(
        html = content.html.is_some(),
        text = content.text.is_some(),
        attachments = content.attachments.len(),
        "Extracted content"
    );
    content
}

/// Returns only the first eligible plain-text body.
#[must_use]
pub fn extract_plain_text(message: &Message) -> Option<String> {
    let root = message.root();
    if !root.is_multipart() {
        return Some(root.text());
    }

    root.walk()
        .find(|part| matches!(classify(part), Role::Text))
        .map(Part::text)
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
    use proptest::prelude::*;

    fn nested() -> Message {
        Message::parse(
            b"From: admin@x.org\r\n\
              Subject: Samlingsbrev\r\n\
              Content-Type: multipart/mixed; boundary=outer\r\n\
              \r\n\
              --outer\r\n\
              Content-Type: multipart/alternative; boundary=inner\r\n\
              \r\n\
              --inner\r\n\
              Content-Type: text/plain; charset=utf-8\r\n\
              \r\n\
              V\xc3\xa4lkommen\r\n\
              --inner\r\n\
              Content-Type: text/html; charset=utf-8\r\n\
              Content-Transfer-Encoding: quoted-printable\r\n\
              \r\n\
              <p>V=C3=A4lkommen</p>\r\n\
              --inner--\r\n\
              --outer\r\n\
              Content-Type: text/plain\r\n\
              \r\n\
              second plain body\r\n\
              --outer\r\n\
              Content-Type: application/pdf; name=\"agenda.pdf\"\r\n\
              Content-Transfer-Encoding: base64\r\n\
              \r\n\
              JVBERi0=\r\n\
              --outer\r\n\
              Content-Type: text/plain\r\n\
              Content-Disposition: attachment; filename=\"notes.txt\"\r\n\
              \r\n\
              attached notes\r\n\
              --outer--\r\n",
        )
    }

    #[test]
    fn test_extract_nested_multipart() {
        let content = extract(&nested());

        assert_eq!(content.text.as_deref(), Some("Välkommen"));
        assert_eq!(content.html.as_deref(), Some("<p>Välkommen</p>"));
        assert_eq!(content.attachments.len(), 2);

        assert_eq!(content.attachments[0].filename, "agenda.pdf");
        assert_eq!(content.attachments[0].content_type.mime_type(), "application/pdf");
        assert_eq!(content.attachments[0].data, b"%PDF-");

        assert_eq!(content.attachments[1].filename, "notes.txt");
        assert_eq!(content.attachments[1].data, b"attached notes");
    }

    #[test]
    fn test_extract_single_part() {
        let message = Message::parse(
            b"Subject: hi\r\nContent-Type: text/html\r\n\r\n<b>hello</b>",
        );
        let content = extract(&message);
        assert_eq!(content.text.as_deref(), Some("<b>hello</b>"));
        assert!(content.html.is_none());
        assert!(content.attachments.is_empty());
    }

    #[test]
    fn test_extract_inline_image_without_name_is_skipped() {
        let message = Message::parse(
            b"Content-Type: multipart/related; boundary=b\r\n\
              \r\n\
              --b\r\n\
              Content-Type: text/html\r\n\
              \r\n\
              <img src=\"cid:logo\">\r\n\
              --b\r\n\
              Content-Type: image/png\r\n\
              Content-Disposition: inline\r\n\
              \r\n\
              PNG\r\n\
              --b--\r\n",
        );
        let content = extract(&message);
        assert_eq!(content.html.as_deref(), Some("<img src=\"cid:logo\">"));
        assert!(content.text.is_none());
        assert!(content.attachments.is_empty());
    }

    #[test]
    fn test_extract_empty_multipart() {
        let message = Message::parse(b"Content-Type: multipart/mixed; boundary=b\r\n\r\n--b--\r\n");
        assert!(extract(&message).is_empty());
        assert!(extract_plain_text(&message).is_none());
    }

    #[test]
    fn test_extract_plain_text() {
        assert_eq!(extract_plain_text(&nested()).as_deref(), Some("Välkommen"));
    }

    #[test]
    fn test_extract_latin1_fallback() {
        let message = Message::parse(b"Content-Type: text/plain\r\n\r\nK\xe4ra medlemmar");
        assert_eq!(extract(&message).text.as_deref(), Some("Kära medlemmar"));
    }

    #[test]
    fn test_extract_utf8_body_labelled_latin1() {
        let mut raw = b"Content-Type: multipart/alternative; boundary=b\r\n\r\n--b\r\n\
            Content-Type: text/plain; charset=iso-8859-1\r\n\r\n"
            .to_vec();
        raw.extend_from_slice("Välkommen".as_bytes());
        raw.extend_from_slice(b"\r\n--b--\r\n");

        let content = extract(&Message::parse(&raw));
        assert_eq!(content.text.as_deref(), Some("Välkommen"));
    }

    #[test]
    fn test_extract_reaches_into_enclosed_message() {
        let message = Message::parse(
            b"Content-Type: multipart/mixed; boundary=b\r\n\r\n\
              --b\r\n\
              Content-Type: message/rfc822\r\n\r\n\
              Subject: Forwarded\r\n\
              Content-Type: multipart/mixed; boundary=c\r\n\r\n\
              --c\r\n\
              Content-Type: text/html\r\n\r\n\
              <p>from the enclosed message</p>\r\n\
              --c\r\n\
              Content-Type: text/plain; name=\"list.txt\"\r\n\
              Content-Disposition: attachment\r\n\r\n\
              names\r\n\
              --c--\r\n\
              --b--\r\n",
        );
        let content = extract(&message);
        assert_eq!(content.html.as_deref(), Some("<p>from the enclosed message</p>"));
        assert!(content.text.is_none());
        assert_eq!(content.attachments.len(), 1);
        assert_eq!(content.attachments[0].filename, "list.txt");
    }

    #[test]
    fn test_extract_bad_base64_keeps_raw() {
        let message = Message::parse(
            b"Content-Type: text/plain\r\nContent-Transfer-Encoding: base64\r\n\r\n!!not base64!!",
        );
        assert_eq!(extract(&message).text.as_deref(), Some("!!not base64!!"));
    }

    proptest! {
        #[test]
        fn prop_extract_never_fails(
            body in proptest::collection::vec(any::<u8>().prop_filter("no dash", |b| *b != b'-'), 0..256)
        ) {
            let mut raw = b"Content-Type: multipart/mixed; boundary=z\r\n\r\n--z\r\nContent-Type: text/plain; charset=bogus\r\n\r\n".to_vec();
            raw.extend_from_slice(&body);
            raw.extend_from_slice(b"\r\n--z--\r\n");

            let content = extract(&Message::parse(&raw));
            prop_assert!(content.text.is_some());
            prop_assert!(content.html.is_none());
            prop_assert!(content.attachments.is_empty());
        }
    }
}
