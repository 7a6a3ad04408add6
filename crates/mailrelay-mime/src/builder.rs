//! Outgoing message construction.
//!
//! Every message is rendered as `multipart/mixed` with one body part
//! followed by the attachments, all base64 encoded, so arbitrary bytes and
//! non-ASCII text pass through any relay unchanged.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::content_type::ContentType;
use crate::disposition::ContentDisposition;
use crate::encoding::{encode_base64_wrapped, encode_rfc2047};
use crate::error::{Error, Result};
use crate::header::Headers;
use crate::message::TransferEncoding;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A file attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name shown to the recipient.
    pub filename: String,
    /// Content type of the data.
    pub content_type: ContentType,
    /// Raw (decoded) bytes.
    pub data: Vec<u8>,
}

impl Attachment {
    /// Creates a new attachment.
    #[must_use]
    pub fn new(filename: impl Into<String>, content_type: ContentType, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type,
            data,
        }
    }
}

/// Builder for outgoing messages.
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    subject: Option<String>,
    body: Option<(ContentType, String)>,
    attachments: Vec<Attachment>,
    date: Option<DateTime<Utc>>,
}

impl MessageBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sender address.
    #[must_use]
    pub fn from(mut self, address: impl Into<String>) -> Self {
        self.from = Some(address.into());
        self
    }

    /// Adds a recipient address.
    #[must_use]
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets a plain-text body, replacing any previous body.
    #[must_use]
    pub fn text_body(mut self, text: impl Into<String>) -> Self {
        self.body = Some((ContentType::text_plain(), text.into()));
        self
    }

    /// Sets an HTML body, replacing any previous body.
    #[must_use]
    pub fn html_body(mut self, html: impl Into<String>) -> Self {
        self.body = Some((ContentType::text_html(), html.into()));
        self
    }

    /// Adds an attachment.
    #[must_use]
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Overrides the `Date` header (defaults to now).
    #[must_use]
    pub fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Renders the message with CRLF line endings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingHeader`] when the sender or recipients are
    /// missing.
    pub fn build(self) -> Result<String> {
        let from = self
            .from
            .filter(|from| !from.trim().is_empty())
            .ok_or_else(|| Error::MissingHeader("From".to_string()))?;
        if self.to.is_empty() {
            return Err(Error::MissingHeader("To".to_string()));
        }

        let date = self.date.unwrap_or_else(Utc::now);
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let stamp = date.timestamp_micros();
        let boundary = format!("=_mailrelay_{stamp:x}_{sequence}");
        let domain = from.rsplit_once('@').map_or("localhost", |(_, domain)| domain);

        let mut headers = Headers::new();
        headers.add("From", from.as_str());
        headers.add("To", self.to.join(", "));
        headers.add(
            "Subject",
            encode_rfc2047(self.subject.as_deref().unwrap_or_default()),
        );
        headers.add("Date", date.to_rfc2822());
        headers.add("Message-ID", format!("<{stamp}.{sequence}@{domain}>"));
        headers.add("MIME-Version", "1.0");
        headers.add(
            "Content-Type",
            ContentType::multipart_mixed(boundary.as_str()).to_string(),
        );

        let mut out = headers.to_string();
        out.push_str("\r\n");

        let (body_type, body) = self
            .body
            .unwrap_or_else(|| (ContentType::text_plain(), String::new()));
        let mut body_headers = Headers::new();
        body_headers.add("Content-Type", body_type.to_string());
        body_headers.add("Content-Transfer-Encoding", TransferEncoding::Base64.to_string());
        push_part(&mut out, &boundary, &body_headers, body.as_bytes());

        for attachment in &self.attachments {
            let content_type = attachment
                .content_type
                .clone()
                .with_parameter("name", encode_rfc2047(&attachment.filename));

            let mut part_headers = Headers::new();
            part_headers.add("Content-Type", content_type.to_string());
            part_headers.add(
                "Content-Disposition",
                ContentDisposition::attachment(attachment.filename.as_str()).to_string(),
            );
            part_headers.add("Content-Transfer-Encoding", TransferEncoding::Base64.to_string());
            push_part(&mut out, &boundary, &part_headers, &attachment.data);
        }

        out.push_str("--");
        out.push_str(&boundary);
        out.push_str("--\r\n");
        Ok(out)
    }
}

fn push_part(out: &mut String, boundary: &str, headers: &Headers, data: &[u8]) {
    out.push_str("--");
    out.push_str(boundary);
    out.push_str("\r\n");
    out.push_str(&headers.to_string());
    out.push_str("\r\n");
    out.push_str(&encode_base64_wrapped(data));
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
    use crate::message::{Message, Part};
    use chrono::TimeZone;

    fn fixed_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap()
    }

    #[test]
    fn test_missing_from_or_to() {
        let err = MessageBuilder::new().to("a@x.org").build().unwrap_err();
        assert!(matches!(err, Error::MissingHeader(h) if h == "From"));

        let err = MessageBuilder::new().from("relay@x.org").build().unwrap_err();
        assert!(matches!(err, Error::MissingHeader(h) if h == "To"));
    }

    #[test]
    fn test_headers() {
        let raw = MessageBuilder::new()
            .from("relay@x.org")
            .to("a@x.org")
            .subject("Församlingsbrev March")
            .text_body("hej")
            .date(fixed_date())
            .build()
            .unwrap();

        let message = Message::parse(raw.as_bytes());
        let headers = message.headers();
        assert_eq!(headers.get("From"), Some("relay@x.org"));
        assert_eq!(headers.get("To"), Some("a@x.org"));
        assert!(headers.get("Date").unwrap().contains("1 Mar 2024 08:30:00 +0000"));
        assert_eq!(headers.get("MIME-Version"), Some("1.0"));
        assert!(headers.get("Message-ID").unwrap().ends_with("@x.org>"));
        assert!(headers.get("Subject").unwrap().starts_with("=?utf-8?B?"));
        assert_eq!(message.subject().as_deref(), Some("Församlingsbrev March"));
        assert!(raw.is_ascii());
        assert!(!raw.contains("\n\n"));
    }

    #[test]
    fn test_html_body_with_attachments() {
        let raw = MessageBuilder::new()
            .from("relay@x.org")
            .to("b@x.org")
            .subject("Plain subject")
            .text_body("replaced")
            .html_body("<p>Välkommen</p>")
            .attach(Attachment::new(
                "årsmöte.pdf",
                ContentType::new("application", "pdf"),
                b"%PDF-1.4\x00\xff".to_vec(),
            ))
            .attach(Attachment::new(
                "notes.txt",
                ContentType::text_plain(),
                b"notes".to_vec(),
            ))
            .build()
            .unwrap();

        let message = Message::parse(raw.as_bytes());
        assert_eq!(message.subject().as_deref(), Some("Plain subject"));

        let parts: Vec<&Part> = message.root().parts().iter().collect();
        assert_eq!(parts.len(), 3);

        assert!(parts[0].content_type().is("text", "html"));
        assert_eq!(parts[0].text(), "<p>Välkommen</p>");

        assert!(parts[1].is_attachment());
        assert!(parts[1].content_type().is("application", "pdf"));
        assert_eq!(parts[1].filename().as_deref(), Some("årsmöte.pdf"));
        assert_eq!(parts[1].body_bytes(), b"%PDF-1.4\x00\xff");

        assert_eq!(parts[2].filename().as_deref(), Some("notes.txt"));
        assert_eq!(parts[2].text(), "notes");
    }

    #[test]
    fn test_unique_boundaries_and_ids() {
        let build = || {
            MessageBuilder::new()
                .from("relay@x.org")
                .to("a@x.org")
                .date(fixed_date())
                .build()
                .unwrap()
        };
        let first = Message::parse(build().as_bytes());
        let second = Message::parse(build().as_bytes());
        assert_ne!(first.message_id(), second.message_id());
        assert_ne!(
            first.root().content_type().boundary(),
            second.root().content_type().boundary()
        );
    }

    #[test]
    fn test_empty_body_still_has_text_part() {
        let raw = MessageBuilder::new()
            .from("relay@x.org")
            .to("a@x.org")
            .build()
            .unwrap();
        let message = Message::parse(raw.as_bytes());
        let parts = message.root().parts();
        assert_eq!(parts.len(), 1);
        assert!(parts[0].content_type().is("text", "plain"));
        assert_eq!(parts[0].text(), "");
    }
}
