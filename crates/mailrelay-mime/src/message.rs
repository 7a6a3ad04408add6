//! MIME message structure and handling.
//!
//! [`Message::parse`] is lenient: it never fails, and anything it cannot
//! make sense of ends up as an opaque leaf part. A missing or unparsable
//! `Content-Type` reads as text/plain, a multipart without a boundary is a
//! leaf, and a missing closing delimiter ends the multipart at end of input.
//! An enclosed `message/rfc822` is parsed as a container holding the inner
//! message's root part.

use std::fmt;

use crate::charset::decode_text;
use crate::content_type::ContentType;
use crate::disposition::ContentDisposition;
use crate::encoding::{decode_base64, decode_header_value, decode_quoted_printable};
use crate::error::Result;
use crate::header::Headers;

/// Multipart nesting deeper than this is kept as an opaque leaf.
const MAX_DEPTH: usize = 32;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    #[default]
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string. Unknown values read as 7bit.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit,
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SevenBit => "7bit",
            Self::EightBit => "8bit",
            Self::Base64 => "base64",
            Self::QuotedPrintable => "quoted-printable",
            Self::Binary => "binary",
        })
    }
}

/// Body of a part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Raw, still transfer-encoded content.
    Leaf(Vec<u8>),
    /// Child parts of a container, in order. A `message/rfc822` part holds
    /// exactly one child: the enclosed message's root.
    Multipart(Vec<Part>),
}

/// MIME message part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// Part headers.
    pub headers: Headers,
    /// Part body.
    pub body: Body,
}

impl Part {
    /// Creates a new part.
    #[must_use]
    pub const fn new(headers: Headers, body: Body) -> Self {
        Self { headers, body }
    }

    /// Gets the content type, text/plain when absent or malformed.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.headers
            .get("content-type")
            .map_or_else(ContentType::default, ContentType::parse_lenient)
    }

    /// Gets the content disposition, if present.
    #[must_use]
    pub fn disposition(&self) -> Option<ContentDisposition> {
        self.headers
            .get("content-disposition")
            .map(ContentDisposition::parse)
    }

    /// Returns true when the disposition is `attachment`.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.disposition()
            .is_some_and(|disposition| disposition.is_attachment())
    }

    /// Returns the part's filename.
    ///
    /// Taken from the `Content-Disposition` `filename` parameter, falling
    /// back to the `Content-Type` `name` parameter; RFC 2231 and RFC 2047
    /// encodings are decoded.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        self.disposition()
            .and_then(|disposition| disposition.filename())
            .or_else(|| {
                self.content_type()
                    .param("name")
                    .filter(|name| !name.trim().is_empty())
                    .map(decode_header_value)
            })
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Checks if this part is a container (multipart or enclosed message).
    #[must_use]
    pub const fn is_multipart(&self) -> bool {
        matches!(self.body, Body::Multipart(_))
    }

    /// Child parts; empty for leaves.
    #[must_use]
    pub fn parts(&self) -> &[Part] {
        match &self.body {
            Body::Multipart(parts) => parts,
            Body::Leaf(_) => &[],
        }
    }

    /// Raw (transfer-encoded) leaf content; empty for containers.
    #[must_use]
    pub fn raw_body(&self) -> &[u8] {
        match &self.body {
            Body::Leaf(raw) => raw,
            Body::Multipart(_) => &[],
        }
    }

    /// Decodes the body according to the transfer encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if the content is not valid for its encoding.
    pub fn decode_body(&self) -> Result<Vec<u8>> {
        let raw = self.raw_body();
        match self.transfer_encoding() {
            TransferEncoding::Base64 => decode_base64(raw),
            TransferEncoding::QuotedPrintable => decode_quoted_printable(raw),
            _ => Ok(raw.to_vec()),
        }
    }

    /// Decoded body bytes, or the raw bytes when transfer decoding fails.
    #[must_use]
    pub fn body_bytes(&self) -> Vec<u8> {
        self.decode_body()
            .unwrap_or_else(|_| self.raw_body().to_vec())
    }

    /// Body as text using the declared charset with fallbacks. Never fails.
    #[must_use]
    pub fn text(&self) -> String {
        decode_text(&self.body_bytes(), self.content_type().charset())
    }

    /// Iterates over this part and all descendants, depth-first.
    #[must_use]
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }

    fn parse(raw: &[u8], depth: usize) -> Self {
        let (head, body) = split_head_body(raw);
        let headers = Headers::parse(&decode_text(head, None));

        let content_type = headers
            .get("content-type")
            .map_or_else(ContentType::default, ContentType::parse_lenient);

        let body = match content_type.boundary() {
            _ if depth >= MAX_DEPTH => Body::Leaf(body.to_vec()),
            Some(boundary) if content_type.is_multipart() => Body::Multipart(
                split_multipart(body, boundary)
                    .into_iter()
                    .map(|part| Self::parse(part, depth + 1))
                    .collect(),
            ),
            _ if content_type.is("message", "rfc822") => {
                let leaf = Self {
                    headers,
                    body: Body::Leaf(body.to_vec()),
                };
                let inner = leaf.body_bytes();
                return Self {
                    headers: leaf.headers,
                    body: Body::Multipart(vec![Self::parse(&inner, depth + 1)]),
                };
            }
            _ => Body::Leaf(body.to_vec()),
        };

        Self { headers, body }
    }
}

/// Depth-first iterator over a part tree. See [`Part::walk`].
#[derive(Debug)]
pub struct Walk<'a> {
    stack: Vec<&'a Part>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a Part;

    fn next(&mut self) -> Option<Self::Item> {
        let part = self.stack.pop()?;
        self.stack.extend(part.parts().iter().rev());
        Some(part)
    }
}

/// Parsed MIME message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    root: Part,
}

impl Message {
    /// Parses raw message bytes. Never fails.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        Self {
            root: Part::parse(raw, 0),
        }
    }

    /// The top-level part.
    #[must_use]
    pub const fn root(&self) -> &Part {
        &self.root
    }

    /// Top-level headers.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.root.headers
    }

    /// Checks if this is a multipart message.
    #[must_use]
    pub const fn is_multipart(&self) -> bool {
        self.root.is_multipart()
    }

    /// Decoded `From` header.
    #[must_use]
    pub fn from(&self) -> Option<String> {
        self.decoded_header("from")
    }

    /// Decoded `To` header.
    #[must_use]
    pub fn to(&self) -> Option<String> {
        self.decoded_header("to")
    }

    /// Decoded `Subject` header.
    #[must_use]
    pub fn subject(&self) -> Option<String> {
        self.decoded_header("subject")
    }

    /// Raw `Date` header.
    #[must_use]
    pub fn date(&self) -> Option<&str> {
        self.root.headers.get("date")
    }

    /// Raw `Message-ID` header.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.root.headers.get("message-id")
    }

    /// Iterates over every part, depth-first, starting with the root.
    #[must_use]
    pub fn walk(&self) -> Walk<'_> {
        self.root.walk()
    }

    fn decoded_header(&self, name: &str) -> Option<String> {
        self.root.headers.get(name).map(decode_header_value)
    }
}

/// Splits at the first empty line. Without one, everything is header.
fn split_head_body(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(body) = raw.strip_prefix(b"\r\n").or_else(|| raw.strip_prefix(b"\n")) {
        return (&[], body);
    }

    let crlf = find(raw, b"\r\n\r\n").map(|pos| (pos, pos + 4));
    let lf = find(raw, b"\n\n").map(|pos| (pos, pos + 2));

    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };

    match split {
        Some((head_end, body_start)) => (&raw[..head_end], &raw[body_start..]),
        None => (raw, &[]),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Splits a multipart body into the raw bytes of each child part.
///
/// The preamble and epilogue are dropped. The line break before each
/// delimiter belongs to the delimiter.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    let mut current: Option<usize> = None;
    let mut pos = 0;

    while pos < body.len() {
        let line_end = body[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(body.len(), |offset| pos + offset);
        let next = (line_end + 1).min(body.len());

        let line = &body[pos..line_end];
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        if let Some(rest) = line.strip_prefix(delimiter.as_bytes()) {
            let closing = rest.starts_with(b"--");
            if closing || rest.iter().all(u8::is_ascii_whitespace) {
                if let Some(start) = current.take() {
                    parts.push(&body[start..trim_line_break(body, start, pos)]);
                }
                if closing {
                    return parts;
                }
                current = Some(next);
            }
        }

        pos = next;
    }

    if let Some(start) = current {
        parts.push(&body[start..]);
    }
    parts
}

fn trim_line_break(body: &[u8], start: usize, mut end: usize) -> usize {
    if end > start && body[end - 1] == b'\n' {
        end -= 1;
        if end > start && body[end - 1] == b'\r' {
            end -= 1;
        }
    }
    end
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

    const NEWSLETTER: &[u8] = b"From: Admin <admin@x.org>\r\n\
Subject: =?utf-8?Q?F=C3=B6rsamlingsbrev?= March\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
\r\n\
This is a multi-part message.\r\n\
--outer\r\n\
Content-Type: multipart/alternative; boundary=inner\r\n\
\r\n\
--inner\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
Content-Transfer-Encoding: quoted-printable\r\n\
\r\n\
V=C3=A4lkommen\r\n\
--inner\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>V\xc3\xa4lkommen</p>\r\n\
--inner--\r\n\
--outer\r\n\
Content-Type: application/pdf; name=\"program.pdf\"\r\n\
Content-Disposition: attachment; filename=\"program.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0=\r\n\
--outer--\r\n\
epilogue\r\n";

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse(" BASE64 "), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("quoted-printable"),
            TransferEncoding::QuotedPrintable
        );
        assert_eq!(TransferEncoding::parse("x-uuencode"), TransferEncoding::SevenBit);
    }

    #[test]
    fn test_single_part() {
        let message = Message::parse(b"From: a@x.org\r\nSubject: Hi\r\n\r\nHello, World!\r\n");
        assert!(!message.is_multipart());
        assert_eq!(message.from().as_deref(), Some("a@x.org"));
        assert_eq!(message.subject().as_deref(), Some("Hi"));
        assert_eq!(message.root().text(), "Hello, World!\r\n");
    }

    #[test]
    fn test_bare_lf_message() {
        let message = Message::parse(b"Subject: lf\n\nline one\nline two\n");
        assert_eq!(message.subject().as_deref(), Some("lf"));
        assert_eq!(message.root().text(), "line one\nline two\n");
    }

    #[test]
    fn test_nested_multipart_structure() {
        let message = Message::parse(NEWSLETTER);
        assert!(message.is_multipart());
        assert_eq!(message.subject().as_deref(), Some("Församlingsbrev March"));

        let types: Vec<String> = message
            .walk()
            .map(|part| part.content_type().mime_type())
            .collect();
        assert_eq!(
            types,
            vec![
                "multipart/mixed",
                "multipart/alternative",
                "text/plain",
                "text/html",
                "application/pdf",
            ]
        );
    }

    #[test]
    fn test_part_decoding() {
        let message = Message::parse(NEWSLETTER);
        let parts: Vec<&Part> = message.walk().collect();

        assert_eq!(parts[2].text(), "Välkommen");
        assert_eq!(parts[3].text(), "<p>Välkommen</p>");

        let pdf = parts[4];
        assert!(pdf.is_attachment());
        assert_eq!(pdf.filename().as_deref(), Some("program.pdf"));
        assert_eq!(pdf.body_bytes(), b"%PDF-");
    }

    #[test]
    fn test_filename_from_content_type_name() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\r\n\r\n\
--b\r\n\
Content-Type: image/png; name=\"=?utf-8?B?w6Vy?=.png\"\r\n\
\r\n\
png\r\n\
--b--\r\n";
        let message = Message::parse(raw);
        let image = &message.root().parts()[0];
        assert!(!image.is_attachment());
        assert_eq!(image.filename().as_deref(), Some("år.png"));
    }

    #[test]
    fn test_bad_base64_falls_back_to_raw() {
        let raw = b"Content-Transfer-Encoding: base64\r\n\r\n!!not base64!!";
        let message = Message::parse(raw);
        assert!(message.root().decode_body().is_err());
        assert_eq!(message.root().body_bytes(), b"!!not base64!!");
    }

    #[test]
    fn test_latin1_body_without_charset() {
        let raw = b"Content-Type: text/plain\r\n\r\nF\xf6rsamling";
        assert_eq!(Message::parse(raw).root().text(), "Församling");
    }

    #[test]
    fn test_multipart_without_boundary_is_leaf() {
        let raw = b"Content-Type: multipart/mixed\r\n\r\n--x\r\nbody\r\n";
        let message = Message::parse(raw);
        assert!(!message.is_multipart());
        assert_eq!(message.root().raw_body(), b"--x\r\nbody\r\n");
    }

    #[test]
    fn test_missing_closing_delimiter() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\r\n\r\n--b\r\n\r\nfirst\r\n--b\r\n\r\nsecond";
        let message = Message::parse(raw);
        let texts: Vec<String> = message.root().parts().iter().map(Part::text).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn test_enclosed_message_is_descended() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\r\n\r\n\
--b\r\n\
Content-Type: text/plain\r\n\r\n\
See below.\r\n\
--b\r\n\
Content-Type: message/rfc822\r\n\r\n\
Subject: Inner\r\n\
Content-Type: text/html; charset=utf-8\r\n\r\n\
<p>inner</p>\r\n\
--b--\r\n";
        let message = Message::parse(raw);

        let enclosed = &message.root().parts()[1];
        assert!(enclosed.is_multipart());
        let inner = &enclosed.parts()[0];
        assert_eq!(inner.headers.get("subject"), Some("Inner"));
        assert!(inner.content_type().is("text", "html"));
        assert_eq!(inner.text(), "<p>inner</p>");
        assert_eq!(message.walk().count(), 4);
    }

    #[test]
    fn test_base64_enclosed_message_is_decoded() {
        // "Subject: B\r\n\r\nbody" in base64.
        let raw = b"Content-Type: message/rfc822\r\n\
Content-Transfer-Encoding: base64\r\n\r\n\
U3ViamVjdDogQg0KDQpib2R5\r\n";
        let message = Message::parse(raw);
        let inner = &message.root().parts()[0];
        assert_eq!(inner.headers.get("subject"), Some("B"));
        assert_eq!(inner.text(), "body");
    }

    #[test]
    fn test_headers_only() {
        let message = Message::parse(b"Subject: nothing else");
        assert_eq!(message.subject().as_deref(), Some("nothing else"));
        assert!(message.root().raw_body().is_empty());
    }

    #[test]
    fn test_split_multipart_ignores_lookalike_lines() {
        let body = b"--bb\r\nA\r\n--bbx not a delimiter\r\n--bb--\r\n";
        let parts = split_multipart(body, "bb");
        assert_eq!(parts, vec![&b"A\r\n--bbx not a delimiter"[..]]);
    }

    #[test]
    fn test_depth_limit() {
        let mut raw = Vec::new();
        for level in 0..40 {
            raw.extend_from_slice(
                format!("Content-Type: multipart/mixed; boundary=b{level}\r\n\r\n--b{level}\r\n")
                    .as_bytes(),
            );
        }
        raw.extend_from_slice(b"\r\ninnermost");
        let message = Message::parse(&raw);
        assert!(message.walk().count() <= MAX_DEPTH + 1);
    }

    proptest! {
        #[test]
        fn parse_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            let message = Message::parse(&bytes);
            for part in message.walk() {
                let _ = part.text();
                let _ = part.filename();
            }
        }
    }
}
