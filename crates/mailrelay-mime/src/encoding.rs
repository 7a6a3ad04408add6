//! MIME encoding and decoding utilities.
//!
//! Supports Base64, Quoted-Printable and RFC 2047 header encoding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::charset::decode_text;
use crate::error::{Error, Result};

/// Line length for Base64 bodies (RFC 2045 limit).
const BASE64_LINE_LENGTH: usize = 76;

/// Longest encoded word allowed by RFC 2047.
const MAX_ENCODED_WORD: usize = 75;

/// Encodes data as Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Encodes data as Base64 wrapped at 76 columns with CRLF line breaks.
#[must_use]
pub fn encode_base64_wrapped(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE_LENGTH * 2 + 2);

    // Base64 output is pure ASCII, so byte chunks are valid str slices.
    for chunk in encoded.as_bytes().chunks(BASE64_LINE_LENGTH) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push_str("\r\n");
    }
    out
}

/// Decodes Base64 data, ignoring embedded whitespace and line breaks.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD.decode(cleaned).map_err(Into::into)
}

/// Decodes Quoted-Printable data (RFC 2045).
///
/// Soft line breaks (`=` at end of line) are removed.
///
/// # Errors
///
/// Returns an error if the input contains an invalid escape sequence.
pub fn decode_quoted_printable(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];
        if byte != b'=' {
            out.push(byte);
            i += 1;
            continue;
        }

        let rest = &data[i + 1..];
        if rest.starts_with(b"\r\n") {
            i += 3;
        } else if rest.starts_with(b"\n") {
            i += 2;
        } else if let Some(value) = rest.get(..2).and_then(hex_pair) {
            out.push(value);
            i += 3;
        } else if let Some(skip) = soft_break_after_whitespace(rest) {
            i += 1 + skip;
        } else {
            return Err(Error::InvalidEncoding(format!(
                "invalid quoted-printable escape at byte {i}"
            )));
        }
    }

    Ok(out)
}

/// Length of a `=  \r\n` soft break body (trailing whitespace then newline).
fn soft_break_after_whitespace(rest: &[u8]) -> Option<usize> {
    let ws = rest.iter().take_while(|b| matches!(b, b' ' | b'\t')).count();
    if ws == 0 {
        return None;
    }
    let after = &rest[ws..];
    if after.starts_with(b"\r\n") {
        Some(ws + 2)
    } else if after.starts_with(b"\n") {
        Some(ws + 1)
    } else if after.is_empty() {
        Some(ws)
    } else {
        None
    }
}

fn hex_pair(pair: &[u8]) -> Option<u8> {
    let hi = char::from(pair[0]).to_digit(16)?;
    let lo = char::from(pair[1]).to_digit(16)?;
    u8::try_from(hi * 16 + lo).ok()
}

/// Encodes a header value using RFC 2047 `B` encoding when it is not plain
/// ASCII.
///
/// Long values are split into several encoded words on character
/// boundaries, separated by folding whitespace.
#[must_use]
pub fn encode_rfc2047(text: &str) -> String {
    if text
        .chars()
        .all(|c| c.is_ascii() && !c.is_ascii_control() && c != '=' && c != '?')
    {
        return text.to_string();
    }

    // "=?utf-8?B?" + "?=" = 12 bytes of framing; 4 base64 chars per 3 bytes.
    let max_raw = (MAX_ENCODED_WORD - 12) / 4 * 3;

    let mut words = Vec::new();
    let mut chunk = String::new();
    for c in text.chars() {
        if chunk.len() + c.len_utf8() > max_raw {
            words.push(format!("=?utf-8?B?{}?=", encode_base64(chunk.as_bytes())));
            chunk.clear();
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(format!("=?utf-8?B?{}?=", encode_base64(chunk.as_bytes())));
    }

    words.join("\r\n ")
}

/// Decodes every RFC 2047 encoded word in a header value.
///
/// Whitespace between adjacent encoded words is dropped. Malformed words
/// are left as-is, and unknown charsets fall back through
/// [`decode_text`], so this never fails.
#[must_use]
pub fn decode_header_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    let mut after_word = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);

        match parse_encoded_word(candidate) {
            Some((decoded, consumed)) => {
                if !(after_word && before.chars().all(char::is_whitespace)) {
                    out.push_str(before);
                }
                out.push_str(&decoded);
                rest = &candidate[consumed..];
                after_word = true;
            }
            None => {
                out.push_str(before);
                out.push_str("=?");
                rest = &candidate[2..];
                after_word = false;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Parses `=?charset?enc?text?=` at the start of `s`.
///
/// Returns the decoded text and the number of bytes consumed.
fn parse_encoded_word(s: &str) -> Option<(String, usize)> {
    let inner = s.strip_prefix("=?")?;
    let (charset, inner) = inner.split_once('?')?;
    let (encoding, inner) = inner.split_once('?')?;
    let end = inner.find("?=")?;
    let payload = &inner[..end];

    if charset.is_empty() || payload.contains(char::is_whitespace) {
        return None;
    }

    // RFC 2231 language suffix: charset*lang
    let charset = charset.split('*').next().unwrap_or(charset);

    let bytes = match encoding {
        "B" | "b" => decode_base64(payload.as_bytes()).ok()?,
        "Q" | "q" => decode_q(payload),
        _ => return None,
    };

    let consumed = 2 + charset_len(s) + 1 + encoding.len() + 1 + end + 2;
    Some((decode_text(&bytes, Some(charset)), consumed))
}

/// Length of the charset field (including any language suffix) in a word.
fn charset_len(word: &str) -> usize {
    word[2..].find('?').unwrap_or(0)
}

/// Decodes the RFC 2047 `Q` encoding: `_` is a space, `=XX` a byte.
fn decode_q(payload: &str) -> Vec<u8> {
    let bytes = payload.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                out.push(b' ');
                i += 1;
            }
            b'=' => match bytes.get(i + 1..i + 3).and_then(hex_pair) {
                Some(value) => {
                    out.push(value);
                    i += 3;
                }
                None => {
                    out.push(b'=');
                    i += 1;
                }
            },
            other => {
                out.push(other);
                i += 1;
            }
        }
    }

    out
}

/// Percent-decodes an RFC 2231 extended parameter value
/// (`charset'language'percent-encoded`).
#[must_use]
pub fn decode_rfc2231(value: &str) -> String {
    let (charset, encoded) = match value.splitn(3, '\'').collect::<Vec<_>>().as_slice() {
        [charset, _lang, encoded] => (Some(*charset).filter(|c| !c.is_empty()), *encoded),
        _ => (None, value),
    };

    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && let Some(value) = bytes.get(i + 1..i + 3).and_then(hex_pair)
        {
            out.push(value);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    decode_text(&out, charset)
}

/// Percent-encodes a value for an RFC 2231 `name*=utf-8''...` parameter.
#[must_use]
pub fn encode_rfc2231(value: &str) -> String {
    use std::fmt::Write as _;

    let mut out = String::from("utf-8''");
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
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

    #[test]
    fn test_base64_wrapped() {
        let data = vec![b'a'; 120];
        let wrapped = encode_base64_wrapped(&data);
        let lines: Vec<&str> = wrapped.split("\r\n").collect();
        assert_eq!(lines[0].len(), 76);
        assert_eq!(lines[2], "");
        assert_eq!(decode_base64(wrapped.as_bytes()).unwrap(), data);
    }

    #[test]
    fn test_base64_invalid() {
        assert!(decode_base64(b"not*base64").is_err());
    }

    #[test]
    fn test_quoted_printable_decode() {
        assert_eq!(
            decode_quoted_printable(b"F=C3=B6rsamling").unwrap(),
            "Församling".as_bytes()
        );
        assert_eq!(
            decode_quoted_printable(b"soft=\r\nbreak and=\nagain").unwrap(),
            b"softbreak andagain"
        );
        assert_eq!(decode_quoted_printable(b"trail=  \r\nx").unwrap(), b"trailx");
    }

    #[test]
    fn test_quoted_printable_invalid_escape() {
        assert!(decode_quoted_printable(b"bad =ZZ escape").is_err());
        assert!(decode_quoted_printable(b"dangling =").is_err());
    }

    #[test]
    fn test_rfc2047_encode_ascii_untouched() {
        assert_eq!(encode_rfc2047("Newsletter Status: March"), "Newsletter Status: March");
    }

    #[test]
    fn test_rfc2047_encode_non_ascii() {
        let encoded = encode_rfc2047("Församlingsbrev");
        assert!(encoded.starts_with("=?utf-8?B?"));
        assert_eq!(decode_header_value(&encoded), "Församlingsbrev");
    }

    #[test]
    fn test_rfc2047_encode_long_value_splits_words() {
        let subject = "Newsletter Status: Församlingsbrev för mars och april med många bilagor";
        let encoded = encode_rfc2047(subject);
        assert!(encoded.contains("\r\n "));
        for word in encoded.split("\r\n ") {
            assert!(word.len() <= MAX_ENCODED_WORD, "{word} too long");
        }
        assert_eq!(decode_header_value(&encoded.replace("\r\n", "")), subject);
    }

    #[test]
    fn test_decode_header_value_mixed() {
        assert_eq!(decode_header_value("Plain subject"), "Plain subject");
        assert_eq!(decode_header_value("=?utf-8?B?SMOpbGxv?="), "Héllo");
        assert_eq!(
            decode_header_value("=?ISO-8859-1?Q?F=F6rsamlingsbrev_mars?="),
            "Församlingsbrev mars"
        );
        assert_eq!(
            decode_header_value("Re: =?utf-8?Q?caf=C3=A9?= time"),
            "Re: café time"
        );
    }

    #[test]
    fn test_decode_header_value_adjacent_words_join() {
        assert_eq!(
            decode_header_value("=?utf-8?Q?F=C3=B6r?= =?utf-8?Q?samling?="),
            "Församling"
        );
    }

    #[test]
    fn test_decode_header_value_malformed_word_kept() {
        assert_eq!(decode_header_value("=?utf-8?X?abc?="), "=?utf-8?X?abc?=");
        assert_eq!(decode_header_value("a =? b"), "a =? b");
    }

    #[test]
    fn test_decode_sender_display_name() {
        assert_eq!(
            decode_header_value("=?utf-8?Q?Anna_L=C3=B6f?= <anna@x.org>"),
            "Anna Löf <anna@x.org>"
        );
    }

    #[test]
    fn test_rfc2231() {
        assert_eq!(decode_rfc2231("utf-8''%E2%82%AC%20rates.pdf"), "€ rates.pdf");
        assert_eq!(decode_rfc2231("iso-8859-1'sv'f%F6rslag.txt"), "förslag.txt");
        assert_eq!(decode_rfc2231("plain.txt"), "plain.txt");
        assert_eq!(encode_rfc2231("€ rates.pdf"), "utf-8''%E2%82%AC%20rates.pdf");
    }

    proptest! {
        #[test]
        fn header_decoding_never_panics(value in "\\PC{0,80}") {
            let _ = decode_header_value(&value);
        }

        #[test]
        fn encoded_subjects_decode_back(subject in "[a-zA-Z0-9 åäöÅÄÖé€]{1,120}") {
            let encoded = encode_rfc2047(&subject);
            prop_assert_eq!(decode_header_value(&encoded.replace("\r\n", "")), subject);
        }

        #[test]
        fn qp_decoding_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
            let _ = decode_quoted_printable(&bytes);
        }
    }
}
