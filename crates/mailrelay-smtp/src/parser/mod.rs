//! SMTP reply parser.

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode};

/// Parses an SMTP reply from its lines (CRLF already stripped).
///
/// Replies are single-line (`250 OK`) or multi-line, where every line but
/// the last uses `-` after the code (`250-First`, `250 Last`).
///
/// # Errors
///
/// Returns an error if the reply is malformed or the lines disagree on the
/// code.
pub fn parse_reply(lines: &[String]) -> Result<Reply> {
    let first = lines
        .first()
        .ok_or_else(|| Error::Protocol("Empty reply".into()))?;

    let code = reply_code(first)?;
    let mut message = Vec::with_capacity(lines.len());

    for line in lines {
        if reply_code(line)? != code {
            return Err(Error::Protocol(format!(
                "Mixed reply codes: {first} / {line}"
            )));
        }
        match line.get(4..) {
            Some(text) => message.push(text.to_string()),
            None if line.len() == 3 => message.push(String::new()),
            None => return Err(Error::Protocol(format!("Malformed reply line: {line}"))),
        }
    }

    Ok(Reply::new(code, message))
}

fn reply_code(line: &str) -> Result<ReplyCode> {
    let digits = line
        .get(..3)
        .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| Error::Protocol(format!("Invalid reply line: {line}")))?;

    digits
        .parse::<u16>()
        .map(ReplyCode::new)
        .map_err(|_| Error::Protocol(format!("Invalid reply code: {digits}")))
}

/// Checks if a line is the last line of a reply.
#[must_use]
pub fn is_last_reply_line(line: &str) -> bool {
    line.len() == 3 || (line.len() >= 4 && line.as_bytes()[3] == b' ')
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

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_parse_single_line_reply() {
        let reply = parse_reply(&lines(&["250 2.0.0 Ok: queued"])).unwrap();
        assert_eq!(reply.code, ReplyCode::OK);
        assert_eq!(reply.message, vec!["2.0.0 Ok: queued"]);
    }

    #[test]
    fn test_parse_ehlo_reply() {
        let reply = parse_reply(&lines(&[
            "250-smtp.example.org",
            "250-SIZE 35882577",
            "250-AUTH LOGIN PLAIN",
            "250 8BITMIME",
        ]))
        .unwrap();
        assert_eq!(reply.message.len(), 4);
        assert_eq!(reply.message[2], "AUTH LOGIN PLAIN");
    }

    #[test]
    fn test_bare_code_line() {
        let reply = parse_reply(&lines(&["354"])).unwrap();
        assert_eq!(reply.code, ReplyCode::START_DATA);
        assert_eq!(reply.message, vec![""]);
        assert!(is_last_reply_line("354"));
    }

    #[test]
    fn test_is_last_reply_line() {
        assert!(is_last_reply_line("250 OK"));
        assert!(!is_last_reply_line("250-Continuing"));
        assert!(!is_last_reply_line("25"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_reply(&[]).is_err());
        assert!(parse_reply(&lines(&["25"])).is_err());
        assert!(parse_reply(&lines(&["ABC OK"])).is_err());
        assert!(parse_reply(&lines(&["250-a", "550 b"])).is_err());
    }
}
