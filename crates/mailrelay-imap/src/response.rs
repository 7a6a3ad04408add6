//! IMAP response parsing.
//!
//! Responses arrive from [`FramedStream`](crate::FramedStream) as raw byte
//! frames: one CRLF-terminated line, possibly with literals spliced in.
//! [`Response::parse`] turns a frame into a typed response, keeping only the
//! pieces the client acts on.

use crate::error::{Error, Result};
use crate::types::SeqNum;

/// Status condition carried by a tagged or untagged status response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command completed successfully.
    Ok,
    /// Command failed.
    No,
    /// Command was rejected as malformed.
    Bad,
    /// Server is closing the connection.
    Bye,
    /// Connection is already authenticated.
    PreAuth,
}

impl Status {
    fn parse(atom: &str) -> Option<Self> {
        match atom.to_ascii_uppercase().as_str() {
            "OK" => Some(Self::Ok),
            "NO" => Some(Self::No),
            "BAD" => Some(Self::Bad),
            "BYE" => Some(Self::Bye),
            "PREAUTH" => Some(Self::PreAuth),
            _ => None,
        }
    }
}

/// Untagged (`*`) server data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UntaggedResponse {
    /// `* OK|NO|BAD|BYE|PREAUTH text`.
    Status {
        /// Status condition.
        status: Status,
        /// Human readable text, including any bracketed response code.
        text: String,
    },
    /// `* CAPABILITY ...`.
    Capability(Vec<String>),
    /// `* SEARCH n n n`.
    Search(Vec<SeqNum>),
    /// `* n EXISTS`.
    Exists(u32),
    /// `* n RECENT`.
    Recent(u32),
    /// `* n FETCH (...)`.
    Fetch {
        /// Sequence number of the message.
        seq: SeqNum,
        /// Full message bytes when the response carried `BODY[]` or `RFC822`.
        body: Option<Vec<u8>>,
    },
    /// Anything the client does not interpret.
    Other(String),
}

/// A parsed server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Completion of a tagged command.
    Tagged {
        /// Command tag.
        tag: String,
        /// Completion status.
        status: Status,
        /// Text following the status.
        text: String,
    },
    /// Untagged data.
    Untagged(UntaggedResponse),
    /// Continuation request (`+ text`).
    Continuation(String),
}

impl Response {
    /// Parses one raw response frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when the frame is empty or the tagged
    /// status is not one of `OK`, `NO`, `BAD`.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let line = first_line(raw);
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end();

        if line.is_empty() {
            return Err(Error::Protocol("empty response".to_string()));
        }

        if let Some(rest) = line.strip_prefix('+') {
            return Ok(Self::Continuation(rest.trim_start().to_string()));
        }

        if let Some(rest) = line.strip_prefix("* ") {
            return Ok(Self::Untagged(parse_untagged(rest, raw)));
        }

        let (tag, rest) = split_atom(line);
        let (status_atom, text) = split_atom(rest);
        let status = Status::parse(status_atom)
            .filter(|s| matches!(s, Status::Ok | Status::No | Status::Bad))
            .ok_or_else(|| Error::Protocol(format!("unexpected response: {line}")))?;

        Ok(Self::Tagged {
            tag: tag.to_string(),
            status,
            text: text.to_string(),
        })
    }

    /// Returns true if this is a tagged response with the given tag.
    #[must_use]
    pub fn is_tagged(&self, expected: &str) -> bool {
        matches!(self, Self::Tagged { tag, .. } if tag == expected)
    }
}

fn parse_untagged(rest: &str, raw: &[u8]) -> UntaggedResponse {
    let (first, tail) = split_atom(rest);

    if let Some(status) = Status::parse(first) {
        return UntaggedResponse::Status {
            status,
            text: tail.to_string(),
        };
    }

    match first.to_ascii_uppercase().as_str() {
        "CAPABILITY" => {
            return UntaggedResponse::Capability(
                tail.split_whitespace().map(str::to_string).collect(),
            );
        }
        "SEARCH" => {
            return UntaggedResponse::Search(
                tail.split_whitespace()
                    .filter_map(|n| n.parse().ok())
                    .filter_map(SeqNum::new)
                    .collect(),
            );
        }
        _ => {}
    }

    if let Ok(number) = first.parse::<u32>() {
        let (kind, _) = split_atom(tail);
        match kind.to_ascii_uppercase().as_str() {
            "EXISTS" => return UntaggedResponse::Exists(number),
            "RECENT" => return UntaggedResponse::Recent(number),
            "FETCH" => {
                if let Some(seq) = SeqNum::new(number) {
                    return UntaggedResponse::Fetch {
                        seq,
                        body: extract_message_body(raw),
                    };
                }
            }
            _ => {}
        }
    }

    UntaggedResponse::Other(rest.to_string())
}

/// Returns the bytes up to (excluding) the first CRLF.
fn first_line(raw: &[u8]) -> &[u8] {
    raw.windows(2)
        .position(|w| w == b"\r\n")
        .map_or(raw, |pos| &raw[..pos])
}

/// Splits off the first space-delimited atom.
fn split_atom(s: &str) -> (&str, &str) {
    s.split_once(' ').unwrap_or((s, ""))
}

/// Extracts the full message literal from a FETCH frame.
///
/// Looks for the first literal (`{n}\r\n`) in the frame and returns it when
/// the item name before it is `BODY[]` or `RFC822`.
fn extract_message_body(raw: &[u8]) -> Option<Vec<u8>> {
    let header_end = raw.windows(2).position(|w| w == b"\r\n")?;
    let header = &raw[..header_end];

    let open = header.iter().rposition(|&b| b == b'{')?;
    let close = open + header[open..].iter().position(|&b| b == b'}')?;
    let digits = std::str::from_utf8(&header[open + 1..close]).ok()?;
    let len: usize = digits.trim_end_matches('+').parse().ok()?;

    let item = String::from_utf8_lossy(&header[..open]).to_ascii_uppercase();
    let item = item.trim_end();
    if !(item.ends_with("BODY[]") || item.ends_with("RFC822")) {
        return None;
    }

    let start = header_end + 2;
    raw.get(start..start + len).map(<[u8]>::to_vec)
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

    #[test]
    fn test_parse_tagged_ok() {
        let resp = Response::parse(b"A0001 OK [READ-WRITE] SELECT completed\r\n").unwrap();
        assert_eq!(
            resp,
            Response::Tagged {
                tag: "A0001".to_string(),
                status: Status::Ok,
                text: "[READ-WRITE] SELECT completed".to_string(),
            }
        );
        assert!(resp.is_tagged("A0001"));
        assert!(!resp.is_tagged("A0002"));
    }

    #[test]
    fn test_parse_tagged_no() {
        let resp = Response::parse(b"A0002 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n")
            .unwrap();
        assert!(matches!(
            resp,
            Response::Tagged {
                status: Status::No,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_tagged_garbage_is_error() {
        assert!(Response::parse(b"A0003 MAYBE\r\n").is_err());
        assert!(Response::parse(b"\r\n").is_err());
    }

    #[test]
    fn test_parse_greeting_and_bye() {
        let greeting = Response::parse(b"* OK IMAP4rev1 Service Ready\r\n").unwrap();
        assert!(matches!(
            greeting,
            Response::Untagged(UntaggedResponse::Status {
                status: Status::Ok,
                ..
            })
        ));

        let bye = Response::parse(b"* BYE Autologout; idle for too long\r\n").unwrap();
        assert_eq!(
            bye,
            Response::Untagged(UntaggedResponse::Status {
                status: Status::Bye,
                text: "Autologout; idle for too long".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_search() {
        let resp = Response::parse(b"* SEARCH 2 5 9\r\n").unwrap();
        let Response::Untagged(UntaggedResponse::Search(ids)) = resp else {
            panic!("expected search");
        };
        let ids: Vec<u32> = ids.iter().map(|s| s.get()).collect();
        assert_eq!(ids, vec![2, 5, 9]);
    }

    #[test]
    fn test_parse_empty_search() {
        let resp = Response::parse(b"* SEARCH\r\n").unwrap();
        assert_eq!(resp, Response::Untagged(UntaggedResponse::Search(vec![])));
    }

    #[test]
    fn test_parse_exists_recent() {
        assert_eq!(
            Response::parse(b"* 17 EXISTS\r\n").unwrap(),
            Response::Untagged(UntaggedResponse::Exists(17))
        );
        assert_eq!(
            Response::parse(b"* 2 RECENT\r\n").unwrap(),
            Response::Untagged(UntaggedResponse::Recent(2))
        );
    }

    #[test]
    fn test_parse_capability() {
        let resp = Response::parse(b"* CAPABILITY IMAP4rev1 IDLE AUTH=PLAIN\r\n").unwrap();
        assert_eq!(
            resp,
            Response::Untagged(UntaggedResponse::Capability(vec![
                "IMAP4rev1".to_string(),
                "IDLE".to_string(),
                "AUTH=PLAIN".to_string(),
            ]))
        );
    }

    #[test]
    fn test_parse_fetch_body_literal() {
        let raw = b"* 3 FETCH (BODY[] {11}\r\nSubject: x\n)\r\n";
        let resp = Response::parse(raw).unwrap();
        let Response::Untagged(UntaggedResponse::Fetch { seq, body }) = resp else {
            panic!("expected fetch");
        };
        assert_eq!(seq.get(), 3);
        assert_eq!(body.unwrap(), b"Subject: x\n");
    }

    #[test]
    fn test_parse_fetch_rfc822_with_flags() {
        let raw = b"* 1 FETCH (FLAGS (\\Seen) RFC822 {4}\r\nabcd)\r\n";
        let Response::Untagged(UntaggedResponse::Fetch { body, .. }) =
            Response::parse(raw).unwrap()
        else {
            panic!("expected fetch");
        };
        assert_eq!(body.unwrap(), b"abcd");
    }

    #[test]
    fn test_parse_fetch_flags_only() {
        let raw = b"* 4 FETCH (FLAGS (\\Seen))\r\n";
        let Response::Untagged(UntaggedResponse::Fetch { seq, body }) =
            Response::parse(raw).unwrap()
        else {
            panic!("expected fetch");
        };
        assert_eq!(seq.get(), 4);
        assert!(body.is_none());
    }

    #[test]
    fn test_parse_continuation() {
        assert_eq!(
            Response::parse(b"+ Ready for literal\r\n").unwrap(),
            Response::Continuation("Ready for literal".to_string())
        );
    }

    #[test]
    fn test_unknown_untagged_is_other() {
        let resp = Response::parse(b"* FLAGS (\\Answered \\Seen)\r\n").unwrap();
        assert!(matches!(resp, Response::Untagged(UntaggedResponse::Other(_))));
    }
}
