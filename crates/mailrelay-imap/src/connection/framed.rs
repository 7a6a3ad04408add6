//! Framed I/O for the IMAP protocol.
//!
//! IMAP responses are CRLF-terminated lines that may embed literals
//! (`{n}\r\n` followed by exactly `n` bytes). A frame is one such line with
//! every literal spliced in.

#![allow(clippy::missing_errors_doc)]

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::trace;

use crate::response::Response;
use crate::{Error, Result};

/// Default buffer size for reading.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Maximum line length to prevent memory exhaustion.
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Maximum literal size to prevent memory exhaustion.
const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024;

/// Buffered, frame-aware wrapper around a mailbox connection.
pub struct FramedStream<S> {
    reader: BufReader<S>,
    write_buffer: BytesMut,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new framed stream.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream),
            write_buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
        }
    }

    /// Reads one raw response frame, literals included.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut frame = Vec::new();

        loop {
            let line = self.read_line().await?;
            frame.extend_from_slice(&line);

            let Some(literal_len) = parse_literal_length(&line) else {
                break;
            };
            if literal_len > MAX_LITERAL_SIZE {
                return Err(Error::Protocol(format!(
                    "literal too large: {literal_len} bytes (max {MAX_LITERAL_SIZE})"
                )));
            }

            let start = frame.len();
            frame.resize(start + literal_len, 0);
            self.reader.read_exact(&mut frame[start..]).await?;
        }

        Ok(frame)
    }

    /// Reads and parses one response.
    pub async fn read_response(&mut self) -> Result<Response> {
        let frame = self.read_frame().await?;
        Response::parse(&frame)
    }

    async fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();

        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                )));
            }

            if let Some(pos) = find_crlf(buf) {
                line.extend_from_slice(&buf[..pos + 2]);
                self.reader.consume(pos + 2);
                return Ok(line);
            }

            // A CR at the end of the buffer may pair with an LF in the next read.
            let take = if buf.ends_with(b"\r") {
                buf.len() - 1
            } else {
                buf.len()
            };
            if take == 0 {
                line.push(b'\r');
                self.reader.consume(1);
                if self.reader.fill_buf().await?.first() == Some(&b'\n') {
                    line.push(b'\n');
                    self.reader.consume(1);
                    return Ok(line);
                }
                continue;
            }
            line.extend_from_slice(&buf[..take]);
            self.reader.consume(take);

            if line.len() > MAX_LINE_LENGTH {
                return Err(Error::Protocol("line too long".to_string()));
            }
        }
    }

    /// Writes a serialized command and flushes.
    pub async fn write_command(&mut self, data: &[u8]) -> Result<()> {
        self.write_buffer.clear();
        self.write_buffer.extend_from_slice(data);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buffer).await?;
        stream.flush().await?;

        trace!(bytes = data.len(), "IMAP command written");
        Ok(())
    }

    /// Gets a mutable reference to the underlying stream.
    pub fn get_mut(&mut self) -> &mut S {
        self.reader.get_mut()
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parses a literal announcement at the end of a line (`{123}` or `{123+}`).
fn parse_literal_length(line: &[u8]) -> Option<usize> {
    let line = line.strip_suffix(b"\r\n")?;
    let line = line.strip_suffix(b"}")?;
    let line = line.strip_suffix(b"+").unwrap_or(line);

    let open = line.iter().rposition(|&b| b == b'{')?;
    let digits = &line[open + 1..];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Collects the responses to one tagged command.
#[derive(Debug)]
pub struct ResponseAccumulator {
    tag: String,
    untagged: Vec<Response>,
}

impl ResponseAccumulator {
    /// Creates a new accumulator for the given tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            untagged: Vec::new(),
        }
    }

    /// Reads responses until the tagged completion for our tag arrives.
    ///
    /// Returns the untagged responses followed by the tagged one. An
    /// untagged `BYE` ends the exchange early with [`Error::Bye`].
    pub async fn read_until_tagged<S>(
        &mut self,
        framed: &mut FramedStream<S>,
    ) -> Result<Vec<Response>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let response = framed.read_response().await?;

            if let Response::Untagged(crate::UntaggedResponse::Status {
                status: crate::Status::Bye,
                text,
            }) = &response
            {
                return Err(Error::Bye(text.clone()));
            }

            let done = response.is_tagged(&self.tag);
            self.untagged.push(response);
            if done {
                return Ok(std::mem::take(&mut self.untagged));
            }
        }
    }
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
    use tokio_test::io::Builder;

    #[test]
    fn test_find_crlf() {
        assert_eq!(find_crlf(b"hello\r\n"), Some(5));
        assert_eq!(find_crlf(b"\r\n"), Some(0));
        assert_eq!(find_crlf(b"no newline"), None);
        assert_eq!(find_crlf(b"just\n"), None);
    }

    #[test]
    fn test_parse_literal_length() {
        assert_eq!(parse_literal_length(b"BODY[] {342}\r\n"), Some(342));
        assert_eq!(parse_literal_length(b"BODY[] {12+}\r\n"), Some(12));
        assert_eq!(parse_literal_length(b"{0}\r\n"), Some(0));
        assert_eq!(parse_literal_length(b"no literal\r\n"), None);
        assert_eq!(parse_literal_length(b"incomplete {123"), None);
        assert_eq!(parse_literal_length(b"wrong {abc}\r\n"), None);
        assert_eq!(parse_literal_length(b"empty {}\r\n"), None);
    }

    #[tokio::test]
    async fn test_read_simple_frame() {
        let mock = Builder::new().read(b"* OK ready\r\n").build();
        let mut framed = FramedStream::new(mock);

        assert_eq!(framed.read_frame().await.unwrap(), b"* OK ready\r\n");
    }

    #[tokio::test]
    async fn test_read_frame_with_literal_split_across_reads() {
        let mock = Builder::new()
            .read(b"* 1 FETCH (BODY[] {7}\r\n")
            .read(b"Hi\r\n")
            .read(b"yo)\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        let frame = framed.read_frame().await.unwrap();
        assert_eq!(frame, b"* 1 FETCH (BODY[] {7}\r\nHi\r\nyo)\r\n");
    }

    #[tokio::test]
    async fn test_read_line_with_crlf_split() {
        let mock = Builder::new().read(b"* OK split\r").read(b"\n").build();
        let mut framed = FramedStream::new(mock);

        assert_eq!(framed.read_frame().await.unwrap(), b"* OK split\r\n");
    }

    #[tokio::test]
    async fn test_eof_is_io_error() {
        let mock = Builder::new().read(b"* OK trunc").build();
        let mut framed = FramedStream::new(mock);

        let err = framed.read_frame().await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn test_write_command() {
        let mock = Builder::new().write(b"A0000 NOOP\r\n").build();
        let mut framed = FramedStream::new(mock);

        framed.write_command(b"A0000 NOOP\r\n").await.unwrap();
    }

    #[tokio::test]
    async fn test_accumulator_collects_until_tag() {
        let mock = Builder::new()
            .read(b"* SEARCH 1 2\r\n")
            .read(b"A0003 OK SEARCH completed\r\n")
            .build();
        let mut framed = FramedStream::new(mock);
        let mut acc = ResponseAccumulator::new("A0003");

        let responses = acc.read_until_tagged(&mut framed).await.unwrap();
        assert_eq!(responses.len(), 2);
        assert!(responses[1].is_tagged("A0003"));
    }

    #[tokio::test]
    async fn test_accumulator_stops_on_bye() {
        let mock = Builder::new()
            .read(b"* BYE server shutting down\r\n")
            .build();
        let mut framed = FramedStream::new(mock);
        let mut acc = ResponseAccumulator::new("A0004");

        let err = acc.read_until_tagged(&mut framed).await.unwrap_err();
        assert!(matches!(err, Error::Bye(text) if text == "server shutting down"));
    }

    #[tokio::test]
    async fn test_literal_size_validation() {
        let header = format!("* 1 FETCH (BODY[] {{{}}}\r\n", MAX_LITERAL_SIZE + 1);
        let mock = Builder::new().read(header.as_bytes()).build();
        let mut framed = FramedStream::new(mock);

        let err = framed.read_frame().await.unwrap_err();
        assert!(err.to_string().contains("literal too large"));
    }

    #[tokio::test]
    async fn test_line_length_limit() {
        let long_line = "A".repeat(MAX_LINE_LENGTH + 100);
        let mock = Builder::new().read(long_line.as_bytes()).build();
        let mut framed = FramedStream::new(mock);

        let err = framed.read_frame().await.unwrap_err();
        assert!(err.to_string().contains("line too long"));
    }
}
