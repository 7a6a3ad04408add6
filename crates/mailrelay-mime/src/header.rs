//! MIME header handling.

use std::fmt;

/// Ordered collection of message headers.
///
/// Lookups are case-insensitive; insertion order is kept for output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Sets a header value, replacing any existing values in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        match self
            .entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(pos) => {
                self.entries[pos].1 = value;
                let mut index = 0;
                self.entries.retain(|(n, _)| {
                    let keep = index <= pos || !n.eq_ignore_ascii_case(&name);
                    index += 1;
                    keep
                });
            }
            None => self.entries.push((name, value)),
        }
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Gets all values for a header, in order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Returns an iterator over all headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Returns the number of header lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parses a header block.
    ///
    /// Accepts CRLF or bare LF line endings. Continuation lines (leading
    /// space or tab) are unfolded into the previous value. Lines without a
    /// colon are skipped. Parsing stops at the first empty line.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut headers = Self::new();

        for line in text.lines() {
            if line.is_empty() {
                break;
            }

            if line.starts_with([' ', '\t']) {
                if let Some((_, value)) = headers.entries.last_mut() {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(line.trim());
                }
                continue;
            }

            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim();
                if !name.is_empty() {
                    headers.add(name, value.trim());
                }
            }
        }

        headers
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
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

    #[test]
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert!(headers.get("Subject").is_none());
    }

    #[test]
    fn test_headers_set_replaces_all() {
        let mut headers = Headers::new();
        headers.add("To", "alice@example.com");
        headers.add("Subject", "Hi");
        headers.add("to", "bob@example.com");
        assert_eq!(headers.get_all("To").len(), 2);

        headers.set("To", "charlie@example.com");
        assert_eq!(headers.get_all("To"), vec!["charlie@example.com"]);
        assert_eq!(headers.to_string(), "To: charlie@example.com\r\nSubject: Hi\r\n");
    }

    #[test]
    fn test_headers_parse_folding() {
        let text = concat!(
            "From: Anna <anna@example.com>\r\n",
            "Subject: =?utf-8?Q?F=C3=B6rsamlingsbrev?=\r\n",
            " =?utf-8?Q?_mars?=\r\n",
            "Content-Type: text/plain;\r\n",
            "\tcharset=utf-8\r\n",
            "\r\n",
            "Ignored: body\r\n"
        );

        let headers = Headers::parse(text);
        assert_eq!(headers.len(), 3);
        assert_eq!(headers.get("from"), Some("Anna <anna@example.com>"));
        assert_eq!(
            headers.get("Subject"),
            Some("=?utf-8?Q?F=C3=B6rsamlingsbrev?= =?utf-8?Q?_mars?=")
        );
        assert_eq!(headers.get("Content-Type"), Some("text/plain; charset=utf-8"));
        assert!(headers.get("Ignored").is_none());
    }

    #[test]
    fn test_headers_parse_bare_lf_and_junk() {
        let headers = Headers::parse(" orphan continuation\nnot a header\nX-Test: 1\n");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-test"), Some("1"));
    }

    #[test]
    fn test_headers_display_order() {
        let mut headers = Headers::new();
        headers.add("From", "sender@example.com");
        headers.add("To", "recipient@example.com");

        assert_eq!(
            headers.to_string(),
            "From: sender@example.com\r\nTo: recipient@example.com\r\n"
        );
        assert_eq!(headers.iter().count(), 2);
    }
}
