//! `Content-Disposition` handling (RFC 2183).

use std::collections::HashMap;
use std::fmt;

use crate::encoding::decode_header_value;
use crate::params;

/// Disposition type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispositionKind {
    /// Displayed as part of the message.
    Inline,
    /// Offered as a separate file.
    Attachment,
    /// Any other token, kept lowercase.
    Other(String),
}

/// Parsed `Content-Disposition` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDisposition {
    /// Disposition type.
    pub kind: DispositionKind,
    /// Parameters keyed by lowercase name, RFC 2231 values already decoded.
    pub parameters: HashMap<String, String>,
}

impl ContentDisposition {
    /// Creates an `attachment` disposition with the given filename.
    #[must_use]
    pub fn attachment(filename: impl Into<String>) -> Self {
        let mut parameters = HashMap::new();
        parameters.insert("filename".to_string(), filename.into());
        Self {
            kind: DispositionKind::Attachment,
            parameters,
        }
    }

    /// Parses a header value. Never fails; unknown tokens become
    /// [`DispositionKind::Other`].
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let (head, raw) = params::split_header(value);
        let kind = match head.to_ascii_lowercase().as_str() {
            "inline" => DispositionKind::Inline,
            "attachment" => DispositionKind::Attachment,
            other => DispositionKind::Other(other.to_string()),
        };

        Self {
            kind,
            parameters: params::resolve(raw),
        }
    }

    /// Returns true for `attachment`.
    #[must_use]
    pub const fn is_attachment(&self) -> bool {
        matches!(self.kind, DispositionKind::Attachment)
    }

    /// Returns the filename parameter, RFC 2047 decoded.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        self.parameters
            .get("filename")
            .filter(|name| !name.trim().is_empty())
            .map(|name| decode_header_value(name))
    }
}

impl fmt::Display for ContentDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DispositionKind::Inline => f.write_str("inline")?,
            DispositionKind::Attachment => f.write_str("attachment")?,
            DispositionKind::Other(token) => f.write_str(token)?,
        }

        let mut keys: Vec<&String> = self.parameters.keys().collect();
        keys.sort();
        for key in keys {
            let value = &self.parameters[key];
            if value.is_ascii() {
                write!(f, "; {key}={}", params::format_value(value))?;
            } else {
                write!(f, "; {key}*={}", crate::encoding::encode_rfc2231(value))?;
            }
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
    fn test_parse_attachment() {
        let disposition = ContentDisposition::parse("attachment; filename=\"program.pdf\"");
        assert!(disposition.is_attachment());
        assert_eq!(disposition.filename().as_deref(), Some("program.pdf"));
    }

    #[test]
    fn test_parse_inline_without_filename() {
        let disposition = ContentDisposition::parse("INLINE");
        assert_eq!(disposition.kind, DispositionKind::Inline);
        assert!(disposition.filename().is_none());
    }

    #[test]
    fn test_filename_rfc2047() {
        let disposition =
            ContentDisposition::parse("attachment; filename=\"=?utf-8?Q?m=C3=B6te.txt?=\"");
        assert_eq!(disposition.filename().as_deref(), Some("möte.txt"));
    }

    #[test]
    fn test_filename_rfc2231() {
        let disposition =
            ContentDisposition::parse("attachment; filename*=iso-8859-1''f%F6rslag.doc");
        assert_eq!(disposition.filename().as_deref(), Some("förslag.doc"));
    }

    #[test]
    fn test_unknown_kind() {
        let disposition = ContentDisposition::parse("form-data; name=x");
        assert_eq!(disposition.kind, DispositionKind::Other("form-data".to_string()));
    }

    #[test]
    fn test_display_encodes_non_ascii_filename() {
        assert_eq!(
            ContentDisposition::attachment("plan.pdf").to_string(),
            "attachment; filename=plan.pdf"
        );
        let header = ContentDisposition::attachment("årsmöte.pdf").to_string();
        assert_eq!(header, "attachment; filename*=utf-8''%C3%A5rsm%C3%B6te.pdf");
        assert_eq!(
            ContentDisposition::parse(&header).filename().as_deref(),
            Some("årsmöte.pdf")
        );
    }
}
