//! MIME content type handling.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::params;

/// MIME content type with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type (e.g., "text", "image", "multipart").
    pub main_type: String,
    /// Subtype (e.g., "plain", "html", "jpeg").
    pub sub_type: String,
    /// Parameters keyed by lowercase name, RFC 2231 values already decoded.
    pub parameters: HashMap<String, String>,
}

impl ContentType {
    /// Creates a new content type.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into().to_ascii_lowercase(),
            sub_type: sub_type.into().to_ascii_lowercase(),
            parameters: HashMap::new(),
        }
    }

    /// Creates a text/plain content type.
    #[must_use]
    pub fn text_plain() -> Self {
        Self::new("text", "plain").with_parameter("charset", "utf-8")
    }

    /// Creates a text/html content type.
    #[must_use]
    pub fn text_html() -> Self {
        Self::new("text", "html").with_parameter("charset", "utf-8")
    }

    /// Creates an application/octet-stream content type.
    #[must_use]
    pub fn application_octet_stream() -> Self {
        Self::new("application", "octet-stream")
    }

    /// Creates a multipart/mixed content type with boundary.
    #[must_use]
    pub fn multipart_mixed(boundary: impl Into<String>) -> Self {
        Self::new("multipart", "mixed").with_parameter("boundary", boundary)
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters
            .insert(key.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Returns a parameter by case-insensitive name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.parameters
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns the charset parameter if present.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.param("charset")
    }

    /// Returns the boundary parameter if present.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.param("boundary").filter(|b| !b.is_empty())
    }

    /// Returns `type/subtype` without parameters.
    #[must_use]
    pub fn mime_type(&self) -> String {
        format!("{}/{}", self.main_type, self.sub_type)
    }

    /// Checks the type and subtype, ignoring case.
    #[must_use]
    pub fn is(&self, main_type: &str, sub_type: &str) -> bool {
        self.main_type.eq_ignore_ascii_case(main_type)
            && self.sub_type.eq_ignore_ascii_case(sub_type)
    }

    /// Checks if this is a multipart content type.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type.eq_ignore_ascii_case("multipart")
    }

    /// Checks if this is a text content type.
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.main_type.eq_ignore_ascii_case("text")
    }

    /// Parses a content type string.
    ///
    /// Format: `type/subtype; param1=value1; param2="value 2"`
    ///
    /// # Errors
    ///
    /// Returns an error if the type is not of the form `type/subtype`.
    pub fn parse(s: &str) -> Result<Self> {
        let (type_str, raw_params) = params::split_header(s);

        let (main_type, sub_type) = type_str
            .split_once('/')
            .map(|(main, sub)| (main.trim(), sub.trim()))
            .filter(|(main, sub)| !main.is_empty() && !sub.is_empty())
            .ok_or_else(|| Error::InvalidContentType(type_str.to_string()))?;

        let mut content_type = Self::new(main_type, sub_type);
        content_type.parameters = params::resolve(raw_params);
        Ok(content_type)
    }

    /// Parses a content type, falling back to text/plain when malformed.
    #[must_use]
    pub fn parse_lenient(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|_| Self::new("text", "plain"))
    }
}

impl Default for ContentType {
    fn default() -> Self {
        Self::new("text", "plain")
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.main_type, self.sub_type)?;

        let mut keys: Vec<&String> = self.parameters.keys().collect();
        keys.sort();
        for key in keys {
            let value = params::format_value(&self.parameters[key]);
            write!(f, "; {key}={value}")?;
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
    fn test_text_plain() {
        let ct = ContentType::text_plain();
        assert!(ct.is("text", "plain"));
        assert_eq!(ct.charset(), Some("utf-8"));
        assert_eq!(ct.to_string(), "text/plain; charset=utf-8");
    }

    #[test]
    fn test_multipart_mixed() {
        let ct = ContentType::multipart_mixed("=_relay_1");
        assert!(ct.is_multipart());
        assert_eq!(ct.boundary(), Some("=_relay_1"));
        assert_eq!(ct.to_string(), "multipart/mixed; boundary=\"=_relay_1\"");
    }

    #[test]
    fn test_parse_case_and_quotes() {
        let ct = ContentType::parse("Text/HTML; Charset=\"ISO-8859-1\"").unwrap();
        assert!(ct.is("text", "html"));
        assert_eq!(ct.mime_type(), "text/html");
        assert_eq!(ct.charset(), Some("ISO-8859-1"));
    }

    #[test]
    fn test_parse_boundary_with_semicolon() {
        let ct = ContentType::parse("multipart/alternative; boundary=\"a;b\"").unwrap();
        assert_eq!(ct.boundary(), Some("a;b"));
    }

    #[test]
    fn test_parse_name_rfc2231() {
        let ct =
            ContentType::parse("application/pdf; name*=utf-8''%C3%A5rsm%C3%B6te.pdf").unwrap();
        assert_eq!(ct.param("NAME"), Some("årsmöte.pdf"));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(ContentType::parse("text").is_err());
        assert!(ContentType::parse("/plain").is_err());
        assert!(ContentType::parse("").is_err());
        assert!(ContentType::parse_lenient("garbage").is("text", "plain"));
    }

    #[test]
    fn test_display_sorted_params() {
        let ct = ContentType::new("text", "plain")
            .with_parameter("format", "flowed")
            .with_parameter("charset", "utf-8");
        assert_eq!(ct.to_string(), "text/plain; charset=utf-8; format=flowed");
    }

    #[test]
    fn test_display_parse_preserves_params() {
        let ct = ContentType::application_octet_stream().with_parameter("name", "my file.pdf");
        let parsed = ContentType::parse(&ct.to_string()).unwrap();
        assert_eq!(parsed, ct);
    }
}
