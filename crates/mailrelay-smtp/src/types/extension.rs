//! SMTP extension types.

/// SMTP extensions discovered from the EHLO reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extension {
    /// STARTTLS - TLS upgrade
    StartTls,
    /// AUTH - Authentication (only mechanisms this client speaks are kept)
    Auth(Vec<AuthMechanism>),
    /// SIZE - Maximum message size
    Size(Option<usize>),
    /// 8BITMIME - 8-bit MIME transport
    EightBitMime,
    /// PIPELINING - Command pipelining
    Pipelining,
    /// SMTPUTF8 - UTF-8 email addresses
    SmtpUtf8,
    /// Unknown extension
    Unknown(String),
}

impl Extension {
    /// Parses an extension line from the EHLO reply.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let mut parts = line.split_whitespace();
        let Some(keyword) = parts.next() else {
            return Self::Unknown(line.to_string());
        };

        match keyword.to_ascii_uppercase().as_str() {
            "STARTTLS" => Self::StartTls,
            "AUTH" => Self::Auth(parts.filter_map(AuthMechanism::parse).collect()),
            "SIZE" => Self::Size(parts.next().and_then(|s| s.parse().ok())),
            "8BITMIME" => Self::EightBitMime,
            "PIPELINING" => Self::Pipelining,
            "SMTPUTF8" => Self::SmtpUtf8,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// PLAIN - credentials in one base64 response
    Plain,
    /// LOGIN - username and password in two challenge rounds
    Login,
}

impl AuthMechanism {
    /// Parses an authentication mechanism name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("PLAIN") {
            Some(Self::Plain)
        } else if s.eq_ignore_ascii_case("LOGIN") {
            Some(Self::Login)
        } else {
            None
        }
    }

    /// Returns the mechanism name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
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

    #[test]
    fn parse_starttls_any_case() {
        assert_eq!(Extension::parse("STARTTLS"), Extension::StartTls);
        assert_eq!(Extension::parse("starttls"), Extension::StartTls);
    }

    #[test]
    fn parse_auth_keeps_known_mechanisms() {
        assert_eq!(
            Extension::parse("AUTH LOGIN PLAIN XOAUTH2"),
            Extension::Auth(vec![AuthMechanism::Login, AuthMechanism::Plain])
        );
        assert_eq!(Extension::parse("AUTH CRAM-MD5"), Extension::Auth(vec![]));
    }

    #[test]
    fn parse_size() {
        assert_eq!(
            Extension::parse("SIZE 52428800"),
            Extension::Size(Some(52_428_800))
        );
        assert_eq!(Extension::parse("SIZE"), Extension::Size(None));
    }

    #[test]
    fn parse_flags() {
        assert_eq!(Extension::parse("8BITMIME"), Extension::EightBitMime);
        assert_eq!(Extension::parse("PIPELINING"), Extension::Pipelining);
        assert_eq!(Extension::parse("SMTPUTF8"), Extension::SmtpUtf8);
    }

    #[test]
    fn parse_unknown_and_empty() {
        assert_eq!(
            Extension::parse("ENHANCEDSTATUSCODES"),
            Extension::Unknown("ENHANCEDSTATUSCODES".to_string())
        );
        assert!(matches!(Extension::parse(""), Extension::Unknown(_)));
    }

    #[test]
    fn auth_mechanism_names() {
        assert_eq!(AuthMechanism::parse("plain"), Some(AuthMechanism::Plain));
        assert_eq!(AuthMechanism::parse("Login"), Some(AuthMechanism::Login));
        assert_eq!(AuthMechanism::parse("GSSAPI"), None);
        assert_eq!(AuthMechanism::Login.as_str(), "LOGIN");
    }
}
