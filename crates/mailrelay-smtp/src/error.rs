//! Error types for SMTP operations.

use std::io;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Server returned an error reply.
    #[error("SMTP error {code}: {message}")]
    SmtpError {
        /// Reply code (e.g., 550).
        code: u16,
        /// Error message from server.
        message: String,
    },

    /// Protocol error (unexpected or malformed reply).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Message exceeds the size the server advertised.
    #[error("Message exceeds size limit: {size} bytes (max {limit})")]
    MessageTooLarge {
        /// Message size in bytes.
        size: usize,
        /// Advertised limit.
        limit: usize,
    },

    /// Feature not supported by server.
    #[error("Server does not support {0}")]
    NotSupported(String),
}

impl Error {
    /// Creates an SMTP error from a reply code and message.
    #[must_use]
    pub fn smtp_error(code: u16, message: impl Into<String>) -> Self {
        Self::SmtpError {
            code,
            message: message.into(),
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::SmtpError { code, .. } if *code >= 500 && *code < 600)
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::SmtpError { code, .. } if *code >= 400 && *code < 500)
    }

    /// Returns true if the session can no longer be used.
    ///
    /// 421 means the server is closing the channel.
    #[must_use]
    pub const fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Tls(_) | Self::SmtpError { code: 421, .. }
        )
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
    fn test_error_classes() {
        let rejected = Error::smtp_error(550, "No such user");
        assert!(rejected.is_permanent());
        assert!(!rejected.is_transient());
        assert!(!rejected.is_connection_lost());

        let greylisted = Error::smtp_error(451, "Try again later");
        assert!(greylisted.is_transient());

        let closing = Error::smtp_error(421, "Service shutting down");
        assert!(closing.is_connection_lost());

        let io = Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(io.is_connection_lost());
    }

    #[test]
    fn test_display() {
        let err = Error::MessageTooLarge {
            size: 20,
            limit: 10,
        };
        assert_eq!(
            err.to_string(),
            "Message exceeds size limit: 20 bytes (max 10)"
        );
    }
}
