//! Error types for the core library.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in relay operations.
#[derive(Debug, Error)]
pub enum Error {
    /// IMAP operation failed.
    #[error("IMAP error: {0}")]
    Imap(#[from] mailrelay_imap::Error),

    /// SMTP operation failed.
    #[error("SMTP error: {0}")]
    Smtp(#[from] mailrelay_smtp::Error),

    /// Message construction failed.
    #[error("MIME error: {0}")]
    Mime(#[from] mailrelay_mime::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Roster file could not be parsed.
    #[error("Roster error: {0}")]
    Roster(String),

    /// A network operation exceeded the I/O timeout.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// Configured limit.
        after: Duration,
    },

    /// The handle is not connected.
    #[error("{0} is not connected")]
    NotConnected(&'static str),
}

impl Error {
    /// True when the session that produced this error cannot be trusted for
    /// further commands.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        match self {
            Self::Imap(e) => {
                e.is_connection_lost() || matches!(e, mailrelay_imap::Error::Protocol(_))
            }
            Self::Smtp(e) => {
                e.is_connection_lost() || matches!(e, mailrelay_smtp::Error::Protocol(_))
            }
            Self::Io(_) | Self::Timeout { .. } | Self::NotConnected(_) => true,
            Self::Mime(_) | Self::Serde(_) | Self::Config(_) | Self::Roster(_) => false,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
