//! SMTP connection management with type-state pattern.

mod client;
mod stream;

pub use client::{Authenticated, Client, Connected, Data, MailTransaction, RecipientAdded};
pub use stream::{SmtpStream, connect, connect_tls};

use crate::types::{AuthMechanism, Extension};

/// Server capabilities from the EHLO reply.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Server hostname from greeting.
    pub hostname: String,
    /// Supported extensions, in announcement order.
    pub extensions: Vec<Extension>,
}

impl ServerInfo {
    /// Checks if the server supports an extension.
    #[must_use]
    pub fn supports(&self, ext: &Extension) -> bool {
        self.extensions.contains(ext)
    }

    /// Checks if STARTTLS is supported.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.supports(&Extension::StartTls)
    }

    /// Returns the maximum message size, if advertised.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::Size(size) => *size,
            _ => None,
        })
    }

    /// Returns supported authentication mechanisms.
    #[must_use]
    pub fn auth_mechanisms(&self) -> &[AuthMechanism] {
        self.extensions
            .iter()
            .find_map(|ext| match ext {
                Extension::Auth(mechanisms) => Some(mechanisms.as_slice()),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Picks PLAIN when advertised, otherwise LOGIN.
    #[must_use]
    pub fn preferred_auth(&self) -> AuthMechanism {
        if self.auth_mechanisms().contains(&AuthMechanism::Plain) {
            AuthMechanism::Plain
        } else {
            AuthMechanism::Login
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

    fn info(lines: &[&str]) -> ServerInfo {
        ServerInfo {
            hostname: "smtp.x.org".to_string(),
            extensions: lines.iter().map(|l| Extension::parse(l)).collect(),
        }
    }

    #[test]
    fn test_preferred_auth() {
        assert_eq!(
            info(&["AUTH LOGIN PLAIN"]).preferred_auth(),
            AuthMechanism::Plain
        );
        assert_eq!(info(&["AUTH LOGIN"]).preferred_auth(), AuthMechanism::Login);
        assert_eq!(info(&["8BITMIME"]).preferred_auth(), AuthMechanism::Login);
    }

    #[test]
    fn test_max_message_size() {
        assert_eq!(
            info(&["SIZE 35882577", "STARTTLS"]).max_message_size(),
            Some(35_882_577)
        );
        assert_eq!(info(&["SIZE"]).max_message_size(), None);
        assert!(info(&["STARTTLS"]).supports_starttls());
    }
}
