//! Envelope address type.

use crate::error::{Error, Result};

/// Email address for the SMTP envelope (`MAIL FROM` / `RCPT TO`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new address, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not `local@domain` or contains
    /// characters that would break the envelope command.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into().trim().to_string();
        Self::validate(&addr)?;
        Ok(Self(addr))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(addr: &str) -> Result<()> {
        if addr.is_empty() {
            return Err(Error::InvalidAddress("Address cannot be empty".into()));
        }

        if addr
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '<' || c == '>')
        {
            return Err(Error::InvalidAddress(format!(
                "Address contains forbidden characters: {addr:?}"
            )));
        }

        let Some((local, domain)) = addr.split_once('@') else {
            return Err(Error::InvalidAddress(format!("Missing @ in {addr}")));
        };

        if domain.contains('@') {
            return Err(Error::InvalidAddress(format!(
                "Address must have exactly one @: {addr}"
            )));
        }

        if local.is_empty() || domain.is_empty() {
            return Err(Error::InvalidAddress(format!(
                "Local and domain parts cannot be empty: {addr}"
            )));
        }

        Ok(())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
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
    fn test_valid_address_is_trimmed() {
        let addr = Address::new("  member@example.org ").unwrap();
        assert_eq!(addr.as_str(), "member@example.org");
        assert_eq!(addr.to_string(), "member@example.org");
    }

    #[test]
    fn test_invalid_addresses() {
        for bad in [
            "",
            "memberexample.org",
            "@example.org",
            "member@",
            "a@b@c",
            "mem ber@example.org",
            "member@example.org>\r\nRCPT TO:<x@y",
        ] {
            assert!(Address::new(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_from_str() {
        let addr: Address = "admin@example.org".parse().unwrap();
        assert_eq!(addr.as_str(), "admin@example.org");
    }
}
