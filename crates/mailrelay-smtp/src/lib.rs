//! # mailrelay-smtp
//!
//! A type-state SMTP submission client (RFC 5321) for relaying messages
//! through an authenticated upstream server.
//!
//! ## Features
//!
//! - **Type-state connection management**: compile-time enforcement of valid
//!   SMTP state transitions
//! - **TLS support**: implicit TLS (port 465) and STARTTLS
//! - **Authentication**: PLAIN and LOGIN
//! - **Liveness**: NOOP on an idle authenticated session
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailrelay_smtp::{Address, Client};
//! use mailrelay_smtp::connection::connect_tls;
//!
//! #[tokio::main]
//! async fn main() -> mailrelay_smtp::Result<()> {
//!     let stream = connect_tls("smtp.example.com", 465).await?;
//!     let client = Client::from_stream(stream).await?;
//!     let client = client.ehlo("relay.example.com").await?;
//!     let mut client = client.authenticate("user@example.com", "password").await?;
//!
//!     let from = Address::new("user@example.com")?;
//!     let to = Address::new("someone@example.org")?;
//!     let message = b"Subject: Test\r\n\r\nHello, World!\r\n";
//!     client.send_mail(&from, &[to], message).await?;
//!
//!     client.quit().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Connection States
//!
//! ```text
//! ┌──────────────┐
//! │  Connected   │ ─── authenticate() ───→ Authenticated
//! └──────────────┘
//!                                             │
//!        ┌──── send_message() ────────────────┤
//!        │                                    ▼
//!      Data ←── data() ── RecipientAdded ←── MailTransaction
//! ```
//!
//! ## Modules
//!
//! - [`command`]: SMTP command builders
//! - [`connection`]: Streams and the type-state client
//! - [`parser`]: Reply parser
//! - [`types`]: Addresses, extensions and replies

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use connection::{
    Authenticated, Client, Connected, Data, MailTransaction, RecipientAdded, ServerInfo,
    SmtpStream,
};
pub use error::{Error, Result};
pub use types::{Address, AuthMechanism, Extension, Reply, ReplyCode};

/// SMTP protocol version supported.
pub const SMTP_VERSION: &str = "SMTP/ESMTP (RFC 5321)";
