//! # mailrelay-mime
//!
//! Lenient MIME parsing and outgoing message construction.
//!
//! ## Features
//!
//! - **Message parsing**: a part tree that never fails to build, whatever the
//!   sender's client produced
//! - **Decoding**: Base64, Quoted-Printable, RFC 2047 headers, RFC 2231
//!   parameters, and charset fallbacks (declared, UTF-8, Latin-1, lossy)
//! - **Message generation**: `multipart/mixed` messages with attachments
//!
//! ## Quick Start
//!
//! ### Parsing
//!
//! ```
//! use mailrelay_mime::Message;
//!
//! let raw = b"From: sender@example.com\r\n\
//!             Subject: =?utf-8?Q?H=C3=A4lsningar?=\r\n\
//!             Content-Type: text/plain; charset=utf-8\r\n\
//!             \r\n\
//!             Hello, World!";
//!
//! let message = Message::parse(raw);
//! assert_eq!(message.subject().as_deref(), Some("Hälsningar"));
//! assert_eq!(message.root().text(), "Hello, World!");
//! ```
//!
//! ### Building
//!
//! ```
//! use mailrelay_mime::{Attachment, ContentType, MessageBuilder};
//!
//! let raw = MessageBuilder::new()
//!     .from("sender@example.com")
//!     .to("recipient@example.com")
//!     .subject("Agenda")
//!     .html_body("<p>See attached.</p>")
//!     .attach(Attachment::new(
//!         "agenda.pdf",
//!         ContentType::new("application", "pdf"),
//!         b"%PDF-".to_vec(),
//!     ))
//!     .build()?;
//!
//! assert!(raw.contains("Content-Disposition: attachment; filename=agenda.pdf"));
//! # Ok::<(), mailrelay_mime::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod builder;
mod content_type;
mod disposition;
mod error;
mod header;
mod message;
mod params;

pub mod charset;
pub mod encoding;

pub use builder::{Attachment, MessageBuilder};
pub use content_type::ContentType;
pub use disposition::{ContentDisposition, DispositionKind};
pub use error::{Error, Result};
pub use header::Headers;
pub use message::{Body, Message, Part, TransferEncoding, Walk};
