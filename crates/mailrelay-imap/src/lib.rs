//! # mailrelay-imap
//!
//! A small, type-state IMAP client (RFC 9051 / RFC 3501) covering the
//! mailbox operations a polling relay needs: LOGIN, SELECT, SEARCH, FETCH,
//! STORE, NOOP and LOGOUT.
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailrelay_imap::{Client, SearchCriteria, StoreAction, Flag};
//! use mailrelay_imap::connection::connect_tls;
//!
//! #[tokio::main]
//! async fn main() -> mailrelay_imap::Result<()> {
//!     let stream = connect_tls("imap.example.com", 993).await?;
//!     let client = Client::from_stream(stream).await?;
//!     let client = client.login("user@example.com", "password").await?;
//!     let (mut client, status) = client.select("INBOX").await?;
//!     println!("{} messages", status.exists);
//!
//!     for seq in client.search(&SearchCriteria::Unseen).await? {
//!         let raw = client.fetch_message(seq).await?;
//!         println!("{} bytes", raw.len());
//!         client.store(seq, &StoreAction::Add(vec![Flag::Seen])).await?;
//!     }
//!
//!     client.logout().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Connection States
//!
//! ```text
//! ┌─────────────────────┐
//! │   NotAuthenticated  │ ─── login() ───→ Authenticated
//! └─────────────────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │    Authenticated    │ ─── select() ───→ Selected
//! └─────────────────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │      Selected       │ ─── close() ───→ Authenticated
//! └─────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`command`]: IMAP command builders and tag generation
//! - [`connection`]: Streams, framing and the type-state client
//! - [`response`]: Response line parser
//! - [`types`]: Sequence numbers, flags and mailbox status

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod response;
pub mod types;

pub use command::{Command, FetchAttribute, SearchCriteria, StoreAction, TagGenerator};
pub use connection::{
    Authenticated, Client, FramedStream, ImapStream, NotAuthenticated, ResponseAccumulator,
    Selected,
};
pub use error::{Error, Result};
pub use response::{Response, Status, UntaggedResponse};
pub use types::{Flag, MailboxStatus, SeqNum};

/// IMAP protocol version spoken by this client.
pub const IMAP_VERSION: &str = "IMAP4rev1";
