//! # mailrelay-core
//!
//! The relay itself: everything between the mailbox and the outgoing relay.
//!
//! This crate provides:
//! - **Configuration** - JSON settings and environment credentials
//! - **Roster** - subscriber list loaded from CSV, reloaded on change
//! - **Transport** - self-healing IMAP and SMTP handles behind [`Inbox`] and [`Outbox`]
//! - **Extraction** - best HTML and plain-text bodies plus attachments
//! - **Relay engine** - sender classification, broadcast and forward
//! - **Lifecycle** - startup, retry-after-delay and graceful shutdown

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
mod error;
pub mod extract;
pub mod lifecycle;
pub mod relay;
pub mod roster;
pub mod transport;

pub use config::{Credentials, ImapConfig, RelayConfig, Security, SmtpConfig, ValidationError};
pub use error::{Error, Result};
pub use extract::{ExtractedContent, extract, extract_plain_text};
pub use lifecycle::{
    RelayService, Shutdown, ShutdownTrigger, shutdown_channel, shutdown_signal,
    spawn_signal_listener,
};
pub use relay::{BroadcastOutcome, CycleReport, RelayEngine, SenderRole, classify_sender};
pub use roster::{RosterStore, parse_roster};
pub use transport::{ImapInbox, Inbox, Outbox, SmtpOutbox, Teardown, Transport};
