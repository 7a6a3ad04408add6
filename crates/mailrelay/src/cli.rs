//! Command-line arguments.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use mailrelay_core::RelayConfig;

const DEFAULT_FILTER: &str = "mailrelay=info,mailrelay_core=info,mailrelay_imap=warn,mailrelay_smtp=warn";
const VERBOSE_FILTER: &str = "mailrelay=debug,mailrelay_core=debug,mailrelay_imap=debug,mailrelay_smtp=debug,mailrelay_mime=debug";

/// Polls a mailbox and relays newsletters to a CSV roster.
#[derive(Debug, Parser)]
#[command(name = "mailrelay", version, about)]
pub struct Cli {
    /// JSON configuration file [default: <config dir>/mailrelay/config.json]
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log protocol and dispatch detail.
    #[arg(short, long)]
    pub verbose: bool,

    /// Validate the configuration and roster, then exit without connecting.
    #[arg(long)]
    pub check: bool,
}

impl Cli {
    /// Resolves the configuration path.
    pub fn config_path(&self) -> Result<PathBuf> {
        self.config
            .clone()
            .or_else(RelayConfig::default_path)
            .context("no configuration directory on this platform, pass --config")
    }

    /// Log filter used when `RUST_LOG` is unset.
    pub const fn log_filter(&self) -> &'static str {
        if self.verbose {
            VERBOSE_FILTER
        } else {
            DEFAULT_FILTER
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
    use clap::CommandFactory;

    #[test]
    fn test_command_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from(["mailrelay", "--config", "/etc/relay.json", "-v", "--check"])
            .unwrap();
        assert_eq!(cli.config_path().unwrap(), PathBuf::from("/etc/relay.json"));
        assert!(cli.verbose);
        assert!(cli.check);
        assert!(cli.log_filter().contains("mailrelay_imap=debug"));
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["mailrelay"]).unwrap();
        assert!(!cli.verbose);
        assert!(!cli.check);
        assert!(cli.config.is_none());
        assert_eq!(cli.log_filter(), DEFAULT_FILTER);
    }

    #[test]
    fn test_rejects_unknown_flag() {
        assert!(Cli::try_parse_from(["mailrelay", "--daemon"]).is_err());
    }
}
