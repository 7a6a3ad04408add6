//! Service startup, steady-state loop and shutdown.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::{Credentials, RelayConfig};
use crate::error::Result;
use crate::relay::{CycleReport, RelayEngine};
use crate::roster::RosterStore;
use crate::transport::{ImapInbox, Inbox, Outbox, SmtpOutbox, Transport};

/// Sending half of the cancellation flag.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Requests shutdown. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half of the cancellation flag, observed at wait points.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Returns true once shutdown was requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleeps for `limit` or until shutdown is requested.
    ///
    /// Returns true if shutdown was requested.
    pub async fn wait(&mut self, limit: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }

        let stopped = tokio::time::timeout(limit, self.rx.wait_for(|stop| *stop))
            .await
            .map(|changed| changed.is_ok());
        match stopped {
            Ok(true) => true,
            // The trigger is gone, nobody can stop us any more.
            Ok(false) => {
                tokio::time::sleep(limit).await;
                false
            }
            Err(_) => false,
        }
    }
}

/// Creates a linked trigger and flag.
#[must_use]
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Completes on SIGINT or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Spawns a task that fires `trigger` on the first termination signal.
pub fn spawn_signal_listener(trigger: ShutdownTrigger) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested");
        trigger.trigger();
    })
}

/// Owns configuration, connections and roster for the life of the process.
#[derive(Debug)]
pub struct RelayService<I, O> {
    config: RelayConfig,
    engine: RelayEngine,
    transport: Transport<I, O>,
    roster: RosterStore,
}

impl RelayService<ImapInbox, SmtpOutbox> {
    /// Creates a service talking to the configured servers.
    ///
    /// # Errors
    ///
    /// Returns an error if the sending address is unusable.
    pub fn connect_to(config: RelayConfig, credentials: &Credentials) -> Result<Self> {
        let timeout = config.io_timeout();
        let inbox = ImapInbox::new(config.imap.clone(), credentials.clone(), timeout);
        let outbox = SmtpOutbox::new(
            config.smtp.clone(),
            credentials.clone(),
            &config.email,
            timeout,
        )?;
        Ok(Self::new(config, Transport::new(inbox, outbox)))
    }
}

impl<I: Inbox, O: Outbox> RelayService<I, O> {
    /// Creates a service over the given transport. Nothing is opened yet.
    #[must_use]
    pub fn new(config: RelayConfig, transport: Transport<I, O>) -> Self {
        Self {
            engine: RelayEngine::from_config(&config),
            roster: RosterStore::new(config.roster_path.clone()),
            config,
            transport,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Returns the connection handles.
    #[must_use]
    pub const fn transport(&self) -> &Transport<I, O> {
        &self.transport
    }

    /// Returns the connection handles for adjustment between cycles.
    pub const fn transport_mut(&mut self) -> &mut Transport<I, O> {
        &mut self.transport
    }

    /// Returns the roster store.
    #[must_use]
    pub const fn roster(&self) -> &RosterStore {
        &self.roster
    }

    /// Opens both connections and loads the roster.
    ///
    /// On failure every handle opened so far is closed.
    ///
    /// # Errors
    ///
    /// Returns the first connection or roster error.
    pub async fn start(&mut self) -> Result<()> {
        self.transport.connect().await?;

        match RosterStore::load(self.config.roster_path.clone()) {
            Ok(roster) => {
                info!(subscribers = roster.len(), "Roster loaded");
                self.roster = roster;
                Ok(())
            }
            Err(e) => {
                self.transport.close().await;
                Err(e)
            }
        }
    }

    /// Runs a single poll cycle.
    ///
    /// # Errors
    ///
    /// See [`RelayEngine::run_cycle`].
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        self.engine
            .run_cycle(&mut self.transport, &mut self.roster)
            .await
    }

    /// Starts the service and polls until `shutdown` fires, then closes both
    /// connections.
    ///
    /// # Errors
    ///
    /// Returns an error only if startup fails.
    pub async fn run(&mut self, mut shutdown: Shutdown) -> Result<()> {
        self.start().await?;
        info!(
            mailbox = %self.config.imap.mailbox,
            admin = %self.config.admin_email,
            "Relay running"
        );

        while !shutdown.is_triggered() {
            let pause = match self.run_cycle().await {
                Ok(report) if report.roster_empty => self.config.idle_interval(),
                Ok(_) => self.config.poll_interval(),
                Err(e) => {
                    error!(error = %e, "Poll cycle failed, reconnecting");
                    self.transport.reconnect_best_effort().await;
                    warn!(delay = ?self.config.retry_delay(), "Retrying after delay");
                    self.config.retry_delay()
                }
            };

            if shutdown.wait(pause).await {
                break;
            }
        }

        self.transport.close().await;
        info!("Relay stopped");
        Ok(())
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

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let (_trigger, mut shutdown) = shutdown_channel();
        assert!(!shutdown.wait(Duration::from_secs(10)).await);
        assert!(!shutdown.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_interrupted_by_trigger() {
        let (trigger, mut shutdown) = shutdown_channel();
        let start = tokio::time::Instant::now();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            trigger.trigger();
        });

        assert!(shutdown.wait(Duration::from_secs(60)).await);
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_after_trigger_is_immediate() {
        let (trigger, mut shutdown) = shutdown_channel();
        trigger.trigger();
        trigger.trigger();
        assert!(shutdown.is_triggered());
        assert!(shutdown.wait(Duration::from_secs(60)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_with_dropped_trigger_still_sleeps() {
        let (trigger, mut shutdown) = shutdown_channel();
        drop(trigger);
        let start = tokio::time::Instant::now();
        assert!(!shutdown.wait(Duration::from_secs(5)).await);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
