//! Source plugin that polls a Music Player Daemon.
//!
//! Each poll issues `status` and `currentsong` and emits the mapped
//! [`Status`]. A lost connection is retried on the next poll; the first
//! failure of an outage is reported as an `Error` status.

pub mod config;
mod mapping;
mod protocol;

pub use config::MpdConfig;
pub use mapping::{map_status, map_track};
pub use protocol::{Attributes, Connection, ProtocolError};

use async_trait::async_trait;
use mstatus_core::{
    event_channel, EventReceiver, EventSender, Logger, Named, Player, PluginError,
    PluginResult, Session, Source, Status,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

pub const PLUGIN_NAME: &str = "mpd";

/// Upper bound for a connect or a single response line.
const IO_TIMEOUT: Duration = Duration::from_secs(5);

struct Loaded {
    config: MpdConfig,
    logger: Logger,
}

pub struct MpdSource {
    loaded: Mutex<Option<Arc<Loaded>>>,
    sender: Mutex<Option<EventSender>>,
    receiver: Mutex<Option<EventReceiver>>,
    stopping: AtomicBool,
    shutdown: Notify,
}

impl MpdSource {
    pub fn new() -> Self {
        let (tx, rx) = event_channel();
        Self {
            loaded: Mutex::new(None),
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            stopping: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Settings resolved by [`Source::load`], if it has run.
    pub fn config(&self) -> Option<MpdConfig> {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|l| l.config.clone())
    }

    fn stop_requested(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

impl Default for MpdSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Named for MpdSource {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }
}

#[async_trait]
impl Source for MpdSource {
    async fn load(&self, session: Arc<Session>, logger: Logger) -> PluginResult<()> {
        let config = MpdConfig::from_session(&session)?;
        logger.debug(format!(
            "using {} every {:?}",
            config.addr(),
            config.interval
        ));
        *self.loaded.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::new(Loaded { config, logger }));
        Ok(())
    }

    async fn watch(&self) -> PluginResult<()> {
        let loaded = self
            .loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PluginError::NotLoaded)?;
        let tx = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(PluginError::AlreadyRunning)?;

        let interval = loaded.config.interval;
        let logger = loaded.logger.clone();
        let mut poller = Poller::new(loaded);

        logger.info("watching");
        while !self.stop_requested() {
            let polled = tokio::select! {
                biased;
                _ = self.shutdown.notified() => break,
                polled = poller.poll() => polled,
            };

            if let Some(status) = polled {
                tokio::select! {
                    biased;
                    _ = self.shutdown.notified() => break,
                    sent = tx.send(status) => {
                        if sent.is_err() {
                            logger.debug("event channel closed");
                            return Ok(());
                        }
                    }
                }
            }

            tokio::select! {
                biased;
                _ = self.shutdown.notified() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        // Waits for the reader to take it; fails at once if the receiver is gone.
        let terminal = Status::stopped(poller.player.clone());
        if tx.send(terminal).await.is_err() {
            logger.debug("event channel closed before the final status");
        }
        logger.info("stopped watching");
        Ok(())
    }

    fn events(&self) -> Option<EventReceiver> {
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn stop(&self) -> PluginResult<()> {
        self.stopping.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
        Ok(())
    }
}

/// Connection state carried across polls.
struct Poller {
    loaded: Arc<Loaded>,
    conn: Option<Connection>,
    player: Player,
    in_outage: bool,
}

impl Poller {
    fn new(loaded: Arc<Loaded>) -> Self {
        Self {
            loaded,
            conn: None,
            player: Player::new(PLUGIN_NAME),
            in_outage: false,
        }
    }

    /// Returns `None` when the poll failed and the outage was already reported.
    async fn poll(&mut self) -> Option<Status> {
        let loaded = Arc::clone(&self.loaded);
        let logger = &loaded.logger;
        match self.try_poll().await {
            Ok(status) => {
                if self.in_outage {
                    logger.info("connection restored");
                    self.in_outage = false;
                }
                Some(status)
            }
            Err(err) => {
                self.conn = None;
                if self.in_outage {
                    logger.debug(format!("still unreachable: {err}"));
                    return None;
                }
                self.in_outage = true;
                logger.warn(format!("lost connection to {}: {err}", loaded.config.addr()));
                Some(Status::error(self.player.clone(), err.to_string()))
            }
        }
    }

    async fn try_poll(&mut self) -> Result<Status, ProtocolError> {
        if self.conn.is_none() {
            let config = &self.loaded.config;
            let conn =
                Connection::connect(&config.addr(), config.password.as_deref(), IO_TIMEOUT)
                    .await?;
            self.loaded
                .logger
                .info(format!("connected to {} (protocol {})", config.addr(), conn.version()));
            self.player = Player::new(PLUGIN_NAME).with_version(conn.version());
            self.conn = Some(conn);
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(ProtocolError::Closed);
        };

        let status = conn.command("status").await?;
        let song = conn.command("currentsong").await?;
        Ok(map_status(&self.player, &status, &song))
    }
}
