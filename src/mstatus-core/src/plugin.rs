//! The contract every integration implements.
//!
//! A plugin is always [`Named`], and additionally a [`Source`] (produces the
//! status stream), a [`Handler`] (consumes it), or both. The server only ever
//! talks to plugins through these traits.

use crate::logging::Logger;
use crate::models::Status;
use crate::session::Session;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Number of events a status channel holds before the sender waits.
///
/// Tokio channels cannot be zero-sized, so a single slot is the closest
/// thing to a rendezvous hand-off.
pub const EVENT_CHANNEL_CAPACITY: usize = 1;

pub type EventSender = mpsc::Sender<Status>;
pub type EventReceiver = mpsc::Receiver<Status>;

/// Build a status channel with the core's hand-off capacity.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("invalid configuration for {key}: {message}")]
    Config { key: String, message: String },
    #[error("plugin has not been loaded")]
    NotLoaded,
    #[error("plugin is already running")]
    AlreadyRunning,
    #[error("network error: {message}")]
    Network { message: String },
    #[error("authentication error: {message}")]
    Authentication { message: String },
    #[error("protocol error: {message}")]
    Protocol { message: String },
    #[error("{message}")]
    Other { message: String },
}

impl PluginError {
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

pub type PluginResult<T> = Result<T, PluginError>;

pub trait Named {
    /// Registry key, matched case-insensitively. Also used as the config
    /// scope and the state slot by convention.
    fn name(&self) -> &str;
}

/// Watches one player or service and emits a [`Status`] whenever its
/// playback state changes, and periodically even when it does not.
#[async_trait::async_trait]
pub trait Source: Named + Send + Sync {
    /// Read configuration and prior state. Errors abort server construction.
    async fn load(&self, session: Arc<Session>, logger: Logger) -> PluginResult<()>;

    /// Run the watch loop.
    ///
    /// Must not return until [`Source::stop`] is called or an unrecoverable
    /// error occurs, and must emit exactly one terminal
    /// [`PlaybackState::Stopped`](crate::models::PlaybackState::Stopped)
    /// before returning normally. A closed event channel counts as a stop
    /// request.
    async fn watch(&self) -> PluginResult<()>;

    /// Hand out the receiving half of the event channel.
    ///
    /// Returns `Some` exactly once per run; later calls return `None`.
    fn events(&self) -> Option<EventReceiver>;

    /// Make [`Source::watch`] return promptly. Called at most once per run.
    async fn stop(&self) -> PluginResult<()>;
}

/// Consumes the status stream and applies a side effect per event.
#[async_trait::async_trait]
pub trait Handler: Named + Send + Sync {
    /// Read configuration and prior state. Errors abort server construction.
    async fn load(&self, session: Arc<Session>, logger: Logger) -> PluginResult<()>;

    /// Consume `events` until the channel is closed.
    ///
    /// Per-event failures are the handler's own to log; an `Err` here means
    /// the handler gave up on the stream entirely.
    async fn start(&self, events: EventReceiver) -> PluginResult<()>;

    /// Final cleanup, called once after the event channel has been closed.
    async fn stop(&self) -> PluginResult<()>;
}
