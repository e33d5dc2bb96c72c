//! Handler plugin that reports listens to ListenBrainz.
//!
//! Reads `listenbrainz.token` (required) and `listenbrainz.url` from the
//! session. The id of the last track counted as a listen is kept in the
//! session's state so a restart part-way through a track does not submit it
//! a second time.

mod client;
mod payload;
mod tracker;

pub use client::{ListenBrainzClient, DEFAULT_URL};
pub use payload::{AdditionalInfo, Listen, ListenType, Submission, TrackMetadata};
pub use tracker::{Tracker, LISTEN_MIN_ELAPSED, LISTEN_MIN_PROGRESS};

use async_trait::async_trait;
use mstatus_core::{
    EventReceiver, Handler, Logger, Named, PlaybackState, PluginError, PluginResult, Session,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

pub const PLUGIN_NAME: &str = "listenbrainz";

/// What survives a restart.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenState {
    pub last_listen: Option<String>,
}

struct Loaded {
    client: ListenBrainzClient,
    session: Arc<Session>,
    logger: Logger,
}

#[derive(Default)]
pub struct ListenBrainzHandler {
    loaded: Mutex<Option<Arc<Loaded>>>,
}

impl ListenBrainzHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn loaded(&self) -> PluginResult<Arc<Loaded>> {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PluginError::NotLoaded)
    }
}

impl Named for ListenBrainzHandler {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }
}

#[async_trait]
impl Handler for ListenBrainzHandler {
    async fn load(&self, session: Arc<Session>, logger: Logger) -> PluginResult<()> {
        let token = session.config_string(PLUGIN_NAME, "token");
        if token.trim().is_empty() {
            return Err(PluginError::config("listenbrainz.token", "missing user token"));
        }

        let url = session.config_string(PLUGIN_NAME, "url");
        let url = if url.trim().is_empty() {
            DEFAULT_URL
        } else {
            url.trim()
        };
        let url = Url::parse(url)
            .map_err(|e| PluginError::config("listenbrainz.url", e.to_string()))?;

        let client = ListenBrainzClient::new(url, token.trim())?;
        logger.debug(format!("submitting to {}", client.url()));
        *self.loaded.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(Loaded {
            client,
            session,
            logger,
        }));
        Ok(())
    }

    async fn start(&self, mut events: EventReceiver) -> PluginResult<()> {
        let loaded = self.loaded()?;
        let Loaded {
            client,
            session,
            logger,
        } = &*loaded;

        let restored = match session.read_state::<ListenState>(PLUGIN_NAME) {
            Ok(state) => state.and_then(|s| s.last_listen),
            Err(err) => {
                logger.warn(format!("ignoring saved state: {err}"));
                None
            }
        };
        let mut tracker = Tracker::new(restored);
        // A Source also reports `Stopped` when it is shut down, so the saved
        // listen is dropped only once another event shows the player went on.
        let mut clear_pending = false;

        while let Some(status) = events.recv().await {
            if std::mem::take(&mut clear_pending) {
                session.clear_state(PLUGIN_NAME);
            }
            for submission in tracker.observe(&status, unix_now()) {
                let listen = &submission.payload[0].track_metadata;
                match client.submit(&submission).await {
                    Ok(()) => logger.info(format!(
                        "published {:?} {:?} by {}",
                        submission.listen_type, listen.track_name, listen.artist_name
                    )),
                    Err(err) => logger.error(format!("failed to submit: {err}")),
                }
                if submission.listen_type == ListenType::Single {
                    let state = ListenState {
                        last_listen: tracker.current_id().map(str::to_owned),
                    };
                    if let Err(err) = session.write_state(PLUGIN_NAME, &state) {
                        logger.warn(format!("failed to record listen: {err}"));
                    }
                }
            }
            clear_pending = status.state == PlaybackState::Stopped;
        }
        logger.debug("event stream closed");
        Ok(())
    }

    async fn stop(&self) -> PluginResult<()> {
        if let Ok(loaded) = self.loaded() {
            loaded.logger.debug("stopped");
        }
        Ok(())
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
