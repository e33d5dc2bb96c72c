//! Shared contract suite for [`Handler`] implementations.
//!
//! Handler crates call [`run_handler_contract`] from their tests to check
//! that they load, keep draining their channel, return once it closes, and
//! stop cleanly.

use crate::logging::Logger;
use crate::models::Status;
use crate::plugin::{event_channel, Handler};
use crate::session::Session;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Contract inputs for one handler.
pub struct HandlerContractSpec<'a, H: Handler> {
    pub handler: &'a H,
    pub session: Arc<Session>,
    pub events: Vec<Status>,
    /// How long a single event may take to be accepted, and how long the
    /// handler may take to return after the channel closes.
    pub event_timeout: Duration,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandlerContractError {
    #[error("no events supplied to contract")]
    NoEvents,
    #[error("handler failed to load: {0}")]
    LoadFailed(String),
    #[error("handler stopped accepting events at index {index}")]
    Stalled { index: usize },
    #[error("handler dropped its channel before event {index}")]
    ClosedEarly { index: usize },
    #[error("handler did not return after its channel closed")]
    DidNotDrain,
    #[error("handler start failed: {0}")]
    StartFailed(String),
    #[error("handler stop failed: {0}")]
    StopFailed(String),
}

/// Run the shared Handler contract suite against an implementation.
pub async fn run_handler_contract<H: Handler>(
    spec: HandlerContractSpec<'_, H>,
) -> Result<(), HandlerContractError> {
    let HandlerContractSpec {
        handler,
        session,
        events,
        event_timeout,
    } = spec;

    if events.is_empty() {
        return Err(HandlerContractError::NoEvents);
    }

    handler
        .load(session, Logger::discard())
        .await
        .map_err(|e| HandlerContractError::LoadFailed(e.to_string()))?;

    let budget = drain_budget(event_timeout, events.len());
    let (tx, rx) = event_channel();

    let feed = async move {
        for (index, event) in events.into_iter().enumerate() {
            match tokio::time::timeout(event_timeout, tx.send(event)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(HandlerContractError::ClosedEarly { index }),
                Err(_) => return Err(HandlerContractError::Stalled { index }),
            }
        }
        Ok(())
    };
    let consume = tokio::time::timeout(budget, handler.start(rx));

    let (fed, consumed) = tokio::join!(feed, consume);
    fed?;
    match consumed {
        Err(_) => return Err(HandlerContractError::DidNotDrain),
        Ok(Err(e)) => return Err(HandlerContractError::StartFailed(e.to_string())),
        Ok(Ok(())) => {}
    }

    handler
        .stop()
        .await
        .map_err(|e| HandlerContractError::StopFailed(e.to_string()))
}

/// Time allowed for `start` to consume `count` events and return: one
/// `event_timeout` per event plus one for the return. Saturates at
/// [`Duration::MAX`].
fn drain_budget(event_timeout: Duration, count: usize) -> Duration {
    u32::try_from(count)
        .ok()
        .and_then(|n| n.checked_add(1))
        .and_then(|n| event_timeout.checked_mul(n))
        .unwrap_or(Duration::MAX)
}
