use mstatus_core::{EventReceiver, EventSender, Logger, PlaybackState, Status};
use tokio::sync::watch;

/// One handler's end of the fan-out.
pub(crate) struct Target {
    name: String,
    sender: EventSender,
    open: bool,
}

impl Target {
    pub(crate) fn new(name: impl Into<String>, sender: EventSender) -> Self {
        Self {
            name: name.into(),
            sender,
            open: true,
        }
    }
}

/// Reads the Source's channel and writes each event to every target.
pub(crate) struct Dispatcher {
    events: EventReceiver,
    targets: Vec<Target>,
    close: watch::Receiver<bool>,
    logger: Logger,
}

impl Dispatcher {
    pub(crate) fn new(
        events: EventReceiver,
        targets: Vec<Target>,
        close: watch::Receiver<bool>,
        logger: Logger,
    ) -> Self {
        Self {
            events,
            targets,
            close,
            logger,
        }
    }

    /// Run until the Source's channel closes or a close is requested.
    ///
    /// On close, events the Source already handed over are still delivered
    /// before the handler channels are dropped.
    pub(crate) async fn run(mut self) {
        let mut last_state: Option<PlaybackState> = None;
        loop {
            tokio::select! {
                biased;
                _ = closed(&mut self.close) => {
                    while let Ok(event) = self.events.try_recv() {
                        self.dispatch(event, &mut last_state).await;
                    }
                    break;
                }
                event = self.events.recv() => match event {
                    Some(event) => self.dispatch(event, &mut last_state).await,
                    None => break,
                },
            }
        }
        self.logger.debug("dispatcher finished");
    }

    async fn dispatch(&mut self, event: Status, last_state: &mut Option<PlaybackState>) {
        if *last_state != Some(event.state) {
            self.logger.info(format!("server event: {}", event.state));
            *last_state = Some(event.state);
        }

        for target in self.targets.iter_mut().filter(|t| t.open) {
            if target.sender.send(event.clone()).await.is_err() {
                self.logger.warn(format!(
                    "handler {} stopped consuming events",
                    target.name
                ));
                target.open = false;
            }
        }
    }
}

/// Resolves once close is requested or the requesting side is gone.
async fn closed(close: &mut watch::Receiver<bool>) {
    let _ = close.wait_for(|closed| *closed).await;
}
