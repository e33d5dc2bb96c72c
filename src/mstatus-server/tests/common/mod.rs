#![allow(dead_code)]

use mstatus_core::{
    event_channel, ConfigFile, EventReceiver, EventSender, Handler, Logger, Named, Player,
    PluginDescriptor, PluginError, PluginResult, Registry, Session, Source, Status, Track,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub fn player() -> Player {
    Player::new("fake")
}

pub fn playing(n: usize) -> Status {
    Status::playing(player(), Track::new(n.to_string(), format!("Track {n}"), "Artist"))
}

/// Emits a fixed script of events, then either returns or waits for `stop`
/// and emits a terminal `Stopped`.
pub struct FakeSource {
    name: &'static str,
    script: Vec<Status>,
    hold_until_stopped: bool,
    fail_watch: Option<&'static str>,
    fail_load: bool,
    sender: Mutex<Option<EventSender>>,
    receiver: Mutex<Option<EventReceiver>>,
    stop_signal: Notify,
    pub loads: AtomicUsize,
    pub watches: AtomicUsize,
    pub stops: AtomicUsize,
}

impl FakeSource {
    pub fn new(name: &'static str, script: Vec<Status>) -> Self {
        let (tx, rx) = event_channel();
        Self {
            name,
            script,
            hold_until_stopped: false,
            fail_watch: None,
            fail_load: false,
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            stop_signal: Notify::new(),
            loads: AtomicUsize::new(0),
            watches: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn hold_until_stopped(mut self) -> Self {
        self.hold_until_stopped = true;
        self
    }

    pub fn fail_watch(mut self, message: &'static str) -> Self {
        self.fail_watch = Some(message);
        self
    }

    pub fn fail_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    /// Hand out the event receiver before the server can take it.
    pub fn without_events(self) -> Self {
        self.receiver.lock().unwrap().take();
        self
    }
}

impl Named for FakeSource {
    fn name(&self) -> &str {
        self.name
    }
}

#[async_trait::async_trait]
impl Source for FakeSource {
    async fn load(&self, _session: Arc<Session>, logger: Logger) -> PluginResult<()> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_load {
            return Err(PluginError::config("fake.host", "missing"));
        }
        logger.debug("loaded");
        Ok(())
    }

    async fn watch(&self) -> PluginResult<()> {
        self.watches.fetch_add(1, Ordering::SeqCst);
        let tx = self
            .sender
            .lock()
            .unwrap()
            .take()
            .ok_or(PluginError::AlreadyRunning)?;

        for event in self.script.clone() {
            if tx.send(event).await.is_err() {
                return Ok(());
            }
        }
        if let Some(message) = self.fail_watch {
            return Err(PluginError::other(message));
        }
        if self.hold_until_stopped {
            self.stop_signal.notified().await;
            let _ = tx.send(Status::stopped(player())).await;
        }
        Ok(())
    }

    fn events(&self) -> Option<EventReceiver> {
        self.receiver.lock().unwrap().take()
    }

    async fn stop(&self) -> PluginResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.stop_signal.notify_one();
        Ok(())
    }
}

/// Records every event it receives.
pub struct RecordingHandler {
    name: &'static str,
    pause_first: Option<Duration>,
    fail_load: bool,
    fail_stop: bool,
    state_on_load: Option<&'static str>,
    pub seen: Mutex<Vec<Status>>,
    pub loads: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub drained: AtomicBool,
    pub stopped_after_drain: AtomicBool,
}

impl RecordingHandler {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            pause_first: None,
            fail_load: false,
            fail_stop: false,
            state_on_load: None,
            seen: Mutex::new(Vec::new()),
            loads: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            drained: AtomicBool::new(false),
            stopped_after_drain: AtomicBool::new(false),
        }
    }

    pub fn pause_first(mut self, pause: Duration) -> Self {
        self.pause_first = Some(pause);
        self
    }

    pub fn fail_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    pub fn fail_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn write_state_on_load(mut self, value: &'static str) -> Self {
        self.state_on_load = Some(value);
        self
    }

    pub fn seen(&self) -> Vec<Status> {
        self.seen.lock().unwrap().clone()
    }
}

impl Named for RecordingHandler {
    fn name(&self) -> &str {
        self.name
    }
}

#[async_trait::async_trait]
impl Handler for RecordingHandler {
    async fn load(&self, session: Arc<Session>, _logger: Logger) -> PluginResult<()> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_load {
            return Err(PluginError::config(format!("{}.token", self.name), "missing"));
        }
        if let Some(value) = self.state_on_load {
            session
                .write_state(self.name, value)
                .map_err(|e| PluginError::other(e.to_string()))?;
        }
        Ok(())
    }

    async fn start(&self, mut events: EventReceiver) -> PluginResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let mut first = true;
        while let Some(event) = events.recv().await {
            if first {
                first = false;
                if let Some(pause) = self.pause_first {
                    tokio::time::sleep(pause).await;
                }
            }
            self.seen.lock().unwrap().push(event);
        }
        self.drained.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> PluginResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.drained.load(Ordering::SeqCst) {
            self.stopped_after_drain.store(true, Ordering::SeqCst);
        }
        if self.fail_stop {
            return Err(PluginError::other("stop failed"));
        }
        Ok(())
    }
}

pub fn registry_with(source: Arc<FakeSource>, handlers: &[Arc<RecordingHandler>]) -> Registry {
    let registry = Registry::new();
    let name = source.name().to_owned();
    registry.register(PluginDescriptor::new(name).with_source(source));
    for handler in handlers {
        let name = handler.name().to_owned();
        let handler: Arc<dyn Handler> = Arc::clone(handler) as Arc<dyn Handler>;
        registry.register(PluginDescriptor::new(name).with_handler(handler));
    }
    registry
}

pub fn session(source: &str, targets: &str) -> Arc<Session> {
    Arc::new(Session::in_memory(ConfigFile::from_pairs([
        ("global.source", source),
        ("global.targets", targets),
    ])))
}

/// Poll `check` until it holds or two seconds pass.
pub async fn wait_until(check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
