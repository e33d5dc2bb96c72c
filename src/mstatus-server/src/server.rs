use crate::dispatch::{Dispatcher, Target};
use mstatus_core::{
    event_channel, names_match, Handler, Logger, Named, PluginError, Registry, Session, Source, GLOBAL_SCOPE,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

/// `global` key naming the active Source.
pub const SOURCE_KEY: &str = "source";
/// `global` key listing the active Handlers, comma-separated, in dispatch order.
pub const TARGETS_KEY: &str = "targets";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("source not defined; set global.source")]
    SourceNotDefined,
    #[error("plugin {name:?} is not registered")]
    UnknownPlugin { name: String },
    #[error("plugin {name:?} cannot be used as a source")]
    NotASource { name: String },
    #[error("plugin {name:?} cannot be used as a handler")]
    NotAHandler { name: String },
    #[error("failed to load plugin {name:?}: {source}")]
    Load { name: String, source: PluginError },
    #[error("server cannot start while {state}")]
    NotStartable { state: ServerState },
    #[error("source {name:?} did not provide an event channel")]
    EventsUnavailable { name: String },
    #[error("source {name:?} failed: {source}")]
    Watch { name: String, source: PluginError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Constructed,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerState::Constructed => "constructed",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
            ServerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

struct LoadedHandler {
    name: String,
    plugin: Arc<dyn Handler>,
}

/// Tasks spawned by [`Server::start`].
struct Running {
    close: watch::Sender<bool>,
    dispatcher: JoinHandle<()>,
    handlers: Vec<(String, JoinHandle<()>)>,
}

/// Builds a [`Server`] from configuration.
///
/// The Source comes from `global.source` and the Handlers from
/// `global.targets`. Every plugin is loaded before `build` returns; any
/// failure aborts construction with nothing running.
pub struct ServerBuilder<'a> {
    registry: &'a Registry,
    session: Arc<Session>,
    logger: Logger,
    extra_handlers: Vec<Arc<dyn Handler>>,
}

impl<'a> ServerBuilder<'a> {
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Add a Handler that is not named in `global.targets`. It is loaded like
    /// the configured ones and dispatched to after them.
    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.extra_handlers.push(handler);
        self
    }

    pub async fn build(self) -> Result<Server, ServerError> {
        let Self {
            registry,
            session,
            logger,
            extra_handlers,
        } = self;

        let configured = session.config_string(GLOBAL_SCOPE, SOURCE_KEY);
        let configured = configured.trim();
        if configured.is_empty() {
            return Err(ServerError::SourceNotDefined);
        }
        let descriptor = registry
            .lookup(configured)
            .ok_or_else(|| ServerError::UnknownPlugin {
                name: configured.to_owned(),
            })?;
        let source_name = descriptor.name().to_owned();
        let source = descriptor
            .as_source()
            .ok_or_else(|| ServerError::NotASource {
                name: source_name.clone(),
            })?;

        logger.info(format!("loading source {source_name}"));
        source
            .load(Arc::clone(&session), logger.prefixed(&source_name))
            .await
            .map_err(|source| ServerError::Load {
                name: source_name.clone(),
                source,
            })?;

        let mut handlers: Vec<LoadedHandler> = Vec::new();
        for target in session.config_list(GLOBAL_SCOPE, TARGETS_KEY) {
            if names_match(&target, &source_name) {
                logger.warn(format!("ignoring source {source_name} listed as a target"));
                continue;
            }
            let descriptor = registry
                .lookup(&target)
                .ok_or_else(|| ServerError::UnknownPlugin {
                    name: target.clone(),
                })?;
            let plugin = descriptor
                .as_handler()
                .ok_or_else(|| ServerError::NotAHandler {
                    name: descriptor.name().to_owned(),
                })?;
            let name = descriptor.name().to_owned();
            load_handler(&mut handlers, name, plugin, &session, &logger).await?;
        }
        for plugin in extra_handlers {
            let name = plugin.name().to_owned();
            load_handler(&mut handlers, name, plugin, &session, &logger).await?;
        }

        Ok(Server {
            logger,
            session,
            source,
            source_name,
            handlers,
            stopping: AtomicBool::new(false),
            state: Mutex::new(ServerState::Constructed),
            running: AsyncMutex::new(None),
            drained: watch::channel(false).0,
        })
    }
}

async fn load_handler(
    handlers: &mut Vec<LoadedHandler>,
    name: String,
    plugin: Arc<dyn Handler>,
    session: &Arc<Session>,
    logger: &Logger,
) -> Result<(), ServerError> {
    if handlers.iter().any(|h| names_match(&h.name, &name)) {
        logger.warn(format!("handler {name} configured more than once"));
        return Ok(());
    }
    logger.info(format!("loading handler {name}"));
    plugin
        .load(Arc::clone(session), logger.prefixed(&name))
        .await
        .map_err(|source| ServerError::Load {
            name: name.clone(),
            source,
        })?;
    handlers.push(LoadedHandler { name, plugin });
    Ok(())
}

/// One Source fanned out to a fixed list of Handlers.
///
/// Share it behind an `Arc` so [`Server::stop`] can be called from a signal
/// handler while [`Server::start`] is still blocked.
pub struct Server {
    logger: Logger,
    session: Arc<Session>,
    source: Arc<dyn Source>,
    source_name: String,
    handlers: Vec<LoadedHandler>,
    stopping: AtomicBool,
    state: Mutex<ServerState>,
    running: AsyncMutex<Option<Running>>,
    /// Set once `start` has delivered the last event and its tasks exited.
    drained: watch::Sender<bool>,
}

impl Server {
    pub fn builder(registry: &Registry, session: Arc<Session>) -> ServerBuilder<'_> {
        ServerBuilder {
            registry,
            session,
            logger: Logger::tracing(),
            extra_handlers: Vec::new(),
        }
    }

    pub async fn new(registry: &Registry, session: Arc<Session>) -> Result<Self, ServerError> {
        Self::builder(registry, session).build().await
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Handler names in dispatch order.
    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name.as_str()).collect()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Spawn the handler loops and the dispatcher, then run the Source.
    ///
    /// Blocks until the Source's watch loop returns. Before returning, every
    /// event the Source already emitted is delivered and the handler loops
    /// have drained and exited. A watch failure is returned as
    /// [`ServerError::Watch`]; callers still call [`Server::stop`] afterwards.
    pub async fn start(&self) -> Result<(), ServerError> {
        {
            let mut running = self.running.lock().await;
            let state = self.state();
            if state != ServerState::Constructed {
                return Err(ServerError::NotStartable { state });
            }
            let events = self
                .source
                .events()
                .ok_or_else(|| ServerError::EventsUnavailable {
                    name: self.source_name.clone(),
                })?;
            self.transition(ServerState::Constructed, ServerState::Running)?;

            let (close, close_rx) = watch::channel(false);
            let mut targets = Vec::with_capacity(self.handlers.len());
            let mut tasks = Vec::with_capacity(self.handlers.len());
            for handler in &self.handlers {
                let (tx, rx) = event_channel();
                targets.push(Target::new(handler.name.clone(), tx));

                let plugin = Arc::clone(&handler.plugin);
                let logger = self.logger.clone();
                let name = handler.name.clone();
                let task = tokio::spawn(async move {
                    if let Err(err) = plugin.start(rx).await {
                        logger.error(format!("handler {name} failed: {err}"));
                    }
                });
                tasks.push((handler.name.clone(), task));
            }

            let dispatcher = Dispatcher::new(events, targets, close_rx, self.logger.clone());
            *running = Some(Running {
                close,
                dispatcher: tokio::spawn(dispatcher.run()),
                handlers: tasks,
            });
        }

        let result = if self.stopping.load(Ordering::SeqCst) {
            Ok(())
        } else {
            self.logger.info(format!("starting source {}", self.source_name));
            self.source.watch().await
        };
        self.close_dispatch().await;
        self.drained.send_replace(true);

        match result {
            Ok(()) => {
                self.logger.info(format!("source {} finished", self.source_name));
                Ok(())
            }
            Err(source) => {
                self.logger
                    .error(format!("source {} failed: {source}", self.source_name));
                Err(ServerError::Watch {
                    name: self.source_name.clone(),
                    source,
                })
            }
        }
    }

    /// Stop every plugin and persist session state.
    ///
    /// Only the first call does anything; later or concurrent calls return
    /// immediately. While running, the Source is stopped first and this waits
    /// until `start` has delivered everything the Source emitted, its final
    /// `Stopped` included, and the handler loops have exited. Each Handler is
    /// then stopped in dispatch order, after its channel has closed. Before
    /// `start`, the Handlers are stopped and then the Source. State is written
    /// last. A failing step is logged and the remaining steps still run. A
    /// plugin whose `stop` never returns hangs the shutdown.
    pub async fn stop(&self) {
        if self
            .stopping
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let prior = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, ServerState::Stopping)
        };
        self.logger.info("service stopping");

        if prior == ServerState::Running {
            self.stop_source().await;
            let mut drained = self.drained.subscribe();
            // Errors only if the sender is gone, and `self` owns it.
            let _ = drained.wait_for(|done| *done).await;
            self.stop_handlers().await;
        } else {
            self.stop_handlers().await;
            self.stop_source().await;
        }

        self.logger.info("writing state file");
        if let Err(err) = self.session.persist() {
            self.logger.error(format!("failed to write state file: {err}"));
        }

        self.set_state(ServerState::Stopped);
    }

    async fn stop_source(&self) {
        self.logger.info(format!("stopping source {}", self.source_name));
        if let Err(err) = self.source.stop().await {
            self.logger
                .error(format!("failed to stop source {}: {err}", self.source_name));
        }
    }

    async fn stop_handlers(&self) {
        for handler in &self.handlers {
            self.logger.info(format!("stopping plugin {}", handler.name));
            if let Err(err) = handler.plugin.stop().await {
                self.logger
                    .error(format!("failed to stop plugin {}: {err}", handler.name));
            }
        }
    }

    /// Close the fan-out and wait for the dispatcher and handler loops.
    ///
    /// Buffered events are delivered before the handler channels close.
    async fn close_dispatch(&self) {
        let mut running = self.running.lock().await;
        let Some(run) = running.take() else {
            return;
        };

        // Fails only if the dispatcher already exited.
        let _ = run.close.send(true);
        if let Err(err) = run.dispatcher.await {
            self.logger.error(format!("dispatcher task failed: {err}"));
        }
        for (name, task) in run.handlers {
            if let Err(err) = task.await {
                self.logger.error(format!("handler {name} task failed: {err}"));
            }
        }
    }

    fn transition(&self, from: ServerState, to: ServerState) -> Result<(), ServerError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return Err(ServerError::NotStartable { state: *state });
        }
        *state = to;
        Ok(())
    }

    fn set_state(&self, to: ServerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("source", &self.source_name)
            .field("handlers", &self.handler_names())
            .field("state", &self.state())
            .finish()
    }
}
