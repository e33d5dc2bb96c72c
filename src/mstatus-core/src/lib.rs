pub mod config;
pub mod handler_contract;
pub mod logging;
pub mod models;
pub mod paths;
pub mod plugin;
pub mod redact;
pub mod registry;
pub mod session;

pub use config::{ConfigError, ConfigFile, LogLevel, LoggingConfig};
pub use logging::{init_logging, Logger, LoggingError, LoggingGuard};
pub use models::{PlaybackState, Player, Status, Track};
pub use paths::{AppDirs, DirsError};
pub use plugin::{
    event_channel, EventReceiver, EventSender, Handler, Named, PluginError, PluginResult, Source,
};
pub use registry::{names_match, PluginDescriptor, Registry, RegistryError};
pub use session::{Session, SessionError};

pub const APP_NAME: &str = "music-status";
pub const APP_AUTHOR: &str = "Music Status";
pub const APP_QUALIFIER: &str = "io";

/// Scope holding the keys that select the active plugins.
pub const GLOBAL_SCOPE: &str = "global";
