mod shutdown;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use listenbrainz_handler::ListenBrainzHandler;
use mpd_source::MpdSource;
use mstatus_core::redact::{redact_url_credentials, redact_value};
use mstatus_core::{
    init_logging, AppDirs, ConfigFile, LogLevel, LoggingConfig, PluginDescriptor, Registry,
    Session, GLOBAL_SCOPE,
};
use mstatus_server::Server;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Config key overriding where session state is written.
const STATE_FILE_KEY: &str = "state_file";

#[derive(Debug, Parser)]
#[command(
    name = "music-status",
    version,
    about = "Watch a music player and forward its status to other services"
)]
struct Cli {
    /// Config file (defaults to config.toml in the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Log at debug level regardless of logging.level
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum Command {
    /// Run the configured source and handlers until interrupted (default)
    Run,
    /// List the plugins compiled into this binary
    Plugins,
    /// Print the effective configuration with secrets masked
    Config,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("config file {} does not exist", .0.display())]
    MissingConfig(PathBuf),
}

fn registry() -> Registry {
    let registry = Registry::new();
    registry.register(PluginDescriptor::source(MpdSource::new()));
    registry.register(PluginDescriptor::handler(ListenBrainzHandler::new()));
    registry.freeze();
    registry
}

/// Load the config file. An explicit path must exist; a missing default
/// file means an empty configuration.
fn load_config(explicit: Option<&Path>, dirs: &AppDirs) -> Result<ConfigFile> {
    match explicit {
        Some(path) if !path.exists() => Err(CliError::MissingConfig(path.to_path_buf()).into()),
        Some(path) => Ok(ConfigFile::load(path)?),
        None => {
            let path = dirs.config_file();
            if path.exists() {
                Ok(ConfigFile::load(&path)?)
            } else {
                Ok(ConfigFile::default())
            }
        }
    }
}

fn state_path(config: &ConfigFile, dirs: &AppDirs) -> PathBuf {
    config
        .get(GLOBAL_SCOPE, STATE_FILE_KEY)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| dirs.state_file())
}

fn plugin_lines(registry: &Registry) -> Vec<String> {
    registry
        .descriptors()
        .iter()
        .map(|plugin| {
            let mut roles = Vec::new();
            if plugin.is_source() {
                roles.push("source");
            }
            if plugin.is_handler() {
                roles.push("handler");
            }
            format!("{} ({})", plugin.name(), roles.join(", "))
        })
        .collect()
}

fn config_lines(config: &ConfigFile) -> Vec<String> {
    config
        .entries()
        .map(|(key, value)| {
            let value = redact_value(key, value);
            format!("{key} = {}", redact_url_credentials(&value))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let dirs = AppDirs::discover()?;
    let config = load_config(cli.config.as_deref(), &dirs)?;
    let registry = registry();

    match cli.command.unwrap_or(Command::Run) {
        Command::Plugins => {
            for line in plugin_lines(&registry) {
                println!("{line}");
            }
        }
        Command::Config => {
            if config.is_empty() {
                println!("No configuration found. Create {}.", dirs.config_file().display());
            }
            for line in config_lines(&config) {
                println!("{line}");
            }
        }
        Command::Run => run(config, &registry, &dirs, cli.verbose).await?,
    }

    Ok(())
}

async fn run(config: ConfigFile, registry: &Registry, dirs: &AppDirs, verbose: bool) -> Result<()> {
    let mut logging = LoggingConfig::from_config(&config)?;
    if verbose {
        logging.level = LogLevel::Debug;
    }
    let _logging = init_logging(&logging, dirs)?;

    let state_path = state_path(&config, dirs);
    tracing::info!("using state file {}", state_path.display());
    let session = Arc::new(Session::new(config, state_path));

    let server = Arc::new(
        Server::new(registry, session)
            .await
            .context("failed to start music-status")?,
    );
    tracing::info!(
        "running {} -> [{}]",
        server.source_name(),
        server.handler_names().join(", ")
    );

    let mut runner = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.start().await })
    };

    let outcome = tokio::select! {
        outcome = &mut runner => outcome,
        _ = shutdown::shutdown_signal() => {
            server.stop().await;
            runner.await
        }
    };
    server.stop().await;

    outcome.context("server task failed")??;
    tracing::info!("exiting");
    Ok(())
}
