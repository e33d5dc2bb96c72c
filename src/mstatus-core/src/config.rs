//! Scoped key/value configuration.
//!
//! The file is TOML. Every table is a scope and every scalar inside it a key,
//! so these are equivalent:
//!
//! ```toml
//! [global]
//! source = "mpd"
//! targets = ["listenbrainz"]
//! ```
//!
//! ```toml
//! global.source = "mpd"
//! global.targets = "listenbrainz"
//! ```
//!
//! Values are flattened to strings; lookups ignore case.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use toml::{Table, Value};

const LOGGING_SCOPE: &str = "logging";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to parse config: {0}")]
    Syntax(#[from] toml::de::Error),
    #[error("invalid config key {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Parsed configuration, immutable once loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    entries: BTreeMap<String, String>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents).map_err(|err| match err {
            ConfigError::Syntax(source) => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let table: Table = contents.parse()?;
        let mut entries = BTreeMap::new();
        for (scope, value) in table {
            match value {
                Value::Table(inner) => flatten(&scope, "", inner, &mut entries)?,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: scope,
                        message: "expected a scope table or scope.key".into(),
                    })
                }
            }
        }
        Ok(Self { entries })
    }

    /// Build from `("scope.key", value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let entries = pairs
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
            .collect();
        Self { entries }
    }

    pub fn get(&self, scope: &str, key: &str) -> Option<&str> {
        self.entries
            .get(&entry_key(scope, key))
            .map(String::as_str)
    }

    /// All entries as `(scope.key, value)`, sorted by key.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn entry_key(scope: &str, key: &str) -> String {
    format!("{}.{}", scope.to_ascii_lowercase(), key.to_ascii_lowercase())
}

fn flatten(
    scope: &str,
    prefix: &str,
    table: Table,
    out: &mut BTreeMap<String, String>,
) -> Result<(), ConfigError> {
    for (key, value) in table {
        let key = if prefix.is_empty() {
            key
        } else {
            format!("{prefix}.{key}")
        };
        let rendered = match value {
            Value::Table(inner) => {
                flatten(scope, &key, inner, out)?;
                continue;
            }
            Value::Array(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    parts.push(render_scalar(&item).ok_or_else(|| ConfigError::Invalid {
                        key: format!("{scope}.{key}"),
                        message: "arrays may only contain scalar values".into(),
                    })?);
                }
                parts.join(",")
            }
            scalar => render_scalar(&scalar).unwrap_or_default(),
        };
        let full = entry_key(scope, &key);
        if out.insert(full.clone(), rendered).is_some() {
            return Err(ConfigError::Invalid {
                key: full,
                message: "defined more than once".into(),
            });
        }
    }
    Ok(())
}

fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Boolean(b) => Some(b.to_string()),
        Value::Datetime(d) => Some(d.to_string()),
        Value::Array(_) | Value::Table(_) => None,
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub max_log_files: usize,
    pub stdout: bool,
    pub file_name: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            max_log_files: default_max_log_files(),
            stdout: true,
            file_name: None,
        }
    }
}

impl LoggingConfig {
    /// Read the `logging` scope, falling back to defaults for absent keys.
    pub fn from_config(config: &ConfigFile) -> Result<Self, ConfigError> {
        let mut out = Self::default();
        if let Some(level) = config.get(LOGGING_SCOPE, "level") {
            out.level = level.parse().map_err(|_| ConfigError::Invalid {
                key: "logging.level".into(),
                message: format!("unknown level {level:?}"),
            })?;
        }
        if let Some(max) = config.get(LOGGING_SCOPE, "max_files") {
            out.max_log_files = max.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "logging.max_files".into(),
                message: format!("expected a number, got {max:?}"),
            })?;
        }
        if let Some(stdout) = config.get(LOGGING_SCOPE, "stdout") {
            out.stdout = parse_bool(stdout).ok_or_else(|| ConfigError::Invalid {
                key: "logging.stdout".into(),
                message: format!("expected a boolean, got {stdout:?}"),
            })?;
        }
        out.file_name = config
            .get(LOGGING_SCOPE, "file")
            .filter(|s| !s.trim().is_empty())
            .map(str::to_owned);
        Ok(out)
    }
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(()),
        }
    }
}

fn default_max_log_files() -> usize {
    7
}
