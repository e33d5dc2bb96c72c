//! Shared configuration plus durable per-plugin state.
//!
//! Every loaded plugin and the server's shutdown path hold the same
//! `Arc<Session>`. One mutex guards both maps, so each call sees either the
//! whole of a write or none of it.
//!
//! State slots are opaque bytes owned by the plugin that wrote them. The
//! typed helpers encode with `serde_json`; a plugin that changes its state
//! shape should treat [`SessionError::DecodeState`] as "no prior state".

use crate::config::{parse_bool, ConfigFile};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Larger state files are treated as corrupt.
const MAX_STATE_FILE_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to encode state for {name:?}: {source}")]
    EncodeState {
        name: String,
        source: serde_json::Error,
    },
    #[error("failed to decode state for {name:?}: {source}")]
    DecodeState {
        name: String,
        source: serde_json::Error,
    },
    #[error("failed to read state file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write state file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("corrupt state file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Default)]
struct Inner {
    config: ConfigFile,
    state: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug)]
pub struct Session {
    inner: Mutex<Inner>,
    state_path: Option<PathBuf>,
}

impl Session {
    /// Build a session backed by `state_path`, loading any prior state.
    ///
    /// A missing state file is a cold start. An unreadable or corrupt one is
    /// logged and ignored; losing cached state never prevents startup.
    pub fn new(config: ConfigFile, state_path: impl Into<PathBuf>) -> Self {
        let session = Self {
            inner: Mutex::new(Inner {
                config,
                state: BTreeMap::new(),
            }),
            state_path: Some(state_path.into()),
        };
        if let Err(err) = session.load() {
            tracing::warn!(error = %err, "ignoring unreadable state file");
        }
        session
    }

    /// A session with no durable state; [`Session::persist`] does nothing.
    pub fn in_memory(config: ConfigFile) -> Self {
        Self {
            inner: Mutex::new(Inner {
                config,
                state: BTreeMap::new(),
            }),
            state_path: None,
        }
    }

    pub fn state_path(&self) -> Option<&Path> {
        self.state_path.as_deref()
    }

    /// Config value for `scope.key`, or an empty string when absent.
    pub fn config_string(&self, scope: &str, key: &str) -> String {
        self.lock()
            .config
            .get(scope, key)
            .map(str::to_owned)
            .unwrap_or_default()
    }

    /// Config value parsed as an integer; `0` when absent or unparsable.
    pub fn config_int(&self, scope: &str, key: &str) -> i64 {
        self.config_string(scope, key).trim().parse().unwrap_or(0)
    }

    /// `true`/`yes`/`on`/`1` are true; anything else, including absence, is false.
    pub fn config_bool(&self, scope: &str, key: &str) -> bool {
        parse_bool(&self.config_string(scope, key)).unwrap_or(false)
    }

    /// Comma-separated config value, trimmed, with empty items dropped.
    pub fn config_list(&self, scope: &str, key: &str) -> Vec<String> {
        self.config_string(scope, key)
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Snapshot of every config entry as `(scope.key, value)`.
    pub fn config_entries(&self) -> Vec<(String, String)> {
        self.lock()
            .config
            .entries()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect()
    }

    /// Encode `value` into the slot for `name`, replacing any prior value.
    /// Nothing is written to disk until [`Session::persist`].
    pub fn write_state<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> SessionResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|source| SessionError::EncodeState {
            name: name.to_owned(),
            source,
        })?;
        self.write_state_bytes(name, bytes);
        Ok(())
    }

    /// Decode the slot for `name`. A slot that was never written is `Ok(None)`.
    pub fn read_state<T: DeserializeOwned>(&self, name: &str) -> SessionResult<Option<T>> {
        let Some(bytes) = self.read_state_bytes(name) else {
            tracing::debug!(plugin = name, "no stored state");
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| SessionError::DecodeState {
                name: name.to_owned(),
                source,
            })
    }

    pub fn write_state_bytes(&self, name: &str, bytes: Vec<u8>) {
        self.lock().state.insert(name.to_owned(), bytes);
        tracing::debug!(plugin = name, "wrote state");
    }

    pub fn read_state_bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.lock().state.get(name).cloned()
    }

    /// Drop the slot for `name`; returns whether one existed.
    pub fn clear_state(&self, name: &str) -> bool {
        self.lock().state.remove(name).is_some()
    }

    /// Write every state slot to the state file.
    ///
    /// The file is replaced atomically so a crash mid-write leaves the
    /// previous contents intact.
    pub fn persist(&self) -> SessionResult<()> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };

        let (encoded, slots) = {
            let inner = self.lock();
            let encoded = serde_json::to_vec(&inner.state).map_err(|e| SessionError::Write {
                path: path.clone(),
                source: io::Error::other(e),
            })?;
            (encoded, inner.state.len())
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| SessionError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &encoded).map_err(|source| SessionError::Write {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, path).map_err(|source| SessionError::Write {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(slots, path = %path.display(), "persisted session state");
        Ok(())
    }

    /// Replace in-memory state with the contents of the state file.
    ///
    /// Returns the number of slots loaded. A missing file loads nothing. A
    /// corrupt file is moved aside to `<name>.corrupt`, logged, and loads
    /// nothing. Only an I/O failure reading an existing file is an error,
    /// and in-memory state is left untouched in that case.
    pub fn load(&self) -> SessionResult<usize> {
        let Some(path) = &self.state_path else {
            return Ok(0);
        };

        let state = match read_state_file(path) {
            Ok(Some(state)) => state,
            Ok(None) => {
                tracing::debug!(path = %path.display(), "no state file; starting fresh");
                BTreeMap::new()
            }
            Err(SessionError::Corrupt { path, reason }) => {
                tracing::warn!(
                    reason = %reason,
                    path = %path.display(),
                    "state file is corrupt; starting with empty state"
                );
                let corrupt = path.with_extension("corrupt");
                if let Err(move_err) = fs::rename(&path, &corrupt) {
                    tracing::warn!(error = %move_err, "failed to preserve corrupt state file");
                }
                BTreeMap::new()
            }
            Err(err) => return Err(err),
        };

        let slots = state.len();
        self.lock().state = state;
        Ok(slots)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_state_file(path: &Path) -> SessionResult<Option<BTreeMap<String, Vec<u8>>>> {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SessionError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if metadata.len() > MAX_STATE_FILE_SIZE {
        return Err(SessionError::Corrupt {
            path: path.to_path_buf(),
            reason: format!(
                "file is {} bytes, max {MAX_STATE_FILE_SIZE}",
                metadata.len()
            ),
        });
    }

    let bytes = fs::read(path).map_err(|source| SessionError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| SessionError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}
