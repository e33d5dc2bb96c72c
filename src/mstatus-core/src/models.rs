use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// External id key for the MusicBrainz recording of a track.
pub const MUSICBRAINZ_RECORDING_ID: &str = "musicbrainz_recording_id";
/// External id key for the MusicBrainz release (album) of a track.
pub const MUSICBRAINZ_RELEASE_ID: &str = "musicbrainz_release_id";
/// External id key for the MusicBrainz artist of a track.
pub const MUSICBRAINZ_ARTIST_ID: &str = "musicbrainz_artist_id";

/// Top-level playback state reported by a Source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
    Error,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Error => "error",
        };
        f.write_str(s)
    }
}

/// The player a Source is observing (e.g. "mpd").
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    pub version: Option<String>,
}

impl Player {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// Metadata for the track currently loaded in the player.
///
/// The core never interprets these fields; they are passed through to
/// Handlers untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Track {
    /// Source-scoped identifier, stable for as long as the track is loaded.
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    /// Zero when unknown.
    pub duration: Duration,
    pub elapsed: Duration,
    /// Source-specific identifiers keyed by e.g. [`MUSICBRAINZ_RECORDING_ID`].
    #[serde(default)]
    pub external_ids: BTreeMap<String, String>,
}

impl Track {
    pub fn new(id: impl Into<String>, title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            ..Self::default()
        }
    }

    pub fn external_id(&self, key: &str) -> Option<&str> {
        self.external_ids.get(key).map(String::as_str)
    }

    /// Fraction of the track played so far, `0.0` when the duration is unknown.
    pub fn progress(&self) -> f64 {
        if self.duration.is_zero() {
            return 0.0;
        }
        self.elapsed.as_secs_f64() / self.duration.as_secs_f64()
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} by {}", self.title, self.artist)
    }
}

/// One immutable snapshot of playback state.
///
/// Events carry no sequence number; their order is the order in which the
/// Source emitted them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Status {
    pub state: PlaybackState,
    pub player: Player,
    pub track: Option<Track>,
    pub error: Option<String>,
}

impl Status {
    pub fn stopped(player: Player) -> Self {
        Self {
            state: PlaybackState::Stopped,
            player,
            track: None,
            error: None,
        }
    }

    pub fn playing(player: Player, track: Track) -> Self {
        Self {
            state: PlaybackState::Playing,
            player,
            track: Some(track),
            error: None,
        }
    }

    pub fn paused(player: Player, track: Option<Track>) -> Self {
        Self {
            state: PlaybackState::Paused,
            player,
            track,
            error: None,
        }
    }

    pub fn error(player: Player, message: impl Into<String>) -> Self {
        Self {
            state: PlaybackState::Error,
            player,
            track: None,
            error: Some(message.into()),
        }
    }
}
