//! Request bodies for `POST /1/submit-listens`.

use mstatus_core::models::{MUSICBRAINZ_ARTIST_ID, MUSICBRAINZ_RECORDING_ID, MUSICBRAINZ_RELEASE_ID};
use mstatus_core::{Player, Track};
use serde::Serialize;

pub const SUBMISSION_CLIENT: &str = "music-status";
pub const SUBMISSION_CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenType {
    PlayingNow,
    Single,
}

#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub listen_type: ListenType,
    pub payload: Vec<Listen>,
}

impl Submission {
    pub fn new(listen_type: ListenType, listen: Listen) -> Self {
        Self {
            listen_type,
            payload: vec![listen],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listen {
    /// Unix seconds; must be absent for `playing_now`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listened_at: Option<i64>,
    pub track_metadata: TrackMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackMetadata {
    pub track_name: String,
    pub artist_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,
    pub additional_info: AdditionalInfo,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AdditionalInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_player: Option<String>,
    pub submission_client: String,
    pub submission_client_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_mbid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_mbid: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub artist_mbids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl Listen {
    pub fn from_track(player: &Player, track: &Track) -> Self {
        let mbid = |key: &str| track.external_id(key).map(str::to_owned);
        Self {
            listened_at: None,
            track_metadata: TrackMetadata {
                track_name: track.title.clone(),
                artist_name: track.artist.clone(),
                release_name: track.album.clone().filter(|a| !a.is_empty()),
                additional_info: AdditionalInfo {
                    media_player: Some(player.name.clone()).filter(|n| !n.is_empty()),
                    submission_client: SUBMISSION_CLIENT.to_owned(),
                    submission_client_version: SUBMISSION_CLIENT_VERSION.to_owned(),
                    recording_mbid: mbid(MUSICBRAINZ_RECORDING_ID),
                    release_mbid: mbid(MUSICBRAINZ_RELEASE_ID),
                    artist_mbids: mbid(MUSICBRAINZ_ARTIST_ID).into_iter().collect(),
                    duration_ms: u64::try_from(track.duration.as_millis())
                        .ok()
                        .filter(|ms| *ms > 0),
                },
            },
        }
    }
}
