use crate::protocol::Attributes;
use mstatus_core::models::{
    MUSICBRAINZ_ARTIST_ID, MUSICBRAINZ_RECORDING_ID, MUSICBRAINZ_RELEASE_ID,
};
use mstatus_core::{Player, Status, Track};
use std::time::Duration;

/// Tags copied into [`Track::external_ids`].
const MUSICBRAINZ_TAGS: [(&str, &str); 3] = [
    ("MUSICBRAINZ_TRACKID", MUSICBRAINZ_RECORDING_ID),
    ("MUSICBRAINZ_ALBUMID", MUSICBRAINZ_RELEASE_ID),
    ("MUSICBRAINZ_ARTISTID", MUSICBRAINZ_ARTIST_ID),
];

/// Build a [`Status`] from the replies to `status` and `currentsong`.
pub fn map_status(player: &Player, status: &Attributes, song: &Attributes) -> Status {
    match status.get("state").map(String::as_str) {
        Some("play") => match map_track(status, song) {
            Some(track) => Status::playing(player.clone(), track),
            None => Status::stopped(player.clone()),
        },
        Some("pause") => Status::paused(player.clone(), map_track(status, song)),
        _ => Status::stopped(player.clone()),
    }
}

pub fn map_track(status: &Attributes, song: &Attributes) -> Option<Track> {
    let file = song.get("file")?;
    let id = song.get("Id").unwrap_or(file);
    let title = song
        .get("Title")
        .cloned()
        .unwrap_or_else(|| file_stem(file).to_owned());
    let artist = song.get("Artist").cloned().unwrap_or_default();

    let mut track = Track::new(id.as_str(), title, artist);
    track.album = song.get("Album").cloned();

    let (elapsed, duration) = parse_times(status, song);
    track.elapsed = elapsed;
    track.duration = duration;

    for (tag, key) in MUSICBRAINZ_TAGS {
        if let Some(value) = song.get(tag).filter(|v| !v.is_empty()) {
            track.external_ids.insert(key.to_owned(), value.clone());
        }
    }
    Some(track)
}

/// Elapsed and total play time.
///
/// Prefers the fractional `elapsed`/`duration` fields and falls back to the
/// legacy `time: elapsed:total` pair, then to the song's whole-second `Time`.
fn parse_times(status: &Attributes, song: &Attributes) -> (Duration, Duration) {
    let legacy = status.get("time").and_then(|t| t.split_once(':'));

    let elapsed = status
        .get("elapsed")
        .and_then(|v| seconds(v))
        .or_else(|| legacy.and_then(|(e, _)| seconds(e)))
        .unwrap_or_default();
    let duration = status
        .get("duration")
        .and_then(|v| seconds(v))
        .or_else(|| legacy.and_then(|(_, d)| seconds(d)))
        .or_else(|| song.get("duration").and_then(|v| seconds(v)))
        .or_else(|| song.get("Time").and_then(|v| seconds(v)))
        .unwrap_or_default();
    (elapsed, duration)
}

fn seconds(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

fn file_stem(file: &str) -> &str {
    let name = file.rsplit('/').next().unwrap_or(file);
    name.rsplit_once('.').map_or(name, |(stem, _)| stem)
}
