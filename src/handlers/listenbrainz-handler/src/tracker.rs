//! Decides which submissions a status stream produces.
//!
//! A track is announced as `playing_now` the first time it is seen playing,
//! and counted as a `single` listen once it has played for more than half
//! its length or more than four minutes, whichever comes first.

use crate::payload::{Listen, ListenType, Submission};
use mstatus_core::{PlaybackState, Status};
use std::time::Duration;

pub const LISTEN_MIN_ELAPSED: Duration = Duration::from_secs(240);
pub const LISTEN_MIN_PROGRESS: f64 = 0.5;

#[derive(Debug)]
struct Current {
    id: String,
    listen: Listen,
    playing_sent: bool,
    single_sent: bool,
}

#[derive(Debug, Default)]
pub struct Tracker {
    current: Option<Current>,
    /// Track already counted before a restart; consulted for the first track only.
    restored: Option<String>,
}

impl Tracker {
    pub fn new(restored: Option<String>) -> Self {
        Self {
            current: None,
            restored,
        }
    }

    /// Id of the track being followed, if any.
    pub fn current_id(&self) -> Option<&str> {
        self.current.as_ref().map(|c| c.id.as_str())
    }

    /// Feed one event, returning the submissions it triggers in send order.
    ///
    /// `now` is the Unix time used as `listened_at` when a track first appears.
    pub fn observe(&mut self, status: &Status, now: i64) -> Vec<Submission> {
        match status.state {
            PlaybackState::Stopped => {
                self.current = None;
                Vec::new()
            }
            PlaybackState::Playing => match &status.track {
                Some(track) => {
                    let current = match self.current.take() {
                        Some(current) if current.id == track.id => current,
                        _ => {
                            let counted = self.restored.take().as_deref() == Some(track.id.as_str());
                            let mut listen = Listen::from_track(&status.player, track);
                            listen.listened_at = Some(now);
                            Current {
                                id: track.id.clone(),
                                listen,
                                playing_sent: false,
                                single_sent: counted,
                            }
                        }
                    };
                    let current = self.current.insert(current);

                    let mut out = Vec::new();
                    if !current.playing_sent {
                        let mut listen = current.listen.clone();
                        listen.listened_at = None;
                        out.push(Submission::new(ListenType::PlayingNow, listen));
                        current.playing_sent = true;
                    }
                    let listened = track.elapsed > LISTEN_MIN_ELAPSED
                        || track.progress() > LISTEN_MIN_PROGRESS;
                    if !current.single_sent && listened {
                        out.push(Submission::new(ListenType::Single, current.listen.clone()));
                        current.single_sent = true;
                    }
                    out
                }
                None => Vec::new(),
            },
            PlaybackState::Paused | PlaybackState::Error => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mstatus_core::{Player, Track};

    fn playing(id: &str, elapsed: u64, duration: u64) -> Status {
        let mut track = Track::new(id, format!("Track {id}"), "Artist");
        track.elapsed = Duration::from_secs(elapsed);
        track.duration = Duration::from_secs(duration);
        Status::playing(Player::new("mpd"), track)
    }

    fn kinds(subs: &[Submission]) -> Vec<ListenType> {
        subs.iter().map(|s| s.listen_type).collect()
    }

    #[test]
    fn announces_once_then_counts_past_half() {
        let mut tracker = Tracker::default();

        assert_eq!(kinds(&tracker.observe(&playing("a", 0, 200), 10)), vec![ListenType::PlayingNow]);
        assert!(tracker.observe(&playing("a", 50, 200), 60).is_empty());
        assert!(tracker.observe(&playing("a", 100, 200), 110).is_empty());

        let subs = tracker.observe(&playing("a", 101, 200), 111);
        assert_eq!(kinds(&subs), vec![ListenType::Single]);
        assert_eq!(subs[0].payload[0].listened_at, Some(10));

        assert!(tracker.observe(&playing("a", 150, 200), 160).is_empty());
    }

    #[test]
    fn four_minutes_counts_for_long_tracks() {
        let mut tracker = Tracker::default();
        tracker.observe(&playing("long", 0, 1200), 0);
        assert!(tracker.observe(&playing("long", 240, 1200), 240).is_empty());
        assert_eq!(
            kinds(&tracker.observe(&playing("long", 241, 1200), 241)),
            vec![ListenType::Single]
        );
    }

    #[test]
    fn unknown_duration_needs_four_minutes() {
        let mut tracker = Tracker::default();
        tracker.observe(&playing("stream", 0, 0), 0);
        assert!(tracker.observe(&playing("stream", 200, 0), 200).is_empty());
        assert_eq!(
            kinds(&tracker.observe(&playing("stream", 300, 0), 300)),
            vec![ListenType::Single]
        );
    }

    #[test]
    fn track_change_starts_over() {
        let mut tracker = Tracker::default();
        tracker.observe(&playing("a", 0, 100), 0);
        tracker.observe(&playing("a", 60, 100), 60);

        let subs = tracker.observe(&playing("b", 0, 100), 100);
        assert_eq!(kinds(&subs), vec![ListenType::PlayingNow]);
        assert_eq!(tracker.current_id(), Some("b"));
    }

    #[test]
    fn stopped_resets_so_a_replay_counts_again() {
        let mut tracker = Tracker::default();
        tracker.observe(&playing("a", 0, 100), 0);
        tracker.observe(&playing("a", 60, 100), 60);

        assert!(tracker.observe(&Status::stopped(Player::new("mpd")), 70).is_empty());
        assert_eq!(tracker.current_id(), None);

        assert_eq!(
            kinds(&tracker.observe(&playing("a", 60, 100), 80)),
            vec![ListenType::PlayingNow, ListenType::Single]
        );
    }

    #[test]
    fn pause_and_error_are_ignored() {
        let mut tracker = Tracker::default();
        tracker.observe(&playing("a", 0, 100), 0);
        assert!(tracker
            .observe(&Status::paused(Player::new("mpd"), None), 5)
            .is_empty());
        assert!(tracker
            .observe(&Status::error(Player::new("mpd"), "gone"), 6)
            .is_empty());
        assert_eq!(tracker.current_id(), Some("a"));
        assert!(tracker.observe(&playing("a", 10, 100), 10).is_empty());
    }

    #[test]
    fn restored_track_is_not_counted_twice() {
        let mut tracker = Tracker::new(Some("a".into()));
        assert_eq!(
            kinds(&tracker.observe(&playing("a", 80, 100), 0)),
            vec![ListenType::PlayingNow]
        );

        tracker.observe(&playing("b", 0, 100), 10);
        tracker.observe(&playing("a", 0, 100), 20);
        assert_eq!(
            kinds(&tracker.observe(&playing("a", 80, 100), 100)),
            vec![ListenType::Single]
        );
    }
}
