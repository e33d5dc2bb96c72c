use mpd_source::MpdSource;
use mstatus_core::{
    ConfigFile, EventReceiver, Logger, PlaybackState, PluginError, Session, Source, Status,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// What the fake daemon reports, shared with the test body.
#[derive(Default)]
struct Daemon {
    state: &'static str,
    password: Option<&'static str>,
    commands: Vec<String>,
    drop_next: bool,
}

struct FakeMpd {
    addr: std::net::SocketAddr,
    daemon: Arc<Mutex<Daemon>>,
}

impl FakeMpd {
    async fn start(state: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let daemon = Arc::new(Mutex::new(Daemon {
            state,
            ..Daemon::default()
        }));

        let shared = Arc::clone(&daemon);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&shared)));
            }
        });
        Self { addr, daemon }
    }

    fn set(&self, f: impl FnOnce(&mut Daemon)) {
        f(&mut self.daemon.lock().unwrap());
    }

    fn commands(&self) -> Vec<String> {
        self.daemon.lock().unwrap().commands.clone()
    }

    fn session(&self, extra: &[(&str, &str)]) -> Arc<Session> {
        let mut pairs = vec![
            ("mpd.host".to_owned(), "127.0.0.1".to_owned()),
            ("mpd.port".to_owned(), self.addr.port().to_string()),
            ("mpd.interval".to_owned(), "0.02".to_owned()),
        ];
        pairs.extend(extra.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())));
        Arc::new(Session::in_memory(ConfigFile::from_pairs(pairs)))
    }
}

async fn serve(stream: TcpStream, daemon: Arc<Mutex<Daemon>>) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    if write.write_all(b"OK MPD 0.23.5\n").await.is_err() {
        return;
    }

    while let Ok(Some(line)) = lines.next_line().await {
        let reply = {
            let mut daemon = daemon.lock().unwrap();
            daemon.commands.push(line.clone());
            if std::mem::take(&mut daemon.drop_next) {
                return;
            }
            match line.as_str() {
                "status" => format!(
                    "volume: 40\nstate: {}\nelapsed: 100.250\nduration: 180.000\nOK\n",
                    daemon.state
                ),
                "currentsong" => concat!(
                    "file: Artist/Album/01_Song.flac\n",
                    "Title: Song\n",
                    "Artist: Artist\n",
                    "Album: Album\n",
                    "Id: 42\n",
                    "MUSICBRAINZ_TRACKID: 10aae51f-f253-42c4-8af8-5673da1c98e6\n",
                    "OK\n"
                )
                .to_owned(),
                other => match (other.strip_prefix("password "), daemon.password) {
                    (Some(given), Some(expected)) if given == format!("\"{expected}\"") => {
                        "OK\n".to_owned()
                    }
                    (Some(_), _) => "ACK [3@0] {password} incorrect password\n".to_owned(),
                    _ => "ACK [5@0] {} unknown command\n".to_owned(),
                },
            }
        };
        if write.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

async fn loaded(session: Arc<Session>) -> Arc<MpdSource> {
    let source = Arc::new(MpdSource::new());
    source.load(session, Logger::discard()).await.unwrap();
    source
}

async fn next(events: &mut EventReceiver) -> Status {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

async fn drain(mut events: EventReceiver) -> Vec<Status> {
    let mut rest = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
        rest.push(event);
    }
    rest
}

#[tokio::test]
async fn reports_playing_track_and_one_terminal_stop() {
    let mpd = FakeMpd::start("play").await;
    let source = loaded(mpd.session(&[])).await;
    let mut events = source.events().unwrap();

    let watcher = {
        let source = Arc::clone(&source);
        tokio::spawn(async move { source.watch().await })
    };

    let first = next(&mut events).await;
    assert_eq!(first.state, PlaybackState::Playing);
    assert_eq!(first.player.name, "mpd");
    assert_eq!(first.player.version.as_deref(), Some("0.23.5"));
    let track = first.track.unwrap();
    assert_eq!(track.id, "42");
    assert_eq!(track.title, "Song");
    assert_eq!(track.elapsed, Duration::from_millis(100_250));
    assert_eq!(track.duration, Duration::from_secs(180));

    // Periodic even without a change.
    assert_eq!(next(&mut events).await.state, PlaybackState::Playing);

    source.stop().await.unwrap();
    let rest = drain(events).await;
    watcher.await.unwrap().unwrap();

    let stopped: Vec<_> = rest
        .iter()
        .filter(|s| s.state == PlaybackState::Stopped)
        .collect();
    assert_eq!(stopped.len(), 1);
    assert_eq!(rest.last().map(|s| s.state), Some(PlaybackState::Stopped));
}

#[tokio::test]
async fn final_stopped_waits_for_a_slow_reader() {
    let mpd = FakeMpd::start("play").await;
    let source = loaded(mpd.session(&[])).await;
    let mut events = source.events().unwrap();
    let watcher = {
        let source = Arc::clone(&source);
        tokio::spawn(async move { source.watch().await })
    };

    assert_eq!(next(&mut events).await.state, PlaybackState::Playing);
    // Let the next poll fill the channel so the final send has to wait.
    tokio::time::sleep(Duration::from_millis(100)).await;
    source.stop().await.unwrap();

    // Several poll intervals pass before anyone reads again.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let rest = drain(events).await;
    watcher.await.unwrap().unwrap();
    assert_eq!(rest.last().map(|s| s.state), Some(PlaybackState::Stopped));
}

#[tokio::test]
async fn follows_pause_and_stop() {
    let mpd = FakeMpd::start("play").await;
    let source = loaded(mpd.session(&[])).await;
    let mut events = source.events().unwrap();
    let watcher = {
        let source = Arc::clone(&source);
        tokio::spawn(async move { source.watch().await })
    };

    assert_eq!(next(&mut events).await.state, PlaybackState::Playing);
    mpd.set(|d| d.state = "pause");
    loop {
        let event = next(&mut events).await;
        if event.state == PlaybackState::Paused {
            assert_eq!(event.track.unwrap().id, "42");
            break;
        }
    }
    mpd.set(|d| d.state = "stop");
    loop {
        let event = next(&mut events).await;
        if event.state == PlaybackState::Stopped {
            assert!(event.track.is_none());
            break;
        }
    }

    source.stop().await.unwrap();
    drop(events);
    watcher.await.unwrap().unwrap();
}

#[tokio::test]
async fn authenticates_when_password_is_set() {
    let mpd = FakeMpd::start("play").await;
    mpd.set(|d| d.password = Some("s3cret"));
    let source = loaded(mpd.session(&[("mpd.password", "s3cret")])).await;
    let mut events = source.events().unwrap();
    let watcher = {
        let source = Arc::clone(&source);
        tokio::spawn(async move { source.watch().await })
    };

    assert_eq!(next(&mut events).await.state, PlaybackState::Playing);
    assert_eq!(mpd.commands().first().map(String::as_str), Some("password \"s3cret\""));

    source.stop().await.unwrap();
    drop(events);
    watcher.await.unwrap().unwrap();
}

#[tokio::test]
async fn wrong_password_is_reported_as_error() {
    let mpd = FakeMpd::start("play").await;
    mpd.set(|d| d.password = Some("right"));
    let source = loaded(mpd.session(&[("mpd.password", "wrong")])).await;
    let mut events = source.events().unwrap();
    let watcher = {
        let source = Arc::clone(&source);
        tokio::spawn(async move { source.watch().await })
    };

    let event = next(&mut events).await;
    assert_eq!(event.state, PlaybackState::Error);
    assert!(event.error.unwrap().contains("incorrect password"));

    source.stop().await.unwrap();
    drop(events);
    watcher.await.unwrap().unwrap();
}

#[tokio::test]
async fn unreachable_daemon_reports_one_error_per_outage() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let session = Arc::new(Session::in_memory(ConfigFile::from_pairs([
        ("mpd.host", "127.0.0.1".to_owned()),
        ("mpd.port", port.to_string()),
        ("mpd.interval", "0.02".to_owned()),
    ])));
    let source = loaded(session).await;
    let events = source.events().unwrap();
    let watcher = {
        let source = Arc::clone(&source);
        tokio::spawn(async move { source.watch().await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    source.stop().await.unwrap();
    let all = drain(events).await;
    watcher.await.unwrap().unwrap();

    let states: Vec<_> = all.iter().map(|s| s.state).collect();
    assert_eq!(states, vec![PlaybackState::Error, PlaybackState::Stopped]);
}

#[tokio::test]
async fn reconnects_after_dropped_connection() {
    let mpd = FakeMpd::start("play").await;
    let source = loaded(mpd.session(&[])).await;
    let mut events = source.events().unwrap();
    let watcher = {
        let source = Arc::clone(&source);
        tokio::spawn(async move { source.watch().await })
    };

    assert_eq!(next(&mut events).await.state, PlaybackState::Playing);
    mpd.set(|d| d.drop_next = true);

    let mut saw_error = false;
    loop {
        let event = next(&mut events).await;
        match event.state {
            PlaybackState::Error => {
                assert!(!saw_error, "outage reported twice");
                saw_error = true;
            }
            PlaybackState::Playing if saw_error => break,
            _ => {}
        }
    }

    source.stop().await.unwrap();
    drop(events);
    watcher.await.unwrap().unwrap();
}

#[tokio::test]
async fn stop_before_watch_returns_immediately() {
    let mpd = FakeMpd::start("play").await;
    let source = loaded(mpd.session(&[])).await;
    let events = source.events().unwrap();

    source.stop().await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), source.watch())
        .await
        .expect("watch did not return")
        .unwrap();

    let states: Vec<_> = drain(events).await.iter().map(|s| s.state).collect();
    assert_eq!(states, vec![PlaybackState::Stopped]);
}

#[tokio::test]
async fn closed_channel_ends_the_watch() {
    let mpd = FakeMpd::start("play").await;
    let source = loaded(mpd.session(&[])).await;
    drop(source.events().unwrap());

    tokio::time::timeout(Duration::from_secs(2), source.watch())
        .await
        .expect("watch did not notice the closed channel")
        .unwrap();
}

#[tokio::test]
async fn watch_requires_load_and_events_are_handed_out_once() {
    let source = MpdSource::new();
    assert!(matches!(source.watch().await, Err(PluginError::NotLoaded)));
    assert!(source.events().is_some());
    assert!(source.events().is_none());
}
