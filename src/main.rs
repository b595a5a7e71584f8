//! scrobd — watches MPD playback and scrobbles listens to Last.fm.
//!
//! The daemon blocks on mpd's `idle` command until playback starts, then
//! samples the player once per poll interval and feeds each sample into
//! the watch engine. The engine decides when a "now playing" update or a
//! scrobble is owed; failures talking to Last.fm are logged and dropped,
//! failures talking to mpd are fatal.

mod config;
mod mpd;
mod scrobbler;
mod session;
mod text_cleanup;
mod watch;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use config::Config;
use mpd::MpdClient;
use scrobbler::LastFm;
use session::Session;
use text_cleanup::TextCleaner;
use watch::{Action, PlayState, WatchEngine};

#[derive(Parser)]
#[command(name = "scrobd", version, about = "MPD scrobbler daemon for Last.fm")]
struct Args {
    /// Path to the config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Discard any saved session and run the authentication handshake again
    #[arg(long)]
    reauth: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config_path = match args.config {
        Some(path) => path,
        None => Config::config_path()?,
    };
    let config = Config::load(&config_path)?;

    let session = load_or_authenticate(&config, args.reauth)?;
    log::info!("scrobbling as {}", session.user);

    let lastfm = LastFm::new(
        config.lastfm.base_url.clone(),
        config.lastfm.api_key.clone(),
        config.lastfm.api_secret.clone(),
        session.key.clone(),
    );
    let cleaner = TextCleaner::new(&config.cleanup);

    let mut client = MpdClient::connect(&config.mpd.host, config.mpd.port)?;
    log::info!(
        "connected to mpd {} at {}:{}",
        client.version,
        config.mpd.host,
        config.mpd.port
    );

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            log::info!("interrupt received, shutting down");
            running.store(false, Ordering::SeqCst);
        })
        .context("failed to install the interrupt handler")?;
    }

    let result = watch_loop(&mut client, &lastfm, &cleaner, &config, &running);
    client.close();
    result
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter),
    );
    if !atty::is(atty::Stream::Stderr) {
        // Journald and friends add their own timestamps.
        builder.format_timestamp(None);
    }
    builder.init();
}

/// Read the saved session, or run the one-time interactive handshake and
/// persist what it grants.
fn load_or_authenticate(config: &Config, reauth: bool) -> Result<Session> {
    let path = config.session_path()?;

    if !reauth {
        match Session::load(&path) {
            Ok(session) => return Ok(session),
            Err(e) => log::warn!("no usable saved session ({e:#}), starting authentication"),
        }
    }

    let session = scrobbler::auth::authenticate(
        &config.lastfm.base_url,
        &config.lastfm.api_key,
        &config.lastfm.api_secret,
    )?;
    session.save(&path)?;
    Ok(session)
}

/// What one poll tick found at the player.
#[derive(Debug)]
enum Tick {
    /// Playing a tagged track: feed the engine.
    Step(watch::TrackSnapshot),
    /// Playing, but nothing watchable (untagged file or stream). Stay on
    /// the poll cadence; falling back to the blocking wait would spin,
    /// because the player still reports it is playing.
    Hold,
    /// No longer playing: back to the blocking wait.
    Stopped,
}

fn sample(client: &mut MpdClient) -> Result<Tick, mpd::MpdError> {
    match client.current_snapshot()? {
        Some(snapshot) if snapshot.state == PlayState::Playing => Ok(Tick::Step(snapshot)),
        Some(_) => Ok(Tick::Stopped),
        None => {
            if client.status()?.state == PlayState::Playing {
                Ok(Tick::Hold)
            } else {
                Ok(Tick::Stopped)
            }
        }
    }
}

/// The daemon's steady state: block until playback, then sample once per
/// poll tick and act on whatever the engine decides.
fn watch_loop(
    client: &mut MpdClient,
    lastfm: &LastFm,
    cleaner: &TextCleaner,
    config: &Config,
    running: &AtomicBool,
) -> Result<()> {
    let thresholds = config.watch.thresholds();
    let poll_interval = Duration::from_secs(thresholds.poll_interval_secs);
    let mut engine = WatchEngine::new(thresholds, Utc::now());

    while running.load(Ordering::SeqCst) {
        if !wait_for_play(client, running)? {
            break;
        }

        loop {
            if !running.load(Ordering::SeqCst) {
                log::info!("stopped");
                return Ok(());
            }

            match sample(client).context("lost connection to mpd")? {
                Tick::Stopped => break,
                Tick::Hold => log::debug!("playing but no watchable song"),
                Tick::Step(snapshot) => match engine.step(&snapshot, Utc::now()) {
                    Action::None => {}
                    Action::NowPlaying(track) => {
                        // Best effort; a lost update is not worth crashing over.
                        if let Err(e) = lastfm.now_playing(&cleaner.track_for_wire(&track)) {
                            log::warn!("now playing update failed: {e}");
                        }
                    }
                    Action::Scrobble { track, started_at } => {
                        match lastfm.scrobble(&cleaner.track_for_wire(&track), started_at) {
                            Ok(accepted) => log::debug!("service accepted {accepted} scrobble(s)"),
                            Err(e) => log::warn!("scrobble failed: {e}"),
                        }
                    }
                },
            }

            thread::sleep(poll_interval);
        }
    }

    log::info!("stopped");
    Ok(())
}

/// Block until mpd reports it is playing. Returns `false` on shutdown.
/// Any error here is fatal; nothing works without the player connection.
fn wait_for_play(client: &mut MpdClient, running: &AtomicBool) -> Result<bool> {
    loop {
        if !running.load(Ordering::SeqCst) {
            return Ok(false);
        }

        let status = client.status().context("lost connection to mpd")?;
        if status.state == PlayState::Playing {
            return Ok(true);
        }

        log::debug!("player is {:?}, waiting for a change", status.state);
        if !client
            .idle_player(running)
            .context("waiting on mpd idle failed")?
        {
            return Ok(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpd::test_support::fake_server_responding;

    #[test]
    fn untagged_song_while_playing_holds_the_poll_cadence() {
        // A playing stream with no Title tag must not drop the driver
        // back into the blocking wait; that wait would return instantly
        // and turn the poll loop into a busy spin.
        let (port, server) = fake_server_responding(vec![
            ("status", "state: play\nelapsed: 42.0\nOK\n"),
            ("currentsong", "file: http://radio.example/stream\nOK\n"),
        ]);
        let mut client = MpdClient::connect("127.0.0.1", port).unwrap();
        assert!(matches!(sample(&mut client).unwrap(), Tick::Hold));
        drop(client);
        server.join().unwrap();
    }

    #[test]
    fn stopped_player_returns_to_the_blocking_wait() {
        let (port, server) = fake_server_responding(vec![
            ("status", "state: stop\nOK\n"),
            ("currentsong", "OK\n"),
        ]);
        let mut client = MpdClient::connect("127.0.0.1", port).unwrap();
        assert!(matches!(sample(&mut client).unwrap(), Tick::Stopped));
        drop(client);
        server.join().unwrap();
    }

    #[test]
    fn playing_tagged_track_steps_the_engine() {
        let (port, server) = fake_server_responding(vec![
            ("status", "state: play\nelapsed: 12.5\nOK\n"),
            (
                "currentsong",
                "file: music/geogaddi/14.flac\nTitle: 1969\nArtist: Boards of Canada\nduration: 251.0\nOK\n",
            ),
        ]);
        let mut client = MpdClient::connect("127.0.0.1", port).unwrap();
        match sample(&mut client).unwrap() {
            Tick::Step(snapshot) => {
                assert_eq!(snapshot.title, "1969");
                assert_eq!(snapshot.elapsed_secs, 12.5);
            }
            other => panic!("expected a steppable snapshot, got {other:?}"),
        }
        drop(client);
        server.join().unwrap();
    }
}
