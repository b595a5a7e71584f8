// MPD client
// Minimal blocking client for the parts of the MPD protocol the watch
// loop needs: status, currentsong and idle

use crate::watch::{PlayState, TrackSnapshot};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

/// How long a blocked `idle` read waits before re-checking the shutdown flag
const IDLE_POLL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum MpdError {
    #[error("failed to connect to mpd at {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("mpd connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected mpd response: {0}")]
    Protocol(String),
}

/// Player state and position from `status`
#[derive(Debug, Clone)]
pub struct Status {
    pub state: PlayState,
    pub elapsed_secs: f64,
}

pub struct MpdClient {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    pub version: String,
    idle_timeout: Duration,
}

impl MpdClient {
    /// Connect and consume the `OK MPD <version>` banner.
    pub fn connect(host: &str, port: u16) -> Result<Self, MpdError> {
        let addr = format!("{host}:{port}");
        let stream = TcpStream::connect(&addr).map_err(|source| MpdError::Connect {
            addr: addr.clone(),
            source,
        })?;
        let reader = BufReader::new(stream.try_clone()?);

        let mut client = Self {
            stream,
            reader,
            version: String::new(),
            idle_timeout: IDLE_POLL_TIMEOUT,
        };

        let banner = client.read_line()?;
        let version = banner
            .strip_prefix("OK MPD ")
            .ok_or_else(|| MpdError::Protocol(format!("bad greeting: {banner}")))?;
        client.version = version.to_string();

        Ok(client)
    }

    /// Current player state and elapsed position.
    pub fn status(&mut self) -> Result<Status, MpdError> {
        let pairs = self.command("status")?;

        let state = match pairs.get("state").map(String::as_str) {
            Some("play") => PlayState::Playing,
            Some("pause") => PlayState::Paused,
            Some("stop") | None => PlayState::Stopped,
            Some(other) => return Err(MpdError::Protocol(format!("unknown state: {other}"))),
        };

        let elapsed_secs = pairs
            .get("elapsed")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);

        Ok(Status { state, elapsed_secs })
    }

    /// Metadata of the song the player is currently on, combined with a
    /// status sample into one snapshot. Returns `None` when the playlist
    /// position has no song.
    pub fn current_snapshot(&mut self) -> Result<Option<TrackSnapshot>, MpdError> {
        let status = self.status()?;
        let song = self.command("currentsong")?;

        let Some(title) = song.get("Title").cloned() else {
            return Ok(None);
        };

        Ok(Some(TrackSnapshot {
            title,
            artist: song.get("Artist").cloned().unwrap_or_default(),
            album: song.get("Album").cloned(),
            track_number: song.get("Track").cloned(),
            duration_secs: song
                .get("duration")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0),
            elapsed_secs: status.elapsed_secs,
            state: status.state,
        }))
    }

    /// Block until the player subsystem reports an event or `running` is
    /// cleared. Returns `false` when interrupted by shutdown.
    ///
    /// The socket read times out periodically so the flag is observed
    /// even while mpd stays silent; the same `idle` command keeps waiting
    /// across timeouts.
    pub fn idle_player(&mut self, running: &AtomicBool) -> Result<bool, MpdError> {
        self.send_line("idle player")?;
        self.stream.set_read_timeout(Some(self.idle_timeout))?;

        // The buffer outlives the loop: a timed-out read may already have
        // consumed part of a line, and that prefix must survive until the
        // rest of the line arrives.
        let mut line = String::new();
        let result = loop {
            if !running.load(Ordering::SeqCst) {
                // Cancel the pending idle so the connection is left in a
                // sane state for `close`.
                self.send_line("noidle")?;
                self.drain_response()?;
                break Ok(false);
            }

            match self.reader.read_line(&mut line) {
                Ok(0) => break Err(MpdError::Protocol("mpd closed the connection".into())),
                Ok(_) => {
                    let full = line.trim_end();
                    if full == "OK" {
                        break Ok(true);
                    }
                    if let Some(err) = full.strip_prefix("ACK ") {
                        break Err(MpdError::Protocol(err.to_string()));
                    }
                    // "changed: player" lines; keep reading until OK.
                    line.clear();
                }
                Err(e)
                    if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => break Err(e.into()),
            }
        };

        self.stream.set_read_timeout(None)?;
        result
    }

    /// Best-effort goodbye on shutdown.
    pub fn close(&mut self) {
        let _ = self.send_line("close");
    }

    fn command(&mut self, cmd: &str) -> Result<HashMap<String, String>, MpdError> {
        self.send_line(cmd)?;
        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            if line == "OK" {
                break;
            }
            if let Some(err) = line.strip_prefix("ACK ") {
                return Err(MpdError::Protocol(err.to_string()));
            }
            lines.push(line);
        }
        Ok(parse_pairs(&lines))
    }

    fn send_line(&mut self, line: &str) -> Result<(), MpdError> {
        self.stream.write_all(line.as_bytes())?;
        self.stream.write_all(b"\n")?;
        self.stream.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, MpdError> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line)?;
        if n == 0 {
            return Err(MpdError::Protocol("mpd closed the connection".into()));
        }
        Ok(line.trim_end().to_string())
    }

    fn drain_response(&mut self) -> Result<(), MpdError> {
        let mut line = String::new();
        loop {
            match self.reader.read_line(&mut line) {
                Ok(0) => return Ok(()),
                Ok(_) => {
                    let full = line.trim_end();
                    if full == "OK" || full.starts_with("ACK ") {
                        return Ok(());
                    }
                    line.clear();
                }
                Err(e)
                    if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
                {
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Split `key: value` response lines into a map. Later duplicates win,
/// which matches how mpd repeats tags.
fn parse_pairs(lines: &[String]) -> HashMap<String, String> {
    lines
        .iter()
        .filter_map(|line| {
            line.split_once(": ")
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    /// Bind a local listener and run `script` against the first accepted
    /// connection in a background thread. The script is responsible for
    /// sending the `OK MPD` banner.
    pub(crate) fn fake_server<F>(script: F) -> (u16, thread::JoinHandle<()>)
    where
        F: FnOnce(TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            script(stream);
        });
        (port, handle)
    }

    /// A scripted server answering each command line with a canned
    /// response until the client disconnects.
    pub(crate) fn fake_server_responding(
        responses: Vec<(&'static str, &'static str)>,
    ) -> (u16, thread::JoinHandle<()>) {
        fake_server(move |mut stream| {
            use std::io::{BufRead, BufReader};

            stream.write_all(b"OK MPD 0.23.5\n").unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    break;
                }
                let command = line.trim_end();
                let response = responses
                    .iter()
                    .find(|(cmd, _)| *cmd == command)
                    .map(|(_, resp)| *resp)
                    .unwrap_or("OK\n");
                stream.write_all(response.as_bytes()).unwrap();
            }
        })
    }
}
