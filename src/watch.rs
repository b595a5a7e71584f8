// Watch engine
// Turns a fixed-interval stream of playback snapshots into "now playing"
// and "scrobble" decisions

use chrono::{DateTime, Utc};

/// Player state as reported by MPD's `status` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Playing,
    Paused,
    Stopped,
}

/// One sample of player state at a point in time
#[derive(Debug, Clone)]
pub struct TrackSnapshot {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub track_number: Option<String>,
    pub duration_secs: f64,
    pub elapsed_secs: f64,
    pub state: PlayState,
}

/// Timing and percentage parameters for the watch loop, immutable per run
#[derive(Debug, Clone)]
pub struct Thresholds {
    /// Scrobble after hearing this percentage of the track (50% default)
    pub default_threshold_percent: f64,

    /// Never scrobble a track heard for fewer than this many seconds
    pub min_absolute_secs: f64,

    /// A track must play this long before it is watched at all
    pub watch_grace_secs: f64,

    /// Seconds between samples while the player is playing
    pub poll_interval_secs: u64,

    /// Count only time heard during this session toward the threshold
    /// (raises the threshold for tracks resumed mid-playback)
    pub use_real_time_adjustment: bool,

    /// Allow the same title to scrobble twice in a row
    pub allow_repeat_scrobble: bool,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            default_threshold_percent: 50.0,
            min_absolute_secs: 10.0,
            watch_grace_secs: 5.0,
            poll_interval_secs: 1,
            use_real_time_adjustment: true,
            allow_repeat_scrobble: false,
        }
    }
}

/// What the driver should do after a step: nothing, or one sink call
#[derive(Debug, Clone)]
pub enum Action {
    None,
    NowPlaying(TrackSnapshot),
    Scrobble {
        track: TrackSnapshot,
        /// Wall-clock time the watch session began, sent to the service
        /// as the listen timestamp
        started_at: DateTime<Utc>,
    },
}

/// Tracks one song at a time toward a possible scrobble.
///
/// Two logical states: idle (`watched_title` is `None`) and watching.
/// All state mutation happens inside [`step`](WatchEngine::step); the
/// engine has exactly one writer and never blocks.
pub struct WatchEngine {
    thresholds: Thresholds,
    watched_title: Option<String>,
    rejected_title: Option<String>,
    watch_start: DateTime<Utc>,
    reported_start_offset: f64,
    effective_threshold_percent: f64,
}

impl WatchEngine {
    pub fn new(thresholds: Thresholds, now: DateTime<Utc>) -> Self {
        let effective_threshold_percent = thresholds.default_threshold_percent;
        Self {
            thresholds,
            watched_title: None,
            rejected_title: None,
            watch_start: now,
            reported_start_offset: 0.0,
            effective_threshold_percent,
        }
    }

    /// Feed one playback sample; returns at most one action.
    ///
    /// Call once per poll tick while the player reports `Playing`.
    pub fn step(&mut self, snapshot: &TrackSnapshot, now: DateTime<Utc>) -> Action {
        // A zero or missing duration cannot be divided into; such a track
        // is never watched.
        if snapshot.duration_secs <= 0.0 {
            log::debug!("track '{}' has no usable duration, skipping", snapshot.title);
            return Action::None;
        }

        // Real-world seconds since the watch session began, on top of the
        // player position at which it began. Survives the player's own
        // position reporting lagging or jumping.
        let real_time_elapsed = self.reported_start_offset
            + (now - self.watch_start).num_milliseconds() as f64 / 1000.0;
        let percent_elapsed = snapshot.elapsed_secs / snapshot.duration_secs * 100.0;

        let is_watched = self.watched_title.as_deref() == Some(snapshot.title.as_str());

        if !is_watched {
            // A different title while watching re-runs the entry checks
            // directly; the machine never needs to pass through idle.
            let is_rejected = self.rejected_title.as_deref() == Some(snapshot.title.as_str());

            if !is_rejected
                && percent_elapsed < self.thresholds.default_threshold_percent
                && real_time_elapsed > self.thresholds.watch_grace_secs
                && snapshot.elapsed_secs > self.thresholds.watch_grace_secs
            {
                return self.begin_watch(snapshot, now, percent_elapsed);
            }

            return Action::None;
        }

        // Same title as the one being watched: check scrobble eligibility.
        let session_heard_enough = !self.thresholds.use_real_time_adjustment
            || real_time_elapsed
                >= self.effective_threshold_percent / 100.0 * snapshot.duration_secs;

        if percent_elapsed >= self.effective_threshold_percent
            && snapshot.elapsed_secs > self.thresholds.min_absolute_secs
        {
            if session_heard_enough {
                return self.finish_watch(snapshot);
            }
            log::debug!(
                "'{}' past threshold but only {:.0}s heard this session, waiting",
                snapshot.title,
                real_time_elapsed
            );
        }

        Action::None
    }

    fn begin_watch(
        &mut self,
        snapshot: &TrackSnapshot,
        now: DateTime<Utc>,
        percent_elapsed: f64,
    ) -> Action {
        self.watched_title = Some(snapshot.title.clone());
        self.rejected_title = None;
        self.watch_start = now;
        self.reported_start_offset = snapshot.elapsed_secs;
        self.effective_threshold_percent =
            self.effective_threshold(snapshot.elapsed_secs, snapshot.duration_secs);

        log::info!(
            "watching '{}' at {:.0}/{:.0}s ({:.1}%), scrobble at {:.1}%",
            snapshot.title,
            snapshot.elapsed_secs,
            snapshot.duration_secs,
            percent_elapsed,
            self.effective_threshold_percent
        );

        Action::NowPlaying(snapshot.clone())
    }

    fn finish_watch(&mut self, snapshot: &TrackSnapshot) -> Action {
        self.watched_title = None;
        if !self.thresholds.allow_repeat_scrobble {
            self.rejected_title = Some(snapshot.title.clone());
        }

        log::info!(
            "scrobbling '{}' ({:.0}s / {:.0}s heard)",
            snapshot.title,
            snapshot.elapsed_secs,
            snapshot.duration_secs
        );

        Action::Scrobble {
            track: snapshot.clone(),
            started_at: self.watch_start,
        }
    }

    /// Threshold owed to the service for a watch session starting
    /// `start_offset` seconds into a track.
    ///
    /// With real-time adjustment on, only time heard during this session
    /// counts, so the percentage already elapsed is added on top of the
    /// default. The result is deliberately not clamped to 100: a track
    /// resumed very late can be mathematically unable to scrobble before
    /// it ends, and that is the intended outcome.
    fn effective_threshold(&self, start_offset: f64, duration_secs: f64) -> f64 {
        if self.thresholds.use_real_time_adjustment {
            start_offset / duration_secs * 100.0 + self.thresholds.default_threshold_percent
        } else {
            self.thresholds.default_threshold_percent
        }
    }
}
