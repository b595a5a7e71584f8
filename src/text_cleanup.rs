// Text cleanup module
// Applies regex patterns to clean up track/album/artist names before
// they are sent to the scrobbling service

use crate::config::CleanupConfig;
use crate::scrobbler::Track;
use crate::watch::TrackSnapshot;
use regex::Regex;

pub struct TextCleaner {
    enabled: bool,
    patterns: Vec<Regex>,
}

impl TextCleaner {
    /// Create a new text cleaner from config
    pub fn new(config: &CleanupConfig) -> Self {
        let patterns = if config.enabled {
            config
                .patterns
                .iter()
                .filter_map(|pattern| match Regex::new(pattern) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        log::warn!("invalid regex pattern '{}': {}", pattern, e);
                        None
                    }
                })
                .collect()
        } else {
            Vec::new()
        };

        Self {
            enabled: config.enabled,
            patterns,
        }
    }

    /// Clean a text string by applying all patterns
    pub fn clean(&self, text: &str) -> String {
        if !self.enabled {
            return text.to_string();
        }

        let mut result = text.to_string();
        for pattern in &self.patterns {
            result = pattern.replace_all(&result, "").to_string();
        }

        result.trim().to_string()
    }

    /// Build the outgoing track from a playback snapshot. Cleanup is
    /// applied only at the wire boundary; the watch engine keeps the
    /// player's original title as the track identity.
    pub fn track_for_wire(&self, snapshot: &TrackSnapshot) -> Track {
        Track {
            title: self.clean(&snapshot.title),
            artist: self.clean(&snapshot.artist),
            album: snapshot.album.as_deref().map(|a| self.clean(a)),
            track_number: snapshot.track_number.clone(),
            duration_secs: if snapshot.duration_secs > 0.0 {
                Some(snapshot.duration_secs.round() as u64)
            } else {
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::PlayState;

    fn cleaner(enabled: bool) -> TextCleaner {
        TextCleaner::new(&CleanupConfig {
            enabled,
            patterns: vec![r"\s*\[Explicit\]".to_string(), r"\s*\(Clean\)".to_string()],
        })
    }

    #[test]
    fn strips_configured_patterns() {
        let cleaner = cleaner(true);
        assert_eq!(cleaner.clean("Song Title [Explicit]"), "Song Title");
        assert_eq!(cleaner.clean("Song (Clean) Title"), "Song Title");
    }

    #[test]
    fn disabled_cleaner_passes_text_through() {
        let cleaner = cleaner(false);
        assert_eq!(cleaner.clean("Song [Explicit]"), "Song [Explicit]");
    }

    #[test]
    fn invalid_patterns_are_skipped() {
        let cleaner = TextCleaner::new(&CleanupConfig {
            enabled: true,
            patterns: vec!["(unclosed".to_string(), r"\s*\[Explicit\]".to_string()],
        });
        assert_eq!(cleaner.clean("Song [Explicit]"), "Song");
    }

    #[test]
    fn wire_track_cleans_names_and_rounds_duration() {
        let cleaner = cleaner(true);
        let track = cleaner.track_for_wire(&TrackSnapshot {
            title: "1969 [Explicit]".to_string(),
            artist: "Boards of Canada".to_string(),
            album: Some("Geogaddi [Explicit]".to_string()),
            track_number: Some("14".to_string()),
            duration_secs: 251.4,
            elapsed_secs: 10.0,
            state: PlayState::Playing,
        });
        assert_eq!(track.title, "1969");
        assert_eq!(track.album.as_deref(), Some("Geogaddi"));
        assert_eq!(track.duration_secs, Some(251));
    }

    #[test]
    fn wire_track_omits_zero_duration() {
        let cleaner = cleaner(true);
        let track = cleaner.track_for_wire(&TrackSnapshot {
            title: "Stream".to_string(),
            artist: String::new(),
            album: None,
            track_number: None,
            duration_secs: 0.0,
            elapsed_secs: 0.0,
            state: PlayState::Playing,
        });
        assert_eq!(track.duration_secs, None);
    }
}
