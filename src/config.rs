// Configuration management module
// Handles loading, saving, and validating configuration

use crate::watch::Thresholds;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the two-line session credential file lives; defaults next to
    /// the config file
    pub session_file: Option<PathBuf>,

    pub mpd: MpdConfig,

    pub lastfm: LastFmConfig,

    /// Watch-loop thresholds
    #[serde(default)]
    pub watch: WatchConfig,

    /// Text cleanup configuration
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpdConfig {
    pub host: String,
    pub port: u16,
}

impl Default for MpdConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastFmConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
}

impl Default for LastFmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://ws.audioscrobbler.com/2.0/".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Scrobble after playing this percentage of the track (50% default)
    pub scrobble_threshold: f64,

    /// Never scrobble a track played for fewer seconds than this
    pub scrobble_min_time: f64,

    /// Seconds a track must play before it is watched
    pub watch_threshold: f64,

    /// Seconds between polls while playing
    pub update_interval: u64,

    /// Count only real listening time in this session toward the threshold
    pub real_time: bool,

    /// Allow the same track to scrobble twice in a row
    pub allow_same_track_scrobble_in_a_row: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            scrobble_threshold: 50.0,
            scrobble_min_time: 10.0,
            watch_threshold: 5.0,
            update_interval: 1,
            real_time: true,
            allow_same_track_scrobble_in_a_row: false,
        }
    }
}

impl WatchConfig {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            default_threshold_percent: self.scrobble_threshold,
            min_absolute_secs: self.scrobble_min_time,
            watch_grace_secs: self.watch_threshold,
            poll_interval_secs: self.update_interval,
            use_real_time_adjustment: self.real_time,
            allow_repeat_scrobble: self.allow_same_track_scrobble_in_a_row,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Enable text cleanup
    pub enabled: bool,

    /// Regex patterns to remove from track/album/artist names before
    /// they are sent to the service; applied in order
    pub patterns: Vec<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: vec![
                r"\s*\[Explicit\]".to_string(),
                r"\s*\[Clean\]".to_string(),
                r"\s*\(Explicit\)".to_string(),
                r"\s*\(Clean\)".to_string(),
            ],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_file: None,
            mpd: MpdConfig::default(),
            lastfm: LastFmConfig::default(),
            watch: WatchConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

impl Config {
    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("failed to get config directory")?;

        Ok(config_dir.join("scrobd.conf"))
    }

    /// Where the session credential file lives
    pub fn session_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.session_file {
            return Ok(path.clone());
        }

        let config_dir = dirs::config_dir().context("failed to get config directory")?;
        Ok(config_dir.join("scrobd.session"))
    }

    /// Load configuration from file. A default file is written on first
    /// run so there is something to fill in.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("config file not found, creating default at {:?}", path);
            Self::default().save(path)?;
            anyhow::bail!(
                "created a default config at {:?}; fill in your last.fm api_key and api_secret",
                path
            );
        }

        let content =
            fs::read_to_string(path).with_context(|| format!("failed to read config {path:?}"))?;

        let config: Config =
            toml::from_str(&content).with_context(|| format!("failed to parse config {path:?}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("failed to serialize config")?;

        fs::write(path, content).with_context(|| format!("failed to write config {path:?}"))?;

        log::info!("config saved to {:?}", path);

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.watch.update_interval == 0 {
            anyhow::bail!("update_interval must be greater than 0");
        }

        if self.watch.scrobble_threshold <= 0.0 || self.watch.scrobble_threshold > 100.0 {
            anyhow::bail!("scrobble_threshold must be between 0 and 100");
        }

        if self.watch.watch_threshold < 0.0 || self.watch.scrobble_min_time < 0.0 {
            anyhow::bail!("watch_threshold and scrobble_min_time must not be negative");
        }

        if self.lastfm.base_url.is_empty() {
            anyhow::bail!("lastfm base_url is required");
        }
        if self.lastfm.api_key.is_empty() {
            anyhow::bail!("lastfm api_key is required");
        }
        if self.lastfm.api_secret.is_empty() {
            anyhow::bail!("lastfm api_secret is required");
        }

        if self.mpd.host.is_empty() {
            anyhow::bail!("mpd host is required");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        let mut config = Config::default();
        config.lastfm.api_key = "key".to_string();
        config.lastfm.api_secret = "secret".to_string();
        config
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = valid();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.mpd.port, 6600);
        assert_eq!(parsed.watch.scrobble_threshold, 50.0);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn watch_section_is_optional() {
        let parsed: Config = toml::from_str(
            r#"
            [mpd]
            host = "music.local"
            port = 6600

            [lastfm]
            base_url = "https://ws.audioscrobbler.com/2.0/"
            api_key = "key"
            api_secret = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.watch.update_interval, 1);
        assert!(!parsed.watch.allow_same_track_scrobble_in_a_row);
        assert!(parsed.cleanup.enabled);
    }

    #[test]
    fn rejects_zero_update_interval() {
        let mut config = valid();
        config.watch.update_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut config = valid();
        config.watch.scrobble_threshold = 0.0;
        assert!(config.validate().is_err());
        config.watch.scrobble_threshold = 101.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_missing_credentials() {
        let mut config = valid();
        config.lastfm.api_key.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn first_run_writes_a_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scrobd.conf");

        // First load creates the file and asks the user to fill it in.
        assert!(Config::load(&path).is_err());
        assert!(path.exists());

        // The created file still fails validation until keys are set.
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn thresholds_mirror_the_watch_section() {
        let config = valid();
        let thresholds = config.watch.thresholds();
        assert_eq!(thresholds.default_threshold_percent, 50.0);
        assert_eq!(thresholds.watch_grace_secs, 5.0);
        assert!(thresholds.use_real_time_adjustment);
    }
}
