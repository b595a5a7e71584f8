// Last.fm client
// Signed HTTP requests, XML responses. Covers the steady-state calls
// (now playing, scrobble); the one-time handshake lives in auth

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

pub mod auth;

#[derive(Debug, Error)]
pub enum LastFmError {
    #[error("last.fm transport error: {0}")]
    Transport(#[from] attohttpc::Error),

    #[error("last.fm returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed last.fm response: {0}")]
    Protocol(String),

    #[error("last.fm error {code}: {message}")]
    Api { code: u32, message: String },
}

/// Track metadata as sent over the wire, after text cleanup
#[derive(Debug, Clone)]
pub struct Track {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub track_number: Option<String>,
    pub duration_secs: Option<u64>,
}

/// An authenticated Last.fm API client
pub struct LastFm {
    base_url: String,
    api_key: String,
    api_secret: String,
    session_key: String,
}

impl LastFm {
    pub fn new(base_url: String, api_key: String, api_secret: String, session_key: String) -> Self {
        Self {
            base_url,
            api_key,
            api_secret,
            session_key,
        }
    }

    /// Send a `track.updateNowPlaying` update. Ephemeral on the service
    /// side; a failure here is safe to drop.
    pub fn now_playing(&self, track: &Track) -> Result<(), LastFmError> {
        let mut params = self.base_params("track.updateNowPlaying", track);
        params.insert("context".into(), "mpd".into());
        params.insert("api_sig".into(), sign(&params, &self.api_secret));

        let body = post(&self.base_url, &params)?;
        parse_checked(&body)?;

        log::info!("now playing sent: {} - {}", track.artist, track.title);
        Ok(())
    }

    /// Submit a `track.scrobble` with the watch session's start time as
    /// the listen timestamp. Returns the accepted count reported back.
    pub fn scrobble(&self, track: &Track, started_at: DateTime<Utc>) -> Result<u32, LastFmError> {
        let mut params = self.base_params("track.scrobble", track);
        params.insert("timestamp".into(), started_at.timestamp().to_string());
        params.insert("api_sig".into(), sign(&params, &self.api_secret));

        let body = post(&self.base_url, &params)?;
        let doc = parse_checked(&body)?;

        let accepted = doc
            .descendants()
            .find(|n| n.has_tag_name("scrobbles"))
            .and_then(|n| n.attribute("accepted"))
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| LastFmError::Protocol("no accepted count in response".into()))?;

        log::info!(
            "scrobbled: {} - {} (accepted: {})",
            track.artist,
            track.title,
            accepted
        );
        Ok(accepted)
    }

    fn base_params(&self, method: &str, track: &Track) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("method".into(), method.into());
        params.insert("artist".into(), track.artist.clone());
        params.insert("track".into(), track.title.clone());
        params.insert("api_key".into(), self.api_key.clone());
        params.insert("sk".into(), self.session_key.clone());

        if let Some(album) = &track.album {
            params.insert("album".into(), album.clone());
        }
        if let Some(number) = &track.track_number {
            params.insert("trackNumber".into(), number.clone());
        }
        if let Some(duration) = track.duration_secs {
            params.insert("duration".into(), duration.to_string());
        }

        params
    }
}

/// Sign a request: md5 over every key and value in lexicographic key
/// order, followed by the shared secret.
fn sign(params: &BTreeMap<String, String>, secret: &str) -> String {
    let mut hasher = md5::Context::new();
    for (key, value) in params {
        hasher.consume(key.as_bytes());
        hasher.consume(value.as_bytes());
    }
    if !secret.is_empty() {
        hasher.consume(secret.as_bytes());
    }
    format!("{:x}", hasher.compute())
}

fn get(base_url: &str, params: &BTreeMap<String, String>) -> Result<String, LastFmError> {
    let response = attohttpc::get(base_url).params(params.iter()).send()?;
    read_body(response)
}

fn post(base_url: &str, params: &BTreeMap<String, String>) -> Result<String, LastFmError> {
    let body: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect();

    let response = attohttpc::post(base_url)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .text(body.join("&"))
        .send()?;
    read_body(response)
}

fn read_body(response: attohttpc::Response) -> Result<String, LastFmError> {
    let status = response.status();
    if !status.is_success() {
        return Err(LastFmError::Http {
            status: status.as_u16(),
            body: response.text().unwrap_or_default(),
        });
    }
    Ok(response.text()?)
}

/// Parse a response body and surface `<lfm status="failed">` as an API
/// error with its code and message.
fn parse_checked(body: &str) -> Result<roxmltree::Document<'_>, LastFmError> {
    let doc = roxmltree::Document::parse(body)
        .map_err(|e| LastFmError::Protocol(format!("bad XML: {e}")))?;

    let root = doc.root_element();
    if root.attribute("status") == Some("failed") {
        let error = root.children().find(|n| n.has_tag_name("error"));
        let code = error
            .and_then(|n| n.attribute("code"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let message = error
            .and_then(|n| n.text())
            .unwrap_or("unknown error")
            .trim()
            .to_string();
        return Err(LastFmError::Api { code, message });
    }

    Ok(doc)
}
