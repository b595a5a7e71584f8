// One-time Last.fm authentication handshake
// Request a token, have the user confirm it in a browser, then poll for
// the confirmed session

use super::{get, parse_checked, sign, LastFmError};
use crate::session::Session;
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::io::{self, Write};

/// How many times the user may retry confirming the token before the
/// handshake gives up
const MAX_SESSION_ATTEMPTS: u32 = 10;

/// Fetch an unauthorized request token.
pub fn get_token(base_url: &str, api_key: &str, api_secret: &str) -> Result<String, LastFmError> {
    let mut params = BTreeMap::new();
    params.insert("method".to_string(), "auth.gettoken".to_string());
    params.insert("api_key".to_string(), api_key.to_string());
    params.insert("api_sig".to_string(), sign(&params, api_secret));

    let body = get(base_url, &params)?;
    let doc = parse_checked(&body)?;

    doc.descendants()
        .find(|n| n.has_tag_name("token"))
        .and_then(|n| n.text())
        .map(str::to_string)
        .ok_or_else(|| LastFmError::Protocol("no token in response".into()))
}

/// Exchange a user-confirmed token for a session. Fails until the user
/// has actually confirmed the token on the website.
pub fn get_session(
    base_url: &str,
    token: &str,
    api_key: &str,
    api_secret: &str,
) -> Result<Session, LastFmError> {
    let mut params = BTreeMap::new();
    params.insert("method".to_string(), "auth.getsession".to_string());
    params.insert("token".to_string(), token.to_string());
    params.insert("api_key".to_string(), api_key.to_string());
    params.insert("api_sig".to_string(), sign(&params, api_secret));

    let body = get(base_url, &params)?;
    let doc = parse_checked(&body)?;

    let session = doc
        .descendants()
        .find(|n| n.has_tag_name("session"))
        .ok_or_else(|| LastFmError::Protocol("no session in response".into()))?;

    let field = |tag: &str| {
        session
            .children()
            .find(|n| n.has_tag_name(tag))
            .and_then(|n| n.text())
            .map(str::to_string)
            .ok_or_else(|| LastFmError::Protocol(format!("no {tag} in session")))
    };

    Ok(Session {
        user: field("name")?,
        key: field("key")?,
    })
}

/// Run the full interactive handshake and return the granted session.
pub fn authenticate(base_url: &str, api_key: &str, api_secret: &str) -> Result<Session> {
    let token = get_token(base_url, api_key, api_secret)
        .context("failed to fetch a last.fm auth token")?;

    println!(
        "Authorize this application at:\n  https://www.last.fm/api/auth/?api_key={api_key}&token={token}"
    );

    for attempt in 1..=MAX_SESSION_ATTEMPTS {
        print!("Press Enter once you have granted access... ");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().read_line(&mut line)?;

        match get_session(base_url, &token, api_key, api_secret) {
            Ok(session) => {
                println!("Authenticated as {}", session.user);
                return Ok(session);
            }
            Err(e) => log::warn!("session not granted yet (attempt {attempt}): {e}"),
        }
    }

    bail!("giving up after {MAX_SESSION_ATTEMPTS} attempts to confirm the token");
}
