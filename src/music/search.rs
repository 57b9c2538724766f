//! Track lookup through the Spotify Web API.
//!
//! The player daemon can only open URIs, so `play <query>` first resolves the query to
//! a track URI here, and `radio` looks up the artist of the playing track. Uses the client-credentials flow; the access token is cached until
//! shortly before it expires.

use crate::error::{BridgeError, BridgeResult};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const SEARCH_URL: &str = "https://api.spotify.com/v1/search";
const TRACKS_URL: &str = "https://api.spotify.com/v1/tracks";

/// Refresh the token this long before Spotify says it expires.
const TOKEN_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: TrackPage,
}

#[derive(Debug, Deserialize)]
struct TrackPage {
    items: Vec<TrackItem>,
}

#[derive(Debug, Deserialize)]
struct TrackItem {
    uri: String,
    name: String,
    #[serde(default)]
    artists: Vec<ArtistItem>,
}

#[derive(Debug, Deserialize)]
struct ArtistItem {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TrackDetails {
    #[serde(default)]
    artists: Vec<ArtistRef>,
}

#[derive(Debug, Deserialize)]
struct ArtistRef {
    uri: String,
    name: String,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundTrack {
    pub uri: String,
    pub title: String,
}

/// Main artist of a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundArtist {
    pub uri: String,
    pub name: String,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct TrackSearch {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl TrackSearch {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id,
            client_secret,
            token: Mutex::new(None),
        }
    }

    /// Find the best matching track for `query`.
    ///
    /// ## Errors:
    /// - **InvalidInput**: blank query
    /// - **MusicService**: HTTP failure, or nothing matched
    pub async fn first_track(&self, query: &str) -> BridgeResult<FoundTrack> {
        let query = query.trim();
        if query.is_empty() {
            return Err(BridgeError::InvalidInput("search query is empty".to_string()));
        }

        let token = self.access_token().await?;
        let response = self
            .http
            .get(SEARCH_URL)
            .bearer_auth(token)
            .query(&[("q", query), ("type", "track"), ("limit", "1")])
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| BridgeError::MusicService(format!("search failed: {}", e)))?;

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::MusicService(format!("unreadable search result: {}", e)))?;

        let track = first_hit(body)
            .ok_or_else(|| BridgeError::MusicService(format!("no track found for \"{}\"", query)))?;
        debug!(query = %query, uri = %track.uri, title = %track.title, "Search hit");
        Ok(track)
    }

    /// Look up the main artist of the track with Spotify id `track_id`.
    pub async fn artist_of_track(&self, track_id: &str) -> BridgeResult<FoundArtist> {
        if track_id.is_empty() || !track_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(BridgeError::InvalidInput(format!("not a track id: {}", track_id)));
        }

        let token = self.access_token().await?;
        let response = self
            .http
            .get(format!("{}/{}", TRACKS_URL, track_id))
            .bearer_auth(token)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| BridgeError::MusicService(format!("track lookup failed: {}", e)))?;

        let body: TrackDetails = response
            .json()
            .await
            .map_err(|e| BridgeError::MusicService(format!("unreadable track: {}", e)))?;

        let artist = first_artist(body)
            .ok_or_else(|| BridgeError::MusicService("track has no artist".to_string()))?;
        debug!(track = %track_id, artist = %artist.name, "Track artist");
        Ok(artist)
    }

    async fn access_token(&self) -> BridgeResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| BridgeError::MusicService(format!("Web API login failed: {}", e)))?;

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::MusicService(format!("unreadable token response: {}", e)))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_MARGIN);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        debug!(expires_in = token.expires_in, "Refreshed Web API token");
        Ok(token.access_token)
    }
}

fn first_hit(response: SearchResponse) -> Option<FoundTrack> {
    let track = response.tracks.items.into_iter().next()?;
    let artists: Vec<&str> = track.artists.iter().map(|a| a.name.as_str()).collect();
    let title = if artists.is_empty() {
        track.name.clone()
    } else {
        format!("{} - {}", artists.join(", "), track.name)
    };
    Some(FoundTrack {
        uri: track.uri,
        title,
    })
}

fn first_artist(details: TrackDetails) -> Option<FoundArtist> {
    let artist = details.artists.into_iter().next()?;
    Some(FoundArtist {
        uri: artist.uri,
        name: artist.name,
    })
}
