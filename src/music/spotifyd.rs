//! # spotifyd Player
//!
//! Runs a Spotify Connect daemon (spotifyd) that plays into the capture device and
//! drives it over MPRIS with playerctl.
//!
//! ## Lifecycle:
//! - `login` spawns the daemon with the account credentials, replacing a running one
//! - transport commands and `now_playing_info` shell out to playerctl
//! - `radio` opens the main artist of the playing track, found through the Web API
//! - `logout` kills and reaps the daemon
//!
//! The daemon is spawned with `kill_on_drop`, so it does not outlive the bot.

use super::search::TrackSearch;
use super::{MusicCredentials, MusicService};
use crate::config::SpotifyConfig;
use crate::error::{BridgeError, BridgeResult};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Link kinds the player can open.
const URI_KINDS: [&str; 6] = ["track", "album", "playlist", "artist", "episode", "show"];

const NOW_PLAYING_FORMAT: &str = "{{ artist }} - {{ title }}";

pub struct SpotifydPlayer {
    config: SpotifyConfig,
    daemon: Mutex<Option<Child>>,
    search: Option<TrackSearch>,
}

impl SpotifydPlayer {
    /// Create the player. Search is available when Web API credentials are configured.
    pub fn new(config: SpotifyConfig) -> Self {
        let search = match (&config.api_client_id, &config.api_client_secret) {
            (Some(id), Some(secret)) if !id.trim().is_empty() && !secret.trim().is_empty() => {
                Some(TrackSearch::new(id.trim().to_string(), secret.trim().to_string()))
            }
            _ => None,
        };

        Self {
            config,
            daemon: Mutex::new(None),
            search,
        }
    }

    /// Daemon arguments for logging in as `credentials`.
    fn daemon_args(&self, credentials: &MusicCredentials) -> Vec<String> {
        let mut args = vec![
            "--no-daemon".to_string(),
            "--username".to_string(),
            credentials.username.clone(),
            "--password".to_string(),
            credentials.password.clone(),
            "--backend".to_string(),
            self.config.backend.clone(),
        ];
        if let Some(device) = self.config.device.as_deref().filter(|d| !d.trim().is_empty()) {
            args.push("--device".to_string());
            args.push(device.trim().to_string());
        }
        args.push("--device-name".to_string());
        args.push(self.config.device_name.clone());
        args
    }

    /// Run playerctl against the daemon and return its trimmed stdout.
    async fn playerctl(&self, args: &[&str]) -> BridgeResult<String> {
        let output = Command::new(&self.config.playerctl_program)
            .arg(format!("--player={}", self.config.player_name))
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                BridgeError::MusicService(format!(
                    "failed to run {}: {}",
                    self.config.playerctl_program, e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let detail = if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr
            };
            return Err(BridgeError::MusicService(format!(
                "{} failed: {}",
                args.first().copied().unwrap_or("playerctl"),
                detail
            )));
        }

        debug!(command = ?args, "playerctl ok");
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Web API client, or an error saying which variables `what` needs.
    fn web_api(&self, what: &str) -> BridgeResult<&TrackSearch> {
        self.search.as_ref().ok_or_else(|| {
            BridgeError::MusicService(format!(
                "{} needs SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET",
                what
            ))
        })
    }

    async fn open(&self, uri: &str) -> BridgeResult<()> {
        info!(uri = %uri, "Opening in player");
        self.playerctl(&["open", uri]).await.map(|_| ())
    }
}

#[async_trait]
impl MusicService for SpotifydPlayer {
    async fn login(&self, credentials: &MusicCredentials) -> BridgeResult<()> {
        if credentials.username.trim().is_empty() || credentials.password.is_empty() {
            return Err(BridgeError::Config(
                "music service username and password are required".to_string(),
            ));
        }

        let mut daemon = self.daemon.lock().await;
        if let Some(mut previous) = daemon.take() {
            debug!("Replacing running player daemon");
            if let Err(e) = previous.kill().await {
                warn!(error = %e, "Failed to stop previous player daemon");
            }
        }

        let child = Command::new(&self.config.daemon_program)
            .args(self.daemon_args(credentials))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BridgeError::MusicService(format!(
                    "failed to start {}: {}",
                    self.config.daemon_program, e
                ))
            })?;

        info!(
            pid = ?child.id(),
            user = %credentials.username,
            device_name = %self.config.device_name,
            "Logged in to music service"
        );
        *daemon = Some(child);
        Ok(())
    }

    async fn logout(&self) -> BridgeResult<()> {
        let Some(mut child) = self.daemon.lock().await.take() else {
            debug!("Logout with no player daemon running");
            return Ok(());
        };

        if let Ok(Some(status)) = child.try_wait() {
            info!(%status, "Player daemon had already exited");
            return Ok(());
        }

        child.kill().await.map_err(|e| {
            BridgeError::MusicService(format!("failed to stop player daemon: {}", e))
        })?;
        info!("Logged out of music service");
        Ok(())
    }

    async fn play(&self) -> BridgeResult<()> {
        self.playerctl(&["play"]).await.map(|_| ())
    }

    async fn play_url(&self, url: &str) -> BridgeResult<()> {
        let uri = spotify_uri_from_url(url)?;
        self.open(&uri).await
    }

    async fn search_and_play(&self, query: &str) -> BridgeResult<()> {
        let search = self.web_api("search")?;
        let track = search.first_track(query).await?;
        info!(query = %query, title = %track.title, "Playing search result");
        self.open(&track.uri).await
    }

    async fn pause(&self) -> BridgeResult<()> {
        self.playerctl(&["pause"]).await.map(|_| ())
    }

    async fn previous(&self) -> BridgeResult<()> {
        self.playerctl(&["previous"]).await.map(|_| ())
    }

    async fn next(&self) -> BridgeResult<()> {
        self.playerctl(&["next"]).await.map(|_| ())
    }

    /// spotifyd has no radio of its own; play the current track's artist instead.
    async fn start_radio(&self) -> BridgeResult<()> {
        let search = self.web_api("radio")?;
        let playing = self.playerctl(&["metadata", "mpris:trackid"]).await?;
        let track_id = track_id_from_mpris(&playing).ok_or_else(|| {
            BridgeError::MusicService("no track is playing to start a radio from".to_string())
        })?;

        let artist = search.artist_of_track(track_id).await?;
        info!(track = %track_id, artist = %artist.name, "Starting artist radio");
        self.open(&artist.uri).await
    }

    async fn now_playing_info(&self) -> BridgeResult<String> {
        let info = self
            .playerctl(&["metadata", "--format", NOW_PLAYING_FORMAT])
            .await?;
        if info.is_empty() || info == "-" {
            return Ok("nothing is playing".to_string());
        }
        Ok(info)
    }
}

/// Spotify id of the track in an MPRIS track id.
///
/// spotifyd reports either `spotify:track:<id>` or an object path ending in
/// `/track/<id>`.
fn track_id_from_mpris(raw: &str) -> Option<&str> {
    let mut segments = raw.trim().rsplit(['/', ':']);
    let id = segments.next()?;
    let kind = segments.next()?;
    (kind == "track" && !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric()))
        .then_some(id)
}

/// Turn a share link into a player URI.
///
/// ## Accepted forms:
/// - `spotify:<kind>:<id>` (returned as is)
/// - `https://open.spotify.com/<kind>/<id>?si=...`
/// - `https://open.spotify.com/intl-de/<kind>/<id>`
pub fn spotify_uri_from_url(url: &str) -> BridgeResult<String> {
    let url = url.trim();
    if url.starts_with("spotify:") {
        return Ok(url.to_string());
    }

    let invalid = || BridgeError::InvalidInput(format!("not a Spotify link: {}", url));

    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(invalid)?;
    let path = rest
        .strip_prefix("open.spotify.com/")
        .ok_or_else(invalid)?;
    let path = path.split(['?', '#']).next().unwrap_or_default();

    let mut segments = path
        .split('/')
        .filter(|segment| !segment.is_empty() && !segment.starts_with("intl-"));
    let kind = segments.next().ok_or_else(invalid)?;
    let id = segments.next().ok_or_else(invalid)?;

    if !URI_KINDS.contains(&kind) || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(invalid());
    }

    Ok(format!("spotify:{}:{}", kind, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(playerctl: &str) -> SpotifydPlayer {
        let mut config = crate::config::AppConfig::default().spotify;
        config.playerctl_program = playerctl.to_string();
        config.daemon_program = "spotifyd-does-not-exist".to_string();
        SpotifydPlayer::new(config)
    }

    #[test]
    fn test_share_links_become_uris() {
        assert_eq!(
            spotify_uri_from_url("https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M?si=abc")
                .unwrap(),
            "spotify:playlist:37i9dQZF1DXcBWIGoYBM5M"
        );
        assert_eq!(
            spotify_uri_from_url("https://open.spotify.com/intl-de/track/0DiWol3AO6WpXZgp0goxAV")
                .unwrap(),
            "spotify:track:0DiWol3AO6WpXZgp0goxAV"
        );
        assert_eq!(
            spotify_uri_from_url("spotify:album:2noRn2Aes5aoNVsU6iWThc").unwrap(),
            "spotify:album:2noRn2Aes5aoNVsU6iWThc"
        );
    }

    #[test]
    fn test_other_links_rejected() {
        for url in [
            "https://example.com/track/abc",
            "https://open.spotify.com/",
            "https://open.spotify.com/user/someone",
            "https://open.spotify.com/track/",
        ] {
            assert!(
                matches!(spotify_uri_from_url(url), Err(BridgeError::InvalidInput(_))),
                "{} should be rejected",
                url
            );
        }
    }

    #[test]
    fn test_daemon_args() {
        let mut config = crate::config::AppConfig::default().spotify;
        config.device = Some("hw:Loopback,0,0".to_string());
        let player = SpotifydPlayer::new(config);
        let args = player.daemon_args(&MusicCredentials {
            username: "listener".to_string(),
            password: "hunter2".to_string(),
        });
        assert_eq!(
            args,
            vec![
                "--no-daemon",
                "--username",
                "listener",
                "--password",
                "hunter2",
                "--backend",
                "alsa",
                "--device",
                "hw:Loopback,0,0",
                "--device-name",
                "voice-bridge",
            ]
        );
    }

    #[tokio::test]
    async fn test_search_without_api_credentials_fails() {
        let err = player("playerctl").search_and_play("one more time").await.unwrap_err();
        assert!(matches!(err, BridgeError::MusicService(_)));
        assert!(err.to_string().contains("SPOTIFY_CLIENT_ID"));
    }

    #[test]
    fn test_track_id_from_mpris() {
        assert_eq!(
            track_id_from_mpris("spotify:track:0DiWol3AO6WpXZgp0goxAV"),
            Some("0DiWol3AO6WpXZgp0goxAV")
        );
        assert_eq!(
            track_id_from_mpris("/spotify/track/0DiWol3AO6WpXZgp0goxAV\n"),
            Some("0DiWol3AO6WpXZgp0goxAV")
        );
        assert_eq!(track_id_from_mpris("spotify:episode:512ojhOuo1ktJprKbVcKyQ"), None);
        assert_eq!(track_id_from_mpris("/org/mpris/MediaPlayer2/TrackList/NoTrack"), None);
        assert_eq!(track_id_from_mpris(""), None);
    }

    #[tokio::test]
    async fn test_radio_without_api_credentials_fails() {
        let err = player("playerctl").start_radio().await.unwrap_err();
        assert!(matches!(err, BridgeError::MusicService(_)));
        assert!(err.to_string().contains("SPOTIFY_CLIENT_ID"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_radio_needs_a_playing_track() {
        let mut config = crate::config::AppConfig::default().spotify;
        config.playerctl_program = "true".to_string();
        config.api_client_id = Some("id".to_string());
        config.api_client_secret = Some("secret".to_string());

        let err = SpotifydPlayer::new(config).start_radio().await.unwrap_err();
        assert!(matches!(err, BridgeError::MusicService(_)));
        assert!(err.to_string().contains("no track is playing"));
    }

    #[tokio::test]
    async fn test_missing_player_binaries_are_music_errors() {
        let player = player("playerctl-does-not-exist");
        assert!(matches!(player.pause().await, Err(BridgeError::MusicService(_))));

        let credentials = MusicCredentials {
            username: "listener".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(matches!(
            player.login(&credentials).await,
            Err(BridgeError::MusicService(_))
        ));
        // Nothing was started, so logging out is a no-op
        assert!(player.logout().await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_empty_metadata_means_nothing_playing() {
        // `true` ignores its arguments and prints nothing
        let player = player("true");
        assert_eq!(player.now_playing_info().await.unwrap(), "nothing is playing");
        assert!(player.next().await.is_ok());
    }
}
