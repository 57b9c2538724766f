//! # Chat Commands
//!
//! Parsing of prefixed chat messages into [`Command`]s, and the [`CommandRouter`] that
//! dispatches them to the session controller, the music service and the shutdown
//! coordinator.
//!
//! ## Syntax:
//! `<prefix><command> [args...]`, e.g. `.spotify play daft punk`. After the prefix the
//! message is split on single whitespace characters; the first token is the command.

pub mod router;

pub use router::CommandRouter;

/// What `play` should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayRequest {
    /// Resume playback
    Resume,
    /// Open a link or `spotify:` URI
    Url(String),
    /// Search and play the first hit
    Search(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join,
    Leave,
    Play(PlayRequest),
    Pause,
    Previous,
    Next,
    Radio,
    NowPlaying,
    Help,
    Restart,
    /// Set the bitrate, or show it when no value is given
    Bitrate(Option<String>),
    Exit,
    Unknown(String),
}

impl Command {
    /// Parse `content` if it starts with `prefix`.
    ///
    /// ## Returns:
    /// `None` for messages that are not addressed to the bot.
    pub fn parse(prefix: &str, content: &str) -> Option<Command> {
        let rest = content.strip_prefix(prefix)?;
        let mut tokens = rest.split(char::is_whitespace);
        let name = tokens.next().unwrap_or_default();
        let args: Vec<&str> = tokens.collect();

        let command = match name {
            "join" => Command::Join,
            "leave" => Command::Leave,
            "play" => Command::Play(PlayRequest::from_args(&args)),
            "pause" => Command::Pause,
            "previous" => Command::Previous,
            "next" | "skip" => Command::Next,
            "radio" => Command::Radio,
            "np" | "nowplaying" | "info" => Command::NowPlaying,
            "list" | "help" => Command::Help,
            "restart" => Command::Restart,
            "bitrate" => Command::Bitrate(
                args.first()
                    .filter(|value| !value.is_empty())
                    .map(|value| value.to_string()),
            ),
            "exit" => Command::Exit,
            other => Command::Unknown(other.to_string()),
        };
        Some(command)
    }
}

impl PlayRequest {
    fn from_args(args: &[&str]) -> Self {
        match args.first() {
            None => PlayRequest::Resume,
            Some(_) if args.iter().all(|arg| arg.is_empty()) => PlayRequest::Resume,
            Some(first) if first.starts_with("http") || first.starts_with("spotify:") => {
                PlayRequest::Url(first.to_string())
            }
            Some(_) => PlayRequest::Search(args.join(" ")),
        }
    }
}

/// Command list shown by `help`, one line per command.
pub fn help_text(prefix: &str) -> String {
    let p = prefix.trim_end();
    [
        format!("`{p} join` - Join your voice channel"),
        format!("`{p} leave` - Leave the voice channel the bot is connected to"),
        format!("`{p} play http://...` - Play a playlist or album via URL"),
        format!("`{p} play search term` - Search for a song and play the first result"),
        format!("`{p} pause` - Pause music playback"),
        format!("`{p} play` - Resume music playback"),
        format!("`{p} previous` - Go to the previous track, or the beginning of the current track"),
        format!("`{p} next`, `{p} skip` - Go to the next track"),
        format!("`{p} radio` - Play the artist of the currently playing song"),
        format!("`{p} nowplaying`, `{p} np`, `{p} info` - Show information about the current track"),
        format!("`{p} list`, `{p} help` - Show this command list"),
        format!("`{p} restart` - Log out of Spotify and back in"),
        format!("`{p} bitrate [bits per second]` - Show or change the voice stream bitrate"),
        format!("`{p} exit` - Leave voice, log out and shut the bot down"),
    ]
    .join("\n")
}
