//! # Spotify Voice Bridge
//!
//! A chat bot that streams a Spotify player into a Discord voice channel. The player
//! daemon plays into a loopback audio device; an ffmpeg subprocess captures that device
//! and the bot feeds the PCM into the voice call.
//!
//! ## Application Architecture:
//! - **config**: Configuration (TOML file + environment variables)
//! - **error**: Error type shared by every component
//! - **state**: The voice session record and its phases
//! - **controller**: Session state machine (join, stream, bitrate, leave)
//! - **audio**: PCM format and the capture subprocess handle
//! - **chat**: Traits the controller and router use to talk to the chat platform
//! - **music**: Music-service client (spotifyd + playerctl, Web API search)
//! - **commands**: Chat command parsing and dispatch
//! - **shutdown**: Ordered teardown on signals and on `exit`
//! - **discord**: serenity/songbird implementations (`discord` feature)

pub mod audio;
pub mod chat;
pub mod commands;
pub mod config;
pub mod controller;
pub mod error;
pub mod music;
pub mod shutdown;
pub mod state;

#[cfg(feature = "discord")]
pub mod discord;

#[cfg(test)]
pub(crate) mod testing;
