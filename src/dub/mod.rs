//! Dubbing: speaks a subtitle track over a video's original audio and adds
//! the result as a new audio track.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
mod logging;
pub mod media;
pub mod mix;
pub mod pipeline;
pub mod render;
pub mod scheduler;
pub mod segments;
pub mod subtitles;
pub mod synthesis;
pub mod workspace;

pub use cli::{ConfigCommands, DubArgs};
pub use commands::{handle_config_command, handle_dub_command};
