use clap::{Args, Subcommand, ValueHint};
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct DubArgs {
    /// Source video file
    #[arg(value_hint = ValueHint::FilePath)]
    pub video: PathBuf,

    /// Subtitle file (SRT) to speak
    #[arg(value_hint = ValueHint::FilePath)]
    pub subtitles: PathBuf,

    /// Output file; defaults to <videoname>.dubbed.mkv next to the video
    #[arg(short = 'o', long = "out-file", value_hint = ValueHint::FilePath)]
    pub out_file: Option<PathBuf>,

    /// Override the synthesis language and track language tag
    #[arg(long)]
    pub language: Option<String>,

    /// Override the title of the dubbed audio track
    #[arg(long)]
    pub track_name: Option<String>,

    /// Segments per batch when the single-pass render fails
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Timeout for each render invocation, in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Tempo factor applied to synthesized speech
    #[arg(long)]
    pub speed: Option<f64>,

    /// Keep the temporary job directory for inspection
    #[arg(long)]
    pub keep_workspace: bool,

    /// Print the single-pass ffmpeg command instead of rendering
    #[arg(long)]
    pub dry_run: bool,

    /// Stream ffmpeg output instead of showing a progress bar
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file location
    Path,
}
