use anyhow::{Context, Result, bail};
use duct::cmd;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use super::config::DubConfig;
use super::logging::log_event;
use super::mix::AudioEncoding;
use super::render::runner::{FfmpegRunOptions, FfmpegRunner};
use super::workspace::JobWorkspace;
use crate::ui::prelude::Level;

/// The original audio of the video, decoded once per job.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundTrack {
    pub path: PathBuf,
    pub duration: f64,
}

pub fn probe_duration_seconds(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .with_context(|| format!("Failed to run ffprobe for {}", path.display()))?;

    if !output.status.success() {
        bail!(
            "ffprobe failed for {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let duration_str = String::from_utf8_lossy(&output.stdout);
    let duration: f64 = duration_str
        .trim()
        .parse()
        .context("Failed to parse ffprobe duration as f64")?;

    Ok(duration)
}

pub fn probe_audio_stream_count(path: &Path) -> Result<usize> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "a",
            "-show_entries",
            "stream=index",
            "-of",
            "csv=p=0",
        ])
        .arg(path)
        .output()
        .with_context(|| format!("Failed to list audio streams of {}", path.display()))?;

    if !output.status.success() {
        bail!(
            "ffprobe exited with status {:?} while probing {}",
            output.status.code(),
            path.display()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .count())
}

/// Decode the first audio stream of `video` to PCM in the job workspace.
pub fn extract_background(
    runner: &dyn FfmpegRunner,
    video: &Path,
    workspace: &JobWorkspace,
    config: &DubConfig,
    verbose: bool,
) -> Result<BackgroundTrack> {
    log_event(
        Level::Info,
        "dub.media.extract",
        format!("Extracting audio from {}", video.display()),
    );

    let path = workspace.background_path();
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-nostdin".into(),
        "-i".into(),
        video.to_string_lossy().into_owned(),
        "-vn".into(),
        "-map".into(),
        "0:a:0".into(),
    ];
    AudioEncoding::intermediate(config).push_to(&mut args);
    args.push(path.to_string_lossy().into_owned());

    runner
        .run(
            &args,
            FfmpegRunOptions::new(None, config.render_timeout(), verbose),
        )
        .with_context(|| format!("Failed to extract audio from {}", video.display()))?;

    let duration = probe_duration_seconds(&path)?;
    Ok(BackgroundTrack { path, duration })
}

/// Language tag and title of the added track.
#[derive(Debug, Clone, Copy)]
pub struct TrackTag<'a> {
    pub language: &'a str,
    pub name: &'a str,
}

/// Attach `audio` to `video` as a new default audio track.
pub fn mux_dubbed_track(
    runner: &dyn FfmpegRunner,
    video: &Path,
    audio: &Path,
    output: &Path,
    tag: TrackTag<'_>,
    timeout: Duration,
) -> Result<()> {
    log_event(
        Level::Info,
        "dub.media.mux",
        format!("Writing {}", output.display()),
    );

    match which::which("mkvmerge") {
        Ok(mkvmerge) => mux_with_mkvmerge(&mkvmerge, video, audio, output, tag)?,
        Err(_) => {
            log_event(
                Level::Debug,
                "dub.media.mux.ffmpeg",
                "mkvmerge not found, muxing with ffmpeg",
            );
            let existing = probe_audio_stream_count(video)?;
            let args = ffmpeg_mux_args(video, audio, output, tag, existing);
            runner
                .run(&args, FfmpegRunOptions::new(None, timeout, false))
                .context("ffmpeg failed to mux the dubbed track")?;
        }
    }

    if !output.exists() {
        bail!("Output file was not created: {}", output.display());
    }
    Ok(())
}

fn mux_with_mkvmerge(
    mkvmerge: &Path,
    video: &Path,
    audio: &Path,
    output: &Path,
    tag: TrackTag<'_>,
) -> Result<()> {
    let result = cmd(mkvmerge, mkvmerge_args(video, audio, output, tag))
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()
        .context("Failed to run mkvmerge")?;

    let stdout = String::from_utf8_lossy(&result.stdout);
    log_event(Level::Debug, "dub.media.mux.output", stdout.trim());

    // mkvmerge exits with 1 when it only emitted warnings
    match result.status.code() {
        Some(0) | Some(1) => Ok(()),
        code => bail!(
            "mkvmerge failed with status {:?}: {}",
            code,
            String::from_utf8_lossy(&result.stderr).trim()
        ),
    }
}

fn mkvmerge_args(video: &Path, audio: &Path, output: &Path, tag: TrackTag<'_>) -> Vec<String> {
    vec![
        "-o".to_string(),
        output.to_string_lossy().into_owned(),
        video.to_string_lossy().into_owned(),
        "--track-name".to_string(),
        format!("0:{}", tag.name),
        "--language".to_string(),
        format!("0:{}", tag.language),
        "--default-track".to_string(),
        "0:yes".to_string(),
        audio.to_string_lossy().into_owned(),
    ]
}

fn ffmpeg_mux_args(
    video: &Path,
    audio: &Path,
    output: &Path,
    tag: TrackTag<'_>,
    existing_audio_streams: usize,
) -> Vec<String> {
    let new_index = existing_audio_streams;
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-nostdin".into(),
        "-i".into(),
        video.to_string_lossy().into_owned(),
        "-i".into(),
        audio.to_string_lossy().into_owned(),
        "-map".into(),
        "0".into(),
        "-map".into(),
        "1:a:0".into(),
        "-c".into(),
        "copy".into(),
        format!("-metadata:s:a:{new_index}"),
        format!("language={}", tag.language),
        format!("-metadata:s:a:{new_index}"),
        format!("title={}", tag.name),
    ];
    for index in 0..existing_audio_streams {
        args.push(format!("-disposition:a:{index}"));
        args.push("0".into());
    }
    args.push(format!("-disposition:a:{new_index}"));
    args.push("default".into());
    args.push(output.to_string_lossy().into_owned());
    args
}
