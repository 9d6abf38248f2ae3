use anyhow::{Context, Result};
use duct::cmd;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

use super::config::DubConfig;
use super::error::DubError;
use super::media::probe_duration_seconds;
use super::mix::AudioEncoding;
use super::render::runner::{FfmpegRunOptions, FfmpegRunner};
use super::segments::{SegmentStore, SpeechSegment};
use super::subtitles::SubtitleLine;
use crate::ui::prelude::{OutputFormat, get_output_format};

/// Clips smaller than this are treated as failed synthesis.
const MIN_CLIP_BYTES: u64 = 1000;
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A speech clip and its measured length.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedClip {
    pub path: PathBuf,
    pub duration: f64,
}

pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize(&self, index: usize, text: &str) -> Result<SynthesizedClip, DubError>;
}

/// Runs an external TTS command, then normalizes its output with ffmpeg.
pub struct CommandSynthesizer {
    template: Vec<String>,
    language: String,
    speech_rate: f64,
    timeout: Duration,
    encoding: AudioEncoding,
    clips_dir: PathBuf,
    runner: Arc<dyn FfmpegRunner>,
}

impl CommandSynthesizer {
    pub fn new(config: &DubConfig, clips_dir: &Path, runner: Arc<dyn FfmpegRunner>) -> Self {
        Self {
            template: config.tts_command.clone(),
            language: config.language.clone(),
            speech_rate: config.speech_rate,
            timeout: config.synthesis_timeout(),
            encoding: AudioEncoding::intermediate(config),
            clips_dir: clips_dir.to_path_buf(),
            runner,
        }
    }

    fn command_args(&self, text: &str, output: &Path) -> Vec<String> {
        let output = output.to_string_lossy();
        self.template
            .iter()
            .map(|part| {
                part.replace("{lang}", &self.language)
                    .replace("{output}", &output)
                    .replace("{text}", text)
            })
            .collect()
    }

    fn run_tts(&self, index: usize, text: &str, output: &Path) -> Result<(), DubError> {
        let fail = |reason: String| DubError::SynthesisIncomplete { index, reason };
        let args = self.command_args(text, output);
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| fail("tts_command is empty".to_string()))?;

        let handle = cmd(program, rest)
            .stdout_null()
            .stderr_capture()
            .unchecked()
            .start()
            .map_err(|err| fail(format!("failed to start {program}: {err}")))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            match handle.try_wait() {
                Ok(Some(out)) if out.status.success() => return Ok(()),
                Ok(Some(out)) => {
                    return Err(fail(format!(
                        "{program} exited with status {:?}: {}",
                        out.status.code(),
                        String::from_utf8_lossy(&out.stderr).trim()
                    )));
                }
                Ok(None) if Instant::now() >= deadline => {
                    let _ = handle.kill();
                    return Err(fail(format!("{program} timed out after {:?}", self.timeout)));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(err) => return Err(fail(format!("waiting for {program} failed: {err}"))),
            }
        }
    }

    fn conversion_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-y".into(),
            "-hide_banner".into(),
            "-nostdin".into(),
            "-i".into(),
            input.to_string_lossy().into_owned(),
        ];
        if (self.speech_rate - 1.0).abs() > f64::EPSILON {
            args.push("-filter:a".into());
            args.push(format!("atempo={}", self.speech_rate));
        }
        self.encoding.push_to(&mut args);
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

impl SpeechSynthesizer for CommandSynthesizer {
    fn synthesize(&self, index: usize, text: &str) -> Result<SynthesizedClip, DubError> {
        let fail = |reason: String| DubError::SynthesisIncomplete { index, reason };
        let raw = self.clips_dir.join(format!("line_{index:05}.mp3"));
        let clip = self.clips_dir.join(format!("line_{index:05}.wav"));

        self.run_tts(index, text, &raw)?;

        let converted = self.runner.run(
            &self.conversion_args(&raw, &clip),
            FfmpegRunOptions::new(None, self.timeout, false),
        );
        let _ = std::fs::remove_file(&raw);
        converted.map_err(|err| fail(format!("clip conversion failed: {err}")))?;

        let size = std::fs::metadata(&clip).map(|m| m.len()).unwrap_or(0);
        if size < MIN_CLIP_BYTES {
            let _ = std::fs::remove_file(&clip);
            return Err(fail(format!("generated clip is too small ({size} bytes)")));
        }

        let duration = probe_duration_seconds(&clip).map_err(|err| fail(format!("{err:#}")))?;
        Ok(SynthesizedClip {
            path: clip,
            duration,
        })
    }
}

/// Segments that were synthesized, plus the lines that were not.
#[derive(Debug, Default)]
pub struct SynthesisResult {
    pub store: SegmentStore,
    pub failures: Vec<DubError>,
}

/// Synthesize every line, one partition per worker. Workers share nothing;
/// each returns its own results which are merged into one store afterwards.
pub async fn synthesize_all(
    synthesizer: Arc<dyn SpeechSynthesizer>,
    lines: Vec<SubtitleLine>,
    workers: usize,
) -> Result<SynthesisResult> {
    let workers = workers.max(1);
    let chunk_size = lines.len().div_ceil(workers).max(1);
    let pb = progress_bar(lines.len());

    let indexed: Vec<(usize, SubtitleLine)> = lines.into_iter().enumerate().collect();
    let mut tasks = JoinSet::new();
    for chunk in indexed.chunks(chunk_size) {
        let chunk = chunk.to_vec();
        let synthesizer = Arc::clone(&synthesizer);
        let pb = pb.clone();
        tasks.spawn_blocking(move || {
            chunk
                .into_iter()
                .map(|(index, line)| {
                    let result = synthesizer.synthesize(index, &line.text).map(|clip| {
                        SpeechSegment::new(
                            clip.path,
                            line.start.as_secs_f64(),
                            clip.duration,
                            line.is_emphasis,
                        )
                    });
                    if let Some(pb) = &pb {
                        pb.inc(1);
                    }
                    result
                })
                .collect::<Vec<_>>()
        });
    }

    let mut result = SynthesisResult::default();
    while let Some(joined) = tasks.join_next().await {
        for outcome in joined.context("Speech synthesis worker panicked")? {
            match outcome {
                Ok(segment) => result.store.push(segment),
                Err(err) => result.failures.push(err),
            }
        }
    }

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    Ok(result)
}

fn progress_bar(total: usize) -> Option<ProgressBar> {
    if total == 0 || get_output_format() == OutputFormat::Json {
        return None;
    }
    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} synthesizing [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        pb.set_style(style);
    }
    Some(pb)
}
