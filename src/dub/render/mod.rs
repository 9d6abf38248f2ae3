//! Renders placed speech onto the background through a chain of
//! increasingly simple strategies, so that a bad segment or an engine limit
//! degrades the result instead of failing the job.

mod batch;
pub mod fallback;
pub mod runner;

#[cfg(test)]
mod tests;

use std::path::PathBuf;

use super::config::DubConfig;
use super::error::DubError;
use super::logging::{log_event, log_event_with};
use super::media::BackgroundTrack;
use super::mix::{AudioEncoding, BackgroundGain, BaseTrack, MixGraphBuilder, RenderInstructions};
use super::segments::{DuckingInterval, PlacedSegment};
use super::workspace::JobWorkspace;
use crate::ui::prelude::Level;

use self::batch::partition;
use self::fallback::{FallbackController, FallbackState, RenderOutcome, Step};
use self::runner::{FfmpegRunOptions, FfmpegRunner, RunFailure};

/// A file written by one renderer invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderArtifact {
    pub path: PathBuf,
    pub duration: f64,
}

/// Partial voice-over tracks from the batches that rendered, and the
/// ducking intervals of the speech they actually contain.
#[derive(Debug, Default)]
struct ChunkedVoice {
    partials: Vec<RenderArtifact>,
    intervals: Vec<DuckingInterval>,
}

pub struct BatchedRenderer<'a> {
    runner: &'a dyn FfmpegRunner,
    workspace: &'a JobWorkspace,
    config: &'a DubConfig,
    builder: MixGraphBuilder,
    verbose: bool,
}

impl<'a> BatchedRenderer<'a> {
    pub fn new(
        runner: &'a dyn FfmpegRunner,
        workspace: &'a JobWorkspace,
        config: &'a DubConfig,
        verbose: bool,
    ) -> Self {
        Self {
            runner,
            workspace,
            config,
            builder: MixGraphBuilder::new(config),
            verbose,
        }
    }

    /// Length of the rendered track: the background, extended when speech
    /// was pushed past its end.
    pub fn total_duration(placed: &[PlacedSegment], background: &BackgroundTrack) -> f64 {
        placed
            .last()
            .map(PlacedSegment::end)
            .unwrap_or(0.0)
            .max(background.duration)
    }

    pub fn render(
        &self,
        placed: &[PlacedSegment],
        background: &BackgroundTrack,
    ) -> Result<RenderOutcome, DubError> {
        let total = Self::total_duration(placed, background);
        let intervals = MixGraphBuilder::ducking_intervals(placed);
        let mut chunked = ChunkedVoice::default();
        let mut voice: Option<RenderArtifact> = None;

        FallbackController::new().run(|state| match state {
            FallbackState::SinglePass => self
                .single_pass(placed, background, &intervals, total)
                .map(Step::Finished),
            FallbackState::Chunked => {
                chunked = self.chunked(placed, total)?;
                Ok(Step::Continue)
            }
            FallbackState::MergePartials => {
                voice = Some(self.merge_partials(&chunked.partials, total)?);
                Ok(Step::Continue)
            }
            FallbackState::DuckedFinal => {
                let voice = voice.as_ref().ok_or_else(|| DubError::no_artifact(state.as_str()))?;
                self.overlay(state, background, voice, Some(&chunked.intervals), total)
                    .map(Step::Finished)
            }
            FallbackState::UnduckedOverlay => {
                let voice = voice.as_ref().ok_or_else(|| DubError::no_artifact(state.as_str()))?;
                self.overlay(state, background, voice, None, total)
                    .map(Step::Finished)
            }
            FallbackState::PassThrough => self.pass_through(background).map(Step::Finished),
            FallbackState::Done => Err(DubError::no_artifact(state.as_str())),
        })
    }

    /// ffmpeg arguments of the single-pass render, for dry runs.
    pub fn single_pass_args(
        &self,
        placed: &[PlacedSegment],
        background: &BackgroundTrack,
    ) -> Vec<String> {
        let total = Self::total_duration(placed, background);
        let intervals = MixGraphBuilder::ducking_intervals(placed);
        let encoding = AudioEncoding::output(self.config);
        let output = self
            .workspace
            .artifact_path("final_single_pass", encoding.extension());
        self.single_pass_instructions(placed, background, &intervals, total)
            .to_args(&output, &encoding)
    }

    fn single_pass_instructions(
        &self,
        placed: &[PlacedSegment],
        background: &BackgroundTrack,
        intervals: &[DuckingInterval],
        total: f64,
    ) -> RenderInstructions {
        let gain = if self.config.duck_single_pass {
            BackgroundGain::Ducked(intervals.to_vec())
        } else {
            BackgroundGain::Flat(1.0)
        };
        self.builder.build(
            placed,
            BaseTrack::Background {
                path: &background.path,
                gain,
            },
            total,
        )
    }

    fn single_pass(
        &self,
        placed: &[PlacedSegment],
        background: &BackgroundTrack,
        intervals: &[DuckingInterval],
        total: f64,
    ) -> Result<RenderArtifact, DubError> {
        log_event(
            Level::Info,
            "dub.render.single_pass",
            format!("Mixing {} speech segments in one pass", placed.len()),
        );
        let instructions = self.single_pass_instructions(placed, background, intervals, total);
        self.invoke(
            FallbackState::SinglePass.as_str(),
            &instructions,
            "final_single_pass",
            &AudioEncoding::output(self.config),
        )
    }

    /// Render each batch over silence. Failed batches are skipped; whatever
    /// succeeded is kept for merging, and only its speech ducks the background.
    fn chunked(&self, placed: &[PlacedSegment], total: f64) -> Result<ChunkedVoice, DubError> {
        let stage = FallbackState::Chunked.as_str();
        let batches = partition(placed, self.config.batch_size);
        log_event(
            Level::Info,
            "dub.render.chunked",
            format!(
                "Mixing {} segments in {} batches of up to {}",
                placed.len(),
                batches.len(),
                self.config.batch_size
            ),
        );

        let encoding = AudioEncoding::intermediate(self.config);
        let mut partials = Vec::with_capacity(batches.len());
        let mut rendered: Vec<PlacedSegment> = Vec::with_capacity(placed.len());
        for batch in &batches {
            let instructions = self.builder.build(batch.segments, BaseTrack::Silence, total);
            let name = format!("batch_{:03}", batch.index);
            match self.invoke(stage, &instructions, &name, &encoding) {
                Ok(artifact) => {
                    partials.push(artifact);
                    rendered.extend_from_slice(batch.segments);
                }
                Err(err) => log_event_with(
                    Level::Warn,
                    "dub.render.batch_failed",
                    format!(
                        "Batch {} ({} segments) failed and is skipped: {err}",
                        batch.index,
                        batch.segments.len()
                    ),
                    serde_json::json!({ "batch": batch.index, "kind": err.kind() }),
                ),
            }
        }

        if partials.is_empty() {
            return Err(DubError::no_artifact(stage));
        }
        if partials.len() < batches.len() {
            log_event(
                Level::Warn,
                "dub.render.partial",
                format!(
                    "{} of {} batches rendered; continuing with what succeeded",
                    partials.len(),
                    batches.len()
                ),
            );
        }
        Ok(ChunkedVoice {
            intervals: MixGraphBuilder::ducking_intervals(&rendered),
            partials,
        })
    }

    fn merge_partials(
        &self,
        partials: &[RenderArtifact],
        total: f64,
    ) -> Result<RenderArtifact, DubError> {
        let stage = FallbackState::MergePartials.as_str();
        match partials {
            [] => Err(DubError::no_artifact(stage)),
            [single] => Ok(single.clone()),
            _ => {
                log_event(
                    Level::Info,
                    "dub.render.merge",
                    format!("Merging {} partial voice-over tracks", partials.len()),
                );
                let paths: Vec<PathBuf> = partials.iter().map(|p| p.path.clone()).collect();
                let instructions = self.builder.build_sum(&paths, total);
                self.invoke(
                    stage,
                    &instructions,
                    "voice_over",
                    &AudioEncoding::intermediate(self.config),
                )
            }
        }
    }

    fn overlay(
        &self,
        state: FallbackState,
        background: &BackgroundTrack,
        voice: &RenderArtifact,
        ducking: Option<&[DuckingInterval]>,
        total: f64,
    ) -> Result<RenderArtifact, DubError> {
        log_event(
            Level::Info,
            "dub.render.overlay",
            format!("Laying voice-over on the original audio ({state})"),
        );
        let instructions =
            self.builder
                .build_overlay(&background.path, &voice.path, ducking, total);
        self.invoke(
            state.as_str(),
            &instructions,
            &format!("final_{state}"),
            &AudioEncoding::output(self.config),
        )
    }

    fn pass_through(&self, background: &BackgroundTrack) -> Result<RenderArtifact, DubError> {
        log_event(
            Level::Warn,
            "dub.render.pass_through",
            "Re-encoding the original audio without dubbing",
        );
        let instructions = self
            .builder
            .build_passthrough(&background.path, background.duration);
        self.invoke(
            FallbackState::PassThrough.as_str(),
            &instructions,
            "final_pass_through",
            &AudioEncoding::output(self.config),
        )
        .map_err(|err| DubError::FatalMuxFailure(err.to_string()))
    }

    /// Check engine limits, run ffmpeg once, and confirm the output exists.
    fn invoke(
        &self,
        stage: &str,
        instructions: &RenderInstructions,
        name: &str,
        encoding: &AudioEncoding,
    ) -> Result<RenderArtifact, DubError> {
        let output = self.workspace.artifact_path(name, encoding.extension());
        let args = instructions.to_args(&output, encoding);

        if instructions.input_count() > self.config.max_render_inputs {
            return Err(DubError::too_large(
                stage,
                format!(
                    "{} inputs exceed the limit of {}",
                    instructions.input_count(),
                    self.config.max_render_inputs
                ),
            ));
        }
        let command_bytes: usize = args.iter().map(|a| a.len() + 1).sum();
        if command_bytes > self.config.max_command_bytes {
            return Err(DubError::too_large(
                stage,
                format!(
                    "command is {command_bytes} bytes, limit is {}",
                    self.config.max_command_bytes
                ),
            ));
        }

        log_event(
            Level::Debug,
            "dub.render.command",
            format!("ffmpeg {}", args.join(" ")),
        );

        let options = FfmpegRunOptions::new(
            Some(instructions.duration),
            self.config.render_timeout(),
            self.verbose,
        );
        self.runner
            .run(&args, options)
            .map_err(|failure| match failure {
                RunFailure::TooLarge(reason) => DubError::too_large(stage, reason),
                other => DubError::invocation(stage, other.to_string()),
            })?;

        if !output.exists() {
            return Err(DubError::no_artifact(stage));
        }
        Ok(RenderArtifact {
            path: output,
            duration: instructions.duration,
        })
    }
}
