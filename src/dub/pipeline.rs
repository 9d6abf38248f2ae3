use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::config::DubConfig;
use super::logging::{log_event, log_event_with};
use super::media::{BackgroundTrack, TrackTag, extract_background, mux_dubbed_track};
use super::render::BatchedRenderer;
use super::render::fallback::{FallbackState, RenderOutcome};
use super::render::runner::{FfmpegRunner, SystemFfmpegRunner};
use super::scheduler::{PlacementStats, place};
use super::segments::PlacedSegment;
use super::subtitles::load_subtitles;
use super::synthesis::{CommandSynthesizer, synthesize_all};
use super::workspace::JobWorkspace;
use crate::ui::prelude::{Level, OutputFormat, get_output_format};

/// Inputs of one dubbing job.
#[derive(Debug, Clone)]
pub struct DubRequest {
    pub video: PathBuf,
    pub subtitles: PathBuf,
    pub output: PathBuf,
    pub keep_workspace: bool,
    pub dry_run: bool,
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DubReport {
    pub output: PathBuf,
    pub final_tier: FallbackState,
    pub trace: Vec<FallbackState>,
    pub degraded: bool,
    pub segments: usize,
    pub skipped: usize,
    pub max_drift: f64,
}

/// `<dir>/<stem>.dubbed.mkv` next to the source video.
pub fn default_output_path(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    video.with_file_name(format!("{stem}.dubbed.mkv"))
}

pub fn ensure_tools(config: &DubConfig) -> Result<()> {
    let mut required: Vec<&str> = vec!["ffmpeg", "ffprobe"];
    if let Some(tts) = config.tts_command.first() {
        required.push(tts.as_str());
    }
    let missing: Vec<&str> = required
        .into_iter()
        .filter(|tool| which::which(tool).is_err())
        .collect();
    if !missing.is_empty() {
        bail!("Required tools not found on PATH: {}", missing.join(", "));
    }
    Ok(())
}

/// Run a complete job. Returns `None` for a dry run.
pub async fn run_dub_job(request: DubRequest, config: DubConfig) -> Result<Option<DubReport>> {
    if !request.video.is_file() {
        bail!("Video file not found: {}", request.video.display());
    }
    if !request.subtitles.is_file() {
        bail!("Subtitle file not found: {}", request.subtitles.display());
    }
    ensure_tools(&config)?;

    let workspace = Arc::new(JobWorkspace::new()?);
    log_event(
        Level::Debug,
        "dub.workspace",
        format!("Job workspace at {}", workspace.root().display()),
    );

    let result = run_in_workspace(&request, &config, &workspace).await;

    if request.keep_workspace {
        match Arc::try_unwrap(workspace) {
            Ok(workspace) => {
                let kept = workspace.keep();
                log_event(
                    Level::Info,
                    "dub.workspace.kept",
                    format!("Kept job workspace at {}", kept.display()),
                );
            }
            Err(workspace) => log_event(
                Level::Warn,
                "dub.workspace.kept",
                format!(
                    "Job workspace {} is still in use and was not kept",
                    workspace.root().display()
                ),
            ),
        }
    }
    result
}

async fn run_in_workspace(
    request: &DubRequest,
    config: &DubConfig,
    workspace: &Arc<JobWorkspace>,
) -> Result<Option<DubReport>> {
    let runner: Arc<dyn FfmpegRunner> = Arc::new(SystemFfmpegRunner);

    let background = extract_background(
        runner.as_ref(),
        &request.video,
        workspace,
        config,
        request.verbose,
    )?;

    let lines = load_subtitles(&request.subtitles)?;
    log_event(
        Level::Info,
        "dub.subtitles",
        format!("Synthesizing {} subtitle lines", lines.len()),
    );

    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let synthesizer = Arc::new(CommandSynthesizer::new(
        config,
        workspace.clips_dir(),
        Arc::clone(&runner),
    ));
    let synthesis = synthesize_all(synthesizer, lines, workers).await?;
    for failure in &synthesis.failures {
        log_event_with(
            Level::Warn,
            "dub.synthesis.skipped",
            failure.to_string(),
            serde_json::json!({ "kind": failure.kind() }),
        );
    }
    let skipped = synthesis.failures.len();

    let segments = synthesis.store.freeze();
    let placed = place(&segments);
    let stats = PlacementStats::from_placements(&placed);
    report_drift(&stats, background.duration);

    if request.dry_run {
        let renderer = BatchedRenderer::new(runner.as_ref(), workspace, config, request.verbose);
        let args = renderer.single_pass_args(&placed, &background);
        match get_output_format() {
            OutputFormat::Json => log_event_with(
                Level::Info,
                "dub.dry_run",
                "Single-pass render command",
                serde_json::json!({ "program": "ffmpeg", "args": args }),
            ),
            OutputFormat::Text => println!("ffmpeg {}", args.join(" ")),
        }
        return Ok(None);
    }

    let segment_count = placed.len();
    let outcome = render_off_runtime(
        Arc::clone(&runner),
        Arc::clone(workspace),
        config.clone(),
        placed,
        background,
        request.verbose,
    )
    .await?;

    let mux_runner = Arc::clone(&runner);
    let video = request.video.clone();
    let audio = outcome.artifact.path.clone();
    let output = request.output.clone();
    let (language, track_name) = (config.language.clone(), config.track_name.clone());
    let timeout = config.render_timeout();
    tokio::task::spawn_blocking(move || {
        mux_dubbed_track(
            mux_runner.as_ref(),
            &video,
            &audio,
            &output,
            TrackTag {
                language: &language,
                name: &track_name,
            },
            timeout,
        )
    })
    .await
    .context("Mux worker panicked")?
    .with_context(|| format!("Failed to write {}", request.output.display()))?;

    Ok(Some(DubReport {
        output: request.output.clone(),
        final_tier: outcome.final_tier,
        degraded: outcome.degraded(),
        trace: outcome.trace,
        segments: segment_count,
        skipped,
        max_drift: stats.max_drift,
    }))
}

/// Run the fallback chain on the blocking pool; each tier may hold an ffmpeg
/// child for up to the render timeout.
async fn render_off_runtime(
    runner: Arc<dyn FfmpegRunner>,
    workspace: Arc<JobWorkspace>,
    config: DubConfig,
    placed: Vec<PlacedSegment>,
    background: BackgroundTrack,
    verbose: bool,
) -> Result<RenderOutcome> {
    let outcome = tokio::task::spawn_blocking(move || {
        BatchedRenderer::new(runner.as_ref(), &workspace, &config, verbose)
            .render(&placed, &background)
    })
    .await
    .context("Render worker panicked")??;
    Ok(outcome)
}

fn report_drift(stats: &PlacementStats, background_duration: f64) {
    let overrun = (stats.timeline_end - background_duration).max(0.0);
    let data = serde_json::json!({
        "segments": stats.segments,
        "pushed": stats.pushed,
        "max_drift": stats.max_drift,
        "timeline_end": stats.timeline_end,
        "overrun": overrun,
    });
    log_event_with(
        Level::Info,
        "dub.schedule",
        format!(
            "Placed {} segments; {} pushed later, max drift {:.2}s",
            stats.segments, stats.pushed, stats.max_drift
        ),
        data,
    );
    if overrun > 0.0 {
        log_event(
            Level::Warn,
            "dub.schedule.overrun",
            format!("Speech runs {overrun:.2}s past the end of the original audio"),
        );
    }
}

pub fn print_report(report: &DubReport) {
    let data = serde_json::to_value(report).unwrap_or(serde_json::Value::Null);
    let trace = report
        .trace
        .iter()
        .map(|state| state.as_str())
        .collect::<Vec<_>>()
        .join(" -> ");

    if report.degraded {
        log_event_with(
            Level::Warn,
            "dub.degraded",
            format!(
                "Wrote {} using fallback '{}' ({trace})",
                report.output.display(),
                report.final_tier
            ),
            data,
        );
    } else {
        log_event_with(
            Level::Success,
            "dub.done",
            format!("Wrote {}", report.output.display()),
            data,
        );
    }
    if report.skipped > 0 {
        log_event(
            Level::Warn,
            "dub.skipped",
            format!(
                "{} subtitle lines could not be synthesized and are silent",
                report.skipped
            ),
        );
    }
}
