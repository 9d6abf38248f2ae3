use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::BatchedRenderer;
use super::fallback::FallbackState;
use super::runner::{FfmpegRunOptions, FfmpegRunner, RunFailure};
use crate::dub::config::DubConfig;
use crate::dub::error::DubError;
use crate::dub::media::BackgroundTrack;
use crate::dub::scheduler::place;
use crate::dub::segments::{PlacedSegment, SpeechSegment};
use crate::dub::workspace::JobWorkspace;

type FailRule = Box<dyn Fn(&str) -> Option<RunFailure> + Send + Sync>;

/// Runner that writes a placeholder file for every successful call and
/// fails calls whose output file name matches a rule.
struct ScriptedRunner {
    fail: FailRule,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    fn new(fail: impl Fn(&str) -> Option<RunFailure> + Send + Sync + 'static) -> Self {
        Self {
            fail: Box::new(fail),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn succeeding() -> Self {
        Self::new(|_| None)
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    fn outputs(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|args| file_stem(args.last().unwrap()))
            .collect()
    }
}

impl FfmpegRunner for ScriptedRunner {
    fn run(&self, args: &[String], _options: FfmpegRunOptions) -> Result<(), RunFailure> {
        self.calls.lock().unwrap().push(args.to_vec());
        let output = args.last().unwrap();
        if let Some(failure) = (self.fail)(&file_stem(output)) {
            return Err(failure);
        }
        std::fs::write(output, b"audio").unwrap();
        Ok(())
    }
}

fn file_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .unwrap()
        .to_string_lossy()
        .into_owned()
}

fn exit_failure() -> Option<RunFailure> {
    Some(RunFailure::Exit {
        code: Some(1),
        message: "Conversion failed!".to_string(),
    })
}

fn placements(count: usize) -> Vec<PlacedSegment> {
    let segments: Vec<SpeechSegment> = (0..count)
        .map(|i| {
            SpeechSegment::new(
                PathBuf::from(format!("clip_{i:03}.wav")),
                i as f64 * 2.0,
                1.5,
                i % 5 == 0,
            )
        })
        .collect();
    place(&segments)
}

fn background(workspace: &JobWorkspace, duration: f64) -> BackgroundTrack {
    BackgroundTrack {
        path: workspace.background_path(),
        duration,
    }
}

fn config() -> DubConfig {
    DubConfig {
        batch_size: 30,
        ..DubConfig::default()
    }
}

fn input_count(args: &[String]) -> usize {
    args.iter().filter(|a| *a == "-i").count()
}

#[test]
fn single_pass_success_renders_once() {
    let workspace = JobWorkspace::new().unwrap();
    let runner = ScriptedRunner::succeeding();
    let config = config();
    let renderer = BatchedRenderer::new(&runner, &workspace, &config, false);

    let outcome = renderer
        .render(&placements(10), &background(&workspace, 60.0))
        .unwrap();

    assert_eq!(outcome.final_tier, FallbackState::SinglePass);
    assert!(!outcome.degraded());
    assert_eq!(runner.outputs(), vec!["final_single_pass"]);
    assert_eq!(input_count(&runner.calls()[0]), 11);
    assert!(outcome.artifact.path.exists());
}

#[test]
fn failed_single_pass_with_forty_segments_renders_two_batches_then_merges() {
    let workspace = JobWorkspace::new().unwrap();
    let runner = ScriptedRunner::new(|name| {
        (name == "final_single_pass")
            .then(exit_failure)
            .flatten()
    });
    let config = config();
    let renderer = BatchedRenderer::new(&runner, &workspace, &config, false);

    let outcome = renderer
        .render(&placements(40), &background(&workspace, 100.0))
        .unwrap();

    assert_eq!(
        runner.outputs(),
        vec![
            "final_single_pass",
            "batch_000",
            "batch_001",
            "voice_over",
            "final_ducked_final"
        ]
    );
    let calls = runner.calls();
    assert_eq!(input_count(&calls[1]), 30);
    assert_eq!(input_count(&calls[2]), 10);
    assert_eq!(input_count(&calls[3]), 2);
    assert_eq!(
        outcome.trace,
        vec![
            FallbackState::SinglePass,
            FallbackState::Chunked,
            FallbackState::MergePartials,
            FallbackState::DuckedFinal
        ]
    );
    assert_eq!(outcome.final_tier, FallbackState::DuckedFinal);
    assert!(outcome.degraded());
}

#[test]
fn surviving_batch_is_promoted_without_merge() {
    let workspace = JobWorkspace::new().unwrap();
    let runner = ScriptedRunner::new(|name| {
        matches!(name, "final_single_pass" | "batch_000")
            .then(exit_failure)
            .flatten()
    });
    let config = config();
    let renderer = BatchedRenderer::new(&runner, &workspace, &config, false);

    let outcome = renderer
        .render(&placements(40), &background(&workspace, 100.0))
        .unwrap();

    assert_eq!(
        runner.outputs(),
        vec![
            "final_single_pass",
            "batch_000",
            "batch_001",
            "final_ducked_final"
        ]
    );
    let final_call = runner.calls().last().unwrap().clone();
    assert!(final_call.iter().any(|a| a.ends_with("batch_001.wav")));
    assert_eq!(outcome.final_tier, FallbackState::DuckedFinal);
}

#[test]
fn salvaged_mix_only_ducks_speech_that_was_rendered() {
    let workspace = JobWorkspace::new().unwrap();
    let runner = ScriptedRunner::new(|name| {
        matches!(name, "final_single_pass" | "batch_000")
            .then(exit_failure)
            .flatten()
    });
    let config = config();
    let renderer = BatchedRenderer::new(&runner, &workspace, &config, false);

    renderer
        .render(&placements(40), &background(&workspace, 100.0))
        .unwrap();

    let final_call = runner.calls().last().unwrap().clone();
    let graph_idx = final_call.iter().position(|a| a == "-filter_complex").unwrap();
    let graph = &final_call[graph_idx + 1];
    // batch_000 held segments 0..30 (starting 0s..58s); batch_001 starts at 60s
    assert!(!graph.contains("between(t,0.000000,1.500000)"));
    assert!(!graph.contains("between(t,58.000000,59.500000)"));
    assert!(graph.contains("between(t,60.000000,61.500000)"));
    assert!(graph.contains("between(t,78.000000,79.500000)"));
}

#[test]
fn failed_ducked_mix_falls_back_to_plain_overlay() {
    let workspace = JobWorkspace::new().unwrap();
    let runner = ScriptedRunner::new(|name| {
        matches!(name, "final_single_pass" | "final_ducked_final")
            .then(exit_failure)
            .flatten()
    });
    let config = config();
    let renderer = BatchedRenderer::new(&runner, &workspace, &config, false);

    let outcome = renderer
        .render(&placements(5), &background(&workspace, 30.0))
        .unwrap();

    assert_eq!(outcome.final_tier, FallbackState::UnduckedOverlay);
    let overlay = runner.calls().last().unwrap().clone();
    let graph_idx = overlay.iter().position(|a| a == "-filter_complex").unwrap();
    assert!(!overlay[graph_idx + 1].contains("enable="));
    assert!(overlay.iter().any(|a| a.ends_with("batch_000.wav")));
}

#[test]
fn all_batches_failing_skips_to_pass_through() {
    let workspace = JobWorkspace::new().unwrap();
    let runner = ScriptedRunner::new(|name| {
        (name != "final_pass_through").then(exit_failure).flatten()
    });
    let config = config();
    let renderer = BatchedRenderer::new(&runner, &workspace, &config, false);
    let background = background(&workspace, 75.0);

    let outcome = renderer.render(&placements(40), &background).unwrap();

    // no voice-over exists, so the overlay tiers fail without invoking ffmpeg
    assert_eq!(
        runner.outputs(),
        vec![
            "final_single_pass",
            "batch_000",
            "batch_001",
            "final_pass_through"
        ]
    );
    assert_eq!(outcome.final_tier, FallbackState::PassThrough);
    assert_eq!(outcome.artifact.duration, background.duration);
    assert_eq!(outcome.trace.len(), 6);
    assert!(matches!(
        outcome.failures[1].1,
        DubError::NoArtifactProduced { .. }
    ));
}

#[test]
fn pass_through_keeps_original_duration_when_speech_overruns() {
    let workspace = JobWorkspace::new().unwrap();
    let runner = ScriptedRunner::new(|name| {
        (name != "final_pass_through").then(exit_failure).flatten()
    });
    let config = config();
    let renderer = BatchedRenderer::new(&runner, &workspace, &config, false);
    // 40 segments end at 79.5s, past the 20s background
    let background = background(&workspace, 20.0);

    let outcome = renderer.render(&placements(40), &background).unwrap();

    assert_eq!(outcome.artifact.duration, 20.0);
}

#[test]
fn overrunning_speech_extends_the_mix() {
    let workspace = JobWorkspace::new().unwrap();
    let runner = ScriptedRunner::succeeding();
    let config = config();
    let renderer = BatchedRenderer::new(&runner, &workspace, &config, false);

    let placed = placements(40);
    let outcome = renderer
        .render(&placed, &background(&workspace, 20.0))
        .unwrap();

    assert_eq!(outcome.artifact.duration, placed.last().unwrap().end());
}

#[test]
fn pass_through_failure_is_fatal() {
    let workspace = JobWorkspace::new().unwrap();
    let runner = ScriptedRunner::new(|_| exit_failure());
    let config = config();
    let renderer = BatchedRenderer::new(&runner, &workspace, &config, false);

    let result = renderer.render(&placements(3), &background(&workspace, 10.0));

    assert!(matches!(result, Err(DubError::FatalMuxFailure(_))));
}

#[test]
fn oversized_graph_is_rejected_before_running() {
    let workspace = JobWorkspace::new().unwrap();
    let runner = ScriptedRunner::succeeding();
    let config = DubConfig {
        batch_size: 30,
        max_render_inputs: 35,
        ..DubConfig::default()
    };
    let renderer = BatchedRenderer::new(&runner, &workspace, &config, false);

    let outcome = renderer
        .render(&placements(40), &background(&workspace, 100.0))
        .unwrap();

    assert_eq!(
        runner.outputs(),
        vec!["batch_000", "batch_001", "voice_over", "final_ducked_final"]
    );
    assert!(matches!(
        outcome.failures[0].1,
        DubError::GraphTooLarge { .. }
    ));
}

#[test]
fn engine_size_rejection_maps_to_graph_too_large() {
    let workspace = JobWorkspace::new().unwrap();
    let runner = ScriptedRunner::new(|name| {
        (name == "final_single_pass")
            .then(|| RunFailure::TooLarge("Too many open files".to_string()))
    });
    let config = config();
    let renderer = BatchedRenderer::new(&runner, &workspace, &config, false);

    let outcome = renderer
        .render(&placements(4), &background(&workspace, 20.0))
        .unwrap();

    assert_eq!(outcome.failures[0].0, FallbackState::SinglePass);
    assert_eq!(outcome.failures[0].1.kind(), "graph_too_large");
    assert_eq!(outcome.final_tier, FallbackState::DuckedFinal);
}

#[test]
fn timeout_is_treated_like_a_failed_invocation() {
    let workspace = JobWorkspace::new().unwrap();
    let runner = ScriptedRunner::new(|name| {
        (name == "final_single_pass")
            .then(|| RunFailure::TimedOut(std::time::Duration::from_secs(900)))
    });
    let config = config();
    let renderer = BatchedRenderer::new(&runner, &workspace, &config, false);

    let outcome = renderer
        .render(&placements(4), &background(&workspace, 20.0))
        .unwrap();

    assert_eq!(outcome.failures[0].1.kind(), "render_invocation_failed");
    assert_eq!(outcome.trace[1], FallbackState::Chunked);
}

#[test]
fn empty_timeline_still_produces_a_track() {
    let workspace = JobWorkspace::new().unwrap();
    let runner = ScriptedRunner::succeeding();
    let config = config();
    let renderer = BatchedRenderer::new(&runner, &workspace, &config, false);

    let outcome = renderer
        .render(&[], &background(&workspace, 15.0))
        .unwrap();

    assert_eq!(outcome.final_tier, FallbackState::SinglePass);
    assert_eq!(outcome.artifact.duration, 15.0);
    assert_eq!(input_count(&runner.calls()[0]), 1);
}

#[test]
fn dry_run_args_describe_single_pass() {
    let workspace = JobWorkspace::new().unwrap();
    let runner = ScriptedRunner::succeeding();
    let config = config();
    let renderer = BatchedRenderer::new(&runner, &workspace, &config, false);

    let args = renderer.single_pass_args(&placements(3), &background(&workspace, 15.0));

    assert_eq!(input_count(&args), 4);
    assert!(args.last().unwrap().ends_with("final_single_pass.ac3"));
    assert!(runner.calls().is_empty());
}
