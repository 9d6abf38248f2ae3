//! Linear fallback state machine for rendering.
//!
//! ```text
//! SinglePass -> Chunked -> MergePartials -> DuckedFinal -> UnduckedOverlay -> PassThrough -> Done
//! ```
//!
//! A state that fails, or that only produced an intermediate result, hands
//! over to the next state. A state that produced the final track jumps to
//! `Done`. No state is entered twice. A failure in `PassThrough` is fatal.

use serde::Serialize;

use super::RenderArtifact;
use crate::dub::error::DubError;
use crate::dub::logging::{log_event, log_event_with};
use crate::ui::prelude::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackState {
    SinglePass,
    Chunked,
    MergePartials,
    DuckedFinal,
    UnduckedOverlay,
    PassThrough,
    Done,
}

impl FallbackState {
    pub fn next(self) -> Self {
        match self {
            FallbackState::SinglePass => FallbackState::Chunked,
            FallbackState::Chunked => FallbackState::MergePartials,
            FallbackState::MergePartials => FallbackState::DuckedFinal,
            FallbackState::DuckedFinal => FallbackState::UnduckedOverlay,
            FallbackState::UnduckedOverlay => FallbackState::PassThrough,
            FallbackState::PassThrough | FallbackState::Done => FallbackState::Done,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FallbackState::SinglePass => "single_pass",
            FallbackState::Chunked => "chunked",
            FallbackState::MergePartials => "merge_partials",
            FallbackState::DuckedFinal => "ducked_final",
            FallbackState::UnduckedOverlay => "unducked_overlay",
            FallbackState::PassThrough => "pass_through",
            FallbackState::Done => "done",
        }
    }
}

impl std::fmt::Display for FallbackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running one state.
#[derive(Debug)]
pub enum Step {
    /// The state produced the job's final track
    Finished(RenderArtifact),
    /// The state produced an intermediate result for a later state
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutcome {
    pub artifact: RenderArtifact,
    pub final_tier: FallbackState,
    /// Every state that was entered, in order
    pub trace: Vec<FallbackState>,
    pub failures: Vec<(FallbackState, DubError)>,
}

impl RenderOutcome {
    /// True when anything other than the single-pass render produced the track.
    pub fn degraded(&self) -> bool {
        self.final_tier != FallbackState::SinglePass
    }
}

#[derive(Debug)]
pub struct FallbackController {
    state: FallbackState,
    trace: Vec<FallbackState>,
    failures: Vec<(FallbackState, DubError)>,
}

impl Default for FallbackController {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackController {
    pub fn new() -> Self {
        Self {
            state: FallbackState::SinglePass,
            trace: vec![FallbackState::SinglePass],
            failures: Vec::new(),
        }
    }

    pub fn state(&self) -> FallbackState {
        self.state
    }

    /// Drive `step` through the states until one finishes the job.
    pub fn run<F>(mut self, mut step: F) -> Result<RenderOutcome, DubError>
    where
        F: FnMut(FallbackState) -> Result<Step, DubError>,
    {
        loop {
            let state = self.state;
            if state == FallbackState::Done {
                // PassThrough either finishes or returns early, so Done is
                // only reachable through a finished step.
                return Err(DubError::no_artifact(state.as_str()));
            }

            match step(state) {
                Ok(Step::Finished(artifact)) => {
                    self.state = FallbackState::Done;
                    return Ok(RenderOutcome {
                        artifact,
                        final_tier: state,
                        trace: self.trace,
                        failures: self.failures,
                    });
                }
                Ok(Step::Continue) => self.advance(),
                Err(err) if state == FallbackState::PassThrough => {
                    log_event(
                        Level::Error,
                        "dub.render.fatal",
                        format!("All render strategies failed: {err}"),
                    );
                    return Err(match err {
                        DubError::FatalMuxFailure(_) => err,
                        other => DubError::FatalMuxFailure(other.to_string()),
                    });
                }
                Err(err) => {
                    log_event_with(
                        Level::Warn,
                        "dub.render.fallback",
                        format!(
                            "{state} failed, falling back to {next}: {err}",
                            next = state.next()
                        ),
                        serde_json::json!({
                            "tier": state,
                            "next": state.next(),
                            "kind": err.kind(),
                        }),
                    );
                    self.failures.push((state, err));
                    self.advance();
                }
            }
        }
    }

    fn advance(&mut self) {
        self.state = self.state.next();
        if self.state != FallbackState::Done {
            self.trace.push(self.state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const TIERS: [FallbackState; 6] = [
        FallbackState::SinglePass,
        FallbackState::Chunked,
        FallbackState::MergePartials,
        FallbackState::DuckedFinal,
        FallbackState::UnduckedOverlay,
        FallbackState::PassThrough,
    ];

    fn artifact() -> RenderArtifact {
        RenderArtifact {
            path: PathBuf::from("final.ac3"),
            duration: 10.0,
        }
    }

    #[test]
    fn single_pass_success_is_not_degraded() {
        let outcome = FallbackController::new()
            .run(|_| Ok(Step::Finished(artifact())))
            .unwrap();

        assert_eq!(outcome.final_tier, FallbackState::SinglePass);
        assert_eq!(outcome.trace, vec![FallbackState::SinglePass]);
        assert!(!outcome.degraded());
    }

    #[test]
    fn failure_at_each_tier_runs_the_next_one() {
        for (k, &failing) in TIERS[..TIERS.len() - 1].iter().enumerate() {
            let mut visited = Vec::new();
            let outcome = FallbackController::new()
                .run(|state| {
                    visited.push(state);
                    if state == failing {
                        Err(DubError::invocation(state.as_str(), "boom"))
                    } else if state == TIERS[k + 1] {
                        Ok(Step::Finished(artifact()))
                    } else {
                        Err(DubError::no_artifact(state.as_str()))
                    }
                })
                .unwrap();

            assert_eq!(visited, TIERS[..=k + 1].to_vec());
            assert_eq!(outcome.final_tier, TIERS[k + 1]);
            assert!(outcome.degraded());
        }
    }

    #[test]
    fn states_are_never_repeated() {
        let mut visited = Vec::new();
        let _ = FallbackController::new().run(|state| {
            visited.push(state);
            if state == FallbackState::PassThrough {
                Ok(Step::Finished(artifact()))
            } else {
                Ok(Step::Continue)
            }
        });

        assert_eq!(visited, TIERS.to_vec());
    }

    #[test]
    fn pass_through_failure_is_fatal() {
        let result = FallbackController::new()
            .run(|state| Err(DubError::invocation(state.as_str(), "engine missing")));

        assert!(matches!(result, Err(DubError::FatalMuxFailure(_))));
    }

    #[test]
    fn failures_are_recorded_with_their_tier() {
        let outcome = FallbackController::new()
            .run(|state| match state {
                FallbackState::SinglePass => Err(DubError::too_large("single_pass", "inputs")),
                FallbackState::Chunked | FallbackState::MergePartials => Ok(Step::Continue),
                _ => Ok(Step::Finished(artifact())),
            })
            .unwrap();

        assert_eq!(outcome.final_tier, FallbackState::DuckedFinal);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, FallbackState::SinglePass);
        assert_eq!(outcome.failures[0].1.kind(), "graph_too_large");
    }
}
