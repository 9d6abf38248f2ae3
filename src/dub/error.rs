use thiserror::Error;

/// Failure kinds of the compositor. Everything except `FatalMuxFailure` is
/// absorbed by the fallback tiers; only that one reaches the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DubError {
    #[error("Speech for subtitle line {index} is missing: {reason}")]
    SynthesisIncomplete { index: usize, reason: String },

    #[error("Render step '{stage}' failed: {reason}")]
    RenderInvocationFailed { stage: String, reason: String },

    #[error("Render step '{stage}' rejected as too large: {reason}")]
    GraphTooLarge { stage: String, reason: String },

    #[error("Render step '{stage}' produced no artifact")]
    NoArtifactProduced { stage: String },

    #[error("Pass-through re-encode of the original audio failed: {0}")]
    FatalMuxFailure(String),
}

impl DubError {
    pub fn invocation(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        DubError::RenderInvocationFailed {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    pub fn too_large(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        DubError::GraphTooLarge {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    pub fn no_artifact(stage: impl Into<String>) -> Self {
        DubError::NoArtifactProduced {
            stage: stage.into(),
        }
    }

    /// Short machine-readable name for event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            DubError::SynthesisIncomplete { .. } => "synthesis_incomplete",
            DubError::RenderInvocationFailed { .. } => "render_invocation_failed",
            DubError::GraphTooLarge { .. } => "graph_too_large",
            DubError::NoArtifactProduced { .. } => "no_artifact_produced",
            DubError::FatalMuxFailure(_) => "fatal_mux_failure",
        }
    }
}
