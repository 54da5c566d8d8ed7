//! Error taxonomy for image parity verification.

use std::fmt;

use crate::equivalence::ReportDelta;
use crate::image::ImageDetails;

/// Errors produced while decoding a delta report.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// The envelope or a resolved payload could not be decoded.
    ///
    /// `raw` carries the offending input so the failing comparison can be
    /// diagnosed without re-running the diff tool.
    #[error("malformed delta report: {reason}\nraw report:\n{raw}")]
    MalformedReport { reason: String, raw: String },
}

/// Errors produced by the build registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("artifact {artifact} is not registered")]
    UnknownArtifact { artifact: String },

    #[error("failed to build artifact {artifact}: {reason}")]
    Failed { artifact: String, reason: String },

    /// A previous caller already attempted this artifact and failed.
    /// The original failure was reported to that caller.
    #[error("artifact {artifact} failed to build earlier in this run")]
    PreviouslyFailed { artifact: String },
}

/// Layer-count assertion failure. Carries both resolved images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerMismatch {
    pub expected_offset: usize,
    pub actual_offset: usize,
    pub image_a: ImageDetails,
    pub image_b: ImageDetails,
}

impl fmt::Display for LayerMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "difference in number of layers in each image is {} but should be {}. Image 1: {}, Image 2: {}",
            self.actual_offset, self.expected_offset, self.image_a, self.image_b
        )
    }
}

impl std::error::Error for LayerMismatch {}

/// Errors produced by the layer verifier.
#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error("couldn't get details from image reference for ({image}): {reason}")]
    Query { image: String, reason: String },

    #[error(transparent)]
    Mismatch(#[from] Box<LayerMismatch>),
}

/// Structural mismatch between a filtered report and its baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct EquivalenceMismatch {
    pub subject_a: String,
    pub subject_b: String,
    pub deltas: Vec<ReportDelta>,
}

impl fmt::Display for EquivalenceMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "images {} and {} differ after filtering ({} delta(s)):",
            self.subject_a,
            self.subject_b,
            self.deltas.len()
        )?;
        for delta in &self.deltas {
            writeln!(f, "  {delta}")?;
        }
        Ok(())
    }
}

impl std::error::Error for EquivalenceMismatch {}

/// One or more required external tools are not on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("missing required tools: {}", .missing.join(", "))]
pub struct ToolUnavailable {
    pub missing: Vec<String>,
}

/// Umbrella error for a single test case or startup step.
#[derive(Debug, thiserror::Error)]
pub enum ParityError {
    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Layers(#[from] LayerError),

    #[error(transparent)]
    Equivalence(#[from] Box<EquivalenceMismatch>),

    #[error(transparent)]
    ToolUnavailable(#[from] ToolUnavailable),

    /// A collaborator (builder, diff tool, image store) failed.
    #[error("{operation} failed for {artifact}: {reason}")]
    Collaborator {
        operation: String,
        artifact: String,
        reason: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParityError {
    /// Wrap a collaborator failure, keeping the full cause chain.
    pub fn collaborator(operation: &str, artifact: &str, err: &anyhow::Error) -> Self {
        ParityError::Collaborator {
            operation: operation.to_string(),
            artifact: artifact.to_string(),
            reason: format!("{err:#}"),
        }
    }
}

impl From<EquivalenceMismatch> for ParityError {
    fn from(err: EquivalenceMismatch) -> Self {
        ParityError::Equivalence(Box::new(err))
    }
}

impl From<LayerMismatch> for ParityError {
    fn from(err: LayerMismatch) -> Self {
        ParityError::Layers(LayerError::Mismatch(Box::new(err)))
    }
}

/// Result type for parity operations.
pub type Result<T> = std::result::Result<T, ParityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_unavailable_lists_every_tool() {
        let err = ToolUnavailable {
            missing: vec!["container-diff".to_string(), "docker".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("container-diff"));
        assert!(msg.contains("docker"));
    }

    #[test]
    fn test_build_error_display() {
        let err = BuildError::Failed {
            artifact: "Dockerfile_test_run".to_string(),
            reason: "exit status 1".to_string(),
        };
        assert!(err.to_string().contains("Dockerfile_test_run"));
        assert!(err.to_string().contains("exit status 1"));
    }

    #[test]
    fn test_collaborator_error_keeps_cause_chain() {
        let cause = anyhow::anyhow!("daemon not running").context("docker pull");
        let err = ParityError::collaborator("pull", "Dockerfile_test_run", &cause);
        let msg = err.to_string();
        assert!(msg.contains("docker pull"));
        assert!(msg.contains("daemon not running"));
    }
}
