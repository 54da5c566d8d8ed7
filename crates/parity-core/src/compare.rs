//! Diff, decode, filter and assert one image pair.

use std::time::Instant;

use tracing::debug;

use crate::collaborators::{DiffOptions, DiffTool};
use crate::equivalence::check_equivalence;
use crate::error::{ParityError, Result};
use crate::image::ImageRef;
use crate::report::decode_report;
use crate::timing::Timings;
use crate::tolerance::ToleranceRules;

/// Timing category for diff-tool invocations.
pub const DIFF_TIMING: &str = "diff";

/// Run the diff tool on `image_a`/`image_b` and assert the filtered report
/// equals the baseline for the pair. Failures are attributed to `artifact`.
pub async fn compare_images(
    diff_tool: &dyn DiffTool,
    rules: &ToleranceRules,
    artifact: &str,
    image_a: &ImageRef,
    image_b: &ImageRef,
    options: DiffOptions,
    timings: &Timings,
) -> Result<()> {
    let start = Instant::now();
    let raw = diff_tool.diff(image_a, image_b, options).await;
    timings.record(DIFF_TIMING, start.elapsed());
    let raw = raw.map_err(|e| ParityError::collaborator("diff", artifact, &e))?;

    debug!(artifact = %artifact, diff = %String::from_utf8_lossy(&raw), "diff tool output");

    let report = decode_report(&raw)?;
    check_equivalence(report, rules, &image_a.name, &image_b.name)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeDiffTool;

    #[tokio::test]
    async fn test_identical_pair_passes() {
        let tool = FakeDiffTool::new();
        let timings = Timings::new();
        compare_images(
            &tool,
            &ToleranceRules::for_engine_version(19),
            "Dockerfile_test_run",
            &ImageRef::daemon("a"),
            &ImageRef::registry("b"),
            DiffOptions::UNCACHED,
            &timings,
        )
        .await
        .unwrap();
        assert_eq!(timings.count(DIFF_TIMING), 1);
        assert_eq!(tool.diff_options(), vec![DiffOptions::UNCACHED]);
    }

    #[tokio::test]
    async fn test_diff_tool_failure_is_attributed() {
        let tool = FakeDiffTool::new().failing_for("b");
        let err = compare_images(
            &tool,
            &ToleranceRules::for_engine_version(19),
            "Dockerfile_test_run",
            &ImageRef::daemon("a"),
            &ImageRef::registry("b"),
            DiffOptions::UNCACHED,
            &Timings::new(),
        )
        .await
        .unwrap_err();
        match err {
            ParityError::Collaborator { operation, artifact, .. } => {
                assert_eq!(operation, "diff");
                assert_eq!(artifact, "Dockerfile_test_run");
            }
            other => panic!("expected Collaborator, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_garbage_output_is_malformed() {
        let tool = FakeDiffTool::new().with_report("a", "b", "Error: no such image");
        let err = compare_images(
            &tool,
            &ToleranceRules::for_engine_version(19),
            "Dockerfile_test_run",
            &ImageRef::daemon("a"),
            &ImageRef::registry("b"),
            DiffOptions::UNCACHED,
            &Timings::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ParityError::Report(_)));
    }
}
