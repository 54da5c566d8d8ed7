//! Structured observability hooks for build and test-case lifecycle events.
//!
//! Events are emitted at `info!` level unless noted. Set `RUST_LOG` to tune
//! verbosity and pass `--json` to the CLI for JSON lines.

use tracing::{info, warn, Span};

/// Span scoping one test case. Attach with `Instrument::instrument` so it
/// stays entered across await points.
pub fn case_span(family: &str, artifact: &str) -> Span {
    tracing::info_span!("parity.case", family = %family, artifact = %artifact)
}

pub fn emit_build_started(artifact: &str) {
    info!(event = "build.started", artifact = %artifact);
}

pub fn emit_build_finished(artifact: &str, duration_ms: u64, success: bool) {
    if success {
        info!(event = "build.finished", artifact = %artifact, duration_ms, success);
    } else {
        warn!(event = "build.finished", artifact = %artifact, duration_ms, success);
    }
}

pub fn emit_case_finished(family: &str, artifact: &str, outcome: &str) {
    info!(event = "case.finished", family = %family, artifact = %artifact, outcome = %outcome);
}

pub fn emit_family_finished(family: &str, passed: usize, failed: usize, skipped: usize) {
    info!(
        event = "family.finished",
        family = %family,
        passed,
        failed,
        skipped,
    );
}
