//! Build registry: each artifact is built at most once per process.
//!
//! Many test cases depend on the same artifact and run concurrently. The
//! registry owns one status cell per registered artifact and moves it through
//! `Unbuilt -> Building -> Built | Failed`. The claim `Unbuilt -> Building`
//! is a single atomic check-and-set on that artifact's cell, so exactly one
//! caller runs the build; every other caller waits for the cell to leave
//! `Building`. Cells of different artifacts are independent and no lock is
//! held while a build runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::debug;

use crate::collaborators::ImageBuilder;
use crate::error::BuildError;
use crate::obs::{emit_build_finished, emit_build_started};
use crate::timing::Timings;

/// Timing category for artifact builds.
pub const BUILD_TIMING: &str = "build";

/// Build status of one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    Unbuilt,
    Building,
    Built,
    /// Terminal for the rest of the run. Carries the original cause.
    Failed(String),
}

/// Build-once registry keyed by artifact id.
pub struct BuildRegistry {
    builder: Arc<dyn ImageBuilder>,
    cells: HashMap<String, watch::Sender<BuildStatus>>,
    timings: Arc<Timings>,
}

impl BuildRegistry {
    /// Register `artifacts`, all starting `Unbuilt`. The set is fixed for the
    /// lifetime of the registry.
    pub fn new<I, S>(artifacts: I, builder: Arc<dyn ImageBuilder>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cells = artifacts
            .into_iter()
            .map(|id| (id.into(), watch::channel(BuildStatus::Unbuilt).0))
            .collect();
        Self {
            builder,
            cells,
            timings: Arc::new(Timings::new()),
        }
    }

    pub fn with_timings(mut self, timings: Arc<Timings>) -> Self {
        self.timings = timings;
        self
    }

    /// Current status of `artifact`, or `None` if it is not registered.
    pub fn status(&self, artifact: &str) -> Option<BuildStatus> {
        self.cells.get(artifact).map(|cell| cell.borrow().clone())
    }

    /// Ensure `artifact` has been built, building it if nobody has yet.
    ///
    /// Only the first caller builds. Concurrent callers wait for that build
    /// and share its outcome. A failure is returned as
    /// [`BuildError::Failed`] to the caller that ran the build and as
    /// [`BuildError::PreviouslyFailed`] to everybody else.
    pub async fn ensure_built(&self, artifact: &str) -> Result<(), BuildError> {
        let cell = self
            .cells
            .get(artifact)
            .ok_or_else(|| BuildError::UnknownArtifact {
                artifact: artifact.to_string(),
            })?;

        loop {
            let mut rx = cell.subscribe();
            let claimed = cell.send_if_modified(|status| {
                if *status == BuildStatus::Unbuilt {
                    *status = BuildStatus::Building;
                    true
                } else {
                    false
                }
            });
            if claimed {
                return self.run_build(artifact, cell).await;
            }

            debug!(artifact = %artifact, "waiting for build claimed by another case");
            let settled = match rx.wait_for(|s| *s != BuildStatus::Building).await {
                Ok(status) => status.clone(),
                // The sender lives as long as `self`.
                Err(_) => BuildStatus::Failed("build status channel closed".to_string()),
            };
            match settled {
                BuildStatus::Built => return Ok(()),
                BuildStatus::Failed(_) => {
                    return Err(BuildError::PreviouslyFailed {
                        artifact: artifact.to_string(),
                    })
                }
                BuildStatus::Unbuilt | BuildStatus::Building => continue,
            }
        }
    }

    async fn run_build(
        &self,
        artifact: &str,
        cell: &watch::Sender<BuildStatus>,
    ) -> Result<(), BuildError> {
        emit_build_started(artifact);
        let start = Instant::now();
        let mut guard = AbandonGuard { cell, armed: true };

        let result = self.builder.build(artifact).await;

        guard.armed = false;
        let elapsed = start.elapsed();
        self.timings.record(BUILD_TIMING, elapsed);
        emit_build_finished(artifact, elapsed.as_millis() as u64, result.is_ok());

        match result {
            Ok(()) => {
                cell.send_replace(BuildStatus::Built);
                Ok(())
            }
            Err(e) => {
                let reason = format!("{e:#}");
                cell.send_replace(BuildStatus::Failed(reason.clone()));
                Err(BuildError::Failed {
                    artifact: artifact.to_string(),
                    reason,
                })
            }
        }
    }
}

/// Marks the cell failed if the building future is dropped mid-build, so
/// waiters are released instead of hanging on `Building`.
struct AbandonGuard<'a> {
    cell: &'a watch::Sender<BuildStatus>,
    armed: bool,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.cell.send_replace(BuildStatus::Failed(
                "build abandoned before completion".to_string(),
            ));
        }
    }
}
