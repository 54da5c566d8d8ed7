//! Suite driver: runs the test families one after another.
//!
//! Within a family every eligible artifact runs as its own task. Cases of the
//! same artifact share the build registry, so an artifact used by both the
//! equivalence and the layer family is built once, even when the two
//! families are driven concurrently through [`Suite::run_family`]. A case
//! failure is recorded in that case's outcome and never stops its siblings.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parity_core::obs::{case_span, emit_case_finished, emit_family_finished};
use parity_core::registry::BUILD_TIMING;
use parity_core::{
    compare_images, verify_cache_determinism, verify_layers, ArtifactCatalog, BenchmarkSink,
    BuildRegistry, DiffOptions, DiffTool, ImageBuilder, ImageNaming, ImageRef, ImageStore,
    LayerOffsets, ParityError, Partition, Timings, ToleranceRules,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::config::{SuiteConfig, GIT_CONTEXT_ARTIFACT};
use crate::gate::{GateVerdict, SuiteGate};

/// The external collaborators a suite drives.
#[derive(Clone)]
pub struct Collaborators {
    pub builder: Arc<dyn ImageBuilder>,
    pub diff_tool: Arc<dyn DiffTool>,
    pub image_store: Arc<dyn ImageStore>,
}

/// Timing category for the cache warm-up step.
pub const WARM_CACHE_TIMING: &str = "warm_cache";

/// A test family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Equivalence,
    /// Both builders take their context from a git repository.
    GitContext,
    Layers,
    Cache,
    /// The alternative builder gets its build definition and context as
    /// relative paths.
    RelativePaths,
}

impl Family {
    /// Run order of [`Suite::run_all`].
    pub const ALL: [Family; 5] = [
        Family::Equivalence,
        Family::GitContext,
        Family::Layers,
        Family::Cache,
        Family::RelativePaths,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Family::Equivalence => "equivalence",
            Family::GitContext => "git_context",
            Family::Layers => "layers",
            Family::Cache => "cache",
            Family::RelativePaths => "relative_paths",
        }
    }

    /// File the benchmark sink writes after this family, if any.
    pub fn benchmark_file(&self) -> Option<&'static str> {
        match self {
            Family::Equivalence => Some("benchmark"),
            Family::Layers => Some("benchmark_layers"),
            Family::Cache => Some("benchmark_cache"),
            Family::GitContext | Family::RelativePaths => None,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaseOutcome {
    Passed,
    Failed { reason: String },
    Skipped { reason: String },
}

impl CaseOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CaseOutcome::Passed => "passed",
            CaseOutcome::Failed { .. } => "failed",
            CaseOutcome::Skipped { .. } => "skipped",
        }
    }

    fn from_result(result: Result<(), ParityError>) -> Self {
        match result {
            Ok(()) => CaseOutcome::Passed,
            Err(e) => CaseOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseReport {
    pub artifact: String,
    pub outcome: CaseOutcome,
    pub duration_ms: u64,
}

/// Per-family results, cases sorted by artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyReport {
    pub family: Family,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub cases: Vec<CaseReport>,
}

impl FamilyReport {
    fn count(&self, label: &str) -> usize {
        self.cases
            .iter()
            .filter(|c| c.outcome.label() == label)
            .count()
    }

    pub fn passed(&self) -> usize {
        self.count("passed")
    }

    pub fn failed(&self) -> usize {
        self.count("failed")
    }

    pub fn skipped(&self) -> usize {
        self.count("skipped")
    }

    /// Passed iff no case failed.
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn case(&self, artifact: &str) -> Option<&CaseReport> {
        self.cases.iter().find(|c| c.artifact == artifact)
    }
}

/// Results of a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub engine_major_version: u32,
    pub families: Vec<FamilyReport>,
    pub verdict: GateVerdict,
    /// Per-category timing summary.
    pub timings: String,
}

impl SuiteReport {
    pub fn family(&self, family: Family) -> Option<&FamilyReport> {
        self.families.iter().find(|f| f.family == family)
    }
}

struct SuiteInner {
    config: SuiteConfig,
    catalog: ArtifactCatalog,
    naming: ImageNaming,
    rules: ToleranceRules,
    offsets: LayerOffsets,
    registry: BuildRegistry,
    collaborators: Collaborators,
    timings: Arc<Timings>,
    sink: BenchmarkSink,
    permits: Arc<Semaphore>,
}

/// Drives test families against one artifact catalog. Cheap to clone.
#[derive(Clone)]
pub struct Suite {
    inner: Arc<SuiteInner>,
}

/// What a family does with one artifact.
enum Plan {
    Run,
    Skip(String),
}

impl Suite {
    /// Register `artifacts` and prepare the shared registry and rules.
    pub fn new(config: SuiteConfig, artifacts: Vec<String>, collaborators: Collaborators) -> Self {
        let catalog = ArtifactCatalog::new(artifacts, &config.ignore, &config.cache_only);
        let timings = Arc::new(Timings::new());
        let registry = BuildRegistry::new(catalog.ids(), Arc::clone(&collaborators.builder))
            .with_timings(Arc::clone(&timings));
        let sink = BenchmarkSink::new(config.benchmark, config.benchmark_dir.clone());

        Self {
            inner: Arc::new(SuiteInner {
                naming: ImageNaming::new(&config.repo),
                rules: config.tolerance_rules(),
                offsets: config.layer_offsets(),
                permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
                catalog,
                registry,
                collaborators,
                timings,
                sink,
                config,
            }),
        }
    }

    pub fn registry(&self) -> &BuildRegistry {
        &self.inner.registry
    }

    pub fn timings(&self) -> &Timings {
        &self.inner.timings
    }

    pub fn catalog(&self) -> &ArtifactCatalog {
        &self.inner.catalog
    }

    fn enabled(&self, family: Family) -> bool {
        let config = &self.inner.config;
        match family {
            Family::Equivalence => config.run_equivalence,
            Family::Layers => config.run_layers,
            Family::Cache => config.run_cache,
            Family::GitContext => config.run_git_context,
            Family::RelativePaths => config.run_relative_paths,
        }
    }

    fn is_ignored(&self, artifact: &str) -> bool {
        self.inner.config.ignore.iter().any(|i| i == artifact)
    }

    fn is_cache_listed(&self, artifact: &str) -> bool {
        self.inner.config.cache_only.iter().any(|c| c == artifact)
    }

    /// Which artifacts a family covers and whether each runs or is skipped.
    fn plan(&self, family: Family) -> Vec<(String, Plan)> {
        match family {
            Family::GitContext => self.plan_git_context(),
            Family::RelativePaths => self.plan_relative_paths(),
            Family::Equivalence | Family::Layers | Family::Cache => self.plan_catalog(family),
        }
    }

    fn plan_git_context(&self) -> Vec<(String, Plan)> {
        let plan = if self.is_ignored(GIT_CONTEXT_ARTIFACT) {
            Plan::Skip("ignored".to_string())
        } else {
            Plan::Run
        };
        vec![(GIT_CONTEXT_ARTIFACT.to_string(), plan)]
    }

    fn plan_relative_paths(&self) -> Vec<(String, Plan)> {
        let catalog = &self.inner.catalog;
        self.inner
            .config
            .relative_artifacts
            .iter()
            .map(|id| {
                let plan = match catalog.partition(id) {
                    None => {
                        warn!(artifact = %id, "no build definition for relative-paths case");
                        Plan::Skip("no build definition".to_string())
                    }
                    Some(Partition::Ignored) => Plan::Skip("ignored".to_string()),
                    Some(Partition::CacheOnly) => Plan::Skip("cache-only".to_string()),
                    Some(Partition::Normal) => Plan::Run,
                };
                (id.clone(), plan)
            })
            .collect()
    }

    fn plan_catalog(&self, family: Family) -> Vec<(String, Plan)> {
        let catalog = &self.inner.catalog;
        catalog
            .ids()
            .filter_map(|id| {
                let partition = catalog.partition(id)?;
                let plan = match (family, partition) {
                    (Family::Cache, Partition::Ignored) if !self.is_cache_listed(id) => return None,
                    (_, Partition::Ignored) => Plan::Skip("ignored".to_string()),
                    (Family::Cache, Partition::CacheOnly) => Plan::Run,
                    (Family::Cache, Partition::Normal) => return None,
                    (_, Partition::CacheOnly) => Plan::Skip("cache-only".to_string()),
                    (_, Partition::Normal) => Plan::Run,
                };
                Some((id.to_string(), plan))
            })
            .collect()
    }

    /// Run every enabled family in [`Family::ALL`] order, one at a time, and
    /// evaluate the gate.
    #[instrument(skip(self), fields(artifacts = self.inner.catalog.len()))]
    pub async fn run_all(&self) -> SuiteReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(run_id = %run_id, "suite started");

        let mut families = Vec::new();
        for family in Family::ALL {
            if self.enabled(family) {
                families.push(self.run_family(family).await);
            } else {
                info!(family = %family, "family disabled");
            }
        }

        let verdict = SuiteGate::evaluate(&families);
        info!(run_id = %run_id, passed = verdict.passed, "{}", verdict.message);

        SuiteReport {
            run_id,
            started_at,
            engine_major_version: self.inner.config.engine_major_version,
            families,
            verdict,
            timings: self.inner.timings.summary(),
        }
    }

    /// Run one family: every eligible artifact concurrently, bounded by
    /// `max_concurrent`. The cache family warms the base-image cache first.
    #[instrument(skip(self))]
    pub async fn run_family(&self, family: Family) -> FamilyReport {
        let started_at = Utc::now();
        let start = Instant::now();

        let plan = self.plan(family);
        if family == Family::Cache && plan.iter().any(|(_, p)| matches!(p, Plan::Run)) {
            self.warm_cache().await;
        }

        let mut tasks = Vec::new();
        for (artifact, plan) in plan {
            let suite = self.clone();
            let id = artifact.clone();
            let span = case_span(family.name(), &artifact);
            let task = tokio::spawn(
                async move {
                    let case_start = Instant::now();
                    let outcome = match plan {
                        Plan::Skip(reason) => CaseOutcome::Skipped { reason },
                        Plan::Run => {
                            let _permit = suite.inner.permits.acquire().await.ok();
                            CaseOutcome::from_result(suite.run_case(family, &artifact).await)
                        }
                    };
                    emit_case_finished(family.name(), &artifact, outcome.label());
                    if let CaseOutcome::Failed { reason } = &outcome {
                        warn!(artifact = %artifact, "{}", reason);
                    }
                    CaseReport {
                        artifact,
                        outcome,
                        duration_ms: case_start.elapsed().as_millis() as u64,
                    }
                }
                .instrument(span),
            );
            tasks.push((id, task));
        }

        let mut cases = Vec::with_capacity(tasks.len());
        for (artifact, task) in tasks {
            match task.await {
                Ok(report) => cases.push(report),
                Err(e) => cases.push(CaseReport {
                    artifact,
                    outcome: CaseOutcome::Failed {
                        reason: format!("case task aborted: {e}"),
                    },
                    duration_ms: 0,
                }),
            }
        }
        cases.sort_by(|a, b| a.artifact.cmp(&b.artifact));

        let report = FamilyReport {
            family,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            cases,
        };

        if let Some(file) = family.benchmark_file() {
            self.inner.sink.write_or_warn(file, &self.inner.timings);
        }
        emit_family_finished(
            family.name(),
            report.passed(),
            report.failed(),
            report.skipped(),
        );
        report
    }

    async fn run_case(&self, family: Family, artifact: &str) -> parity_core::Result<()> {
        match family {
            Family::Equivalence => self.run_equivalence(artifact).await,
            Family::Layers => self.run_layers(artifact).await,
            Family::Cache => self.run_cache(artifact).await,
            Family::GitContext => self.run_git_context(artifact).await,
            Family::RelativePaths => self.run_relative_paths(artifact).await,
        }
    }

    /// A failed warm-up is logged; cached builds then pull base images
    /// themselves.
    async fn warm_cache(&self) {
        let start = Instant::now();
        let warmed = self.inner.collaborators.builder.warm_cache().await;
        self.inner.timings.record(WARM_CACHE_TIMING, start.elapsed());
        if let Err(e) = warmed {
            warn!(error = %format!("{e:#}"), "cache warm-up failed");
        }
    }

    /// Diff the reference image (from the daemon) against the alternative
    /// image (from the registry) for `artifact`.
    async fn compare_pair(&self, artifact: &str) -> parity_core::Result<()> {
        let (reference, alternative) = self.image_pair(artifact);
        compare_images(
            self.inner.collaborators.diff_tool.as_ref(),
            &self.inner.rules,
            artifact,
            &reference,
            &alternative,
            DiffOptions::UNCACHED,
            &self.inner.timings,
        )
        .await
    }

    fn image_pair(&self, artifact: &str) -> (ImageRef, ImageRef) {
        let naming = &self.inner.naming;
        (
            ImageRef::daemon(naming.reference_image(artifact)),
            ImageRef::registry(naming.alternative_image(artifact)),
        )
    }

    async fn run_equivalence(&self, artifact: &str) -> parity_core::Result<()> {
        self.inner.registry.ensure_built(artifact).await?;
        self.compare_pair(artifact).await
    }

    /// Outside the registry: the git images are named after an id with no
    /// local build definition.
    async fn run_git_context(&self, artifact: &str) -> parity_core::Result<()> {
        let context = self.inner.config.git_context();
        let start = Instant::now();
        let built = self.inner.collaborators.builder.build_git_context(&context).await;
        self.inner.timings.record(BUILD_TIMING, start.elapsed());
        built.map_err(|e| ParityError::collaborator("git context build", artifact, &e))?;
        self.compare_pair(artifact).await
    }

    /// Rebuilds under the artifact's regular image names. Runs after the
    /// equivalence and layer families are done with those images.
    async fn run_relative_paths(&self, artifact: &str) -> parity_core::Result<()> {
        let start = Instant::now();
        let built = self.inner.collaborators.builder.build_relative(artifact).await;
        self.inner.timings.record(BUILD_TIMING, start.elapsed());
        built.map_err(|e| ParityError::collaborator("relative-paths build", artifact, &e))?;
        self.compare_pair(artifact).await
    }

    async fn run_layers(&self, artifact: &str) -> parity_core::Result<()> {
        self.inner.registry.ensure_built(artifact).await?;
        let (reference, alternative) = self.image_pair(artifact);
        verify_layers(
            self.inner.collaborators.image_store.as_ref(),
            &reference,
            &alternative,
            self.inner.offsets.expected_for(artifact),
            &self.inner.timings,
        )
        .await?;
        Ok(())
    }

    async fn run_cache(&self, artifact: &str) -> parity_core::Result<()> {
        verify_cache_determinism(
            self.inner.collaborators.builder.as_ref(),
            self.inner.collaborators.diff_tool.as_ref(),
            &self.inner.rules,
            &self.inner.naming,
            artifact,
            &self.inner.timings,
        )
        .await?;
        Ok(())
    }
}
