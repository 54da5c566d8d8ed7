//! Suite configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;

use parity_core::{GitContext, LayerOffsets, ToleranceRules, DEFAULT_CACHE_ONLY};
use serde::{Deserialize, Serialize};

/// Default image repository prefix.
pub const DEFAULT_REPO: &str = "gcr.io/kaniko-test/";

/// Default executor image for the alternative builder.
pub const DEFAULT_EXECUTOR_IMAGE: &str = "executor-image";

/// Default image that pre-populates the alternative builder's base-image cache.
pub const DEFAULT_WARMER_IMAGE: &str = "gcr.io/kaniko-project/warmer:latest";

/// Base image cached by the warm-up step.
pub const DEFAULT_WARM_IMAGE: &str =
    "gcr.io/google-appengine/debian9@sha256:1d6a9a6d106bd795098f60f4abb7083626354fa6735e81743c7f8cfca11259f0";

/// Default repository for the git build context family.
pub const DEFAULT_GIT_REPO: &str = "github.com/GoogleContainerTools/kaniko";

/// Build definition built from the git context, relative to the repository root.
pub const DEFAULT_GIT_DOCKERFILE: &str = "integration/dockerfiles/Dockerfile_test_run_2";

/// Id the git build context images are named after.
pub const GIT_CONTEXT_ARTIFACT: &str = "Dockerfile_test_git";

/// Artifacts rebuilt with relative paths by default.
pub const DEFAULT_RELATIVE_ARTIFACTS: &[&str] = &["Dockerfile_test_copy"];

/// Everything a suite run needs to know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteConfig {
    /// Image repository prefix, always ending in `/`.
    pub repo: String,

    /// Directory holding the build definitions.
    pub dockerfiles_dir: PathBuf,

    /// Build context mounted into the alternative builder.
    pub context_dir: PathBuf,

    pub executor_image: String,

    /// Image run by the cache warm-up step.
    pub warmer_image: String,

    /// Base images cached before the cache family runs.
    pub warm_images: Vec<String>,

    /// Major version of the reference engine.
    pub engine_major_version: u32,

    /// Artifacts excluded from every family.
    pub ignore: Vec<String>,

    /// Artifacts exercised only by the cache family.
    pub cache_only: Vec<String>,

    /// Expected layer-count offset per artifact; unlisted artifacts expect 0.
    pub layer_offsets: BTreeMap<String, usize>,

    /// Path prefixes whose filesystem adds/dels are tolerated.
    pub allowed_path_prefixes: Vec<String>,

    /// Repository the git build context family builds from.
    pub git_repo: String,

    /// Build definition path inside `git_repo`.
    pub git_dockerfile: String,

    /// Artifacts rebuilt by the relative-paths family.
    pub relative_artifacts: Vec<String>,

    /// Bound on concurrently running cases per family.
    pub max_concurrent: usize,

    pub run_equivalence: bool,
    pub run_layers: bool,
    pub run_cache: bool,
    pub run_git_context: bool,
    pub run_relative_paths: bool,

    pub benchmark: bool,
    pub benchmark_dir: PathBuf,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            repo: DEFAULT_REPO.to_string(),
            dockerfiles_dir: PathBuf::from("dockerfiles"),
            context_dir: PathBuf::from("."),
            executor_image: DEFAULT_EXECUTOR_IMAGE.to_string(),
            warmer_image: DEFAULT_WARMER_IMAGE.to_string(),
            warm_images: vec![DEFAULT_WARM_IMAGE.to_string()],
            engine_major_version: 0,
            ignore: Vec::new(),
            cache_only: DEFAULT_CACHE_ONLY.iter().map(|s| s.to_string()).collect(),
            layer_offsets: [("Dockerfile_test_add", 12), ("Dockerfile_test_scratch", 3)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            allowed_path_prefixes: parity_core::tolerance::DEFAULT_ALLOWED_PATH_PREFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            git_repo: DEFAULT_GIT_REPO.to_string(),
            git_dockerfile: DEFAULT_GIT_DOCKERFILE.to_string(),
            relative_artifacts: DEFAULT_RELATIVE_ARTIFACTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_concurrent: 4,
            run_equivalence: true,
            run_layers: true,
            run_cache: true,
            run_git_context: true,
            run_relative_paths: true,
            benchmark: false,
            benchmark_dir: PathBuf::from("."),
        }
    }
}

impl SuiteConfig {
    /// Set the repository, appending a trailing `/` when missing.
    pub fn with_repo(mut self, repo: &str) -> Self {
        self.repo = normalize_repo(repo);
        self
    }

    pub fn tolerance_rules(&self) -> ToleranceRules {
        ToleranceRules::for_engine_version(self.engine_major_version)
            .with_allowed_path_prefixes(self.allowed_path_prefixes.clone())
    }

    pub fn layer_offsets(&self) -> LayerOffsets {
        LayerOffsets::from_pairs(self.layer_offsets.iter().map(|(k, v)| (k.as_str(), *v)))
    }

    /// The git context built by the git build context family.
    pub fn git_context(&self) -> GitContext {
        GitContext {
            artifact: GIT_CONTEXT_ARTIFACT.to_string(),
            dockerfile: self.git_dockerfile.clone(),
            repo: self.git_repo.clone(),
        }
    }

    /// The directory artifacts are discovered in.
    pub fn dockerfiles_path(&self) -> PathBuf {
        self.context_dir.join(&self.dockerfiles_dir)
    }
}

/// Ensure `repo` ends with exactly one `/`.
pub fn normalize_repo(repo: &str) -> String {
    format!("{}/", repo.trim_end_matches('/'))
}
