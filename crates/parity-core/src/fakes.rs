//! In-memory fakes for the collaborator traits (testing and dry runs).
//!
//! Provides `FakeBuilder`, `FakeDiffTool` and `FakeImageStore`, which satisfy
//! the trait contracts without invoking any external tool.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::collaborators::{DiffOptions, DiffTool, GitContext, ImageBuilder, ImageStore};
use crate::determinism::CacheNamespace;
use crate::equivalence::expected_baseline;
use crate::image::{ImageDetails, ImageRef};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ---------------------------------------------------------------------------
// FakeBuilder
// ---------------------------------------------------------------------------

/// A cached build observed by [`FakeBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBuild {
    pub artifact: String,
    pub cache: String,
    pub version: u32,
}

/// Records build invocations; optionally fails or sleeps.
#[derive(Debug, Default)]
pub struct FakeBuilder {
    builds: Mutex<HashMap<String, usize>>,
    cached_builds: Mutex<Vec<CachedBuild>>,
    git_builds: Mutex<Vec<GitContext>>,
    relative_builds: Mutex<Vec<String>>,
    warm_count: Mutex<usize>,
    failing: HashSet<String>,
    failing_warm: bool,
    delay: Option<Duration>,
}

impl FakeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every build of `artifact` fails.
    pub fn failing(mut self, artifact: &str) -> Self {
        self.failing.insert(artifact.to_string());
        self
    }

    /// Every cache warm-up fails.
    pub fn failing_warm(mut self) -> Self {
        self.failing_warm = true;
        self
    }

    /// Every build sleeps for `delay` before finishing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `build` calls for `artifact`.
    pub fn build_count(&self, artifact: &str) -> usize {
        lock(&self.builds).get(artifact).copied().unwrap_or(0)
    }

    /// Total `build` calls across artifacts.
    pub fn total_builds(&self) -> usize {
        lock(&self.builds).values().sum()
    }

    pub fn cached_builds(&self) -> Vec<CachedBuild> {
        lock(&self.cached_builds).clone()
    }

    pub fn git_builds(&self) -> Vec<GitContext> {
        lock(&self.git_builds).clone()
    }

    /// Artifacts built with relative paths, in call order.
    pub fn relative_builds(&self) -> Vec<String> {
        lock(&self.relative_builds).clone()
    }

    pub fn warm_count(&self) -> usize {
        *lock(&self.warm_count)
    }

    async fn finish(&self, artifact: &str) -> anyhow::Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(artifact) {
            anyhow::bail!("build of {} exited with status 1", artifact);
        }
        Ok(())
    }
}

#[async_trait]
impl ImageBuilder for FakeBuilder {
    async fn build(&self, artifact: &str) -> anyhow::Result<()> {
        *lock(&self.builds).entry(artifact.to_string()).or_insert(0) += 1;
        self.finish(artifact).await
    }

    async fn build_cached(
        &self,
        artifact: &str,
        cache: &CacheNamespace,
        version: u32,
    ) -> anyhow::Result<()> {
        lock(&self.cached_builds).push(CachedBuild {
            artifact: artifact.to_string(),
            cache: cache.as_str().to_string(),
            version,
        });
        self.finish(artifact).await
    }

    async fn build_git_context(&self, context: &GitContext) -> anyhow::Result<()> {
        lock(&self.git_builds).push(context.clone());
        self.finish(&context.artifact).await
    }

    async fn build_relative(&self, artifact: &str) -> anyhow::Result<()> {
        lock(&self.relative_builds).push(artifact.to_string());
        self.finish(artifact).await
    }

    async fn warm_cache(&self) -> anyhow::Result<()> {
        *lock(&self.warm_count) += 1;
        if self.failing_warm {
            anyhow::bail!("warmer exited with status 1");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeDiffTool
// ---------------------------------------------------------------------------

/// Returns canned reports. Pairs without a canned report are reported as
/// identical.
#[derive(Debug, Default)]
pub struct FakeDiffTool {
    reports: HashMap<(String, String), Vec<u8>>,
    failing: HashSet<String>,
    calls: Mutex<Vec<(String, String, DiffOptions)>>,
}

impl FakeDiffTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `report` when diffing images named `image_a` and `image_b`.
    pub fn with_report(mut self, image_a: &str, image_b: &str, report: impl Into<Vec<u8>>) -> Self {
        self.reports
            .insert((image_a.to_string(), image_b.to_string()), report.into());
        self
    }

    /// Any diff involving an image named `image` fails.
    pub fn failing_for(mut self, image: &str) -> Self {
        self.failing.insert(image.to_string());
        self
    }

    /// Pairs diffed so far, as rendered references.
    pub fn calls(&self) -> Vec<(String, String)> {
        lock(&self.calls)
            .iter()
            .map(|(a, b, _)| (a.clone(), b.clone()))
            .collect()
    }

    /// Options passed to each diff, in call order.
    pub fn diff_options(&self) -> Vec<DiffOptions> {
        lock(&self.calls).iter().map(|(_, _, options)| *options).collect()
    }
}

#[async_trait]
impl DiffTool for FakeDiffTool {
    async fn diff(
        &self,
        image_a: &ImageRef,
        image_b: &ImageRef,
        options: DiffOptions,
    ) -> anyhow::Result<Vec<u8>> {
        lock(&self.calls).push((image_a.to_string(), image_b.to_string(), options));

        if self.failing.contains(&image_a.name) || self.failing.contains(&image_b.name) {
            anyhow::bail!("container-diff exited with status 1");
        }
        if let Some(report) = self
            .reports
            .get(&(image_a.name.clone(), image_b.name.clone()))
        {
            return Ok(report.clone());
        }
        let identical = expected_baseline(&image_a.name, &image_b.name);
        Ok(serde_json::to_vec(&identical.to_wire())?)
    }
}

// ---------------------------------------------------------------------------
// FakeImageStore
// ---------------------------------------------------------------------------

/// Resolves images from a fixed name → layer-count table.
#[derive(Debug, Default)]
pub struct FakeImageStore {
    layers: HashMap<String, usize>,
    default_layers: Option<usize>,
    queries: Mutex<usize>,
}

impl FakeImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, name: &str, layer_count: usize) -> Self {
        self.layers.insert(name.to_string(), layer_count);
        self
    }

    /// Layer count for images not in the table; without it they are unknown.
    pub fn with_default_layers(mut self, layer_count: usize) -> Self {
        self.default_layers = Some(layer_count);
        self
    }

    pub fn query_count(&self) -> usize {
        *lock(&self.queries)
    }
}

#[async_trait]
impl ImageStore for FakeImageStore {
    async fn image_details(&self, image: &ImageRef) -> anyhow::Result<ImageDetails> {
        *lock(&self.queries) += 1;
        let layer_count = self
            .layers
            .get(&image.name)
            .copied()
            .or(self.default_layers)
            .ok_or_else(|| anyhow::anyhow!("no such image: {}", image.name))?;
        Ok(ImageDetails {
            name: image.name.clone(),
            digest_hex: hex::encode(Sha256::digest(image.name.as_bytes())),
            layer_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::decode_report;

    #[tokio::test]
    async fn test_fake_diff_tool_defaults_to_identical() {
        let tool = FakeDiffTool::new();
        let raw = tool
            .diff(&ImageRef::daemon("a"), &ImageRef::registry("b"), DiffOptions::default())
            .await
            .unwrap();
        let report = decode_report(&raw).unwrap();
        assert_eq!(report, expected_baseline("a", "b"));
        assert_eq!(tool.calls(), vec![("daemon://a".to_string(), "b".to_string())]);
    }

    #[tokio::test]
    async fn test_fake_builder_records_git_and_relative_builds() {
        let builder = FakeBuilder::new().failing("Dockerfile_test_git");
        let context = GitContext {
            artifact: "Dockerfile_test_git".to_string(),
            dockerfile: "integration/dockerfiles/Dockerfile_test_run_2".to_string(),
            repo: "github.com/example/repo".to_string(),
        };
        assert!(builder.build_git_context(&context).await.is_err());
        builder.build_relative("Dockerfile_test_copy").await.unwrap();

        assert_eq!(builder.git_builds(), vec![context]);
        assert_eq!(builder.relative_builds(), vec!["Dockerfile_test_copy"]);
        assert_eq!(builder.total_builds(), 0);
    }

    #[tokio::test]
    async fn test_fake_builder_warm_cache() {
        let builder = FakeBuilder::new();
        builder.warm_cache().await.unwrap();
        assert_eq!(builder.warm_count(), 1);

        let failing = FakeBuilder::new().failing_warm();
        assert!(failing.warm_cache().await.is_err());
        assert_eq!(failing.warm_count(), 1);
    }

    #[tokio::test]
    async fn test_fake_image_store_unknown_image() {
        let store = FakeImageStore::new().with_image("a", 3);
        assert_eq!(
            store.image_details(&ImageRef::registry("a")).await.unwrap().layer_count,
            3
        );
        assert!(store.image_details(&ImageRef::registry("b")).await.is_err());
        assert_eq!(store.query_count(), 2);
    }
}
