//! Seams to the external tools the engine depends on.
//!
//! The engine never builds images, computes deltas or talks to an image
//! daemon itself. It drives these traits and consumes their output as opaque
//! data. Process-backed implementations live in `parity-ci`; in-memory fakes
//! live in [`crate::fakes`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::determinism::CacheNamespace;
use crate::image::{ImageDetails, ImageRef};

/// A build whose context is a git repository rather than a local directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitContext {
    /// Id the reference and alternative images are named after.
    pub artifact: String,
    /// Build definition path inside the repository.
    pub dockerfile: String,
    /// Repository location without a scheme, e.g. `github.com/org/repo`.
    pub repo: String,
}

/// Builds an artifact with the reference engine and the alternative builder.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build both the reference and the alternative image for `artifact`.
    async fn build(&self, artifact: &str) -> anyhow::Result<()>;

    /// Build the alternative image for `artifact` against `cache`, tagging
    /// the result with `version`.
    async fn build_cached(
        &self,
        artifact: &str,
        cache: &CacheNamespace,
        version: u32,
    ) -> anyhow::Result<()>;

    /// Build both images from a remote git context.
    async fn build_git_context(&self, context: &GitContext) -> anyhow::Result<()>;

    /// Build both images for `artifact`, handing the alternative builder its
    /// build definition and context as relative paths.
    async fn build_relative(&self, artifact: &str) -> anyhow::Result<()>;

    /// Pre-populate the alternative builder's local base-image cache.
    async fn warm_cache(&self) -> anyhow::Result<()>;
}

/// Per-call diff tool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffOptions {
    /// Re-read both images instead of using the tool's local image cache.
    pub no_cache: bool,
}

impl DiffOptions {
    pub const UNCACHED: Self = Self { no_cache: true };
    pub const CACHED: Self = Self { no_cache: false };
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self::UNCACHED
    }
}

/// Produces a raw delta report for an image pair.
#[async_trait]
pub trait DiffTool: Send + Sync {
    async fn diff(
        &self,
        image_a: &ImageRef,
        image_b: &ImageRef,
        options: DiffOptions,
    ) -> anyhow::Result<Vec<u8>>;
}

/// Resolves layer count and digest for an image reference.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn image_details(&self, image: &ImageRef) -> anyhow::Result<ImageDetails>;
}
