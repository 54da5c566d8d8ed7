//! Cache-determinism flow: two builds against one fresh cache must agree.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::collaborators::{DiffOptions, DiffTool, ImageBuilder};
use crate::compare::compare_images;
use crate::error::{ParityError, Result};
use crate::image::{ImageNaming, ImageRef};
use crate::timing::Timings;
use crate::tolerance::ToleranceRules;

/// Timing category for cached builds.
pub const CACHED_BUILD_TIMING: &str = "cached_build";

/// A cache location shared by the builds of one determinism check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheNamespace(String);

impl CacheNamespace {
    /// A new namespace under `<repo>cache/`, named by the current time in
    /// nanoseconds.
    pub fn fresh(naming: &ImageNaming) -> Self {
        let now = Utc::now();
        let nanos = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000));
        Self(format!("{}cache/{}", naming.repo(), nanos))
    }

    pub fn new(namespace: impl Into<String>) -> Self {
        Self(namespace.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build `artifact` twice into one fresh cache namespace and assert the two
/// images are equivalent. The first build populates the cache, the second
/// is expected to reuse it. The diff may reuse the diff tool's image cache.
pub async fn verify_cache_determinism(
    builder: &dyn ImageBuilder,
    diff_tool: &dyn DiffTool,
    rules: &ToleranceRules,
    naming: &ImageNaming,
    artifact: &str,
    timings: &Timings,
) -> Result<CacheNamespace> {
    let cache = CacheNamespace::fresh(naming);
    info!(artifact = %artifact, cache = %cache, "building twice against fresh cache");

    for version in 0..2 {
        let start = std::time::Instant::now();
        let built = builder.build_cached(artifact, &cache, version).await;
        timings.record(CACHED_BUILD_TIMING, start.elapsed());
        built.map_err(|e| {
            ParityError::collaborator(&format!("cached build #{version}"), artifact, &e)
        })?;
    }

    let first = ImageRef::registry(naming.versioned_alternative_image(artifact, 0));
    let second = ImageRef::registry(naming.versioned_alternative_image(artifact, 1));
    compare_images(
        diff_tool,
        rules,
        artifact,
        &first,
        &second,
        DiffOptions::CACHED,
        timings,
    )
    .await?;
    Ok(cache)
}
