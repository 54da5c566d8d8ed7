//! Layer-count verification.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::collaborators::ImageStore;
use crate::error::{LayerError, LayerMismatch};
use crate::image::{ImageDetails, ImageRef};
use crate::timing::Timings;

/// Timing category for image-store queries.
pub const LAYERS_TIMING: &str = "image_details";

/// Expected absolute layer-count difference per artifact.
///
/// Some build definitions legitimately produce a different number of layers
/// in the two builders; every other artifact must match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerOffsets {
    offsets: HashMap<String, usize>,
}

impl Default for LayerOffsets {
    fn default() -> Self {
        Self::from_pairs([("Dockerfile_test_add", 12), ("Dockerfile_test_scratch", 3)])
    }
}

impl LayerOffsets {
    pub fn empty() -> Self {
        Self {
            offsets: HashMap::new(),
        }
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        Self {
            offsets: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn insert(&mut self, artifact: &str, offset: usize) {
        self.offsets.insert(artifact.to_string(), offset);
    }

    /// Expected offset for `artifact`; 0 when absent from the table.
    pub fn expected_for(&self, artifact: &str) -> usize {
        self.offsets.get(artifact).copied().unwrap_or(0)
    }
}

async fn resolve(
    store: &dyn ImageStore,
    image: &ImageRef,
    timings: &Timings,
) -> Result<ImageDetails, LayerError> {
    let start = Instant::now();
    let details = store.image_details(image).await;
    timings.record(LAYERS_TIMING, start.elapsed());
    details.map_err(|e| LayerError::Query {
        image: image.to_string(),
        reason: format!("{e:#}"),
    })
}

/// Resolve both images and check `|layers(a) - layers(b)| == expected_offset`.
///
/// Details are resolved fresh on every call.
pub async fn verify_layers(
    store: &dyn ImageStore,
    image_a: &ImageRef,
    image_b: &ImageRef,
    expected_offset: usize,
    timings: &Timings,
) -> Result<(ImageDetails, ImageDetails), LayerError> {
    let details_a = resolve(store, image_a, timings).await?;
    let details_b = resolve(store, image_b, timings).await?;

    let actual_offset = details_a.layer_count.abs_diff(details_b.layer_count);
    if actual_offset != expected_offset {
        return Err(LayerError::Mismatch(Box::new(LayerMismatch {
            expected_offset,
            actual_offset,
            image_a: details_a,
            image_b: details_b,
        })));
    }

    tracing::debug!(
        image_a = %details_a.name,
        image_b = %details_b.name,
        offset = actual_offset,
        "layer counts verified"
    );
    Ok((details_a, details_b))
}
