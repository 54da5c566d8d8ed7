//! image-parity core
//!
//! Decides whether two container images are semantically equivalent:
//! - Decodes the diff tool's delta report into typed records
//! - Filters known-benign differences (synthetic mounts, version-skew metadata)
//! - Asserts the filtered report equals the "no difference" baseline
//! - Builds each test artifact at most once across concurrent test cases
//! - Verifies layer-count offsets per artifact

pub mod artifact;
pub mod collaborators;
pub mod compare;
pub mod determinism;
pub mod equivalence;
pub mod error;
pub mod fakes;
pub mod image;
pub mod layers;
pub mod obs;
pub mod registry;
pub mod report;
pub mod telemetry;
pub mod timing;
pub mod tolerance;
pub mod tooling;

pub use artifact::{discover_artifacts, ArtifactCatalog, Partition, DEFAULT_CACHE_ONLY};
pub use collaborators::{DiffOptions, DiffTool, GitContext, ImageBuilder, ImageStore};
pub use compare::compare_images;
pub use determinism::{verify_cache_determinism, CacheNamespace};
pub use equivalence::{check_equivalence, expected_baseline, ReportDelta};
pub use error::{
    BuildError, EquivalenceMismatch, LayerError, LayerMismatch, ParityError, ReportError, Result,
    ToolUnavailable,
};
pub use image::{ImageDetails, ImageNaming, ImageOrigin, ImageRef, DAEMON_PREFIX};
pub use layers::{verify_layers, LayerOffsets};
pub use registry::{BuildRegistry, BuildStatus};
pub use report::{
    decode_report, DeltaReport, DiffKind, DiffPayload, DiffRecord, FileDelta, FileEntry,
    MetadataDelta,
};
pub use telemetry::init_tracing;
pub use timing::{BenchmarkSink, Timings};
pub use tolerance::{filter_file, filter_metadata, MetadataSuppression, ToleranceRules};
pub use tooling::{check_tools, REQUIRED_TOOLS};

/// image-parity version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
