//! image-parity CI driver
//!
//! Process-backed collaborators (`docker`, `container-diff`) and the suite
//! that runs the test families, each family's cases concurrently.

pub mod config;
pub mod gate;
pub mod runner;
pub mod suite;
pub mod tools;

pub use config::{
    normalize_repo, SuiteConfig, DEFAULT_EXECUTOR_IMAGE, DEFAULT_GIT_DOCKERFILE, DEFAULT_GIT_REPO,
    DEFAULT_REPO, DEFAULT_WARMER_IMAGE, GIT_CONTEXT_ARTIFACT,
};
pub use gate::{GateVerdict, SuiteGate};
pub use runner::{argv, CommandOutput, CommandRunner};
pub use suite::{
    CaseOutcome, CaseReport, Collaborators, Family, FamilyReport, Suite, SuiteReport,
};
pub use tools::{
    detect_engine_major_version, parse_major_version, ContainerDiff, DockerBuilder,
    DockerImageStore,
};
