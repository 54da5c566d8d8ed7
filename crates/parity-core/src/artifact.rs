//! Build artifacts and their static partitions.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// File name prefix of a build definition.
pub const ARTIFACT_PREFIX: &str = "Dockerfile_test";

/// Artifacts exercised only by the cache-determinism flow by default.
pub const DEFAULT_CACHE_ONLY: &[&str] = &["Dockerfile_test_cache", "Dockerfile_test_cache_install"];

/// Static partition of an artifact, fixed at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    /// Never exercised.
    Ignored,
    /// Exercised only by the cache-determinism flow.
    CacheOnly,
    /// Exercised by the equivalence and layer families.
    Normal,
}

/// The registered artifacts, each with its partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactCatalog {
    partitions: BTreeMap<String, Partition>,
}

impl ArtifactCatalog {
    /// Register `artifacts`, placing them in partitions from the two
    /// membership lists. Everything else is `Normal`. An artifact on both
    /// lists is ignored.
    pub fn new<I, S>(artifacts: I, ignore: &[String], cache_only: &[String]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let partitions: BTreeMap<String, Partition> = artifacts
            .into_iter()
            .map(Into::into)
            .map(|id| {
                let partition = if ignore.contains(&id) {
                    Partition::Ignored
                } else if cache_only.contains(&id) {
                    Partition::CacheOnly
                } else {
                    Partition::Normal
                };
                (id, partition)
            })
            .collect();

        for listed in ignore.iter().chain(cache_only) {
            if !partitions.contains_key(listed) {
                warn!(artifact = %listed, "partition list names an unregistered artifact");
            }
        }

        Self { partitions }
    }

    pub fn partition(&self, artifact: &str) -> Option<Partition> {
        self.partitions.get(artifact).copied()
    }

    pub fn contains(&self, artifact: &str) -> bool {
        self.partitions.contains_key(artifact)
    }

    /// All registered artifacts in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.partitions.keys().map(String::as_str)
    }

    /// Artifacts in `partition`, sorted.
    pub fn in_partition(&self, partition: Partition) -> Vec<String> {
        self.partitions
            .iter()
            .filter(|(_, p)| **p == partition)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

/// Enumerate build definitions in `dir`: every regular file whose name
/// starts with [`ARTIFACT_PREFIX`]. Sorted by name.
pub fn discover_artifacts(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut found = BTreeSet::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with(ARTIFACT_PREFIX) {
                found.insert(name.to_string());
            }
        }
    }
    Ok(found.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_partitions_from_lists() {
        let catalog = ArtifactCatalog::new(
            ["Dockerfile_test_run", "Dockerfile_test_cache", "Dockerfile_test_add"],
            &strings(&["Dockerfile_test_add"]),
            &strings(&["Dockerfile_test_cache"]),
        );
        assert_eq!(catalog.partition("Dockerfile_test_run"), Some(Partition::Normal));
        assert_eq!(catalog.partition("Dockerfile_test_cache"), Some(Partition::CacheOnly));
        assert_eq!(catalog.partition("Dockerfile_test_add"), Some(Partition::Ignored));
        assert_eq!(catalog.partition("Dockerfile_test_missing"), None);
        assert_eq!(catalog.in_partition(Partition::Normal), strings(&["Dockerfile_test_run"]));
    }

    #[test]
    fn test_ignore_wins_over_cache_only() {
        let both = strings(&["Dockerfile_test_cache"]);
        let catalog = ArtifactCatalog::new(["Dockerfile_test_cache"], &both, &both);
        assert_eq!(catalog.partition("Dockerfile_test_cache"), Some(Partition::Ignored));
    }

    #[test]
    fn test_discover_artifacts_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "Dockerfile_test_z",
            "Dockerfile_test_a",
            "Dockerfile_onbuild_base",
            "README",
        ] {
            std::fs::write(dir.path().join(name), "FROM scratch\n").unwrap();
        }
        std::fs::create_dir(dir.path().join("Dockerfile_test_dir")).unwrap();

        let found = discover_artifacts(dir.path()).unwrap();
        assert_eq!(found, strings(&["Dockerfile_test_a", "Dockerfile_test_z"]));
    }

    #[test]
    fn test_discover_missing_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_artifacts(&dir.path().join("nope")).is_err());
    }
}
