//! Tolerance rules: known-benign differences removed before comparison.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::report::{DeltaReport, DiffPayload, FileDelta, FileEntry, MetadataDelta};

/// Paths under these prefixes are synthetic mounts, never a build defect.
pub const DEFAULT_ALLOWED_PATH_PREFIXES: &[&str] = &["/sys"];

/// Metadata key whose value drifts between reference engine versions.
pub const ARGS_ESCAPED_KEY: &str = "ArgsEscaped";

/// Reference engine major version whose metadata is taken as ground truth.
pub const ARGS_ESCAPED_EXEMPT_VERSION: u32 = 19;

/// Version-gated metadata suppression.
///
/// Engine 18.x builds images with `ArgsEscaped: true` while 19.x writes
/// `ArgsEscaped: false`. Outside the exempt version the key is dropped from
/// metadata deltas. Temporary compatibility shim: remove once the suite no
/// longer runs against pre-19 reference engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataSuppression {
    pub key_prefix: String,
    pub engine_major_version: u32,
    pub exempt_version: u32,
}

impl MetadataSuppression {
    pub fn args_escaped(engine_major_version: u32) -> Self {
        Self {
            key_prefix: ARGS_ESCAPED_KEY.to_string(),
            engine_major_version,
            exempt_version: ARGS_ESCAPED_EXEMPT_VERSION,
        }
    }

    /// Whether entries starting with `key_prefix` are removed.
    pub fn is_active(&self) -> bool {
        self.engine_major_version != self.exempt_version
    }
}

/// Process-wide tolerance rules. Built once at startup, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToleranceRules {
    pub allowed_path_prefixes: Vec<String>,
    pub metadata_suppression: MetadataSuppression,
}

impl ToleranceRules {
    /// Default rules for the detected reference engine major version.
    pub fn for_engine_version(engine_major_version: u32) -> Self {
        Self {
            allowed_path_prefixes: DEFAULT_ALLOWED_PATH_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            metadata_suppression: MetadataSuppression::args_escaped(engine_major_version),
        }
    }

    pub fn with_allowed_path_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.allowed_path_prefixes = prefixes;
        self
    }

    /// Whether `path` lies at or under an allowed prefix.
    ///
    /// Matching is by path component, so `/sys` covers `/sys/kernel` but not
    /// `/sysroot`. Both sides are normalized lexically first: `/sys/../etc`
    /// is `/etc`.
    pub fn is_allowed_path(&self, path: &str) -> bool {
        let path = normalize_lexically(Path::new(path));
        self.allowed_path_prefixes
            .iter()
            .any(|prefix| path.starts_with(normalize_lexically(Path::new(prefix))))
    }

    /// Filter every File and Metadata record in place. Other kinds are left
    /// untouched.
    pub fn apply(&self, report: &mut DeltaReport) {
        for record in &mut report.records {
            match &mut record.payload {
                DiffPayload::File(delta) => self.apply_file(delta),
                DiffPayload::Metadata(delta) => self.apply_metadata(delta),
                DiffPayload::Unresolved { .. } => {}
            }
        }
    }

    /// `mods` is never filtered: any modification is a real difference.
    pub fn apply_file(&self, delta: &mut FileDelta) {
        delta.adds = filter_file(&delta.adds, self);
        delta.dels = filter_file(&delta.dels, self);
    }

    pub fn apply_metadata(&self, delta: &mut MetadataDelta) {
        delta.adds = filter_metadata(&delta.adds, self);
        delta.dels = filter_metadata(&delta.dels, self);
    }
}

/// Resolve `.` and `..` without touching the filesystem. `..` never climbs
/// above the root.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => normalized.push(component),
            },
            other => normalized.push(other),
        }
    }
    normalized
}

/// Drop entries under an allowed path prefix, keeping order.
pub fn filter_file(entries: &[FileEntry], rules: &ToleranceRules) -> Vec<FileEntry> {
    entries
        .iter()
        .filter(|entry| !rules.is_allowed_path(&entry.path))
        .cloned()
        .collect()
}

/// Drop entries starting with the suppressed key, keeping order.
///
/// This is a plain string prefix match, unlike [`filter_file`]: the metadata
/// entry is `Key:Value`, not a path.
pub fn filter_metadata(entries: &[String], rules: &ToleranceRules) -> Vec<String> {
    let rule = &rules.metadata_suppression;
    if !rule.is_active() {
        return entries.to_vec();
    }
    entries
        .iter()
        .filter(|entry| !entry.starts_with(&rule.key_prefix))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(paths: &[&str]) -> Vec<FileEntry> {
        paths.iter().map(|p| FileEntry::new(*p, 0)).collect()
    }

    #[test]
    fn test_path_prefix_respects_boundaries() {
        let rules = ToleranceRules::for_engine_version(18);
        assert!(rules.is_allowed_path("/sys"));
        assert!(rules.is_allowed_path("/sys/kernel"));
        assert!(rules.is_allowed_path("/sys/fs/cgroup/memory"));
        assert!(!rules.is_allowed_path("/sysroot"));
        assert!(!rules.is_allowed_path("/sysfoo/bar"));
        assert!(!rules.is_allowed_path("/usr/sys"));
    }

    #[test]
    fn test_path_prefix_resolves_dot_segments() {
        let rules = ToleranceRules::for_engine_version(18);
        assert!(!rules.is_allowed_path("/sys/../etc/passwd"));
        assert!(!rules.is_allowed_path("/sys/kernel/../../etc"));
        assert!(rules.is_allowed_path("/sys/./kernel"));
        assert!(rules.is_allowed_path("/etc/../sys/fs"));
        assert!(rules.is_allowed_path("/../sys/fs"));
    }

    #[test]
    fn test_dot_segment_escape_is_not_filtered() {
        let rules = ToleranceRules::for_engine_version(18);
        let filtered = filter_file(&entries(&["/sys/../etc/shadow", "/sys/./x"]), &rules);
        assert_eq!(filtered, entries(&["/sys/../etc/shadow"]));
    }

    #[test]
    fn test_filter_file_keeps_order() {
        let rules = ToleranceRules::for_engine_version(18);
        let filtered = filter_file(&entries(&["/b", "/sys/x", "/a", "/sysroot"]), &rules);
        assert_eq!(filtered, entries(&["/b", "/a", "/sysroot"]));
    }

    #[test]
    fn test_filter_file_is_idempotent() {
        let rules = ToleranceRules::for_engine_version(18);
        let once = filter_file(&entries(&["/sys/a", "/etc/b", "/sys", "/var"]), &rules);
        let twice = filter_file(&once, &rules);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_metadata_suppressed_outside_exempt_version() {
        let rules = ToleranceRules::for_engine_version(18);
        let input = vec!["ArgsEscaped:true".to_string(), "Env:[A=1]".to_string()];
        assert_eq!(filter_metadata(&input, &rules), vec!["Env:[A=1]".to_string()]);
    }

    #[test]
    fn test_metadata_kept_at_exempt_version() {
        let rules = ToleranceRules::for_engine_version(19);
        let input = vec!["ArgsEscaped:false".to_string(), "Env:[A=1]".to_string()];
        assert_eq!(filter_metadata(&input, &rules), input);
    }

    #[test]
    fn test_metadata_prefix_is_plain_string_match() {
        let rules = ToleranceRules::for_engine_version(20);
        let input = vec!["ArgsEscapedExtra:1".to_string()];
        assert!(filter_metadata(&input, &rules).is_empty());
    }

    #[test]
    fn test_filter_metadata_is_idempotent() {
        let rules = ToleranceRules::for_engine_version(18);
        let input = vec![
            "Cmd:[sh]".to_string(),
            "ArgsEscaped:true".to_string(),
            "User:root".to_string(),
        ];
        let once = filter_metadata(&input, &rules);
        assert_eq!(filter_metadata(&once, &rules), once);
    }

    #[test]
    fn test_mods_are_never_filtered() {
        let rules = ToleranceRules::for_engine_version(18);
        let mut delta = FileDelta {
            adds: entries(&["/sys/a"]),
            dels: entries(&["/sys/b"]),
            mods: entries(&["/sys/c"]),
        };
        rules.apply_file(&mut delta);
        assert!(delta.adds.is_empty());
        assert!(delta.dels.is_empty());
        assert_eq!(delta.mods, entries(&["/sys/c"]));
    }

    #[test]
    fn test_custom_prefixes() {
        let rules = ToleranceRules::for_engine_version(18)
            .with_allowed_path_prefixes(vec!["/proc".to_string(), "/dev".to_string()]);
        assert!(rules.is_allowed_path("/proc/1/status"));
        assert!(rules.is_allowed_path("/dev/null"));
        assert!(!rules.is_allowed_path("/sys/kernel"));
    }
}
