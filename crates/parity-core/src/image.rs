//! Image references, naming and resolved details.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix marking an image loaded into the local daemon.
pub const DAEMON_PREFIX: &str = "daemon://";

/// Where an image reference points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageOrigin {
    /// Loaded into the local image daemon.
    Daemon,
    /// A registry coordinate.
    Registry,
}

/// An image reference as passed to the diff tool and the image store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub name: String,
    pub origin: ImageOrigin,
}

impl ImageRef {
    pub fn daemon(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: ImageOrigin::Daemon,
        }
    }

    pub fn registry(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: ImageOrigin::Registry,
        }
    }

    /// Parse a reference string, honouring the `daemon://` prefix.
    pub fn parse(reference: &str) -> Self {
        match reference.strip_prefix(DAEMON_PREFIX) {
            Some(name) => Self::daemon(name),
            None => Self::registry(reference),
        }
    }

    pub fn is_daemon(&self) -> bool {
        self.origin == ImageOrigin::Daemon
    }
}

/// Renders the reference the way the diff tool expects it.
impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            ImageOrigin::Daemon => write!(f, "{}{}", DAEMON_PREFIX, self.name),
            ImageOrigin::Registry => f.write_str(&self.name),
        }
    }
}

/// Details of an image resolved from the image store. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDetails {
    pub name: String,
    pub digest_hex: String,
    pub layer_count: usize,
}

impl fmt::Display for ImageDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Image: [{}] Digest: [{}] Number of Layers: [{}]",
            self.name, self.digest_hex, self.layer_count
        )
    }
}

const REFERENCE_PREFIX: &str = "docker-";
const ALTERNATIVE_PREFIX: &str = "kaniko-";

/// Derives image names for an artifact inside a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageNaming {
    repo: String,
}

impl ImageNaming {
    /// `repo` is normalized to end with `/`.
    pub fn new(repo: &str) -> Self {
        let mut repo = repo.to_string();
        if !repo.ends_with('/') {
            repo.push('/');
        }
        Self { repo }
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Image built by the reference engine.
    pub fn reference_image(&self, artifact: &str) -> String {
        format!("{}{}{}", self.repo, REFERENCE_PREFIX, artifact).to_lowercase()
    }

    /// Image built by the alternative builder.
    pub fn alternative_image(&self, artifact: &str) -> String {
        format!("{}{}{}", self.repo, ALTERNATIVE_PREFIX, artifact).to_lowercase()
    }

    /// Image produced by the `version`-th build in the cache flow.
    pub fn versioned_alternative_image(&self, artifact: &str, version: u32) -> String {
        format!("{}{}", self.alternative_image(artifact), version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_daemon_prefix() {
        let image = ImageRef::parse("daemon://gcr.io/test/docker-a");
        assert!(image.is_daemon());
        assert_eq!(image.name, "gcr.io/test/docker-a");
        assert_eq!(image.to_string(), "daemon://gcr.io/test/docker-a");
    }

    #[test]
    fn test_parse_registry_reference() {
        let image = ImageRef::parse("gcr.io/test/kaniko-a");
        assert_eq!(image.origin, ImageOrigin::Registry);
        assert_eq!(image.to_string(), "gcr.io/test/kaniko-a");
    }

    #[test]
    fn test_naming_normalizes_repo_and_lowercases() {
        let naming = ImageNaming::new("gcr.io/kaniko-test");
        assert_eq!(naming.repo(), "gcr.io/kaniko-test/");
        assert_eq!(
            naming.reference_image("Dockerfile_test_run"),
            "gcr.io/kaniko-test/docker-dockerfile_test_run"
        );
        assert_eq!(
            naming.alternative_image("Dockerfile_test_run"),
            "gcr.io/kaniko-test/kaniko-dockerfile_test_run"
        );
        assert_eq!(
            naming.versioned_alternative_image("Dockerfile_test_cache", 1),
            "gcr.io/kaniko-test/kaniko-dockerfile_test_cache1"
        );
    }

    #[test]
    fn test_details_display() {
        let details = ImageDetails {
            name: "img".to_string(),
            digest_hex: "abc".to_string(),
            layer_count: 3,
        };
        assert_eq!(
            details.to_string(),
            "Image: [img] Digest: [abc] Number of Layers: [3]"
        );
    }
}
