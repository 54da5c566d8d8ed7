//! Process-backed collaborators: the reference engine (`docker`), the
//! alternative builder (run as an executor container) and `container-diff`.

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use parity_core::{
    CacheNamespace, DiffOptions, DiffTool, GitContext, ImageBuilder, ImageDetails, ImageNaming,
    ImageRef, ImageStore,
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::runner::{argv, CommandRunner};

/// Mount point of the build context inside the executor and warmer containers.
const WORKSPACE: &str = "/workspace";

/// Local base-image cache shared by the warm-up step and cached builds.
const CACHE_DIR: &str = "/workspace/cache";

/// Parse the major component of an engine version string like `19.03.5`.
pub fn parse_major_version(version: &str) -> anyhow::Result<u32> {
    let major = version.trim().split('.').next().unwrap_or_default();
    major
        .parse()
        .with_context(|| format!("parsing engine version {:?}", version.trim()))
}

/// Ask the local daemon for its server version and return the major part.
pub async fn detect_engine_major_version(runner: &CommandRunner) -> anyhow::Result<u32> {
    let output = runner
        .run_checked(&argv(["docker", "version", "--format", "{{.Server.Version}}"]))
        .await
        .context("getting docker version of server")?;
    parse_major_version(&output.stdout_lossy())
}

/// Builds artifacts with `docker build` and the alternative builder's
/// executor image.
#[derive(Debug, Clone)]
pub struct DockerBuilder {
    runner: CommandRunner,
    naming: ImageNaming,
    /// Build context mounted into the executor at `/workspace`.
    context_dir: PathBuf,
    /// Directory of build definitions, relative to `context_dir`.
    dockerfiles_dir: PathBuf,
    executor_image: String,
    warmer_image: String,
    warm_images: Vec<String>,
}

impl DockerBuilder {
    pub fn new(
        runner: CommandRunner,
        naming: ImageNaming,
        context_dir: PathBuf,
        dockerfiles_dir: PathBuf,
        executor_image: String,
    ) -> Self {
        Self {
            runner,
            naming,
            context_dir,
            dockerfiles_dir,
            executor_image,
            warmer_image: crate::config::DEFAULT_WARMER_IMAGE.to_string(),
            warm_images: Vec::new(),
        }
    }

    /// Run `warmer_image` to cache `warm_images` before cached builds.
    pub fn with_warmer(mut self, warmer_image: String, warm_images: Vec<String>) -> Self {
        self.warmer_image = warmer_image;
        self.warm_images = warm_images;
        self
    }

    fn workspace_mount(&self) -> String {
        format!("{}:{}", self.context_dir.to_string_lossy(), WORKSPACE)
    }

    fn reference_command(&self, artifact: &str) -> Vec<String> {
        let dockerfile = self.context_dir.join(&self.dockerfiles_dir).join(artifact);
        argv([
            "docker".to_string(),
            "build".to_string(),
            "-t".to_string(),
            self.naming.reference_image(artifact),
            "-f".to_string(),
            dockerfile.to_string_lossy().to_string(),
            self.context_dir.to_string_lossy().to_string(),
        ])
    }

    fn executor_command(&self, artifact: &str, destination: String) -> Vec<String> {
        let dockerfile = PathBuf::from(WORKSPACE)
            .join(&self.dockerfiles_dir)
            .join(artifact);
        argv([
            "docker".to_string(),
            "run".to_string(),
            "--rm".to_string(),
            "--net=host".to_string(),
            "-v".to_string(),
            self.workspace_mount(),
            self.executor_image.clone(),
            "-f".to_string(),
            dockerfile.to_string_lossy().to_string(),
            "-d".to_string(),
            destination,
            "-c".to_string(),
            "dir:///workspace/".to_string(),
        ])
    }

    fn alternative_command(&self, artifact: &str) -> Vec<String> {
        self.executor_command(artifact, self.naming.alternative_image(artifact))
    }

    fn cached_command(&self, artifact: &str, cache: &CacheNamespace, version: u32) -> Vec<String> {
        let mut command = self.executor_command(
            artifact,
            self.naming.versioned_alternative_image(artifact, version),
        );
        command.extend(argv([
            "--cache=true".to_string(),
            format!("--cache-repo={}", cache),
            format!("--cache-dir={}", CACHE_DIR),
        ]));
        command
    }

    fn git_reference_command(&self, context: &GitContext) -> Vec<String> {
        argv([
            "docker".to_string(),
            "build".to_string(),
            "-t".to_string(),
            self.naming.reference_image(&context.artifact),
            "-f".to_string(),
            context.dockerfile.clone(),
            context.repo.clone(),
        ])
    }

    fn git_executor_command(&self, context: &GitContext) -> Vec<String> {
        argv([
            "docker".to_string(),
            "run".to_string(),
            "--rm".to_string(),
            "--net=host".to_string(),
            self.executor_image.clone(),
            "-f".to_string(),
            context.dockerfile.clone(),
            "-d".to_string(),
            self.naming.alternative_image(&context.artifact),
            "-c".to_string(),
            format!("git://{}", context.repo),
        ])
    }

    /// Executor run with the build definition and context relative to the
    /// container's working directory.
    fn relative_executor_command(&self, artifact: &str) -> Vec<String> {
        let dockerfile = self.dockerfiles_dir.join(artifact);
        argv([
            "docker".to_string(),
            "run".to_string(),
            "--rm".to_string(),
            "--net=host".to_string(),
            "-v".to_string(),
            self.workspace_mount(),
            "-w".to_string(),
            WORKSPACE.to_string(),
            self.executor_image.clone(),
            "-f".to_string(),
            dockerfile.to_string_lossy().to_string(),
            "-d".to_string(),
            self.naming.alternative_image(artifact),
            "-c".to_string(),
            ".".to_string(),
        ])
    }

    fn warm_command(&self) -> Vec<String> {
        let mut command = argv([
            "docker".to_string(),
            "run".to_string(),
            "--rm".to_string(),
            "--net=host".to_string(),
            "-v".to_string(),
            self.workspace_mount(),
            self.warmer_image.clone(),
            "-c".to_string(),
            CACHE_DIR.to_string(),
        ]);
        for image in &self.warm_images {
            command.extend(argv(["-i", image.as_str()]));
        }
        command
    }
}

#[async_trait]
impl ImageBuilder for DockerBuilder {
    async fn build(&self, artifact: &str) -> anyhow::Result<()> {
        info!(artifact = %artifact, "building reference image");
        self.runner
            .run_checked(&self.reference_command(artifact))
            .await
            .with_context(|| format!("building {} with docker", artifact))?;

        info!(artifact = %artifact, "building alternative image");
        self.runner
            .run_checked(&self.alternative_command(artifact))
            .await
            .with_context(|| format!("building {} with the executor image", artifact))?;
        Ok(())
    }

    async fn build_cached(
        &self,
        artifact: &str,
        cache: &CacheNamespace,
        version: u32,
    ) -> anyhow::Result<()> {
        self.runner
            .run_checked(&self.cached_command(artifact, cache, version))
            .await
            .with_context(|| format!("cached build #{} of {}", version, artifact))?;
        Ok(())
    }

    async fn build_git_context(&self, context: &GitContext) -> anyhow::Result<()> {
        info!(
            artifact = %context.artifact,
            repo = %context.repo,
            "building reference image from git"
        );
        self.runner
            .run_checked(&self.git_reference_command(context))
            .await
            .with_context(|| format!("building {} from git with docker", context.artifact))?;

        info!(
            artifact = %context.artifact,
            repo = %context.repo,
            "building alternative image from git"
        );
        self.runner
            .run_checked(&self.git_executor_command(context))
            .await
            .with_context(|| {
                format!("building {} from git with the executor image", context.artifact)
            })?;
        Ok(())
    }

    async fn build_relative(&self, artifact: &str) -> anyhow::Result<()> {
        self.runner
            .run_checked(&self.reference_command(artifact))
            .await
            .with_context(|| format!("building {} with docker", artifact))?;

        info!(artifact = %artifact, "building alternative image with relative paths");
        self.runner
            .run_checked(&self.relative_executor_command(artifact))
            .await
            .with_context(|| format!("building {} with relative paths", artifact))?;
        Ok(())
    }

    async fn warm_cache(&self) -> anyhow::Result<()> {
        if self.warm_images.is_empty() {
            debug!("no base images to warm");
            return Ok(());
        }
        info!(images = self.warm_images.len(), "warming base-image cache");
        self.runner
            .run_checked(&self.warm_command())
            .await
            .context("warming base-image cache")?;
        Ok(())
    }
}

/// Runs `container-diff` for filesystem and metadata deltas.
#[derive(Debug, Clone, Default)]
pub struct ContainerDiff {
    runner: CommandRunner,
}

impl ContainerDiff {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    fn command(image_a: &ImageRef, image_b: &ImageRef, options: DiffOptions) -> Vec<String> {
        let mut command = argv(["container-diff", "diff"]);
        if options.no_cache {
            command.push("--no-cache".to_string());
        }
        command.extend([image_a.to_string(), image_b.to_string()]);
        command.extend(argv(["-q", "--type=file", "--type=metadata", "--json"]));
        command
    }
}

#[async_trait]
impl DiffTool for ContainerDiff {
    async fn diff(
        &self,
        image_a: &ImageRef,
        image_b: &ImageRef,
        options: DiffOptions,
    ) -> anyhow::Result<Vec<u8>> {
        let output = self
            .runner
            .run_checked(&Self::command(image_a, image_b, options))
            .await
            .with_context(|| format!("diffing {} and {}", image_a, image_b))?;
        Ok(output.stdout)
    }
}

/// Subset of `docker image inspect` output used to derive [`ImageDetails`].
#[derive(Debug, Deserialize)]
struct InspectOutput {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "RootFS")]
    root_fs: InspectRootFs,
}

#[derive(Debug, Deserialize)]
struct InspectRootFs {
    #[serde(rename = "Layers", default)]
    layers: Vec<String>,
}

fn details_from_inspect(name: &str, raw: &[u8]) -> anyhow::Result<ImageDetails> {
    let inspect: InspectOutput =
        serde_json::from_slice(raw).with_context(|| format!("parsing inspect output for {name}"))?;
    let digest_hex = inspect
        .id
        .strip_prefix("sha256:")
        .unwrap_or(&inspect.id)
        .to_string();
    Ok(ImageDetails {
        name: name.to_string(),
        digest_hex,
        layer_count: inspect.root_fs.layers.len(),
    })
}

/// Resolves image details through the local daemon. Registry images are
/// pulled first.
#[derive(Debug, Clone, Default)]
pub struct DockerImageStore {
    runner: CommandRunner,
}

impl DockerImageStore {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ImageStore for DockerImageStore {
    async fn image_details(&self, image: &ImageRef) -> anyhow::Result<ImageDetails> {
        if !image.is_daemon() {
            self.runner
                .run_checked(&argv(["docker", "pull", image.name.as_str()]))
                .await
                .with_context(|| format!("pulling {}", image.name))?;
        }
        let output = self
            .runner
            .run_checked(&argv([
                "docker",
                "image",
                "inspect",
                "--format",
                "{{json .}}",
                image.name.as_str(),
            ]))
            .await
            .with_context(|| format!("inspecting {}", image.name))?;
        details_from_inspect(&image.name, &output.stdout)
    }
}
