//! image-parity - acceptance oracle for container image builders
//!
//! ## Commands
//!
//! - `check-tools`: verify the external tools are on `PATH`
//! - `run`: build every artifact with both builders and run the
//!   equivalence, git-context, layer, cache and relative-paths families
//! - `compare`: decode, filter and assert a saved diff report offline

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use parity_ci::{
    detect_engine_major_version, Collaborators, CommandRunner, ContainerDiff, DockerBuilder,
    DockerImageStore, Suite, SuiteConfig, SuiteReport, DEFAULT_EXECUTOR_IMAGE, DEFAULT_GIT_REPO,
    DEFAULT_REPO,
};
use parity_core::{
    check_equivalence, check_tools, decode_report, discover_artifacts, ImageNaming,
    ToleranceRules, DEFAULT_CACHE_ONLY, REQUIRED_TOOLS,
};

#[derive(Parser)]
#[command(name = "image-parity")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Verify that two container image builders produce equivalent images", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and reports
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that every required external tool is on PATH
    CheckTools,

    /// Run the test families against a directory of build definitions
    Run(RunArgs),

    /// Assert a saved diff report equals the no-difference baseline
    Compare {
        /// Path to the diff tool's JSON output
        report: PathBuf,

        /// Name of the first image in the report
        #[arg(long)]
        image_a: String,

        /// Name of the second image in the report
        #[arg(long)]
        image_b: String,

        /// Reference engine major version
        #[arg(long, env = "PARITY_ENGINE_MAJOR_VERSION", default_value_t = 19)]
        engine_major_version: u32,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Build context mounted into the alternative builder
    #[arg(long, default_value = ".")]
    context_dir: PathBuf,

    /// Directory of build definitions, relative to the context
    #[arg(long, default_value = "dockerfiles")]
    dockerfiles_dir: PathBuf,

    /// Image repository prefix
    #[arg(long, env = "PARITY_IMAGE_REPO", default_value = DEFAULT_REPO)]
    repo: String,

    /// Executor image of the alternative builder
    #[arg(long, default_value = DEFAULT_EXECUTOR_IMAGE)]
    executor_image: String,

    /// Reference engine major version (detected from the daemon if omitted)
    #[arg(long, env = "PARITY_ENGINE_MAJOR_VERSION")]
    engine_major_version: Option<u32>,

    /// Artifacts to skip in every family (comma-separated)
    #[arg(long, value_delimiter = ',')]
    ignore: Vec<String>,

    /// Artifacts exercised only by the cache family (comma-separated)
    #[arg(long, value_delimiter = ',')]
    cache_only: Option<Vec<String>>,

    /// Write timing summaries after each family (unrecognized values disable it)
    #[arg(long, env = "BENCHMARK", num_args = 0..=1, default_missing_value = "true")]
    benchmark: Option<String>,

    /// Directory for benchmark files
    #[arg(long, default_value = ".")]
    benchmark_dir: PathBuf,

    /// Maximum concurrently running cases per family
    #[arg(long, default_value_t = 4)]
    max_concurrent: usize,

    /// Per-command timeout in seconds (0 disables)
    #[arg(long, default_value_t = 0)]
    command_timeout_secs: u64,

    #[arg(long)]
    skip_equivalence: bool,

    #[arg(long)]
    skip_layers: bool,

    #[arg(long)]
    skip_cache: bool,

    #[arg(long)]
    skip_git_context: bool,

    #[arg(long)]
    skip_relative_paths: bool,

    /// Repository the git-context family builds from
    #[arg(long, env = "PARITY_GIT_REPO", default_value = DEFAULT_GIT_REPO)]
    git_repo: String,

    /// Also write the suite report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

impl RunArgs {
    fn benchmark_enabled(&self) -> bool {
        parity_core::timing::benchmark_enabled(self.benchmark.as_deref())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    parity_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::CheckTools => cmd_check_tools(),
        Commands::Run(args) => cmd_run(args, cli.json).await,
        Commands::Compare {
            report,
            image_a,
            image_b,
            engine_major_version,
        } => cmd_compare(&report, &image_a, &image_b, engine_major_version),
    }
}

fn cmd_check_tools() -> Result<()> {
    check_tools(REQUIRED_TOOLS)?;
    println!("All required tools found: {}", REQUIRED_TOOLS.join(", "));
    Ok(())
}

async fn cmd_run(args: RunArgs, json: bool) -> Result<()> {
    check_tools(REQUIRED_TOOLS).context("Required tools are missing")?;

    let runner = if args.command_timeout_secs > 0 {
        CommandRunner::with_timeout(Duration::from_secs(args.command_timeout_secs))
    } else {
        CommandRunner::new()
    };

    let engine_major_version = match args.engine_major_version {
        Some(version) => version,
        None => detect_engine_major_version(&runner)
            .await
            .context("Failed to detect reference engine version")?,
    };
    info!(engine_major_version, "reference engine version");

    let config = SuiteConfig {
        benchmark: args.benchmark_enabled(),
        dockerfiles_dir: args.dockerfiles_dir,
        context_dir: args.context_dir,
        executor_image: args.executor_image,
        engine_major_version,
        ignore: args.ignore,
        cache_only: args
            .cache_only
            .unwrap_or_else(|| DEFAULT_CACHE_ONLY.iter().map(|s| s.to_string()).collect()),
        max_concurrent: args.max_concurrent,
        run_equivalence: !args.skip_equivalence,
        run_layers: !args.skip_layers,
        run_cache: !args.skip_cache,
        run_git_context: !args.skip_git_context,
        run_relative_paths: !args.skip_relative_paths,
        git_repo: args.git_repo,
        benchmark_dir: args.benchmark_dir,
        ..SuiteConfig::default()
    }
    .with_repo(&args.repo);

    let dockerfiles = config.dockerfiles_path();
    let artifacts = discover_artifacts(&dockerfiles)
        .with_context(|| format!("Failed to list build definitions in {:?}", dockerfiles))?;
    info!(count = artifacts.len(), dir = ?dockerfiles, "artifacts discovered");

    let collaborators = Collaborators {
        builder: Arc::new(
            DockerBuilder::new(
                runner.clone(),
                ImageNaming::new(&config.repo),
                config.context_dir.clone(),
                config.dockerfiles_dir.clone(),
                config.executor_image.clone(),
            )
            .with_warmer(config.warmer_image.clone(), config.warm_images.clone()),
        ),
        diff_tool: Arc::new(ContainerDiff::new(runner.clone())),
        image_store: Arc::new(DockerImageStore::new(runner)),
    };

    let suite = Suite::new(config, artifacts, collaborators);
    let report = suite.run_all().await;

    if let Some(path) = &args.report {
        write_report(path, &report)?;
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.verdict.passed {
        anyhow::bail!("{}", report.verdict.message);
    }
    Ok(())
}

fn write_report(path: &Path, report: &SuiteReport) -> Result<()> {
    let body = serde_json::to_string_pretty(report)?;
    std::fs::write(path, body).with_context(|| format!("Failed to write report to {:?}", path))
}

fn print_report(report: &SuiteReport) {
    println!("Run {}", report.run_id);
    println!("Reference engine: {}.x", report.engine_major_version);
    for family in &report.families {
        println!();
        println!(
            "[{}] {} passed, {} failed, {} skipped ({} ms)",
            family.family,
            family.passed(),
            family.failed(),
            family.skipped(),
            family.duration_ms
        );
        for case in &family.cases {
            println!("  {:<8} {}", case.outcome.label(), case.artifact);
        }
    }
    println!();
    println!("Timings:");
    for line in report.timings.lines() {
        println!("  {}", line);
    }
    println!();
    println!("{}", report.verdict.message);
    for violation in &report.verdict.violations {
        println!("  - {}", violation);
    }
}

fn cmd_compare(
    report: &Path,
    image_a: &str,
    image_b: &str,
    engine_major_version: u32,
) -> Result<()> {
    let raw = std::fs::read(report).with_context(|| format!("Failed to read {:?}", report))?;
    let decoded = decode_report(&raw)?;
    let rules = ToleranceRules::for_engine_version(engine_major_version);

    check_equivalence(decoded, &rules, image_a, image_b)?;
    println!("{} and {} are equivalent", image_a, image_b);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    fn run_args(args: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(["image-parity", "run"].iter().chain(args)).unwrap();
        match cli.command {
            Commands::Run(args) => args,
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_benchmark_flag_parsing() {
        assert!(run_args(&["--benchmark"]).benchmark_enabled());
        assert!(run_args(&["--benchmark", "T"]).benchmark_enabled());
        assert!(!run_args(&["--benchmark", "0"]).benchmark_enabled());
    }

    #[test]
    fn test_unrecognized_benchmark_value_disables_benchmarks() {
        let args = run_args(&["--benchmark", "yes"]);
        assert_eq!(args.benchmark.as_deref(), Some("yes"));
        assert!(!args.benchmark_enabled());
    }

    #[test]
    fn test_new_family_flags() {
        let args = run_args(&[
            "--skip-git-context",
            "--skip-relative-paths",
            "--git-repo",
            "github.com/example/builder",
        ]);
        assert!(args.skip_git_context);
        assert!(args.skip_relative_paths);
        assert_eq!(args.git_repo, "github.com/example/builder");
    }

    #[test]
    fn test_run_args_parse_lists() {
        let cli = Cli::try_parse_from([
            "image-parity",
            "run",
            "--engine-major-version",
            "18",
            "--ignore",
            "Dockerfile_test_a,Dockerfile_test_b",
            "--skip-cache",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.engine_major_version, Some(18));
                assert_eq!(args.ignore, vec!["Dockerfile_test_a", "Dockerfile_test_b"]);
                assert!(args.cache_only.is_none());
                assert!(args.skip_cache);
            }
            _ => panic!("expected run"),
        }
    }
}
