//! Timing accumulation and the opt-in benchmark sink.
//!
//! Slow collaborator calls are timed under a category name. After each test
//! family the accumulated totals can be written to a named file when
//! benchmarking is enabled; otherwise writing is a no-op.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, warn};

/// Environment variable that enables the benchmark sink.
pub const BENCHMARK_ENV: &str = "BENCHMARK";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CategoryTotal {
    count: u64,
    total: Duration,
}

/// Thread-safe per-category duration totals.
#[derive(Debug, Default)]
pub struct Timings {
    categories: Mutex<BTreeMap<String, CategoryTotal>>,
}

impl Timings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one observation of `elapsed` to `category`.
    pub fn record(&self, category: &str, elapsed: Duration) {
        let mut categories = match self.categories.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = categories.entry(category.to_string()).or_default();
        entry.count += 1;
        entry.total += elapsed;
        debug!(category, elapsed_ms = elapsed.as_millis() as u64, "timing recorded");
    }

    /// Total time recorded for `category`.
    pub fn total(&self, category: &str) -> Duration {
        self.snapshot()
            .get(category)
            .map(|c| c.total)
            .unwrap_or_default()
    }

    /// Number of observations recorded for `category`.
    pub fn count(&self, category: &str) -> u64 {
        self.snapshot().get(category).map(|c| c.count).unwrap_or(0)
    }

    fn snapshot(&self) -> BTreeMap<String, CategoryTotal> {
        match self.categories.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Human-readable summary, one line per category, sorted by name.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for (category, total) in self.snapshot() {
            let _ = writeln!(
                out,
                "{}: {:?} ({} call{})",
                category,
                total.total,
                total.count,
                if total.count == 1 { "" } else { "s" }
            );
        }
        out
    }
}

/// Parse a boolean flag the permissive way: `1 t T TRUE true True` and
/// `0 f F FALSE false False`. Anything else is `None`.
pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Whether a [`BENCHMARK_ENV`] setting turns benchmarks on. Unset and
/// unrecognized values leave them off; an unrecognized value is logged.
pub fn benchmark_enabled(value: Option<&str>) -> bool {
    let Some(value) = value else {
        return false;
    };
    parse_bool_flag(value).unwrap_or_else(|| {
        warn!(
            variable = BENCHMARK_ENV,
            value = %value,
            "unrecognized boolean, benchmarks disabled"
        );
        false
    })
}

/// Writes timing summaries to `<dir>/<name>` when enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkSink {
    enabled: bool,
    dir: PathBuf,
}

impl BenchmarkSink {
    pub fn new(enabled: bool, dir: impl Into<PathBuf>) -> Self {
        Self {
            enabled,
            dir: dir.into(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, ".")
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the current summary to `name`. Returns the written path, or
    /// `None` when the sink is disabled.
    pub fn write(&self, name: &str, timings: &Timings) -> std::io::Result<Option<PathBuf>> {
        if !self.enabled {
            return Ok(None);
        }
        let path = self.dir.join(name);
        std::fs::write(&path, timings.summary())?;
        Ok(Some(path))
    }

    /// Like [`BenchmarkSink::write`], but a failure is only logged.
    pub fn write_or_warn(&self, name: &str, timings: &Timings) {
        if let Err(e) = self.write(name, timings) {
            warn!(benchmark = name, error = %e, "failed to create benchmark file");
        }
    }
}
