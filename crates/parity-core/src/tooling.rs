//! Startup check for the external tools the suite shells out to.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::error::ToolUnavailable;

/// Tools every suite run needs on `PATH`.
pub const REQUIRED_TOOLS: &[&str] = &["container-diff", "docker"];

/// Locate `tool` in the directories of `path_var` (a `PATH`-style list).
pub fn find_in_path(tool: &str, path_var: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .map(|dir| dir.join(tool))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

/// Check every tool in `tools` against `path_var`, reporting all missing
/// ones together.
pub fn check_tools_in(tools: &[&str], path_var: &OsStr) -> Result<(), ToolUnavailable> {
    let missing: Vec<String> = tools
        .iter()
        .filter(|tool| find_in_path(tool, path_var).is_none())
        .map(|tool| tool.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        for tool in &missing {
            tracing::error!(tool = %tool, "you must have {} installed and on your PATH", tool);
        }
        Err(ToolUnavailable { missing })
    }
}

/// Check `tools` against the process `PATH`.
pub fn check_tools(tools: &[&str]) -> Result<(), ToolUnavailable> {
    let path_var = std::env::var_os("PATH").unwrap_or_default();
    check_tools_in(tools, &path_var)
}
