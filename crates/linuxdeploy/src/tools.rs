use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

/// Locate an external tool on PATH. Returns None when the tool is absent;
/// callers decide whether that is fatal (ldd) or degrades a stage (patchelf).
pub fn find_tool(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Run a tool and capture its stdout as UTF-8 (lossy). Non-zero exit is an
/// error carrying the tool name, status, and trimmed stderr.
pub fn run_capture<I, S>(program: &Path, args: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| Error::msg(format!("failed to run {}: {e}", program.display())))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::msg(format!(
            "{} failed ({}): {}",
            program.display(),
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a tool for its side effect only.
pub fn run_status<I, S>(program: &Path, args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|e| Error::msg(format!("failed to run {}: {e}", program.display())))?;

    if !status.success() {
        return Err(Error::msg(format!(
            "{} failed: {status}",
            program.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_capture_reports_missing_binary() {
        let err = run_capture(Path::new("/nonexistent/tool-xyz"), ["--version"])
            .expect_err("missing tool");
        assert!(err.to_string().contains("failed to run"), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn run_capture_collects_stdout() {
        let out = run_capture(Path::new("/bin/sh"), ["-c", "echo hello"]).expect("sh runs");
        assert_eq!(out.trim(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn run_status_classifies_nonzero_exit() {
        let err = run_status(Path::new("/bin/sh"), ["-c", "exit 3"]).expect_err("exit 3");
        assert!(err.to_string().contains("failed"), "{err}");
    }
}
