//! External tool executables
//!
//! Each tool is resolved once at startup. A tool that cannot be found stays
//! unresolved; invoking it fails with `NotFound` instead of searching other
//! locations.

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct ToolBinary {
    name: String,
    path: Option<PathBuf>,
}

/// Captured result of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolBinary {
    /// Resolve `name_or_path` against `PATH` (or as a path when it contains
    /// a separator).
    pub fn resolve(name_or_path: &str) -> Self {
        Self {
            name: name_or_path.to_string(),
            path: which::which(name_or_path).ok(),
        }
    }

    /// Use an explicit executable path without any lookup.
    pub fn at(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: Some(path.into()),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[inline]
    pub fn is_available(&self) -> bool {
        self.path.is_some()
    }

    /// Run the tool to completion and capture its output.
    ///
    /// The child is killed if the returned future is dropped, so callers can
    /// bound it with `tokio::time::timeout`.
    pub async fn run<I, S>(&self, args: I) -> io::Result<ToolOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let path = self.path.as_ref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("executable '{}' was not resolved at startup", self.name),
            )
        })?;

        let output = Command::new(path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(ToolOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unresolved_tool_reports_not_found() {
        let tool = ToolBinary::resolve("subdex-definitely-missing-tool");
        assert!(!tool.is_available());
        let err = tool.run(["-version"]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let tool = ToolBinary::at("sh", "/bin/sh");
        let out = tool.run(["-c", "echo a.example.com; exit 3"]).await.unwrap();
        assert!(!out.success);
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "a.example.com");
    }
}
