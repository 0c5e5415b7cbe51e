use std::{
    fs,
    io::{self, ErrorKind},
    path::PathBuf,
    time::Duration,
};

use async_trait::async_trait;
use tempfile::{Builder, TempDir};
use tokio::{process::Command, time::timeout};
use tracing::{debug, warn};

use crate::models::GeneratedFile;

pub const CHECK_TIMEOUT: Duration = Duration::from_secs(30);

const PYTHON_ARGS: &[&str] = &["-m", "py_compile"];
const NODE_ARGS: &[&str] = &["--check"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub passed: bool,
    pub output: String,
}

impl CheckOutcome {
    pub fn pass(output: impl Into<String>) -> Self {
        Self {
            passed: true,
            output: output.into(),
        }
    }

    pub fn fail(output: impl Into<String>) -> Self {
        Self {
            passed: false,
            output: output.into(),
        }
    }
}

#[async_trait]
pub trait SyntaxChecker: Send + Sync + 'static {
    async fn check(&self, file: &GeneratedFile) -> CheckOutcome;
}

pub fn extension_for(language: &str) -> &'static str {
    match language.to_ascii_lowercase().as_str() {
        "python" => ".py",
        "javascript" => ".js",
        "typescript" => ".ts",
        "html" => ".html",
        "css" => ".css",
        _ => ".txt",
    }
}

/// Runs an interpreter's offline syntax check against a scratch copy of the file.
#[derive(Debug, Clone)]
pub struct CommandSyntaxChecker {
    python_bin: String,
    node_bin: String,
    timeout: Duration,
    scratch_dir: Option<PathBuf>,
}

impl CommandSyntaxChecker {
    pub fn new(python_bin: impl Into<String>, node_bin: impl Into<String>) -> Self {
        Self {
            python_bin: python_bin.into(),
            node_bin: node_bin.into(),
            timeout: CHECK_TIMEOUT,
            scratch_dir: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    fn command_for(&self, language: &str) -> Option<(&str, &'static [&'static str])> {
        match language.to_ascii_lowercase().as_str() {
            "python" => Some((self.python_bin.as_str(), PYTHON_ARGS)),
            "javascript" | "typescript" => Some((self.node_bin.as_str(), NODE_ARGS)),
            _ => None,
        }
    }

    fn stage(&self, file: &GeneratedFile) -> io::Result<Staged> {
        let mut builder = Builder::new();
        builder.prefix("autodev-check-");
        let dir = match &self.scratch_dir {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        let path = dir
            .path()
            .join(format!("candidate{}", extension_for(&file.language)));
        fs::write(&path, file.content.as_bytes())?;
        Ok(Staged { _dir: dir, path })
    }
}

/// A private directory holding one candidate file. Dropping it removes the
/// directory with everything the checker wrote next to the file (`__pycache__`).
struct Staged {
    _dir: TempDir,
    path: PathBuf,
}

#[async_trait]
impl SyntaxChecker for CommandSyntaxChecker {
    async fn check(&self, file: &GeneratedFile) -> CheckOutcome {
        let Some((program, args)) = self.command_for(&file.language) else {
            return CheckOutcome::pass(format!("no syntax checker for {}", file.language));
        };

        // Dropped on every return below.
        let staged = match self.stage(file) {
            Ok(staged) => staged,
            Err(err) => return CheckOutcome::fail(format!("failed to stage file: {err}")),
        };

        let run = Command::new(program)
            .args(args)
            .arg(&staged.path)
            .kill_on_drop(true)
            .output();

        match timeout(self.timeout, run).await {
            Err(_) => CheckOutcome::fail(format!(
                "syntax check timed out after {}s",
                self.timeout.as_secs()
            )),
            Ok(Err(err)) if err.kind() == ErrorKind::NotFound => {
                warn!(program, path = %file.path, "syntax checker not installed; skipping check");
                CheckOutcome::pass(format!("{program} not installed; check skipped"))
            }
            Ok(Err(err)) => CheckOutcome::fail(format!("failed to run {program}: {err}")),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let text = if stderr.is_empty() {
                    String::from_utf8_lossy(&output.stdout).trim().to_string()
                } else {
                    stderr
                };
                debug!(path = %file.path, status = %output.status, "syntax check finished");
                if output.status.success() {
                    CheckOutcome::pass(text)
                } else {
                    CheckOutcome::fail(text)
                }
            }
        }
    }
}
