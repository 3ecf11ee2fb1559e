//! Checker definitions and the command-backed checker.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::domain::{RemedyError, Result};

fn default_timeout_secs() -> u64 {
    300
}

fn default_enabled() -> bool {
    true
}

/// Builtin checkers for Cargo workspaces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinChecker {
    /// cargo fmt --all -- --check
    CargoFmt,

    /// cargo check --workspace
    CargoCheck,

    /// cargo clippy --workspace --all-targets -- -D warnings
    CargoClippy,

    /// cargo test --workspace
    CargoTest,
}

impl BuiltinChecker {
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinChecker::CargoFmt => "cargo_fmt",
            BuiltinChecker::CargoCheck => "cargo_check",
            BuiltinChecker::CargoClippy => "cargo_clippy",
            BuiltinChecker::CargoTest => "cargo_test",
        }
    }

    pub fn command(&self) -> Vec<String> {
        let argv: &[&str] = match self {
            BuiltinChecker::CargoFmt => &["cargo", "fmt", "--all", "--", "--check"],
            BuiltinChecker::CargoCheck => &["cargo", "check", "--workspace"],
            BuiltinChecker::CargoClippy => &[
                "cargo",
                "clippy",
                "--workspace",
                "--all-targets",
                "--",
                "-D",
                "warnings",
            ],
            BuiltinChecker::CargoTest => &["cargo", "test", "--workspace"],
        };
        argv.iter().map(|s| s.to_string()).collect()
    }

    pub fn default_timeout_secs(&self) -> u64 {
        match self {
            BuiltinChecker::CargoFmt | BuiltinChecker::CargoCheck => 300,
            BuiltinChecker::CargoClippy => 600,
            BuiltinChecker::CargoTest => 1200,
        }
    }

    /// Parse the short names used on the command line (`fmt,check,clippy,test`).
    pub fn from_short_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "fmt" => Some(BuiltinChecker::CargoFmt),
            "check" => Some(BuiltinChecker::CargoCheck),
            "clippy" => Some(BuiltinChecker::CargoClippy),
            "test" => Some(BuiltinChecker::CargoTest),
            _ => None,
        }
    }
}

/// Configuration for one external checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckerConfig {
    /// Checker name, unique within a run.
    pub name: String,

    /// Command to execute (first element is the executable).
    pub command: Vec<String>,

    /// Timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Whether this checker runs.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Regex selecting the output lines that identify individual failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_pattern: Option<String>,
}

impl CheckerConfig {
    pub fn from_builtin(checker: BuiltinChecker) -> Self {
        Self {
            name: checker.name().to_string(),
            command: checker.command(),
            timeout_secs: checker.default_timeout_secs(),
            enabled: true,
            failure_pattern: None,
        }
    }

    pub fn custom(name: impl Into<String>, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            command,
            timeout_secs,
            enabled: true,
            failure_pattern: None,
        }
    }

    pub fn with_failure_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.failure_pattern = Some(pattern.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Raw output of one checker invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutput {
    pub exit_code: i32,
    pub output: String,
    pub duration_ms: u64,
}

/// An opaque pass/fail verification tool.
///
/// `check` returns `Err` only when the checker could not run at all; a
/// nonzero exit is a normal [`CheckOutput`].
#[async_trait]
pub trait Checker: Send + Sync {
    fn name(&self) -> &str;

    fn timeout(&self) -> Duration;

    fn failure_pattern(&self) -> Option<&str> {
        None
    }

    async fn check(&self, workspace: &Path) -> Result<CheckOutput>;
}

/// Checker that runs a configured command inside the workspace.
#[derive(Debug, Clone)]
pub struct CommandChecker {
    config: CheckerConfig,
}

impl CommandChecker {
    pub fn new(config: CheckerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }
}

#[async_trait]
impl Checker for CommandChecker {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    fn failure_pattern(&self) -> Option<&str> {
        self.config.failure_pattern.as_deref()
    }

    async fn check(&self, workspace: &Path) -> Result<CheckOutput> {
        let start = Instant::now();

        let Some((exe, args)) = self.config.command.split_first() else {
            return Err(RemedyError::CheckerCrashed {
                checker: self.config.name.clone(),
                message: "empty command".to_string(),
            });
        };

        // Dropping the future on timeout must not leave the process behind.
        let output = Command::new(exe)
            .args(args)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RemedyError::CheckerCrashed {
                checker: self.config.name.clone(),
                message: format!("failed to spawn {exe}: {e}"),
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }

        Ok(CheckOutput {
            exit_code: output.status.code().unwrap_or(-1),
            output: text,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
