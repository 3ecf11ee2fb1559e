//! Run configuration loaded from `remedy.toml`.
//!
//! Every section is optional; missing values fall back to the defaults below.
//!
//! ```toml
//! [run]
//! max_attempts = 3
//! max_generations = 3
//! max_workers = 4
//! report_dir = ".remedy/runs"
//!
//! [approval]
//! require_for = ["CRITICAL"]
//!
//! [[checkers]]
//! name = "fmt"
//! command = ["cargo", "fmt", "--all", "--", "--check"]
//! timeout_secs = 300
//!
//! [[fixes]]
//! category = "fmt"
//! primary = ["cargo", "fmt", "--all"]
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{RemedyError, Result, Severity, MAX_ATTEMPTS, MAX_CASCADE_GENERATIONS};
use crate::fix::command::FixCommandConfig;
use crate::verify::checker::CheckerConfig;

/// Execution bounds for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Fix attempts per item, at most 3.
    pub max_attempts: u32,
    /// Cascade generations per run, at most 3.
    pub max_generations: u32,
    /// Concurrent fix workers.
    pub max_workers: usize,
    /// Directory receiving `<run_id>/report.json`.
    pub report_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            max_generations: MAX_CASCADE_GENERATIONS,
            max_workers: 4,
            report_dir: PathBuf::from(".remedy/runs"),
        }
    }
}

/// Approval routing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Severities routed to `NeedsApproval` before any edit is made.
    pub require_for: Vec<Severity>,
}

impl ApprovalConfig {
    pub fn requires_approval(&self, severity: Severity) -> bool {
        self.require_for.contains(&severity)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemedyConfig {
    pub run: RunConfig,
    pub approval: ApprovalConfig,
    pub checkers: Vec<CheckerConfig>,
    pub fixes: Vec<FixCommandConfig>,
}

impl RemedyConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_ATTEMPTS).contains(&self.run.max_attempts) {
            return Err(RemedyError::InvalidConfig(format!(
                "run.max_attempts must be between 1 and {MAX_ATTEMPTS}, got {}",
                self.run.max_attempts
            )));
        }
        if !(1..=MAX_CASCADE_GENERATIONS).contains(&self.run.max_generations) {
            return Err(RemedyError::InvalidConfig(format!(
                "run.max_generations must be between 1 and {MAX_CASCADE_GENERATIONS}, got {}",
                self.run.max_generations
            )));
        }
        if self.run.max_workers == 0 {
            return Err(RemedyError::InvalidConfig(
                "run.max_workers must be at least 1".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for checker in &self.checkers {
            if checker.command.is_empty() {
                return Err(RemedyError::InvalidConfig(format!(
                    "checker {} has an empty command",
                    checker.name
                )));
            }
            if checker.timeout_secs == 0 {
                return Err(RemedyError::InvalidConfig(format!(
                    "checker {} must have a timeout_secs of at least 1",
                    checker.name
                )));
            }
            if !names.insert(checker.name.as_str()) {
                return Err(RemedyError::InvalidConfig(format!(
                    "duplicate checker name: {}",
                    checker.name
                )));
            }
            if let Some(pattern) = &checker.failure_pattern {
                Regex::new(pattern).map_err(|e| {
                    RemedyError::InvalidConfig(format!(
                        "checker {} has an invalid failure_pattern: {e}",
                        checker.name
                    ))
                })?;
            }
        }

        let mut categories = HashSet::new();
        for fix in &self.fixes {
            if !categories.insert(fix.category.as_str()) {
                return Err(RemedyError::InvalidConfig(format!(
                    "duplicate fix category: {}",
                    fix.category
                )));
            }
            if fix.primary.is_empty() {
                return Err(RemedyError::InvalidConfig(format!(
                    "fix {} has an empty primary command",
                    fix.category
                )));
            }
        }
        Ok(())
    }
}
