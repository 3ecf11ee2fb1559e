//! Verification verdicts and immutable snapshots of them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Diagnostic recorded for a checker that exceeded its timeout.
pub const TIMEOUT_OUTPUT: &str = "timeout";

/// One checker's verdict for the whole workspace at a point in time.
///
/// Fields are private: a result is never changed after the runner builds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    checker_name: String,
    passed: bool,
    raw_output: String,
    timestamp: DateTime<Utc>,
    exit_code: Option<i32>,
    timed_out: bool,
    duration_ms: u64,
}

impl VerificationResult {
    /// Verdict from a finished checker: exit code 0 passes, anything else fails.
    pub fn completed(
        checker_name: impl Into<String>,
        exit_code: i32,
        raw_output: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            checker_name: checker_name.into(),
            passed: exit_code == 0,
            raw_output: raw_output.into(),
            timestamp: Utc::now(),
            exit_code: Some(exit_code),
            timed_out: false,
            duration_ms,
        }
    }

    /// Verdict for a checker that did not return within its timeout.
    pub fn timed_out(checker_name: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            checker_name: checker_name.into(),
            passed: false,
            raw_output: TIMEOUT_OUTPUT.to_string(),
            timestamp: Utc::now(),
            exit_code: None,
            timed_out: true,
            duration_ms,
        }
    }

    pub fn checker_name(&self) -> &str {
        &self.checker_name
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn raw_output(&self) -> &str {
        &self.raw_output
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn is_timeout(&self) -> bool {
        self.timed_out
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn verdict(&self) -> CheckVerdict {
        if self.passed {
            CheckVerdict::Pass
        } else {
            CheckVerdict::Fail
        }
    }
}

/// Report-level verdict for one checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckVerdict {
    Pass,
    Fail,
}

impl fmt::Display for CheckVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
        }
    }
}

/// All checker results taken against one workspace state.
///
/// Cheap to clone; the results are shared and read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationSnapshot {
    results: Arc<[VerificationResult]>,
}

impl VerificationSnapshot {
    pub fn new(results: Vec<VerificationResult>) -> Self {
        Self {
            results: results.into(),
        }
    }

    pub fn results(&self) -> &[VerificationResult] {
        &self.results
    }

    pub fn get(&self, checker_name: &str) -> Option<&VerificationResult> {
        self.results
            .iter()
            .find(|r| r.checker_name == checker_name)
    }

    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &VerificationResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    /// `checker_name -> PASS|FAIL`.
    pub fn verdicts(&self) -> BTreeMap<String, CheckVerdict> {
        self.results
            .iter()
            .map(|r| (r.checker_name.clone(), r.verdict()))
            .collect()
    }
}
