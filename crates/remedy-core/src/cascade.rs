//! Cascade detection: failures present after a batch but absent before it.
//!
//! Both inputs are immutable [`VerificationSnapshot`]s, so detection is a
//! plain set difference over failure signatures. No "seen issues" state is
//! carried between batches.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{
    Finding, Location, RemedyError, Result, Severity, VerificationResult, VerificationSnapshot,
};
use crate::verify::VerificationRunner;

/// Lines counted as failures when a checker has no pattern of its own.
pub const DEFAULT_FAILURE_PATTERN: &str = r"(?i)\b(error|fail(ed|ure)?|panicked)\b";

const NOISE_PATTERN: &str =
    r"(?i)\(\s*\d+(\.\d+)?\s*(ms|s)\s*\)|\bin\s+\d+(\.\d+)?\s*(ms|s)\b|\bfinished in\s+\S+";

const LOCATION_PATTERN: &str = r"([A-Za-z0-9_./\\-]+\.[A-Za-z0-9]+):(\d+)";

/// One identifiable failure: a checker plus a normalized output line.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FailureSignature {
    pub checker: String,
    pub signature: String,
}

/// Turns failed verification results into comparable signatures.
#[derive(Debug, Clone)]
pub struct SignatureExtractor {
    default_pattern: Regex,
    patterns: HashMap<String, Regex>,
    noise: Regex,
    whitespace: Regex,
}

impl SignatureExtractor {
    /// `patterns` maps checker names to their failure-line regex.
    pub fn new<I, K, V>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let compile = |p: &str| {
            Regex::new(p).map_err(|e| RemedyError::InvalidConfig(format!("bad pattern {p}: {e}")))
        };
        let mut compiled = HashMap::new();
        for (name, pattern) in patterns {
            compiled.insert(name.into(), compile(pattern.as_ref())?);
        }
        Ok(Self {
            default_pattern: compile(DEFAULT_FAILURE_PATTERN)?,
            patterns: compiled,
            noise: compile(NOISE_PATTERN)?,
            whitespace: compile(r"\s+")?,
        })
    }

    /// Use the failure patterns configured on the runner's checkers.
    pub fn for_runner(runner: &VerificationRunner) -> Result<Self> {
        Self::new(runner.checkers().iter().filter_map(|c| {
            c.failure_pattern()
                .map(|p| (c.name().to_string(), p.to_string()))
        }))
    }

    fn normalize(&self, line: &str) -> String {
        let stripped = self.noise.replace_all(line, "");
        self.whitespace
            .replace_all(stripped.trim(), " ")
            .trim()
            .to_string()
    }

    /// Signatures contributed by a single result. Passing results contribute none.
    pub fn result_signatures(&self, result: &VerificationResult) -> BTreeSet<FailureSignature> {
        let mut out = BTreeSet::new();
        if result.passed() {
            return out;
        }
        let checker = result.checker_name().to_string();
        if result.is_timeout() {
            out.insert(FailureSignature {
                checker,
                signature: crate::domain::TIMEOUT_OUTPUT.to_string(),
            });
            return out;
        }

        let pattern = self
            .patterns
            .get(result.checker_name())
            .unwrap_or(&self.default_pattern);
        for line in result.raw_output().lines() {
            if pattern.is_match(line) {
                let normalized = self.normalize(line);
                if !normalized.is_empty() {
                    out.insert(FailureSignature {
                        checker: checker.clone(),
                        signature: normalized,
                    });
                }
            }
        }
        if out.is_empty() {
            out.insert(FailureSignature {
                signature: format!("{checker} exited with failure"),
                checker,
            });
        }
        out
    }

    pub fn signatures(&self, snapshot: &VerificationSnapshot) -> BTreeSet<FailureSignature> {
        snapshot
            .failed()
            .flat_map(|r| self.result_signatures(r))
            .collect()
    }
}

/// A failure introduced by the batch that ran between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFailure {
    pub checker: String,
    pub signature: String,
    pub location: Location,
    pub severity: Severity,
}

impl NewFailure {
    /// Express the failure as a finding for the next generation.
    pub fn to_finding(&self, id: impl Into<String>) -> Finding {
        Finding::new(
            id,
            self.location.clone(),
            self.severity,
            format!("{} introduced: {}", self.checker, self.signature),
        )
        .with_category(format!("cascade:{}", self.checker))
    }
}

/// Diffs two verification snapshots.
#[derive(Debug, Clone)]
pub struct CascadeDetector {
    extractor: SignatureExtractor,
    location: Regex,
}

impl CascadeDetector {
    pub fn new(extractor: SignatureExtractor) -> Result<Self> {
        let location = Regex::new(LOCATION_PATTERN)
            .map_err(|e| RemedyError::InvalidConfig(format!("bad location pattern: {e}")))?;
        Ok(Self {
            extractor,
            location,
        })
    }

    pub fn extractor(&self) -> &SignatureExtractor {
        &self.extractor
    }

    /// Failures in `after` that are absent from `before`, in signature order.
    pub fn detect(
        &self,
        before: &VerificationSnapshot,
        after: &VerificationSnapshot,
    ) -> Vec<NewFailure> {
        let before = self.extractor.signatures(before);
        let after = self.extractor.signatures(after);
        after
            .difference(&before)
            .map(|sig| NewFailure {
                checker: sig.checker.clone(),
                location: self.locate(&sig.signature),
                severity: score(&sig.signature),
                signature: sig.signature.clone(),
            })
            .collect()
    }

    fn locate(&self, signature: &str) -> Location {
        self.location
            .captures(signature)
            .and_then(|caps| {
                let file = PathBuf::from(caps.get(1)?.as_str());
                let line = caps.get(2)?.as_str().parse().ok()?;
                Some(Location::at(file, line))
            })
            .unwrap_or_else(Location::workspace)
    }
}

/// Cascade items are scored on their own signature, not their trigger.
pub fn score(signature: &str) -> Severity {
    let lower = signature.to_lowercase();
    if lower.contains("error") || lower.contains("panicked") || lower == "timeout" {
        Severity::High
    } else {
        Severity::Medium
    }
}
