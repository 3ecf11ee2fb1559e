//! Parallel fan-out/fan-in over all configured checkers.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, instrument, warn};

use super::checker::{Checker, CheckerConfig, CommandChecker};
use crate::domain::{Result, VerificationResult, VerificationSnapshot};
use crate::metrics::METRICS;
use crate::obs;

/// Runs every checker against the same workspace state.
#[derive(Clone, Default)]
pub struct VerificationRunner {
    checkers: Vec<Arc<dyn Checker>>,
}

impl VerificationRunner {
    pub fn new(checkers: Vec<Arc<dyn Checker>>) -> Self {
        Self { checkers }
    }

    /// Build command checkers from config, skipping disabled entries.
    pub fn from_configs(configs: &[CheckerConfig]) -> Self {
        let checkers = configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| Arc::new(CommandChecker::new(c.clone())) as Arc<dyn Checker>)
            .collect();
        Self { checkers }
    }

    pub fn checkers(&self) -> &[Arc<dyn Checker>] {
        &self.checkers
    }

    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }

    /// Find the regex configured for a checker's failure lines.
    pub fn failure_pattern(&self, checker_name: &str) -> Option<&str> {
        self.checkers
            .iter()
            .find(|c| c.name() == checker_name)
            .and_then(|c| c.failure_pattern())
    }

    /// Run all checkers concurrently and wait for every one of them.
    ///
    /// A checker exceeding its timeout yields `passed = false` with output
    /// `"timeout"`. A checker that cannot run at all aborts with
    /// [`RemedyError::CheckerCrashed`](crate::domain::RemedyError::CheckerCrashed).
    #[instrument(skip(self, workspace), fields(checkers = self.checkers.len()))]
    pub async fn run(&self, workspace: &Path) -> Result<VerificationSnapshot> {
        let start = Instant::now();
        let runs = self
            .checkers
            .iter()
            .map(|checker| run_one(checker.as_ref(), workspace));

        let results = join_all(runs)
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        let snapshot = VerificationSnapshot::new(results);
        obs::emit_verification_completed(
            snapshot.results().len(),
            snapshot.failed().count(),
            start.elapsed().as_millis() as u64,
        );
        Ok(snapshot)
    }
}

async fn run_one(checker: &dyn Checker, workspace: &Path) -> Result<VerificationResult> {
    let start = Instant::now();
    let timeout = checker.timeout();
    match tokio::time::timeout(timeout, checker.check(workspace)).await {
        Ok(Ok(out)) => {
            debug!(checker = checker.name(), exit_code = out.exit_code, "checker finished");
            Ok(VerificationResult::completed(
                checker.name(),
                out.exit_code,
                out.output,
                out.duration_ms,
            ))
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            warn!(
                checker = checker.name(),
                timeout_secs = timeout.as_secs(),
                "checker timed out"
            );
            METRICS.inc_checker_timeouts();
            Ok(VerificationResult::timed_out(
                checker.name(),
                start.elapsed().as_millis() as u64,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RemedyError;
    use crate::verify::checker::CheckOutput;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Sleepy {
        name: &'static str,
        delay: Duration,
        exit_code: i32,
    }

    #[async_trait]
    impl Checker for Sleepy {
        fn name(&self) -> &str {
            self.name
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(5)
        }

        async fn check(&self, _workspace: &Path) -> Result<CheckOutput> {
            tokio::time::sleep(self.delay).await;
            Ok(CheckOutput {
                exit_code: self.exit_code,
                output: format!("{} done", self.name),
                duration_ms: self.delay.as_millis() as u64,
            })
        }
    }

    struct Broken;

    #[async_trait]
    impl Checker for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }

        async fn check(&self, _workspace: &Path) -> Result<CheckOutput> {
            Err(RemedyError::CheckerCrashed {
                checker: "broken".to_string(),
                message: "no such binary".to_string(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_failure() {
        let runner = VerificationRunner::new(vec![
            Arc::new(Sleepy {
                name: "fast",
                delay: Duration::from_millis(10),
                exit_code: 0,
            }),
            Arc::new(Sleepy {
                name: "slow",
                delay: Duration::from_secs(60),
                exit_code: 0,
            }),
        ]);

        let snapshot = runner.run(Path::new(".")).await.expect("run");
        assert_eq!(snapshot.results().len(), 2);
        assert!(snapshot.get("fast").unwrap().passed());

        let slow = snapshot.get("slow").unwrap();
        assert!(!slow.passed());
        assert!(slow.is_timeout());
        assert!(slow.raw_output().contains("timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkers_run_concurrently() {
        let runner = VerificationRunner::new(vec![
            Arc::new(Sleepy {
                name: "a",
                delay: Duration::from_secs(3),
                exit_code: 0,
            }),
            Arc::new(Sleepy {
                name: "b",
                delay: Duration::from_secs(3),
                exit_code: 1,
            }),
        ]);

        let start = tokio::time::Instant::now();
        let snapshot = runner.run(Path::new(".")).await.expect("run");
        // Sequential execution would take 6s and blow the 5s timeout of `b`.
        assert!(start.elapsed() < Duration::from_secs(4));
        assert!(snapshot.get("a").unwrap().passed());
        assert!(!snapshot.get("b").unwrap().passed());
    }

    #[tokio::test]
    async fn test_crash_aborts_verification() {
        let runner = VerificationRunner::new(vec![Arc::new(Broken)]);
        let err = runner.run(Path::new(".")).await.unwrap_err();
        assert!(matches!(err, RemedyError::CheckerCrashed { .. }));
    }

    #[test]
    fn test_from_configs_skips_disabled() {
        let runner = VerificationRunner::from_configs(&[
            CheckerConfig::custom("on", vec!["true".into()], 10),
            CheckerConfig::custom("off", vec!["true".into()], 10).disabled(),
            CheckerConfig::custom("lint", vec!["true".into()], 10).with_failure_pattern("^E"),
        ]);
        let names: Vec<_> = runner.checkers().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["on", "lint"]);
        assert_eq!(runner.failure_pattern("lint"), Some("^E"));
        assert_eq!(runner.failure_pattern("on"), None);
    }

    #[tokio::test]
    async fn test_empty_runner_yields_empty_snapshot() {
        let snapshot = VerificationRunner::default()
            .run(Path::new("."))
            .await
            .expect("run");
        assert!(snapshot.results().is_empty());
        assert!(snapshot.all_passed());
    }
}
