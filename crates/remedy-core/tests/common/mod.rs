//! Scripted collaborators shared by the integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use remedy_core::{
    AbortHandle, CheckOutput, Checker, EditResult, Finding, FixContext, FixPlugin,
    FixRegistry, Location, PreflightReport, RemedyError, Result, Severity, StrategyKind,
    VerificationRunner, WorkItem, WorkspaceProbe,
};
use tempfile::TempDir;

/// Create a workspace with the given files.
pub fn workspace(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in files {
        std::fs::write(dir.path().join(name), content).unwrap();
    }
    dir
}

pub fn read(dir: &TempDir, name: &str) -> String {
    std::fs::read_to_string(dir.path().join(name)).unwrap()
}

/// Finding whose description is the marker token its fix must replace.
pub fn finding(id: &str, file: &str, token: &str) -> Finding {
    Finding::new(id, Location::at(file, 1), Severity::Medium, token)
}

pub struct CleanProbe;

#[async_trait]
impl WorkspaceProbe for CleanProbe {
    async fn inspect(&self, _workspace: &Path) -> Result<PreflightReport> {
        Ok(PreflightReport::clean())
    }
}

pub struct DirtyProbe;

#[async_trait]
impl WorkspaceProbe for DirtyProbe {
    async fn inspect(&self, _workspace: &Path) -> Result<PreflightReport> {
        Ok(PreflightReport::dirty(
            "1 uncommitted change(s) in working tree",
            vec!["wip.rs".to_string()],
        ))
    }
}

/// Lint checker: every workspace line containing `BAD` is an error.
pub struct MarkerChecker;

#[async_trait]
impl Checker for MarkerChecker {
    fn name(&self) -> &str {
        "lint"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    async fn check(&self, workspace: &Path) -> Result<CheckOutput> {
        let mut names: Vec<_> = std::fs::read_dir(workspace)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();

        let mut output = String::new();
        for name in names {
            let content = std::fs::read_to_string(workspace.join(&name))?;
            for (n, line) in content.lines().enumerate() {
                if line.contains("BAD") {
                    output.push_str(&format!("error: {name}:{}: forbidden {}\n", n + 1, line.trim()));
                }
            }
        }
        Ok(CheckOutput {
            exit_code: if output.is_empty() { 0 } else { 1 },
            output,
            duration_ms: 1,
        })
    }
}

/// Hangs whenever `gate.rs` contains `slow`.
pub struct SlowWhenFlagged {
    pub timeout: Duration,
}

#[async_trait]
impl Checker for SlowWhenFlagged {
    fn name(&self) -> &str {
        "perf"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn check(&self, workspace: &Path) -> Result<CheckOutput> {
        let gate = std::fs::read_to_string(workspace.join("gate.rs")).unwrap_or_default();
        if gate.contains("slow") {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(CheckOutput {
            exit_code: 0,
            output: "bench ok".to_string(),
            duration_ms: 1,
        })
    }
}

/// Passes once, then fails to launch.
pub struct CrashesAfterBaseline {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Checker for CrashesAfterBaseline {
    fn name(&self) -> &str {
        "flaky"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    async fn check(&self, _workspace: &Path) -> Result<CheckOutput> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(CheckOutput {
                exit_code: 0,
                output: String::new(),
                duration_ms: 1,
            })
        } else {
            Err(RemedyError::CheckerCrashed {
                checker: "flaky".to_string(),
                message: "No such file or directory".to_string(),
            })
        }
    }
}

pub fn lint_runner() -> VerificationRunner {
    VerificationRunner::new(vec![Arc::new(MarkerChecker)])
}

/// Replaces the item's token with `replacement` in its own file.
pub struct ReplaceToken {
    pub replacement: &'static str,
    pub calls: AtomicUsize,
    pub abort_on_edit: Option<AbortHandle>,
}

impl ReplaceToken {
    pub fn new(replacement: &'static str) -> Self {
        Self {
            replacement,
            calls: AtomicUsize::new(0),
            abort_on_edit: None,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FixPlugin for ReplaceToken {
    fn name(&self) -> &str {
        "replace-token"
    }

    async fn edit(&self, item: &WorkItem, _kind: StrategyKind, ctx: &FixContext) -> Result<EditResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = &self.abort_on_edit {
            handle.abort();
        }
        let path = ctx.target(item);
        let content = tokio::fs::read_to_string(&path).await?;
        if !content.contains(&item.description) {
            return Ok(EditResult::unchanged());
        }
        tokio::fs::write(&path, content.replacen(&item.description, self.replacement, 1)).await?;
        Ok(EditResult::changed())
    }
}

/// Cascade cleanup: removes every `BAD` marker from the item's file.
pub struct RemoveMarkers;

#[async_trait]
impl FixPlugin for RemoveMarkers {
    fn name(&self) -> &str {
        "remove-markers"
    }

    async fn edit(&self, item: &WorkItem, _kind: StrategyKind, ctx: &FixContext) -> Result<EditResult> {
        let path = ctx.target(item);
        let content = tokio::fs::read_to_string(&path).await?;
        if !content.contains("BAD") {
            return Ok(EditResult::unchanged());
        }
        tokio::fs::write(&path, content.replace("BAD", "ok")).await?;
        Ok(EditResult::changed_with("markers removed"))
    }
}

/// Turns `BAD-n` into `BAD-(n+1)`: every fix introduces a fresh failure.
pub struct Oscillate;

#[async_trait]
impl FixPlugin for Oscillate {
    fn name(&self) -> &str {
        "oscillate"
    }

    async fn edit(&self, item: &WorkItem, _kind: StrategyKind, ctx: &FixContext) -> Result<EditResult> {
        let path = ctx.target(item);
        let content = tokio::fs::read_to_string(&path).await?;
        let next = match content.trim().strip_prefix("BAD-") {
            Some(n) => format!("BAD-{}\n", n.parse::<u32>().unwrap_or(0) + 1),
            None => "BAD-1\n".to_string(),
        };
        tokio::fs::write(&path, next).await?;
        Ok(EditResult::changed())
    }
}

/// Every strategy fails.
pub struct AlwaysFails {
    pub calls: AtomicUsize,
}

#[async_trait]
impl FixPlugin for AlwaysFails {
    fn name(&self) -> &str {
        "always-fails"
    }

    async fn edit(&self, _item: &WorkItem, kind: StrategyKind, _ctx: &FixContext) -> Result<EditResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(EditResult::failed(format!("syntax error after {kind} edit")))
    }
}

/// Classifies the change as architectural until an operator approves it.
pub struct NeedsSignOff {
    pub inner: ReplaceToken,
}

#[async_trait]
impl FixPlugin for NeedsSignOff {
    fn name(&self) -> &str {
        "needs-sign-off"
    }

    async fn edit(&self, item: &WorkItem, kind: StrategyKind, ctx: &FixContext) -> Result<EditResult> {
        if !ctx.approved {
            return Ok(EditResult::needs_approval("change spans multiple modules"));
        }
        self.inner.edit(item, kind, ctx).await
    }
}

/// Records the highest number of edits ever in flight at once.
#[derive(Default)]
pub struct OverlapCounter {
    active: AtomicUsize,
    max_seen: AtomicUsize,
}

impl OverlapCounter {
    pub fn max_seen(&self) -> usize {
        self.max_seen.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FixPlugin for OverlapCounter {
    fn name(&self) -> &str {
        "overlap-counter"
    }

    async fn edit(&self, _item: &WorkItem, _kind: StrategyKind, _ctx: &FixContext) -> Result<EditResult> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(25)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(EditResult::unchanged())
    }
}

/// Registry used by the five-finding scenario.
pub fn scenario_registry(fix: Arc<ReplaceToken>) -> FixRegistry {
    FixRegistry::new()
        .with_default(fix)
        .register("sloppy", Arc::new(ReplaceToken::new("BAD")))
        .register("cascade", Arc::new(RemoveMarkers))
}
