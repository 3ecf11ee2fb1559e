//! Preflight guard: is the workspace safe to mutate?
//!
//! Runs once per run, before any edit. The guard only reads version-control
//! state. Committing or stashing is left to the operator; the guard asks
//! through an [`OperatorChannel`] and re-checks afterwards.

use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use crate::domain::{RemedyError, Result};
use crate::obs;

/// Verdict of one workspace inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub clean: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dirty_paths: Vec<String>,
}

impl PreflightReport {
    pub fn clean() -> Self {
        Self {
            clean: true,
            reason: "working tree clean".to_string(),
            dirty_paths: Vec::new(),
        }
    }

    pub fn dirty(reason: impl Into<String>, dirty_paths: Vec<String>) -> Self {
        Self {
            clean: false,
            reason: reason.into(),
            dirty_paths,
        }
    }
}

/// Read-only version-control status query.
#[async_trait]
pub trait WorkspaceProbe: Send + Sync {
    async fn inspect(&self, workspace: &Path) -> Result<PreflightReport>;
}

/// Probe backed by `git status --porcelain`.
///
/// Paths under an ignored prefix do not count as dirty. The CLI ignores its
/// own report directory when that lives inside the workspace.
#[derive(Debug, Clone, Default)]
pub struct GitProbe {
    ignored: Vec<PathBuf>,
}

impl GitProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignore changes under `prefix` (workspace-relative).
    pub fn ignoring(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.ignored.push(prefix.into());
        self
    }

    fn is_ignored(&self, path: &str) -> bool {
        let path = Path::new(path.trim_matches('"'));
        self.ignored.iter().any(|prefix| path.starts_with(prefix))
    }
}

#[async_trait]
impl WorkspaceProbe for GitProbe {
    async fn inspect(&self, workspace: &Path) -> Result<PreflightReport> {
        if !is_git_repo(workspace).await {
            return Ok(PreflightReport::dirty(
                "workspace is not a git repository; edits could not be rolled back",
                Vec::new(),
            ));
        }

        // Untracked files are listed one by one so ignored prefixes can match.
        let output = Command::new("git")
            .args(["status", "--porcelain", "--untracked-files=all"])
            .current_dir(workspace)
            .output()
            .await
            .map_err(|e| RemedyError::GitError(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RemedyError::GitError(format!(
                "git status --porcelain failed: {stderr}"
            )));
        }

        let dirty: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| l.len() > 3)
            .map(|l| l[3..].to_string())
            .filter(|path| !self.is_ignored(path))
            .collect();

        if dirty.is_empty() {
            Ok(PreflightReport::clean())
        } else {
            Ok(PreflightReport::dirty(
                format!("{} uncommitted change(s) in working tree", dirty.len()),
                dirty,
            ))
        }
    }
}

/// Capture the HEAD commit SHA from a git repository.
pub fn capture_head_sha(repo_dir: &Path) -> Result<String> {
    let output = StdCommand::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_dir)
        .output()
        .map_err(|e| RemedyError::GitError(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RemedyError::GitError(format!(
            "git rev-parse HEAD failed: {stderr}"
        )));
    }

    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if sha.is_empty() {
        return Err(RemedyError::GitError(
            "git rev-parse HEAD returned empty output".to_string(),
        ));
    }
    Ok(sha)
}

/// Check whether a directory is inside a git work tree.
pub async fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Operator answer to a dirty workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirtyResolution {
    /// The operator committed the changes; re-check.
    Committed,
    /// The operator stashed the changes; re-check.
    Stashed,
    /// Proceed on the dirty workspace.
    Continue,
    /// Stop the run.
    Abort,
}

/// User-mediated resolution of a dirty workspace.
#[async_trait]
pub trait OperatorChannel: Send + Sync {
    async fn resolve_dirty(&self, report: &PreflightReport) -> DirtyResolution;
}

/// Non-interactive channel that always gives the same answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedResolution(pub DirtyResolution);

#[async_trait]
impl OperatorChannel for FixedResolution {
    async fn resolve_dirty(&self, _report: &PreflightReport) -> DirtyResolution {
        self.0
    }
}

/// How the run may proceed after preflight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum PreflightVerdict {
    Clean,
    /// The operator chose to continue on a dirty workspace.
    ProceedDirty { reason: String },
}

/// Runs the probe and consults the operator until the workspace is clean,
/// the operator accepts it, or the prompt budget is spent.
pub struct PreflightGuard {
    probe: Arc<dyn WorkspaceProbe>,
    operator: Arc<dyn OperatorChannel>,
    max_prompts: usize,
}

impl PreflightGuard {
    pub fn new(probe: Arc<dyn WorkspaceProbe>, operator: Arc<dyn OperatorChannel>) -> Self {
        Self {
            probe,
            operator,
            max_prompts: 3,
        }
    }

    pub fn with_max_prompts(mut self, max_prompts: usize) -> Self {
        self.max_prompts = max_prompts.max(1);
        self
    }

    /// `Err(PreflightRejected)` means no edit may happen in this run.
    pub async fn check(&self, workspace: &Path) -> Result<PreflightVerdict> {
        let mut report = self.probe.inspect(workspace).await?;
        obs::emit_preflight(report.clean, &report.reason);

        for _ in 0..self.max_prompts {
            if report.clean {
                return Ok(PreflightVerdict::Clean);
            }
            match self.operator.resolve_dirty(&report).await {
                DirtyResolution::Continue => {
                    warn!(reason = %report.reason, "operator chose to continue on a dirty workspace");
                    return Ok(PreflightVerdict::ProceedDirty {
                        reason: report.reason,
                    });
                }
                DirtyResolution::Abort => {
                    return Err(RemedyError::PreflightRejected(report.reason));
                }
                resolution @ (DirtyResolution::Committed | DirtyResolution::Stashed) => {
                    info!(?resolution, "operator resolved workspace; re-checking");
                    report = self.probe.inspect(workspace).await?;
                    obs::emit_preflight(report.clean, &report.reason);
                }
            }
        }

        if report.clean {
            Ok(PreflightVerdict::Clean)
        } else {
            Err(RemedyError::PreflightRejected(format!(
                "{} (still dirty after {} operator prompt(s))",
                report.reason, self.max_prompts
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
        dir
    }

    /// Probe that replays a fixed sequence of reports.
    struct Sequence {
        reports: Mutex<Vec<PreflightReport>>,
        calls: AtomicUsize,
    }

    impl Sequence {
        fn new(mut reports: Vec<PreflightReport>) -> Self {
            reports.reverse();
            Self {
                reports: Mutex::new(reports),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl WorkspaceProbe for Sequence {
        async fn inspect(&self, _workspace: &Path) -> Result<PreflightReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut reports = self.reports.lock().unwrap();
            Ok(if reports.len() > 1 {
                reports.pop().unwrap()
            } else {
                reports[0].clone()
            })
        }
    }

    fn dirty() -> PreflightReport {
        PreflightReport::dirty("1 uncommitted change(s) in working tree", vec!["a.rs".into()])
    }

    #[tokio::test]
    async fn test_git_probe_clean_and_dirty() {
        let repo = make_git_repo();
        let report = GitProbe::new().inspect(repo.path()).await.unwrap();
        assert!(report.clean, "fresh repo should be clean: {report:?}");

        std::fs::write(repo.path().join("notes.txt"), "wip").unwrap();
        let report = GitProbe::new().inspect(repo.path()).await.unwrap();
        assert!(!report.clean);
        assert_eq!(report.dirty_paths, vec!["notes.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_git_probe_skips_ignored_prefix() {
        let repo = make_git_repo();
        let run_dir = repo.path().join(".remedy/runs/run-1");
        std::fs::create_dir_all(&run_dir).unwrap();
        std::fs::write(run_dir.join("report.json"), "{}").unwrap();
        std::fs::write(run_dir.join("report.digest"), "00").unwrap();

        let plain = GitProbe::new().inspect(repo.path()).await.unwrap();
        assert_eq!(
            plain.dirty_paths,
            vec![
                ".remedy/runs/run-1/report.digest".to_string(),
                ".remedy/runs/run-1/report.json".to_string()
            ]
        );

        let probe = GitProbe::new().ignoring(".remedy/runs");
        assert!(probe.inspect(repo.path()).await.unwrap().clean);

        std::fs::write(repo.path().join(".remedy/notes.txt"), "wip").unwrap();
        let report = probe.inspect(repo.path()).await.unwrap();
        assert_eq!(report.dirty_paths, vec![".remedy/notes.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_is_git_repo() {
        let repo = make_git_repo();
        assert!(is_git_repo(repo.path()).await);
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_git_repo(dir.path()).await);
    }

    #[tokio::test]
    async fn test_git_probe_rejects_non_repo() {
        let dir = tempfile::tempdir().unwrap();
        let report = GitProbe::new().inspect(dir.path()).await.unwrap();
        assert!(!report.clean);
        assert!(report.reason.contains("not a git repository"));
    }

    #[test]
    fn capture_head_sha_returns_40_hex_chars() {
        let repo = make_git_repo();
        let sha = capture_head_sha(repo.path()).unwrap();
        assert_eq!(sha.len(), 40, "SHA should be 40 hex chars, got: {sha}");
        assert!(sha.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn capture_head_sha_fails_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(capture_head_sha(dir.path()).is_err());
    }

    #[tokio::test]
    async fn test_abort_rejects() {
        let guard = PreflightGuard::new(
            Arc::new(Sequence::new(vec![dirty()])),
            Arc::new(FixedResolution(DirtyResolution::Abort)),
        );
        let err = guard.check(Path::new(".")).await.unwrap_err();
        assert!(matches!(err, RemedyError::PreflightRejected(_)));
    }

    #[tokio::test]
    async fn test_continue_proceeds_dirty() {
        let guard = PreflightGuard::new(
            Arc::new(Sequence::new(vec![dirty()])),
            Arc::new(FixedResolution(DirtyResolution::Continue)),
        );
        let verdict = guard.check(Path::new(".")).await.unwrap();
        assert!(matches!(verdict, PreflightVerdict::ProceedDirty { .. }));
    }

    #[tokio::test]
    async fn test_stash_triggers_recheck() {
        let probe = Arc::new(Sequence::new(vec![dirty(), PreflightReport::clean()]));
        let guard = PreflightGuard::new(
            probe.clone(),
            Arc::new(FixedResolution(DirtyResolution::Stashed)),
        );
        assert_eq!(guard.check(Path::new(".")).await.unwrap(), PreflightVerdict::Clean);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_prompt_budget_is_bounded() {
        let probe = Arc::new(Sequence::new(vec![dirty()]));
        let guard = PreflightGuard::new(
            probe.clone(),
            Arc::new(FixedResolution(DirtyResolution::Committed)),
        )
        .with_max_prompts(2);
        let err = guard.check(Path::new(".")).await.unwrap_err();
        assert!(err.to_string().contains("still dirty"));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }
}
