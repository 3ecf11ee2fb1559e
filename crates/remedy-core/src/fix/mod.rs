//! Fix applier: executes one strategy against one work item.
//!
//! Items touching disjoint files may be applied concurrently. Items touching
//! the same file are serialized through a per-file lock held for exactly one
//! edit. This is the only mutual exclusion in the pipeline.

pub mod command;
pub mod strategy;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::config::ApprovalConfig;
use crate::domain::{workspace_relative, StrategyKind, WorkItem};
use crate::metrics::METRICS;

pub use command::{CommandFix, FixCommandConfig};
pub use strategy::{EditResult, FixContext, FixPlugin, FixRegistry};

/// Lazily created per-file async locks.
#[derive(Debug, Default)]
pub struct FileLocks {
    locks: StdMutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`, a normalized workspace-relative
    /// path as produced by [`workspace_relative`].
    pub async fn lock(&self, key: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(locks.entry(key.to_path_buf()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Outcome of one applied strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The issue is resolved; `mutated` tells whether the file actually changed.
    Success { mutated: bool, note: Option<String> },
    /// The attempt did not resolve the issue.
    Failure { diagnostic: String },
    /// The required change exceeds single-item scope.
    NeedsApproval { reason: String },
    /// No plugin can handle the item at all.
    Unfixable { reason: String },
}

/// Applies fix plugins to work items under the per-file locking rule.
pub struct FixApplier {
    registry: FixRegistry,
    workspace: PathBuf,
    approval: ApprovalConfig,
    locks: FileLocks,
}

impl FixApplier {
    pub fn new(registry: FixRegistry, workspace: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            workspace: workspace.into(),
            approval: ApprovalConfig::default(),
            locks: FileLocks::new(),
        }
    }

    pub fn with_approval(mut self, approval: ApprovalConfig) -> Self {
        self.approval = approval;
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Severity-based routing that happens before any edit.
    pub fn requires_approval(&self, item: &WorkItem) -> Option<String> {
        (!item.is_approved() && self.approval.requires_approval(item.severity)).then(|| {
            format!(
                "Architectural: {} findings require operator approval before editing",
                item.severity
            )
        })
    }

    /// Run `kind` against `item` while holding the item's file lock.
    ///
    /// The target file is fingerprinted before and after the edit so the
    /// outcome reports whether content really changed.
    pub async fn apply(&self, item: &WorkItem, kind: StrategyKind) -> ApplyOutcome {
        let Some(plugin) = self.registry.resolve(&item.category) else {
            return ApplyOutcome::Unfixable {
                reason: format!(
                    "Technical: no fix strategy registered for category '{}'",
                    item.category
                ),
            };
        };

        // Every spelling of one file must map to the same lock.
        let Some(key) = workspace_relative(&self.workspace, &item.location.file) else {
            return ApplyOutcome::Unfixable {
                reason: format!(
                    "Technical: {} is outside the workspace",
                    item.location.file.display()
                ),
            };
        };

        let ctx = FixContext {
            workspace: self.workspace.clone(),
            approved: item.is_approved(),
        };
        let target = self.workspace.join(&key);
        let fingerprinted = key != Path::new(".");

        let _guard = self.locks.lock(&key).await;
        METRICS.inc_attempts();
        debug!(item = %item.id, plugin = plugin.name(), strategy = %kind, "applying fix");

        let before = if fingerprinted { fingerprint(&target).await } else { None };
        let result = plugin.edit(item, kind, &ctx).await;
        let after = if fingerprinted { fingerprint(&target).await } else { None };

        let outcome = match result {
            Ok(EditResult::Changed { note }) => ApplyOutcome::Success {
                mutated: content_changed(fingerprinted, &before, &after, true),
                note,
            },
            Ok(EditResult::Unchanged { note }) => ApplyOutcome::Success {
                mutated: content_changed(fingerprinted, &before, &after, false),
                note,
            },
            Ok(EditResult::Failed { diagnostic }) => ApplyOutcome::Failure { diagnostic },
            Ok(EditResult::NeedsApproval { reason }) if ctx.approved => ApplyOutcome::Failure {
                diagnostic: format!("strategy still requires approval after it was granted: {reason}"),
            },
            Ok(EditResult::NeedsApproval { reason }) => ApplyOutcome::NeedsApproval { reason },
            Err(e) => ApplyOutcome::Failure {
                diagnostic: e.to_string(),
            },
        };

        if before != after && !matches!(outcome, ApplyOutcome::Success { .. }) {
            warn!(item = %item.id, strategy = %kind, "file changed by an attempt that did not succeed");
        }
        if let ApplyOutcome::Success { mutated: true, .. } = outcome {
            METRICS.inc_files_mutated();
        }
        outcome
    }
}

/// Whether the edit changed content. Falls back to the plugin's own claim
/// when the target is not fingerprinted or could not be read either time.
fn content_changed(
    fingerprinted: bool,
    before: &Option<String>,
    after: &Option<String>,
    reported: bool,
) -> bool {
    match (fingerprinted, before, after) {
        (false, _, _) | (true, None, None) => reported,
        (true, before, after) => before != after,
    }
}

/// SHA-256 of a file's content, `None` when it does not exist.
pub async fn fingerprint(path: &Path) -> Option<String> {
    let bytes = tokio::fs::read(path).await.ok()?;
    Some(hex::encode(Sha256::digest(&bytes)))
}
