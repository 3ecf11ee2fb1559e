//! Batch remediation orchestrator.
//!
//! Control flow per run:
//!
//! 1. validate findings and run the preflight guard (once)
//! 2. admit findings as generation-1 work items and take a baseline snapshot
//! 3. per batch: drive every item to a terminal state on a bounded worker
//!    pool, verify, record into the ledger, check closure, diff snapshots and
//!    admit cascade items as the next generation
//! 4. when the queue drains, route `NeedsApproval` items through the approval
//!    gate; approved items form a new batch
//!
//! The abort signal is only observed between batches.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, Instrument};
use uuid::Uuid;

use crate::approval::{ApprovalChannel, ApprovalGate, DeferAll};
use crate::cascade::{CascadeDetector, NewFailure, SignatureExtractor};
use crate::config::RemedyConfig;
use crate::domain::{
    confine_findings, validate_findings, CheckVerdict, Finding, Location, RemedyError, Result,
    VerificationSnapshot, WorkItem, WorkItemId,
};
use crate::fix::{CommandFix, FixApplier, FixRegistry};
use crate::ledger::Ledger;
use crate::metrics::{MetricsSnapshot, METRICS};
use crate::obs;
use crate::preflight::{
    DirtyResolution, FixedResolution, GitProbe, OperatorChannel, PreflightGuard, PreflightVerdict,
    WorkspaceProbe,
};
use crate::report::{ItemReport, RunOutcome, RunReport};
use crate::retry::{ItemRun, RetryController, RetryPolicy};
use crate::verify::VerificationRunner;

pub const CASCADE_LIMIT_REASON: &str = "cascade limit exceeded";
pub const ABORTED_REASON: &str = "Aborted: run interrupted before this item was attempted";

/// Sender half of the run-level abort signal.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Receiver half, checked at batch boundaries.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

/// Create a connected abort handle/signal pair.
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx: Arc::new(tx) }, AbortSignal { rx })
}

impl AbortHandle {
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        abort_pair().1
    }

    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Why a run did not produce a normal report.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Refused before any work item was admitted; nothing was edited.
    #[error(transparent)]
    Rejected(RemedyError),

    /// An internal invariant broke mid-run.
    #[error("internal error, run aborted: {source}")]
    Internal {
        source: RemedyError,
        partial: Box<RunReport>,
    },
}

impl RunError {
    pub fn partial_report(&self) -> Option<&RunReport> {
        match self {
            Self::Internal { partial, .. } => Some(partial),
            Self::Rejected(_) => None,
        }
    }
}

/// Assembles an [`Orchestrator`] from configuration and collaborators.
pub struct OrchestratorBuilder {
    workspace: PathBuf,
    config: RemedyConfig,
    registry: Option<FixRegistry>,
    runner: Option<VerificationRunner>,
    probe: Arc<dyn WorkspaceProbe>,
    operator: Arc<dyn OperatorChannel>,
    approval: Arc<dyn ApprovalChannel>,
    abort: AbortSignal,
}

impl OrchestratorBuilder {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            config: RemedyConfig::default(),
            registry: None,
            runner: None,
            probe: Arc::new(GitProbe::new()),
            operator: Arc::new(FixedResolution(DirtyResolution::Abort)),
            approval: Arc::new(DeferAll),
            abort: AbortSignal::never(),
        }
    }

    pub fn config(mut self, config: RemedyConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the plugins built from `[[fixes]]`.
    pub fn registry(mut self, registry: FixRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace the checkers built from `[[checkers]]`.
    pub fn runner(mut self, runner: VerificationRunner) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn WorkspaceProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn operator(mut self, operator: Arc<dyn OperatorChannel>) -> Self {
        self.operator = operator;
        self
    }

    pub fn approval_channel(mut self, channel: Arc<dyn ApprovalChannel>) -> Self {
        self.approval = channel;
        self
    }

    pub fn abort_signal(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        self.config.validate()?;

        let registry = match self.registry {
            Some(registry) => registry,
            None => self
                .config
                .fixes
                .iter()
                .fold(FixRegistry::new(), |registry, fix| {
                    registry.register(fix.category.clone(), Arc::new(CommandFix::new(fix.clone())))
                }),
        };
        let runner = self
            .runner
            .unwrap_or_else(|| VerificationRunner::from_configs(&self.config.checkers));
        let detector = CascadeDetector::new(SignatureExtractor::for_runner(&runner)?)?;
        let applier = FixApplier::new(registry, self.workspace.clone())
            .with_approval(self.config.approval.clone());

        Ok(Orchestrator {
            preflight: PreflightGuard::new(self.probe, self.operator),
            applier: Arc::new(applier),
            runner,
            detector,
            retry: RetryController::new(RetryPolicy {
                max_attempts: self.config.run.max_attempts,
            }),
            approval: ApprovalGate::new(self.approval),
            max_workers: self.config.run.max_workers.max(1),
            max_generations: self.config.run.max_generations,
            abort: self.abort,
            workspace: self.workspace,
        })
    }
}

/// Mutable state of one run, owned by [`Orchestrator::run`].
struct RunState {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    preflight: Option<PreflightVerdict>,
    ledger: Ledger,
    outcomes: HashMap<WorkItemId, BTreeMap<String, CheckVerdict>>,
    last_snapshot: Option<VerificationSnapshot>,
    generations_run: u32,
    mutations: usize,
    cascade_seq: usize,
    metrics_start: MetricsSnapshot,
}

impl RunState {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            preflight: None,
            ledger: Ledger::new(),
            outcomes: HashMap::new(),
            last_snapshot: None,
            generations_run: 0,
            mutations: 0,
            cascade_seq: 0,
            metrics_start: METRICS.snapshot(),
        }
    }

    fn archive(&mut self, item: &WorkItem, verdicts: &BTreeMap<String, CheckVerdict>) -> Result<()> {
        obs::emit_item_terminal(
            item.id.as_str(),
            &item.status().to_string(),
            item.attempt_count(),
            item.reason().unwrap_or_default(),
        );
        self.outcomes.insert(item.id.clone(), verdicts.clone());
        self.ledger.record(item)
    }

    fn report(&self, outcome: RunOutcome) -> RunReport {
        let results = self
            .ledger
            .items()
            .map(|item| {
                let outcomes = self.outcomes.get(&item.id).cloned().unwrap_or_default();
                ItemReport::from_item(item, outcomes)
            })
            .collect();
        RunReport {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            outcome,
            preflight: self.preflight.clone(),
            results,
            accounting: self.ledger.accounting(),
            verification_summary: self
                .last_snapshot
                .as_ref()
                .map(VerificationSnapshot::verdicts)
                .unwrap_or_default(),
            generations_run: self.generations_run,
            mutations: self.mutations,
            open_items: self.ledger.open_items(),
        }
    }
}

pub struct Orchestrator {
    workspace: PathBuf,
    preflight: PreflightGuard,
    applier: Arc<FixApplier>,
    runner: VerificationRunner,
    detector: CascadeDetector,
    retry: RetryController,
    approval: ApprovalGate,
    max_workers: usize,
    max_generations: u32,
    abort: AbortSignal,
}

impl Orchestrator {
    pub fn builder(workspace: impl Into<PathBuf>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(workspace)
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Remediate `findings` and account for every admitted item.
    pub async fn run(&self, findings: Vec<Finding>) -> std::result::Result<RunReport, RunError> {
        let state = RunState::new();
        let span = obs::run_span(&state.run_id.to_string());
        self.run_in_span(state, findings).instrument(span).await
    }

    async fn run_in_span(
        &self,
        mut state: RunState,
        findings: Vec<Finding>,
    ) -> std::result::Result<RunReport, RunError> {
        let run_id = state.run_id.to_string();
        obs::emit_run_started(&run_id, findings.len(), &self.workspace.display().to_string());

        validate_findings(&findings).map_err(|e| RunError::Rejected(e.into()))?;
        let findings = confine_findings(findings, &self.workspace)
            .map_err(|e| RunError::Rejected(e.into()))?;
        let verdict = self
            .preflight
            .check(&self.workspace)
            .await
            .map_err(RunError::Rejected)?;
        state.preflight = Some(verdict);

        let result = self.execute(&mut state, findings).await;
        let elapsed = (Utc::now() - state.started_at).num_milliseconds().max(0) as u64;
        METRICS.flush_since(&state.metrics_start);

        match result {
            Ok(outcome) => {
                let report = state.report(outcome);
                let a = report.accounting;
                obs::emit_run_finished(
                    &run_id,
                    outcome.as_str(),
                    elapsed,
                    a.applied,
                    a.failed,
                    a.needs_approval,
                );
                Ok(report)
            }
            Err(source) => {
                obs::emit_internal_error(&run_id, &source);
                Err(RunError::Internal {
                    partial: Box::new(state.report(RunOutcome::InternalError)),
                    source,
                })
            }
        }
    }

    async fn execute(&self, state: &mut RunState, findings: Vec<Finding>) -> Result<RunOutcome> {
        let mut queue: Vec<WorkItem> = findings
            .iter()
            .enumerate()
            .map(|(i, finding)| WorkItem::from_finding(WorkItemId::new("F", i + 1), finding))
            .collect();
        for item in &queue {
            state.ledger.admit(&item.id)?;
        }

        let mut before = self.runner.run(&self.workspace).await?;
        state.last_snapshot = Some(before.clone());

        loop {
            if queue.is_empty() {
                if self.abort.is_aborted() {
                    break;
                }
                queue = self.approval.review(state.run_id, &mut state.ledger).await?;
                if queue.is_empty() {
                    break;
                }
            }

            if self.abort.is_aborted() {
                obs::emit_run_aborted(state.run_id.to_string().as_str(), queue.len());
                let verdicts = before.verdicts();
                for mut item in queue.drain(..) {
                    item.mark_failed(ABORTED_REASON)?;
                    state.archive(&item, &verdicts)?;
                }
                state.ledger.ensure_closed()?;
                return Ok(RunOutcome::Aborted);
            }

            let batch = std::mem::take(&mut queue);
            let generation = batch.iter().map(|item| item.generation).max().unwrap_or(1);
            state.generations_run = state.generations_run.max(generation);
            obs::emit_batch_started(generation, batch.len());

            let done = self.process_batch(batch).await?;
            let after = self.runner.run(&self.workspace).await?;
            let verdicts = after.verdicts();
            for (item, run) in &done {
                state.mutations += run.mutations;
                state.archive(item, &verdicts)?;
            }
            state.ledger.ensure_closed()?;

            let new_failures = self.detector.detect(&before, &after);
            obs::emit_cascade_detected(generation, new_failures.len());
            METRICS.inc_cascade_items(new_failures.len() as u64);
            for failure in new_failures {
                if let Some(item) = self.admit_cascade(state, &failure, generation + 1, &verdicts)? {
                    queue.push(item);
                }
            }

            before = after;
            state.last_snapshot = Some(before.clone());
        }

        state.ledger.ensure_closed()?;
        Ok(if self.abort.is_aborted() {
            RunOutcome::Aborted
        } else {
            RunOutcome::Completed
        })
    }

    /// Admit one new failure. Past the generation bound the item is admitted
    /// and immediately failed so it still shows up in the accounting.
    fn admit_cascade(
        &self,
        state: &mut RunState,
        failure: &NewFailure,
        generation: u32,
        verdicts: &BTreeMap<String, CheckVerdict>,
    ) -> Result<Option<WorkItem>> {
        state.cascade_seq += 1;
        let id = WorkItemId::new(&format!("C{generation}"), state.cascade_seq);
        let mut finding = failure.to_finding(id.as_str());
        finding.location = finding
            .location
            .within(&self.workspace)
            .unwrap_or_else(Location::workspace);
        let mut item = WorkItem::from_cascade(
            id,
            &finding,
            generation,
            failure.checker.clone(),
            failure.signature.clone(),
        );
        state.ledger.admit(&item.id)?;

        if generation > self.max_generations {
            obs::emit_cascade_limit(item.id.as_str(), &failure.checker, &failure.signature);
            item.mark_failed(CASCADE_LIMIT_REASON)?;
            state.archive(&item, verdicts)?;
            return Ok(None);
        }
        debug!(item = %item.id, checker = %failure.checker, signature = %failure.signature, "cascade item admitted");
        Ok(Some(item))
    }

    /// Drive every item of one batch to a terminal state.
    ///
    /// Items run concurrently up to `max_workers`; the applier's file locks
    /// serialize items that share a target. All workers are joined even when
    /// one fails, so no attempt is cut short.
    async fn process_batch(&self, batch: Vec<WorkItem>) -> Result<Vec<(WorkItem, ItemRun)>> {
        let size = batch.len();
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();

        for (index, mut item) in batch.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let applier = Arc::clone(&self.applier);
            let retry = self.retry;
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let run = retry.drive(&applier, &mut item).await?;
                Ok::<_, RemedyError>((index, item, run))
            });
        }

        let mut done = Vec::with_capacity(size);
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(entry)) => done.push(entry),
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(RemedyError::WorkerFailed(e.to_string()));
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        done.sort_by_key(|(index, _, _)| *index);
        info!(items = size, "batch complete");
        Ok(done.into_iter().map(|(_, item, run)| (item, run)).collect())
    }
}
