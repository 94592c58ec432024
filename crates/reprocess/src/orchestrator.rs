use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::abort::AbortController;
use crate::cleanup::{self, CleanupRules, DeletionEffect, DeletionSet};
use crate::config::OptionsConfig;
use crate::engine::{EngineError, LogReceiver, TranscodeEngine};
use crate::job::{FileJob, JobStatus};
use crate::logs::{LogRouter, LogSubscription};
use crate::registry::FileRegistry;
use crate::status::{ConfirmPolicy, StatusChecker};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("a run is already in progress")]
    AlreadyRunning,
    #[error("not registered: {0}")]
    UnknownJob(String),
    #[error("no finished output to reject for {0}")]
    NothingToReject(String),
    #[error("failed to delete {path}: {source}")]
    Delete {
        path: String,
        #[source]
        source: EngineError,
    },
}

/// Counters reported when a run ends
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub done: usize,
    pub failed: usize,
    pub aborted: usize,
    /// Jobs passed over because they were done or skipped already
    pub skipped: usize,
    /// Whether the run stopped on an abort request
    pub was_aborted: bool,
}

/// Per-path result of a cleanup batch
#[derive(Debug)]
pub struct DeletionOutcome {
    pub path: String,
    pub result: Result<Vec<DeletionEffect>, EngineError>,
}

/// Sequential scheduler driving every job through the engine
///
/// Owns the registry, the log router and the abort flag. Every method
/// takes `&self`, so the orchestrator can sit behind an `Arc` shared by a
/// runner task and the presentation layer. At most one job is processing
/// at any time.
pub struct Orchestrator<E: ?Sized> {
    engine: Arc<E>,
    registry: Mutex<FileRegistry>,
    logs: LogRouter,
    abort: AbortController,
    selected: Mutex<Option<String>>,
    subscription: Mutex<Option<LogSubscription>>,
}

impl<E> Orchestrator<E>
where
    E: TranscodeEngine + ?Sized,
{
    /// Build an orchestrator without an engine log stream attached
    pub fn new(engine: Arc<E>) -> Self {
        Orchestrator {
            engine,
            registry: Mutex::new(FileRegistry::new()),
            logs: LogRouter::new(),
            abort: AbortController::new(),
            selected: Mutex::new(None),
            subscription: Mutex::new(None),
        }
    }

    /// Build an orchestrator and subscribe to the engine's log stream
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(engine: Arc<E>, events: LogReceiver) -> Self {
        let orchestrator = Self::new(engine);
        let subscription = orchestrator.logs.subscribe(events);
        *lock(&orchestrator.subscription) = Some(subscription);
        orchestrator
    }

    /// Release the log subscription after recording what was already emitted
    pub async fn shutdown(&self) {
        let subscription = lock(&self.subscription).take();
        if let Some(subscription) = subscription {
            subscription.shutdown().await;
            debug!("Log stream released");
        }
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn logs(&self) -> &LogRouter {
        &self.logs
    }

    pub fn is_running(&self) -> bool {
        self.abort.is_active()
    }

    /// Snapshot of every job in processing order
    pub fn jobs(&self) -> Vec<FileJob> {
        self.registry().jobs().to_vec()
    }

    pub fn job(&self, path: &str) -> Option<FileJob> {
        self.registry().get(path).cloned()
    }

    /// Path whose log is currently shown
    pub fn selected(&self) -> Option<String> {
        lock(&self.selected).clone()
    }

    pub fn select(&self, path: &str) {
        *lock(&self.selected) = Some(path.to_string());
    }

    /// Log lines of the selected job
    pub fn selected_log(&self) -> Vec<String> {
        self.selected()
            .map(|path| self.logs.get(&path))
            .unwrap_or_default()
    }

    /// Check and register new files, returning how many were added
    ///
    /// Paths already in the registry are not queried again.
    pub async fn add_files<I, S>(&self, paths: I, confirm: &dyn ConfirmPolicy) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fresh: Vec<String> = {
            let registry = self.registry();
            paths
                .into_iter()
                .map(Into::into)
                .filter(|p| !registry.contains(p))
                .collect()
        };

        let checker = StatusChecker::new(&*self.engine, confirm);
        let jobs = checker.check_all(&fresh).await;

        let added = self.registry().add(jobs);
        info!("Added {} file(s) ({} selected)", added, fresh.len());
        added
    }

    /// Remove a job and drop its log
    pub async fn remove(&self, path: &str) -> Option<FileJob> {
        self.flush_logs().await;
        let removed = self.registry().remove(path);
        if removed.is_some() {
            self.logs.clear(path);
            let mut selected = lock(&self.selected);
            if selected.as_deref() == Some(path) {
                *selected = None;
            }
        }
        removed
    }

    /// Empty the registry and every log; the caller owns the confirmation
    pub async fn clear(&self) -> Result<(), OrchestratorError> {
        if self.is_running() {
            return Err(OrchestratorError::AlreadyRunning);
        }
        self.flush_logs().await;
        self.registry().clear();
        self.logs.clear_all();
        *lock(&self.selected) = None;
        Ok(())
    }

    /// Drive every eligible job through the engine, one at a time
    ///
    /// `options` is the snapshot applied to the whole run. Fails only when
    /// another run is in flight; per-job failures end up in the registry.
    pub async fn run(&self, options: OptionsConfig) -> Result<RunSummary, OrchestratorError> {
        let (_guard, token) = RunGuard::acquire(self)?;

        let paths = {
            let mut registry = self.registry();
            let reset = registry.reset_terminal();
            if reset > 0 {
                debug!("Reset {} failed/aborted job(s) to pending", reset);
            }
            registry.paths()
        };
        info!("Starting run over {} file(s) with {}", paths.len(), options.flags_description());

        let mut summary = RunSummary::default();

        for path in paths {
            if token.is_cancelled() {
                info!("Processing aborted before starting {}", path);
                summary.was_aborted = true;
                break;
            }

            let name = {
                let mut registry = self.registry();
                let Some(job) = registry.get_mut(&path) else {
                    debug!("{} was removed during the run", path);
                    continue;
                };
                if matches!(job.status, JobStatus::Done | JobStatus::Skipped) {
                    debug!("Skipping {} ({})", job.name, job.status);
                    summary.skipped += 1;
                    continue;
                }
                job.mark_processing();
                job.name.clone()
            };

            self.select(&path);
            self.flush_logs().await;
            self.logs.append(&path, format!("Processing: {}", name));
            info!("Processing: {}", name);

            let result = self.engine.process(&path, &options).await;
            // Engine lines for this job are recorded before the outcome line
            self.flush_logs().await;

            // A late success after an abort request is discarded on purpose
            let aborted = token.is_cancelled();
            let mut registry = self.registry();
            let job = registry.get_mut(&path);

            match (result, job) {
                (_, None) => {
                    warn!("{} was removed while processing; result dropped", path);
                    self.logs.clear(&path);
                }
                (_, Some(job)) if aborted => {
                    job.mark_aborted();
                    summary.aborted += 1;
                    self.logs.append(&path, format!("Processing of {} aborted.", name));
                    info!("Processing of {} aborted", name);
                }
                (Ok(stats), Some(job)) => {
                    info!(
                        "✓ Finished: {} ({} -> {} bytes in {:.1}s)",
                        name, stats.original_size, stats.new_size, stats.duration_secs
                    );
                    job.mark_done(stats);
                    summary.done += 1;
                    self.logs.append(&path, format!("✓ Finished: {}", name));
                }
                (Err(e), Some(job)) => {
                    error!("❌ Failed: {} - {}", name, e);
                    self.logs.append(&path, format!("❌ Failed: {} - {}", name, e));
                    job.mark_error(e.to_string());
                    summary.failed += 1;
                }
            }
            drop(registry);

            if aborted {
                summary.was_aborted = true;
                break;
            }
        }

        if summary.was_aborted {
            info!("All tasks aborted.");
        } else {
            info!(
                "All tasks completed: {} done, {} failed, {} skipped",
                summary.done, summary.failed, summary.skipped
            );
        }
        Ok(summary)
    }

    /// Stop the current run after the job in flight
    ///
    /// Sets the cooperative flag first, then forwards a best-effort cancel
    /// to the engine. A cancel failure is returned, but the flag stays set.
    pub async fn request_abort(&self) -> Result<(), EngineError> {
        let Some(first) = self.abort.request() else {
            debug!("Abort requested while idle; ignoring");
            return Ok(());
        };
        if first {
            info!("Attempting to abort current processing...");
            self.append_to_processing("Attempting to abort current processing...").await;
        }

        match self.engine.cancel().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Error sending abort signal: {}", e);
                self.append_to_processing(format!("Error sending abort signal: {}", e)).await;
                Err(e)
            }
        }
    }

    pub fn abort_requested(&self) -> bool {
        self.abort.is_requested()
    }

    /// Artifacts the cleanup rules would delete
    pub fn cleanup_candidates(&self, rules: &CleanupRules) -> DeletionSet {
        cleanup::compute_deletion_set(self.registry().iter(), rules)
    }

    /// Delete each path and update the jobs that referenced it
    ///
    /// A failed deletion is reported for that path only; its job keeps its
    /// stats since the file is still there.
    pub async fn apply_deletion<I, S>(&self, paths: I) -> Result<Vec<DeletionOutcome>, OrchestratorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.is_running() {
            return Err(OrchestratorError::AlreadyRunning);
        }

        self.flush_logs().await;
        let mut outcomes = Vec::new();
        for path in paths.into_iter().map(Into::into) {
            let result = match self.engine.delete(&path).await {
                Ok(()) => {
                    info!("🗑️  Deleted {}", path);
                    Ok(self.forget_deleted(&path))
                }
                Err(e) => {
                    warn!("Failed to delete {}: {}", path, e);
                    Err(e)
                }
            };
            outcomes.push(DeletionOutcome { path, result });
        }
        Ok(outcomes)
    }

    /// Delete one job's output and put the job back to pending
    pub async fn reject(&self, path: &str) -> Result<String, OrchestratorError> {
        if self.is_running() {
            return Err(OrchestratorError::AlreadyRunning);
        }

        let output = {
            let registry = self.registry();
            let job = registry
                .get(path)
                .ok_or_else(|| OrchestratorError::UnknownJob(path.to_string()))?;
            match (&job.status, &job.stats) {
                (JobStatus::Done, Some(stats)) => stats.output_path.clone(),
                _ => return Err(OrchestratorError::NothingToReject(path.to_string())),
            }
        };

        self.engine
            .delete(&output)
            .await
            .map_err(|source| OrchestratorError::Delete { path: output.clone(), source })?;

        info!("Rejected {}: deleted {}", path, output);
        self.flush_logs().await;
        self.forget_deleted(&output);
        self.logs.append(path, format!("Rejected: deleted {}", output));
        Ok(output)
    }

    fn forget_deleted(&self, path: &str) -> Vec<DeletionEffect> {
        let effects = cleanup::apply_deleted(&mut self.registry(), path);
        for effect in &effects {
            if let DeletionEffect::RemovedJob(job_path) = effect {
                self.logs.clear(job_path);
            }
        }
        effects
    }

    fn processing_path(&self) -> Option<String> {
        self.registry()
            .iter()
            .find(|j| j.status == JobStatus::Processing)
            .map(|j| j.path.clone())
    }

    /// Append a notice to the job in flight, after its pending engine lines
    async fn append_to_processing(&self, message: impl Into<String>) {
        if let Some(path) = self.processing_path() {
            self.flush_logs().await;
            self.logs.append(&path, message);
        }
    }

    /// Wait until every engine line emitted so far is in the router
    async fn flush_logs(&self) {
        let flush = lock(&self.subscription).as_ref().map(LogSubscription::flusher);
        if let Some(flush) = flush {
            flush.flush().await;
        }
    }

    fn registry(&self) -> MutexGuard<'_, FileRegistry> {
        lock(&self.registry)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks the orchestrator busy for the lifetime of one run
///
/// The run's abort token is installed together with the busy mark. On drop
/// (including a dropped run future) a job left in `processing` is marked
/// aborted, so the orchestrator always ends up idle and consistent.
struct RunGuard<'a, E: TranscodeEngine + ?Sized> {
    orchestrator: &'a Orchestrator<E>,
}

impl<'a, E: TranscodeEngine + ?Sized> RunGuard<'a, E> {
    fn acquire(orchestrator: &'a Orchestrator<E>) -> Result<(Self, CancellationToken), OrchestratorError> {
        let token = orchestrator
            .abort
            .begin_run()
            .ok_or(OrchestratorError::AlreadyRunning)?;
        Ok((RunGuard { orchestrator }, token))
    }
}

impl<E: TranscodeEngine + ?Sized> Drop for RunGuard<'_, E> {
    fn drop(&mut self) {
        let mut registry = lock(&self.orchestrator.registry);
        for job in registry.iter_mut().filter(|j| j.status == JobStatus::Processing) {
            warn!("Run ended while {} was processing; marking aborted", job.name);
            job.mark_aborted();
        }
        drop(registry);
        self.orchestrator.abort.end_run();
    }
}
