use async_trait::async_trait;
use log::{debug, info, warn};

use crate::engine::{FileCheck, TranscodeEngine};
use crate::job::FileJob;

/// User decision point for files already tagged as processed
#[async_trait]
pub trait ConfirmPolicy: Send + Sync {
    /// Return true to reprocess the file anyway
    async fn confirm_reprocess(&self, job: &FileJob) -> bool;
}

/// Fixed answer, for batch use without a user at hand
#[derive(Debug, Clone, Copy)]
pub struct AlwaysAnswer(pub bool);

#[async_trait]
impl ConfirmPolicy for AlwaysAnswer {
    async fn confirm_reprocess(&self, _job: &FileJob) -> bool {
        self.0
    }
}

/// Annotates newly selected files with their initial status
pub struct StatusChecker<'a, E: ?Sized> {
    engine: &'a E,
    confirm: &'a dyn ConfirmPolicy,
}

impl<'a, E> StatusChecker<'a, E>
where
    E: TranscodeEngine + ?Sized,
{
    pub fn new(engine: &'a E, confirm: &'a dyn ConfirmPolicy) -> Self {
        StatusChecker { engine, confirm }
    }

    /// Build a job for `path` with its initial status
    pub async fn check(&self, path: &str) -> FileJob {
        let mut job = FileJob::new(path);

        match self.engine.check_status(path).await {
            Ok(FileCheck::NotProcessed) => {
                debug!("{}: not processed yet", path);
            }
            Ok(FileCheck::Processed) => {
                info!("{}: already processed, marking skipped", path);
                job.mark_skipped();
            }
            Ok(FileCheck::NeedsConfirmation) => {
                if self.confirm.confirm_reprocess(&job).await {
                    info!("{}: tagged as processed, reprocessing on request", path);
                    job.reset_pending();
                } else {
                    info!("{}: tagged as processed, skipping", path);
                    job.mark_skipped();
                }
            }
            Err(e) => {
                warn!("Failed to check status of {}: {}", path, e);
            }
        }

        job
    }

    /// Check each path in order; duplicates are left for the registry to drop
    pub async fn check_all<I, S>(&self, paths: I) -> Vec<FileJob>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut jobs = Vec::new();
        for path in paths {
            jobs.push(self.check(path.as_ref()).await);
        }
        jobs
    }
}
