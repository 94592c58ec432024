use std::collections::HashSet;
use crate::job::{FileJob, JobStatus};

/// Ordered collection of jobs keyed by path
///
/// Insertion order is the processing order. A path appears at most once;
/// adding a path that is already present is a no-op.
#[derive(Debug, Clone, Default)]
pub struct FileRegistry {
    jobs: Vec<FileJob>,
}

impl FileRegistry {
    pub fn new() -> Self {
        FileRegistry { jobs: Vec::new() }
    }

    /// Append jobs whose path is not registered yet, returning how many were added
    pub fn add<I>(&mut self, jobs: I) -> usize
    where
        I: IntoIterator<Item = FileJob>,
    {
        let mut known: HashSet<String> = self.jobs.iter().map(|j| j.path.clone()).collect();
        let before = self.jobs.len();
        for job in jobs {
            if known.insert(job.path.clone()) {
                self.jobs.push(job);
            }
        }
        self.jobs.len() - before
    }

    /// Remove a job, returning it if it was registered
    pub fn remove(&mut self, path: &str) -> Option<FileJob> {
        let pos = self.position(path)?;
        Some(self.jobs.remove(pos))
    }

    /// Drop every job
    pub fn clear(&mut self) {
        self.jobs.clear();
    }

    /// Move `error` and `aborted` jobs back to `pending` before a run
    ///
    /// `done` jobs keep their status and stats: they are not dispatched again
    /// and stay available to cleanup. Returns the number of jobs reset.
    pub fn reset_terminal(&mut self) -> usize {
        let mut count = 0;
        for job in &mut self.jobs {
            if matches!(job.status, JobStatus::Error | JobStatus::Aborted) {
                job.status = JobStatus::Pending;
                job.error = None;
                count += 1;
            }
        }
        count
    }

    pub fn get(&self, path: &str) -> Option<&FileJob> {
        self.jobs.iter().find(|j| j.path == path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut FileJob> {
        self.jobs.iter_mut().find(|j| j.path == path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.position(path).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileJob> {
        self.jobs.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FileJob> {
        self.jobs.iter_mut()
    }

    pub fn jobs(&self) -> &[FileJob] {
        &self.jobs
    }

    /// Registered paths in insertion order
    pub fn paths(&self) -> Vec<String> {
        self.jobs.iter().map(|j| j.path.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    fn position(&self, path: &str) -> Option<usize> {
        self.jobs.iter().position(|j| j.path == path)
    }
}
