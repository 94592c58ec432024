use std::fmt;
use std::path::Path;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a single input file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Error,
    Aborted,
    Skipped,
}

impl JobStatus {
    /// Terminal statuses need explicit user action to move again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Error | JobStatus::Aborted | JobStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
            JobStatus::Aborted => "aborted",
            JobStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of a successful transcode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    /// Wall-clock time spent in the engine
    pub duration_secs: f64,
    /// Size of the input in bytes
    pub original_size: u64,
    /// Size of the produced output in bytes
    pub new_size: u64,
    /// Where the engine wrote the output
    pub output_path: String,
}

impl ProcessingStats {
    /// Output size relative to the original (1.0 = same size)
    pub fn size_ratio(&self) -> Option<f64> {
        if self.original_size == 0 {
            return None;
        }
        Some(self.new_size as f64 / self.original_size as f64)
    }
}

/// One input video's unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileJob {
    pub path: String,
    pub name: String,
    pub status: JobStatus,
    /// Whether the file carries (or was given) a "processed" marker
    pub processed: bool,
    pub error: Option<String>,
    pub stats: Option<ProcessingStats>,
}

impl FileJob {
    /// Create a pending job, deriving the display name from the path
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let name = display_name(&path);
        FileJob {
            path,
            name,
            status: JobStatus::Pending,
            processed: false,
            error: None,
            stats: None,
        }
    }

    pub(crate) fn mark_processing(&mut self) {
        self.status = JobStatus::Processing;
        self.error = None;
    }

    pub(crate) fn mark_done(&mut self, stats: ProcessingStats) {
        self.status = JobStatus::Done;
        self.processed = true;
        self.error = None;
        self.stats = Some(stats);
    }

    pub(crate) fn mark_error(&mut self, message: String) {
        self.status = JobStatus::Error;
        self.error = Some(message);
        self.stats = None;
    }

    pub(crate) fn mark_aborted(&mut self) {
        self.status = JobStatus::Aborted;
        self.stats = None;
    }

    pub(crate) fn mark_skipped(&mut self) {
        self.status = JobStatus::Skipped;
        self.processed = true;
    }

    /// Back to a fresh pending job, forgetting any previous result
    pub(crate) fn reset_pending(&mut self) {
        self.status = JobStatus::Pending;
        self.processed = false;
        self.error = None;
        self.stats = None;
    }

    /// Check the status/stats pairing every job must satisfy
    pub fn is_consistent(&self) -> bool {
        match self.status {
            JobStatus::Done => self.stats.is_some(),
            _ => self.stats.is_none(),
        }
    }
}

/// Last path component, or the whole path when there is none
pub fn display_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> ProcessingStats {
        ProcessingStats {
            duration_secs: 1.5,
            original_size: 100,
            new_size: 80,
            output_path: "/videos/a_q23_libx264.mp4".to_string(),
        }
    }

    #[test]
    fn test_new_job_derives_name() {
        let job = FileJob::new("/videos/holiday.mov");
        assert_eq!(job.name, "holiday.mov");
        assert_eq!(job.status, JobStatus::Pending);
        assert!(!job.processed);
        assert!(job.is_consistent());
    }

    #[test]
    fn test_display_name_falls_back_to_path() {
        assert_eq!(display_name("/"), "/");
        assert_eq!(display_name("clip.mp4"), "clip.mp4");
    }

    #[test]
    fn test_transitions_keep_stats_pairing() {
        let mut job = FileJob::new("/videos/a.mp4");
        job.mark_processing();
        job.mark_done(stats());
        assert!(job.processed);
        assert!(job.is_consistent());

        job.mark_error("boom".to_string());
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(job.stats.is_none());
        assert!(job.is_consistent());

        job.mark_done(stats());
        job.mark_aborted();
        assert!(job.stats.is_none());
        assert!(job.is_consistent());

        job.mark_done(stats());
        job.reset_pending();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(!job.processed);
        assert!(job.is_consistent());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Aborted).unwrap();
        assert_eq!(json, "\"aborted\"");
        assert!(JobStatus::Skipped.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn test_size_ratio() {
        assert_eq!(stats().size_ratio(), Some(0.8));
        let empty = ProcessingStats { original_size: 0, ..stats() };
        assert_eq!(empty.size_ratio(), None);
    }
}
