use std::collections::HashSet;
use serde::{Deserialize, Serialize};

use crate::job::{FileJob, JobStatus};
use crate::registry::FileRegistry;

/// User-chosen rules for post-run cleanup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupRules {
    /// Delete the original when the output came out smaller
    pub delete_originals_if_smaller_output: bool,
    /// Delete the output when it came out larger than the original
    pub delete_outputs_if_larger_than_original: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Original,
    Output,
}

/// One file proposed for deletion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionCandidate {
    pub path: String,
    pub kind: ArtifactKind,
    /// Size recorded in the job's stats
    pub size: u64,
    /// Input path of the job the artifact belongs to
    pub job_path: String,
}

/// Files selected by [`compute_deletion_set`], in registry order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionSet {
    candidates: Vec<DeletionCandidate>,
}

impl DeletionSet {
    pub fn paths(&self) -> Vec<String> {
        self.candidates.iter().map(|c| c.path.clone()).collect()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.candidates.iter().any(|c| c.path == path)
    }

    pub fn candidates(&self) -> &[DeletionCandidate] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Bytes reclaimed if every candidate is deleted
    pub fn total_bytes(&self) -> u64 {
        self.candidates.iter().map(|c| c.size).sum()
    }

    fn push(&mut self, seen: &mut HashSet<String>, candidate: DeletionCandidate) {
        if seen.insert(candidate.path.clone()) {
            self.candidates.push(candidate);
        }
    }
}

/// Pick the artifacts to delete among completed jobs
///
/// Only `done` jobs with stats are considered. Equal sizes never qualify.
pub fn compute_deletion_set<'a, I>(jobs: I, rules: &CleanupRules) -> DeletionSet
where
    I: IntoIterator<Item = &'a FileJob>,
{
    let mut set = DeletionSet::default();
    let mut seen = HashSet::new();

    for job in jobs {
        if job.status != JobStatus::Done {
            continue;
        }
        let Some(stats) = &job.stats else {
            continue;
        };

        if rules.delete_originals_if_smaller_output && stats.original_size > stats.new_size {
            set.push(&mut seen, DeletionCandidate {
                path: job.path.clone(),
                kind: ArtifactKind::Original,
                size: stats.original_size,
                job_path: job.path.clone(),
            });
        }

        if rules.delete_outputs_if_larger_than_original && stats.new_size > stats.original_size {
            set.push(&mut seen, DeletionCandidate {
                path: stats.output_path.clone(),
                kind: ArtifactKind::Output,
                size: stats.new_size,
                job_path: job.path.clone(),
            });
        }
    }

    set
}

/// What a successful deletion did to the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionEffect {
    /// The deleted file was a job's input; the job is gone
    RemovedJob(String),
    /// The deleted file was a job's output; the job is pending again
    ResetJob(String),
}

/// Update the registry after `path` was deleted from disk
///
/// Returns nothing when no job references the path.
pub fn apply_deleted(registry: &mut FileRegistry, path: &str) -> Vec<DeletionEffect> {
    let mut effects = Vec::new();

    let owners: Vec<String> = registry
        .iter()
        .filter(|j| j.stats.as_ref().is_some_and(|s| s.output_path == path))
        .map(|j| j.path.clone())
        .collect();
    for owner in owners {
        if let Some(job) = registry.get_mut(&owner) {
            job.reset_pending();
            effects.push(DeletionEffect::ResetJob(owner));
        }
    }

    if registry.remove(path).is_some() {
        effects.push(DeletionEffect::RemovedJob(path.to_string()));
    }

    effects
}
