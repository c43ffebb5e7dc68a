//! The job store: insertion-ordered records, exclusive artifact ownership.
//!
//! The store is the single place job records live. The orchestrator and the
//! progress relay mutate records through [`JobStore::with_job`], which
//! applies each update under the write lock, so a record update is always
//! an atomic read-modify-write even on a multi-threaded runtime. The
//! presentation layer only ever sees snapshots.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use clipmill_core::{Error, JobId, Result};

use crate::convert::artifact::{Artifact, ArtifactRegistry};
use crate::convert::job::{Job, JobStatus, SourcePayload};

/// Mapping from job identifier to job record, in insertion order.
pub struct JobStore {
    jobs: RwLock<Vec<Job>>,
    registry: Arc<dyn ArtifactRegistry>,
}

impl JobStore {
    /// Create an empty store backed by the given artifact registry.
    pub fn new(registry: Arc<dyn ArtifactRegistry>) -> Self {
        Self {
            jobs: RwLock::new(Vec::new()),
            registry,
        }
    }

    /// Enqueue one pending job per payload. Returns clones of the new
    /// records, in insertion order.
    pub fn add_jobs(&self, payloads: Vec<SourcePayload>) -> Vec<Job> {
        let mut jobs = self.jobs.write();
        let mut added = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let job = Job::new(payload);
            added.push(job.clone());
            jobs.push(job);
        }
        added
    }

    /// Snapshot of one record.
    pub fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.read().iter().find(|j| j.id == id).cloned()
    }

    /// Snapshot of all records, in insertion order.
    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.read().clone()
    }

    /// Identifiers of all currently pending jobs, in insertion order.
    pub fn pending_ids(&self) -> Vec<JobId> {
        self.jobs
            .read()
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .map(|j| j.id)
            .collect()
    }

    /// Number of records in the store.
    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Apply a mutation to one record under the write lock.
    pub(crate) fn with_job<R>(&self, id: JobId, f: impl FnOnce(&mut Job) -> R) -> Option<R> {
        let mut jobs = self.jobs.write();
        jobs.iter_mut().find(|j| j.id == id).map(f)
    }

    /// Terminal success for a converting job: issues the downloadable
    /// reference and installs the artifact. Returns the output size, or
    /// `None` if the job is missing or not converting.
    pub(crate) fn complete_job(
        &self,
        id: JobId,
        output: Bytes,
        elapsed_ms: u64,
    ) -> Option<u64> {
        let mut jobs = self.jobs.write();
        let job = jobs.iter_mut().find(|j| j.id == id)?;
        if job.status != JobStatus::Converting {
            return None;
        }
        let href = self.registry.issue(&output);
        let size = output.len() as u64;
        job.complete(Artifact::new(output, href), elapsed_ms);
        Some(size)
    }

    /// Remove one record. A `Converting` job cannot be removed; a
    /// `Completed` job's artifact reference is revoked first.
    pub fn remove(&self, id: JobId) -> Result<()> {
        let mut jobs = self.jobs.write();
        let index = jobs
            .iter()
            .position(|j| j.id == id)
            .ok_or_else(|| Error::not_found("job", id))?;
        if jobs[index].status == JobStatus::Converting {
            return Err(Error::Validation(format!(
                "job {id} is converting and cannot be removed"
            )));
        }
        let mut job = jobs.remove(index);
        if let Some(artifact) = job.take_artifact() {
            self.registry.revoke(artifact.href());
        }
        Ok(())
    }

    /// Remove all `Completed` records, revoking each artifact reference.
    /// Returns the removed identifiers.
    pub fn clear_completed(&self) -> Vec<JobId> {
        self.retain_revoking(|j| j.status != JobStatus::Completed)
    }

    /// Remove every record that is not `Converting`, revoking artifact
    /// references. Returns the removed identifiers.
    pub fn clear_all(&self) -> Vec<JobId> {
        self.retain_revoking(|j| j.status == JobStatus::Converting)
    }

    fn retain_revoking(&self, keep: impl Fn(&Job) -> bool) -> Vec<JobId> {
        let mut jobs = self.jobs.write();
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(jobs.len());
        for mut job in jobs.drain(..) {
            if keep(&job) {
                kept.push(job);
            } else {
                if let Some(artifact) = job.take_artifact() {
                    self.registry.revoke(artifact.href());
                }
                removed.push(job.id);
            }
        }
        *jobs = kept;
        removed
    }
}

impl Drop for JobStore {
    /// Store teardown releases every remaining artifact reference.
    fn drop(&mut self) {
        let mut jobs = self.jobs.write();
        for job in jobs.iter_mut() {
            if let Some(artifact) = job.take_artifact() {
                self.registry.revoke(artifact.href());
            }
        }
    }
}
