//! The job record: one file's end-to-end conversion request and its state.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clipmill_core::JobId;

use crate::convert::artifact::Artifact;

/// The original input: immutable bytes plus the declared filename.
#[derive(Debug, Clone)]
pub struct SourcePayload {
    /// Declared filename (e.g. `a.mov`).
    pub name: String,
    /// The raw input bytes. `Bytes` clones are reference-counted, so the
    /// payload is shared, never copied or mutated.
    pub bytes: Bytes,
}

impl SourcePayload {
    /// Create a payload from a name and raw bytes.
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Declared size in bytes.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Job lifecycle status.
///
/// Transitions only run `Pending → Converting → {Completed, Failed}`; the
/// mutators on [`Job`] ignore any other request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Converting,
    Completed,
    Failed,
}

/// One file's conversion lifecycle.
#[derive(Debug, Clone)]
pub struct Job {
    /// Stable identifier, assigned at enqueue time, never reused.
    pub id: JobId,
    /// The original input.
    pub source: SourcePayload,
    /// Lifecycle status.
    pub status: JobStatus,
    /// 0-100. Capped at 99 while converting; exactly 100 only on success.
    pub progress_percent: u8,
    /// Cumulative output size as reported by the engine; 0 until the first
    /// report.
    pub output_bytes: u64,
    /// Wall-clock duration of the conversion call, set once on success.
    pub elapsed_ms: Option<u64>,
    /// Captured failure message, present only when `Failed`.
    pub error: Option<String>,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    pub(crate) artifact: Option<Artifact>,
}

impl Job {
    /// Create a new pending job for a payload.
    pub fn new(source: SourcePayload) -> Self {
        Self {
            id: JobId::new(),
            source,
            status: JobStatus::Pending,
            progress_percent: 0,
            output_bytes: 0,
            elapsed_ms: None,
            error: None,
            created_at: Utc::now(),
            artifact: None,
        }
    }

    /// The output artifact, present only when `Completed`.
    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    /// Whether the job has reached `Completed` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }

    /// Begin converting. Only a `Pending` job starts.
    pub(crate) fn start(&mut self) {
        if self.status != JobStatus::Pending {
            return;
        }
        self.status = JobStatus::Converting;
        self.progress_percent = 0;
    }

    /// Record a progress report. Non-decreasing and capped at 99; only a
    /// `Converting` job accepts reports.
    pub(crate) fn record_progress(&mut self, percent: u8) {
        if self.status != JobStatus::Converting {
            return;
        }
        self.progress_percent = self.progress_percent.max(percent.min(99));
    }

    /// Record the engine-reported cumulative output size, verbatim.
    pub(crate) fn record_output_bytes(&mut self, bytes: u64) {
        if self.status != JobStatus::Converting {
            return;
        }
        self.output_bytes = bytes;
    }

    /// Terminal success: takes ownership of the artifact, sets progress to
    /// exactly 100 and records the elapsed wall-clock time.
    pub(crate) fn complete(&mut self, artifact: Artifact, elapsed_ms: u64) {
        if self.status != JobStatus::Converting {
            return;
        }
        self.status = JobStatus::Completed;
        self.progress_percent = 100;
        self.elapsed_ms = Some(elapsed_ms);
        self.artifact = Some(artifact);
    }

    /// Terminal failure: captures the message and leaves every other field
    /// as it was at the point of failure.
    pub(crate) fn fail(&mut self, error: &str) {
        if self.status != JobStatus::Converting {
            return;
        }
        self.status = JobStatus::Failed;
        self.error = Some(error.to_string());
    }

    /// Take the artifact out of the record for release.
    pub(crate) fn take_artifact(&mut self) -> Option<Artifact> {
        self.artifact.take()
    }
}
