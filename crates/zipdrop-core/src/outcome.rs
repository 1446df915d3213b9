//! Per-job outcomes and the aggregated invocation report.
//!
//! Job- and entry-level failures are data, not errors: they are collected
//! into [`JobOutcome::errors`] and the caller inspects the report to tell a
//! clean run from one with partial failures.

use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, StoreError};
use crate::types::ReplicationJob;

/// Classification of a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Source object or version does not exist.
    NotFound,
    /// Source is not a valid archive, or an entry could not be decoded.
    Format,
    /// Reading the source failed for a reason other than absence.
    SourceRead,
    /// Writing one entry failed.
    Write,
    /// Listing or deleting destination objects failed.
    Reconcile,
    /// Target-account credentials could not be obtained.
    Credentials,
    /// Target bucket stayed unreachable.
    TargetUnavailable,
    /// The invocation budget ran out.
    DeadlineExceeded,
}

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Failure class.
    pub kind: ErrorKind,
    /// Affected object key or archive path, when the failure is per-key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Human-readable detail.
    pub message: String,
}

impl ErrorRecord {
    /// Failure not tied to a single key.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            key: None,
            message: message.into(),
        }
    }

    /// Failure of a single key.
    #[must_use]
    pub fn for_key(kind: ErrorKind, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            key: Some(key.into()),
            message: message.into(),
        }
    }

    /// Record a failure to open a source archive.
    #[must_use]
    pub fn from_archive(err: &ArchiveError) -> Self {
        match err {
            ArchiveError::NotFound(_) => Self::new(ErrorKind::NotFound, err.to_string()),
            ArchiveError::Entry { path, .. } if !path.is_empty() => {
                Self::for_key(ErrorKind::Format, path.clone(), err.to_string())
            }
            ArchiveError::Format { .. } | ArchiveError::Entry { .. } => {
                Self::new(ErrorKind::Format, err.to_string())
            }
            ArchiveError::Store(_) | ArchiveError::Internal(_) => {
                Self::new(ErrorKind::SourceRead, err.to_string())
            }
        }
    }
}

/// Terminal state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Archive opened, every entry attempted, reconciliation attempted if
    /// configured. Individual entry or deletion errors may still be present.
    Succeeded,
    /// The job could not run to completion.
    Failed,
}

/// Result of one [`ReplicationJob`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    /// The job this outcome belongs to.
    pub job: ReplicationJob,
    /// Terminal state.
    pub status: JobStatus,
    /// Everything that went wrong, in the order it was observed.
    pub errors: Vec<ErrorRecord>,
    /// Objects written to the destination.
    pub objects_written: u64,
    /// Stale objects deleted from the destination.
    pub objects_deleted: u64,
}

impl JobOutcome {
    /// A job that failed before writing anything.
    #[must_use]
    pub fn failed(job: ReplicationJob, error: ErrorRecord) -> Self {
        Self {
            job,
            status: JobStatus::Failed,
            errors: vec![error],
            objects_written: 0,
            objects_deleted: 0,
        }
    }

    /// Whether the job succeeded without a single recorded error.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.status == JobStatus::Succeeded && self.errors.is_empty()
    }
}

/// Overall state of an invocation that ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Every job succeeded without errors.
    Succeeded,
    /// At least one job failed or recorded an error.
    PartialFailure,
}

/// Aggregated result of an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationReport {
    /// Overall state.
    pub status: ReportStatus,
    /// One outcome per job, in request order.
    pub outcomes: Vec<JobOutcome>,
}

impl InvocationReport {
    /// Aggregate job outcomes.
    #[must_use]
    pub fn new(outcomes: Vec<JobOutcome>) -> Self {
        let status = if outcomes.iter().all(JobOutcome::is_clean) {
            ReportStatus::Succeeded
        } else {
            ReportStatus::PartialFailure
        };
        Self { status, outcomes }
    }

    /// Total objects written across all jobs.
    #[must_use]
    pub fn objects_written(&self) -> u64 {
        self.outcomes.iter().map(|o| o.objects_written).sum()
    }

    /// Total objects deleted across all jobs.
    #[must_use]
    pub fn objects_deleted(&self) -> u64 {
        self.outcomes.iter().map(|o| o.objects_deleted).sum()
    }
}
