use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::JobId;
use crate::{QueueError, QueueResult};

/// Default bound on retry attempts for a new job
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Job status lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created but not yet handed to a backend
    Pending,

    /// Waiting in the queue, eligible for claim
    Queued,

    /// Claimed by a worker
    Running,

    /// Handler succeeded
    Completed,

    /// Handler failed permanently or ran out of retries
    Failed,

    /// Canceled before any worker claimed it
    Cancelled,
}

impl JobStatus {
    /// Check if the job is in a terminal state (completed, failed, or cancelled)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Only jobs nobody has claimed yet can be cancelled
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Pending | Self::Queued)
    }

    /// Get the status name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One unit of work and its lifecycle state.
///
/// Backends store and replace records whole; nothing patches individual fields in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job identifier
    pub id: JobId,

    /// Job type tag, selects the handler
    pub job_type: String,

    /// Handler input, opaque to the queue
    pub payload: Value,

    /// Current job status
    pub status: JobStatus,

    /// Higher values are claimed first
    pub priority: i32,

    pub created_at: DateTime<Utc>,

    /// When the current (or last) claim happened
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,

    /// Handler output (on success)
    pub result: Option<Value>,

    /// Failure message (on failure)
    pub error: Option<String>,

    /// Retryable failures consumed so far
    pub retry_count: u32,

    /// Upper bound on `retry_count`
    pub max_retries: u32,

    /// Caller-defined data, opaque to the queue
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl JobRecord {
    /// Create a new pending job with a generated id
    pub fn new(job_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            payload,
            status: JobStatus::Pending,
            priority: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            metadata: HashMap::new(),
        }
    }

    /// Use a caller-supplied id instead of a generated one
    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the job priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the maximum retry attempts
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Replace the metadata map
    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Add a single metadata entry
    pub fn with_metadata_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Reject records that must never enter a queue
    pub fn validate(&self) -> QueueResult<()> {
        if self.id.is_empty() {
            return Err(QueueError::Validation("job id must not be empty".to_string()));
        }
        if self.job_type.trim().is_empty() {
            return Err(QueueError::Validation(format!("job {} has no job_type", self.id)));
        }
        if self.retry_count > self.max_retries {
            return Err(QueueError::Validation(format!(
                "job {} has retry_count {} above max_retries {}",
                self.id, self.retry_count, self.max_retries
            )));
        }
        Ok(())
    }

    /// Queue membership is exactly the `Queued` status
    pub fn is_queue_member(&self) -> bool {
        self.status == JobStatus::Queued
    }

    /// Whether another retryable failure can be absorbed
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Transition `Queued -> Running`
    pub fn claim(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Complete the job successfully
    pub fn complete(&mut self, result: Value) {
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    /// Fail the job permanently
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    /// Consume one retry and put the job back in line
    pub fn schedule_retry(&mut self) {
        self.retry_count += 1;
        self.status = JobStatus::Queued;
        self.error = None;
    }

    /// Cancel the job
    pub fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }
}

/// Shared guard for `enqueue`/`update`: a stored terminal record may only be rewritten
/// with the same status.
pub(crate) fn ensure_transition_allowed(
    existing: Option<&JobRecord>,
    next: &JobRecord,
) -> QueueResult<()> {
    match existing {
        Some(current) if current.status.is_terminal() && current.status != next.status => {
            Err(QueueError::JobAlreadyTerminal(current.id.clone()))
        }
        _ => Ok(()),
    }
}

/// Guard for `enqueue`: only ids the backend has never stored may be submitted.
/// Re-queueing a known job goes through `update`.
pub(crate) fn ensure_new_submission(existing: Option<&JobRecord>) -> QueueResult<()> {
    match existing {
        Some(current) if current.status.is_terminal() => {
            Err(QueueError::JobAlreadyTerminal(current.id.clone()))
        }
        Some(current) => Err(QueueError::Validation(format!(
            "job {} already exists with status {}",
            current.id, current.status
        ))),
        None => Ok(()),
    }
}
