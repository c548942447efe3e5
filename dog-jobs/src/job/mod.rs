pub mod registry;

pub use registry::{HandlerRegistry, JobHandler};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::{JobError, JobRecord, QueueResult};

/// Trait for defining typed jobs.
///
/// The job value itself is the payload: it is serialized on enqueue and deserialized
/// again by the worker before [`execute`](Job::execute) runs.
#[async_trait]
pub trait Job: Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Value stored as the job result on success
    type Output: Serialize + Send + 'static;

    /// Job type identifier for dispatch
    const JOB_TYPE: &'static str;

    /// Job priority (higher runs first)
    const PRIORITY: i32 = 0;

    /// Maximum retry attempts
    const MAX_RETRIES: u32 = crate::types::record::DEFAULT_MAX_RETRIES;

    /// Execute the job
    async fn execute(&self) -> Result<Self::Output, JobError>;

    /// Build the queue record for this job
    fn to_record(&self) -> QueueResult<JobRecord> {
        let payload = serde_json::to_value(self)?;
        Ok(JobRecord::new(Self::JOB_TYPE, payload)
            .with_priority(Self::PRIORITY)
            .with_max_retries(Self::MAX_RETRIES))
    }
}
