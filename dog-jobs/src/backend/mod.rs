pub mod durable;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::{config::BackendConfig, JobId, JobRecord, QueueResult};

pub use durable::{DurableBackend, LocalStore, OrderedStore};
pub use memory::MemoryBackend;

#[cfg(feature = "redis")]
pub use durable::RedisStore;

/// Backend trait for queue storage primitives
///
/// Every implementation must let exactly one concurrent caller of [`dequeue`](Self::dequeue)
/// claim a given job, and must order claims by priority (highest first) with FIFO among
/// equal priorities.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Store a new job and make it claimable (`status = Queued`).
    /// Ids the backend already holds are rejected; re-queue those through `update`.
    async fn enqueue(&self, job: JobRecord) -> QueueResult<JobId>;

    /// Claim the best eligible job, optionally restricted to one job type.
    /// Never waits for work to arrive.
    async fn dequeue(&self, job_type: Option<&str>) -> QueueResult<Option<JobRecord>>;

    /// Point lookup
    async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>>;

    /// Replace the stored record
    async fn update(&self, job: JobRecord) -> QueueResult<()>;

    /// Cancel a job nobody has claimed yet
    async fn cancel(&self, id: &JobId) -> QueueResult<bool>;

    /// Short label for logs
    fn name(&self) -> &'static str;
}

/// Build the backend selected by configuration
pub async fn connect(config: &BackendConfig) -> QueueResult<Arc<dyn QueueBackend>> {
    match config {
        BackendConfig::InMemory => {
            info!("Using in-memory job backend");
            Ok(Arc::new(MemoryBackend::new()))
        }
        BackendConfig::Durable { url, key_prefix } => connect_durable(url, key_prefix).await,
    }
}

#[cfg(feature = "redis")]
async fn connect_durable(url: &str, key_prefix: &str) -> QueueResult<Arc<dyn QueueBackend>> {
    let store = RedisStore::connect(url).await?;
    info!(key_prefix, "Using durable job backend (redis)");
    Ok(Arc::new(DurableBackend::new(store, key_prefix)))
}

#[cfg(not(feature = "redis"))]
async fn connect_durable(_url: &str, _key_prefix: &str) -> QueueResult<Arc<dyn QueueBackend>> {
    Err(crate::QueueError::BackendUnsupported(
        "durable backend requires the `redis` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_in_memory() {
        let backend = connect(&BackendConfig::InMemory).await.unwrap();
        assert_eq!(backend.name(), "memory");
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn test_connect_durable_without_redis_feature() {
        let config = BackendConfig::Durable {
            url: "redis://localhost:6379/0".to_string(),
            key_prefix: "job_queue:".to_string(),
        };
        let result = connect(&config).await;
        assert!(matches!(result, Err(crate::QueueError::BackendUnsupported(_))));
    }
}
