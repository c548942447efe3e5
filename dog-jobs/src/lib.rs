//! # dog-jobs: Priority Job Queue and Worker Engine
//!
//! Submit units of work under a job type, store them in a backend, and let a pool of
//! polling workers run them through registered handlers with bounded retries.
//!
//! ## Features
//!
//! - **Priority ordering**: higher priority first, FIFO among equal priorities
//! - **Exclusive claims**: a job is handed to at most one worker per attempt
//! - **Bounded retries**: retryable failures are re-queued until `max_retries` is spent
//! - **Two backends**: process-local memory, or a durable sorted-index store (Redis)
//! - **Typed or dynamic handlers**: implement [`Job`] or register an async closure
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dog_jobs::prelude::*;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # async fn run() -> QueueResult<()> {
//! let queue = QueueAdapter::new(MemoryBackend::new());
//!
//! queue.register_fn("echo", |payload| async move { Ok::<_, JobError>(payload) })?;
//!
//! let job_id = queue.enqueue("echo", json!({"message": "hello"})).await?;
//! let workers = queue.start_workers(2, None);
//!
//! tokio::time::sleep(Duration::from_millis(200)).await;
//! let job = queue.get_job(&job_id).await?;
//! assert_eq!(job.map(|j| j.status), Some(JobStatus::Completed));
//!
//! queue.stop_workers(workers).await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod backend;
pub mod config;
pub mod error;
pub mod job;
pub mod observability;
pub mod types;
pub mod worker;

// Core API exports
pub use adapter::QueueAdapter;
pub use backend::QueueBackend;
pub use config::{BackendConfig, QueueConfig};
pub use error::{JobError, QueueError, QueueResult};
pub use job::{HandlerRegistry, Job, JobHandler};
pub use types::{JobId, JobRecord, JobStatus};
pub use worker::{Worker, WorkerHandle};

// Backend implementations
pub use backend::{DurableBackend, LocalStore, MemoryBackend, OrderedStore};

#[cfg(feature = "redis")]
pub use backend::RedisStore;

pub use observability::{LiveMetrics, MetricsSnapshot};

pub mod prelude {
    pub use crate::{
        HandlerRegistry, Job, JobError, JobId, JobRecord, JobStatus, QueueAdapter, QueueBackend,
        QueueConfig, QueueError, QueueResult, Worker, WorkerHandle,
    };

    pub use crate::{DurableBackend, LocalStore, MemoryBackend};

    pub use async_trait::async_trait;
}
