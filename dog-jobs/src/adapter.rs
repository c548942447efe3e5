use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::{
    backend::{self, QueueBackend},
    job::JobHandler,
    observability::LiveMetrics,
    worker::{Worker, WorkerHandle},
    HandlerRegistry, Job, JobError, JobId, JobRecord, QueueConfig, QueueError, QueueResult,
};

/// Entry point for producers and for starting workers.
///
/// Owns the backend, the handler registry and the metrics shared by every worker it
/// starts. Register handlers before calling [`start_workers`](Self::start_workers).
pub struct QueueAdapter<B: QueueBackend + ?Sized = dyn QueueBackend> {
    backend: Arc<B>,
    registry: Arc<RwLock<HandlerRegistry>>,
    metrics: Arc<LiveMetrics>,
    config: QueueConfig,
}

impl QueueAdapter<dyn QueueBackend> {
    /// Create an adapter on the backend named by `config`
    pub async fn from_config(config: QueueConfig) -> QueueResult<Self> {
        let backend = backend::connect(&config.backend).await?;
        Ok(Self::from_arc(backend).with_config(config))
    }

    /// Create an adapter from `QUEUE_*` environment variables
    pub async fn from_env() -> QueueResult<Self> {
        Self::from_config(QueueConfig::from_env()?).await
    }
}

impl<B: QueueBackend + 'static> QueueAdapter<B> {
    /// Create a new queue adapter
    pub fn new(backend: B) -> Self {
        Self::from_arc(Arc::new(backend))
    }
}

impl<B: QueueBackend + ?Sized + 'static> QueueAdapter<B> {
    /// Create an adapter over an already shared backend
    pub fn from_arc(backend: Arc<B>) -> Self {
        Self {
            backend,
            registry: Arc::new(RwLock::new(HandlerRegistry::new())),
            metrics: Arc::new(LiveMetrics::new()),
            config: QueueConfig::default(),
        }
    }

    /// Create adapter with custom configuration
    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn register_handler<H>(&self, job_type: impl Into<String>, handler: H) -> QueueResult<()>
    where
        H: JobHandler + 'static,
    {
        let job_type = job_type.into();
        self.registry.write().register_handler(job_type.clone(), handler)?;
        info!(job_type = %job_type, "Registered job handler");
        Ok(())
    }

    /// Register an async closure for `job_type`
    pub fn register_fn<F, Fut>(&self, job_type: impl Into<String>, func: F) -> QueueResult<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
    {
        let job_type = job_type.into();
        self.registry.write().register_fn(job_type.clone(), func)?;
        info!(job_type = %job_type, "Registered job handler");
        Ok(())
    }

    /// Register a job type with the adapter
    pub fn register_job<J: Job>(&self) -> QueueResult<()> {
        self.registry.write().register::<J>()?;
        info!(job_type = J::JOB_TYPE, "Registered job type");
        Ok(())
    }

    /// Submit a job with default priority and the configured retry limit
    #[instrument(skip(self, payload))]
    pub async fn enqueue(&self, job_type: &str, payload: Value) -> QueueResult<JobId> {
        let record = JobRecord::new(job_type, payload).with_max_retries(self.config.default_max_retries);
        self.submit(record).await
    }

    /// Submit a fully built record
    #[instrument(skip(self, job), fields(job_type = %job.job_type, priority = job.priority))]
    pub async fn submit(&self, job: JobRecord) -> QueueResult<JobId> {
        let job_type = job.job_type.clone();

        if !self.registry.read().is_registered(&job_type) {
            debug!("No handler registered yet; job will fail unless one is added before it is claimed");
        }

        let job_id = self.backend.enqueue(job).await?;
        self.metrics.increment_jobs_enqueued(&job_type);
        info!(job_id = %job_id, "Enqueued job");
        Ok(job_id)
    }

    /// Submit a typed job
    pub async fn enqueue_job<J: Job>(&self, job: &J) -> QueueResult<JobId> {
        self.submit(job.to_record()?).await
    }

    pub async fn get_job(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>> {
        self.backend.get(job_id).await
    }

    /// Cancel a job that no worker has claimed yet
    #[instrument(skip(self))]
    pub async fn cancel_job(&self, job_id: &JobId) -> QueueResult<bool> {
        let cancelled = self.backend.cancel(job_id).await?;

        if cancelled {
            if let Some(job) = self.backend.get(job_id).await? {
                self.metrics.increment_jobs_canceled(&job.job_type);
            }
            info!("Cancelled job");
        } else {
            debug!("Job not cancellable");
        }

        Ok(cancelled)
    }

    /// Build a worker sharing this adapter's backend, registry, metrics and config
    pub fn worker(&self) -> Worker<B> {
        Worker::new(self.backend.clone(), self.registry.clone())
            .with_config(self.config.clone())
            .with_metrics(self.metrics.clone())
    }

    /// Start `count` workers, optionally restricted to one job type
    #[instrument(skip(self))]
    pub fn start_workers(&self, count: usize, job_type: Option<&str>) -> Vec<WorkerHandle> {
        let handles: Vec<WorkerHandle> = (0..count)
            .map(|index| {
                let worker = self.worker().with_name(format!("worker-{}", index));
                let worker = match job_type {
                    Some(job_type) => worker.for_job_type(job_type),
                    None => worker,
                };
                worker.start()
            })
            .collect();

        info!(count = handles.len(), "Started workers");
        handles
    }

    /// Stop every handle, waiting up to the configured shutdown timeout for each
    pub async fn stop_workers(&self, handles: Vec<WorkerHandle>) -> QueueResult<()> {
        let timeout = self.config.shutdown_timeout;
        let results = futures::future::join_all(handles.into_iter().map(|h| h.stop(timeout))).await;

        let timed_out = results
            .iter()
            .filter(|r| matches!(r, Err(QueueError::ShutdownTimeout)))
            .count();
        if timed_out > 0 {
            warn!(timed_out, "Some workers did not stop in time");
        }

        results.into_iter().collect()
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.registry.read().registered_types()
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn metrics(&self) -> &Arc<LiveMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}
