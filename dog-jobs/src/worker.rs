use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    backend::QueueBackend, observability::LiveMetrics, HandlerRegistry, JobError, JobRecord,
    QueueConfig, QueueError, QueueResult,
};

/// Polling loop that claims jobs from a backend and runs them through the registry.
///
/// A worker processes one job at a time. Throughput comes from starting several
/// workers against the same backend; the backend's exclusive claim keeps them from
/// processing the same job twice.
pub struct Worker<B: QueueBackend + ?Sized = dyn QueueBackend> {
    name: String,
    backend: Arc<B>,
    registry: Arc<RwLock<HandlerRegistry>>,
    metrics: Arc<LiveMetrics>,
    job_type: Option<String>,
    config: QueueConfig,
}

impl<B: QueueBackend + ?Sized + 'static> Worker<B> {
    /// Create a worker over a shared registry
    pub fn new(backend: Arc<B>, registry: Arc<RwLock<HandlerRegistry>>) -> Self {
        Self {
            name: format!("worker-{}", uuid::Uuid::new_v4().simple()),
            backend,
            registry,
            metrics: Arc::new(LiveMetrics::new()),
            job_type: None,
            config: QueueConfig::default(),
        }
    }

    /// Create a worker that owns its registry
    pub fn with_registry(backend: Arc<B>, registry: HandlerRegistry) -> Self {
        Self::new(backend, Arc::new(RwLock::new(registry)))
    }

    /// Only claim jobs of this type
    pub fn for_job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<LiveMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the polling loop on the current tokio runtime
    pub fn start(self) -> WorkerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let name = self.name.clone();
        let join_handle = tokio::spawn(self.run(stop_rx));

        WorkerHandle {
            name,
            stop_tx,
            join_handle,
        }
    }

    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        info!(
            worker = %self.name,
            job_type = ?self.job_type,
            backend = self.backend.name(),
            "Worker started"
        );

        loop {
            // A dropped handle counts as a stop request
            if *stop_rx.borrow() || stop_rx.has_changed().is_err() {
                break;
            }

            let pause = match self.run_once().await {
                Ok(true) => None,
                Ok(false) => Some(self.config.poll_interval),
                Err(e) => {
                    error!(worker = %self.name, error = %e, "Error in worker loop, backing off");
                    Some(self.config.error_backoff)
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = stop_rx.changed() => {}
                }
            }
        }

        info!(worker = %self.name, "Worker stopped");
    }

    /// One worker cycle: claim at most one job and drive it to its next state.
    ///
    /// Returns `Ok(false)` when there was nothing to claim.
    #[instrument(skip(self), fields(worker = %self.name))]
    pub async fn run_once(&self) -> QueueResult<bool> {
        let Some(job) = self.backend.dequeue(self.job_type.as_deref()).await? else {
            return Ok(false);
        };

        self.process(job).await?;
        Ok(true)
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, job_type = %job.job_type))]
    async fn process(&self, mut job: JobRecord) -> QueueResult<()> {
        self.metrics.increment_jobs_claimed(&job.job_type);
        debug!(retry_count = job.retry_count, "Processing job");

        match self.invoke(&job).await {
            Ok(result) => {
                job.complete(result);
                self.persist(&job).await?;
                self.metrics.increment_jobs_completed(&job.job_type);
                info!("Job completed");
            }

            Err(JobError::Retryable(reason)) if job.can_retry() => {
                job.schedule_retry();
                self.persist(&job).await?;
                self.metrics.increment_jobs_retried(&job.job_type);
                warn!(
                    retry_count = job.retry_count,
                    max_retries = job.max_retries,
                    error = %reason,
                    "Job failed, re-queued for retry"
                );
            }

            Err(job_error) => {
                let reason = match &job_error {
                    JobError::HandlerNotFound(_) => job_error.to_string(),
                    other => other.message().to_string(),
                };
                job.fail(reason);
                self.persist(&job).await?;
                self.metrics.increment_jobs_failed(&job.job_type);
                error!(retry_count = job.retry_count, error = %job_error, "Job failed permanently");
            }
        }

        Ok(())
    }

    /// Run the handler; a panic counts as a retryable failure
    async fn invoke(&self, job: &JobRecord) -> Result<Value, JobError> {
        let handler = self.registry.read().get(&job.job_type);
        let Some(handler) = handler else {
            warn!(job_type = %job.job_type, "No handler registered for job type");
            return Err(JobError::HandlerNotFound(job.job_type.clone()));
        };

        match AssertUnwindSafe(handler.handle(job.payload.clone()))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => Err(JobError::Retryable(panic_message(panic.as_ref()))),
        }
    }

    /// Write the outcome back, retrying while the backend is unreachable.
    /// A retry is a `Running -> Queued` update, which puts the job back in line.
    /// The handler is never re-run from here.
    async fn persist(&self, job: &JobRecord) -> QueueResult<()> {
        let attempts = self.config.persist_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.backend.update(job.clone()).await {
                Err(QueueError::BackendUnavailable(reason)) if attempt < attempts => {
                    warn!(attempt, attempts, error = %reason, "Failed to persist job outcome, retrying");
                    tokio::time::sleep(self.config.error_backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("Handler panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("Handler panicked: {}", msg)
    } else {
        "Handler panicked".to_string()
    }
}

/// Handle for managing worker lifecycle
pub struct WorkerHandle {
    name: String,
    stop_tx: watch::Sender<bool>,
    join_handle: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the worker loop has exited
    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }

    /// Stop claiming new jobs and wait up to `timeout` for the in-flight job.
    ///
    /// The in-flight job is never interrupted; on timeout it keeps running in the
    /// background and `ShutdownTimeout` is returned.
    pub async fn stop(self, timeout: Duration) -> QueueResult<()> {
        let _ = self.stop_tx.send(true);

        match tokio::time::timeout(timeout, self.join_handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(QueueError::Internal(format!("Worker join error: {}", e))),
            Err(_) => {
                warn!(worker = %self.name, ?timeout, "Worker still busy after shutdown timeout");
                Err(QueueError::ShutdownTimeout)
            }
        }
    }
}
