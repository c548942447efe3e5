use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{Job, JobError, QueueError, QueueResult};

/// Type-erased job handler for runtime dispatch
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run the job for `payload`, returning the value stored as its result
    async fn handle(&self, payload: Value) -> Result<Value, JobError>;
}

/// Handler backed by an async closure
struct FnHandler<F> {
    func: F,
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, JobError>> + Send,
{
    async fn handle(&self, payload: Value) -> Result<Value, JobError> {
        (self.func)(payload).await
    }
}

/// Handler for a typed [`Job`]
struct TypedHandler<J: Job> {
    _phantom: PhantomData<fn() -> J>,
}

#[async_trait]
impl<J: Job> JobHandler for TypedHandler<J> {
    async fn handle(&self, payload: Value) -> Result<Value, JobError> {
        let job: J = serde_json::from_value(payload)?;
        let output = job.execute().await?;

        serde_json::to_value(output)
            .map_err(|e| JobError::Permanent(format!("Failed to serialize result: {}", e)))
    }
}

/// Registry for mapping job types to their handlers.
///
/// Populated before workers start; a job type maps to exactly one handler.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `job_type`
    pub fn register_handler<H>(&mut self, job_type: impl Into<String>, handler: H) -> QueueResult<()>
    where
        H: JobHandler + 'static,
    {
        self.insert(job_type.into(), Arc::new(handler))
    }

    /// Register an async closure as the handler for `job_type`
    pub fn register_fn<F, Fut>(&mut self, job_type: impl Into<String>, func: F) -> QueueResult<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
    {
        self.insert(job_type.into(), Arc::new(FnHandler { func }))
    }

    /// Register a typed job under its `JOB_TYPE`
    pub fn register<J: Job>(&mut self) -> QueueResult<()> {
        self.insert(
            J::JOB_TYPE.to_string(),
            Arc::new(TypedHandler::<J> { _phantom: PhantomData }),
        )
    }

    fn insert(&mut self, job_type: String, handler: Arc<dyn JobHandler>) -> QueueResult<()> {
        if job_type.trim().is_empty() {
            return Err(QueueError::Validation("job_type must not be empty".to_string()));
        }
        if self.handlers.contains_key(&job_type) {
            return Err(QueueError::HandlerAlreadyRegistered(job_type));
        }

        self.handlers.insert(job_type, handler);
        Ok(())
    }

    /// Look up the handler for a job type
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Dispatch a payload to the handler for `job_type`
    pub async fn dispatch(&self, job_type: &str, payload: Value) -> Result<Value, JobError> {
        let handler = self
            .get(job_type)
            .ok_or_else(|| JobError::HandlerNotFound(job_type.to_string()))?;

        handler.handle(payload).await
    }

    /// Check if a job type is registered
    pub fn is_registered(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Get all registered job types
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}
