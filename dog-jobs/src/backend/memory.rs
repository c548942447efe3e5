use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    backend::QueueBackend,
    types::record::{ensure_new_submission, ensure_transition_allowed},
    JobId, JobRecord, JobStatus, QueueResult,
};

/// In-memory backend for tests, development and single-process deployments.
///
/// One lock guards both the records and the queue order, so a claim is atomic by
/// construction. Contents are lost when the process exits.
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    /// Job records indexed by id
    jobs: HashMap<JobId, JobRecord>,

    /// Ids of queued jobs, highest priority first, FIFO within a priority
    queue: VecDeque<JobId>,
}

impl MemoryState {
    /// Insert behind every queued job with the same or higher priority
    fn insert_ordered(&mut self, id: JobId, priority: i32) {
        let jobs = &self.jobs;
        let insert_pos = self
            .queue
            .iter()
            .position(|queued_id| {
                jobs.get(queued_id)
                    .map(|queued| priority > queued.priority)
                    .unwrap_or(true)
            })
            .unwrap_or(self.queue.len());

        self.queue.insert(insert_pos, id);
    }

    fn remove_from_queue(&mut self, id: &JobId) {
        self.queue.retain(|queued_id| queued_id != id);
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Number of jobs currently waiting in the queue
    pub fn queued_len(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn enqueue(&self, mut job: JobRecord) -> QueueResult<JobId> {
        job.validate()?;
        job.status = JobStatus::Queued;

        let mut state = self.state.lock();
        ensure_new_submission(state.jobs.get(&job.id))?;

        let job_id = job.id.clone();
        let priority = job.priority;
        state.jobs.insert(job_id.clone(), job);
        state.insert_ordered(job_id.clone(), priority);

        debug!(job_id = %job_id, priority, "Enqueued job in memory");
        Ok(job_id)
    }

    async fn dequeue(&self, job_type: Option<&str>) -> QueueResult<Option<JobRecord>> {
        let mut state = self.state.lock();
        let MemoryState { jobs, queue } = &mut *state;

        let position = queue.iter().position(|job_id| {
            jobs.get(job_id)
                .map(|record| {
                    record.status == JobStatus::Queued
                        && job_type.map_or(true, |wanted| record.job_type == wanted)
                })
                .unwrap_or(false)
        });

        let Some(index) = position else {
            return Ok(None);
        };
        let Some(job_id) = queue.remove(index) else {
            return Ok(None);
        };
        let Some(record) = jobs.get_mut(&job_id) else {
            return Ok(None);
        };

        record.claim();
        Ok(Some(record.clone()))
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>> {
        Ok(self.state.lock().jobs.get(id).cloned())
    }

    async fn update(&self, job: JobRecord) -> QueueResult<()> {
        let mut state = self.state.lock();
        ensure_transition_allowed(state.jobs.get(&job.id), &job)?;

        let (was_member, old_priority) = state
            .jobs
            .get(&job.id)
            .map(|current| (current.is_queue_member(), current.priority))
            .unwrap_or((false, job.priority));

        // Keep queue membership equal to `status == Queued`
        match (was_member, job.is_queue_member()) {
            (false, true) => state.insert_ordered(job.id.clone(), job.priority),
            (true, false) => state.remove_from_queue(&job.id),
            (true, true) if old_priority != job.priority => {
                state.remove_from_queue(&job.id);
                state.insert_ordered(job.id.clone(), job.priority);
            }
            _ => {}
        }

        state.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn cancel(&self, id: &JobId) -> QueueResult<bool> {
        let mut state = self.state.lock();

        let Some(record) = state.jobs.get_mut(id) else {
            return Ok(false);
        };
        if !record.status.is_cancellable() {
            return Ok(false);
        }

        record.cancel();
        state.remove_from_queue(id);
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
