//! Durable backend over an ordered-index key-value store.
//!
//! Layout under the namespace prefix:
//! - `{prefix}job:{id}`: JSON body holding the record and the sequence number of its
//!   current index entry
//! - `{prefix}queue:{job_type}`: ordered index, member `"{seq:020}:{id}"`, score `-priority`
//! - `{prefix}queues`: set of job types that own an index
//! - `{prefix}seq`: enqueue sequence counter
//!
//! Ascending score gives descending priority, and the zero-padded sequence makes equal
//! scores sort in enqueue order.

pub mod store;

#[cfg(feature = "redis")]
pub mod redis;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::{
    backend::QueueBackend,
    types::record::{ensure_new_submission, ensure_transition_allowed},
    JobId, JobRecord, JobStatus, QueueResult,
};

pub use store::{LocalStore, OrderedStore};

#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// Default namespace for keys in a shared store
pub const DEFAULT_KEY_PREFIX: &str = "job_queue:";

/// Stored job body
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredJob {
    /// Sequence of the index entry that currently represents this job
    seq: u64,
    record: JobRecord,
}

/// Index member encoding: zero-padded sequence, then the job id
fn index_member(seq: u64, id: &JobId) -> String {
    format!("{:020}:{}", seq, id)
}

fn parse_member(member: &str) -> Option<(u64, JobId)> {
    let (seq, id) = member.split_once(':')?;
    Some((seq.parse().ok()?, JobId::from(id)))
}

/// Queue backend that survives process restarts and tolerates concurrent claimants
/// in other processes. Claims rely on the store's remove-if-present, not on a local lock.
pub struct DurableBackend<S: OrderedStore> {
    store: S,
    key_prefix: String,
}

impl<S: OrderedStore> DurableBackend<S> {
    pub fn new(store: S, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
        }
    }

    /// Underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    fn job_key(&self, id: &JobId) -> String {
        format!("{}job:{}", self.key_prefix, id)
    }

    /// Index key for a job type
    pub fn queue_key(&self, job_type: &str) -> String {
        format!("{}queue:{}", self.key_prefix, job_type)
    }

    fn queues_key(&self) -> String {
        format!("{}queues", self.key_prefix)
    }

    fn seq_key(&self) -> String {
        format!("{}seq", self.key_prefix)
    }

    async fn load(&self, id: &JobId) -> QueueResult<Option<StoredJob>> {
        match self.store.get(&self.job_key(id)).await? {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, stored: &StoredJob) -> QueueResult<()> {
        let body = serde_json::to_string(stored)?;
        self.store.set(&self.job_key(&stored.record.id), body).await
    }

    /// Body first, index second: a worker must never find an index entry whose body
    /// has not been written yet.
    async fn push_to_index(&self, record: JobRecord) -> QueueResult<()> {
        let seq = self.store.next_sequence(&self.seq_key()).await?;
        let member = index_member(seq, &record.id);
        let index = self.queue_key(&record.job_type);
        let score = -i64::from(record.priority);
        let job_type = record.job_type.clone();

        self.save(&StoredJob { seq, record }).await?;
        self.store.set_add(&self.queues_key(), &job_type).await?;
        self.store.index_add(&index, &member, score).await
    }

    async fn candidate_indexes(&self, job_type: Option<&str>) -> QueueResult<Vec<String>> {
        match job_type {
            Some(job_type) => Ok(vec![self.queue_key(job_type)]),
            None => Ok(self
                .store
                .set_members(&self.queues_key())
                .await?
                .iter()
                .map(|job_type| self.queue_key(job_type))
                .collect()),
        }
    }

    /// Best head across the candidate indexes: lowest score, then lowest member.
    /// Returns `(index, member, score)`.
    async fn peek_best(&self, indexes: &[String]) -> QueueResult<Option<(String, String, i64)>> {
        let mut best: Option<(i64, String, String)> = None;

        for index in indexes {
            if let Some((member, score)) = self.store.index_head(index).await? {
                let better = match &best {
                    Some((best_score, best_member, _)) => {
                        (score, &member) < (*best_score, best_member)
                    }
                    None => true,
                };
                if better {
                    best = Some((score, member, index.clone()));
                }
            }
        }

        Ok(best.map(|(score, member, index)| (index, member, score)))
    }
}

#[async_trait]
impl<S: OrderedStore + 'static> QueueBackend for DurableBackend<S> {
    async fn enqueue(&self, mut job: JobRecord) -> QueueResult<JobId> {
        job.validate()?;
        job.status = JobStatus::Queued;

        let existing = self.load(&job.id).await?;
        ensure_new_submission(existing.as_ref().map(|stored| &stored.record))?;

        let job_id = job.id.clone();
        debug!(job_id = %job_id, priority = job.priority, "Enqueued job in durable store");
        self.push_to_index(job).await?;
        Ok(job_id)
    }

    async fn dequeue(&self, job_type: Option<&str>) -> QueueResult<Option<JobRecord>> {
        let indexes = self.candidate_indexes(job_type).await?;

        loop {
            let Some((index, member, score)) = self.peek_best(&indexes).await? else {
                return Ok(None);
            };

            if !self.store.index_remove(&index, &member).await? {
                debug!(member = %member, "Lost claim race, trying next candidate");
                continue;
            }

            let Some((seq, job_id)) = parse_member(&member) else {
                warn!(member = %member, "Dropping malformed index entry");
                continue;
            };

            let Some(mut stored) = self.load(&job_id).await? else {
                warn!(job_id = %job_id, "Dropping index entry for missing job body");
                continue;
            };

            if stored.seq != seq || stored.record.status != JobStatus::Queued {
                debug!(job_id = %job_id, status = %stored.record.status, "Skipping superseded index entry");
                continue;
            }

            stored.record.claim();
            if let Err(e) = self.save(&stored).await {
                // The body is still Queued; put its entry back so it stays claimable
                if let Err(restore) = self.store.index_add(&index, &member, score).await {
                    error!(job_id = %job_id, error = %restore, "Failed to restore index entry after failed claim");
                }
                return Err(e);
            }
            return Ok(Some(stored.record));
        }
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>> {
        Ok(self.load(id).await?.map(|stored| stored.record))
    }

    /// A Queued record whose priority or job type changed is re-indexed under a fresh
    /// sequence. If a worker claims it in between, the claim wins and the update is dropped.
    async fn update(&self, job: JobRecord) -> QueueResult<()> {
        let existing = self.load(&job.id).await?;
        ensure_transition_allowed(existing.as_ref().map(|stored| &stored.record), &job)?;

        let Some(StoredJob { seq, record: current }) = existing else {
            if job.is_queue_member() {
                return self.push_to_index(job).await;
            }
            return self.save(&StoredJob { seq: 0, record: job }).await;
        };

        let old_index = self.queue_key(&current.job_type);
        let old_member = index_member(seq, &job.id);

        match (current.is_queue_member(), job.is_queue_member()) {
            (false, true) => self.push_to_index(job).await,
            (true, false) => {
                self.store.index_remove(&old_index, &old_member).await?;
                self.save(&StoredJob { seq, record: job }).await
            }
            (true, true) if current.priority != job.priority || current.job_type != job.job_type => {
                if !self.store.index_remove(&old_index, &old_member).await? {
                    debug!(job_id = %job.id, "Update lost to a concurrent claim");
                    return Ok(());
                }
                self.push_to_index(job).await
            }
            _ => self.save(&StoredJob { seq, record: job }).await,
        }
    }

    /// Cancels only while the job's index entry can still be removed.
    ///
    /// `enqueue` writes the body before the index entry, so a cancel that lands between
    /// the two writes returns `false` and the job becomes claimable once indexed.
    async fn cancel(&self, id: &JobId) -> QueueResult<bool> {
        let Some(mut stored) = self.load(id).await? else {
            return Ok(false);
        };
        if !stored.record.status.is_cancellable() {
            return Ok(false);
        }

        if stored.record.is_queue_member() {
            let index = self.queue_key(&stored.record.job_type);
            let member = index_member(stored.seq, &stored.record.id);
            // A worker that removed the entry first owns the job
            if !self.store.index_remove(&index, &member).await? {
                return Ok(false);
            }
        }

        stored.record.cancel();
        self.save(&stored).await?;
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "durable"
    }
}
