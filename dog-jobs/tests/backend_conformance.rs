//! Behavior every `QueueBackend` must share, run against each implementation.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;

use dog_jobs::{
    backend::QueueBackend, DurableBackend, JobRecord, JobStatus, LocalStore, MemoryBackend,
    QueueError,
};

fn job(job_type: &str, priority: i32) -> JobRecord {
    JobRecord::new(job_type, json!({"n": priority})).with_priority(priority)
}

/// A. Highest priority is claimed first
async fn priority_wins(backend: Arc<dyn QueueBackend>) {
    let _low = backend.enqueue(job("X", 0)).await.unwrap();
    let high = backend.enqueue(job("Y", 5)).await.unwrap();

    let claimed = backend.dequeue(None).await.unwrap().unwrap();
    assert_eq!(claimed.id, high);
    assert_eq!(claimed.status, JobStatus::Running);
    assert!(claimed.started_at.is_some());
}

async fn fifo_within_priority(backend: Arc<dyn QueueBackend>) {
    let mut expected = Vec::new();
    for _ in 0..5 {
        expected.push(backend.enqueue(job("report", 2)).await.unwrap());
    }
    let urgent = backend.enqueue(job("report", 9)).await.unwrap();

    assert_eq!(backend.dequeue(Some("report")).await.unwrap().unwrap().id, urgent);
    for id in expected {
        assert_eq!(backend.dequeue(Some("report")).await.unwrap().unwrap().id, id);
    }
    assert!(backend.dequeue(Some("report")).await.unwrap().is_none());
}

async fn negative_priorities_sort_last(backend: Arc<dyn QueueBackend>) {
    let background = backend.enqueue(job("sync", -3)).await.unwrap();
    let normal = backend.enqueue(job("sync", 0)).await.unwrap();

    assert_eq!(backend.dequeue(None).await.unwrap().unwrap().id, normal);
    assert_eq!(backend.dequeue(None).await.unwrap().unwrap().id, background);
}

async fn record_round_trips(backend: Arc<dyn QueueBackend>) {
    let original = JobRecord::new("email", json!({"to": "ops@example.com", "tags": [1, 2]}))
        .with_priority(3)
        .with_max_retries(6)
        .with_metadata_entry("source", json!("signup"));
    let job_id = backend.enqueue(original.clone()).await.unwrap();

    let stored = backend.get(&job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Queued);
    assert_eq!(stored.payload, original.payload);
    assert_eq!(stored.priority, 3);
    assert_eq!(stored.max_retries, 6);
    assert_eq!(stored.metadata.get("source"), Some(&json!("signup")));
    assert_eq!(stored.created_at, original.created_at);

    assert!(backend.get(&"missing".into()).await.unwrap().is_none());
}

/// D. Cancel before any claim
async fn cancel_before_claim(backend: Arc<dyn QueueBackend>) {
    let job_id = backend.enqueue(job("export", 1)).await.unwrap();

    assert!(backend.cancel(&job_id).await.unwrap());
    let record = backend.get(&job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Cancelled);
    assert!(record.completed_at.is_some());

    assert!(backend.dequeue(None).await.unwrap().is_none());
    assert!(!backend.cancel(&job_id).await.unwrap());
    assert!(!backend.cancel(&"missing".into()).await.unwrap());
}

async fn cancel_after_claim_is_refused(backend: Arc<dyn QueueBackend>) {
    let job_id = backend.enqueue(job("export", 1)).await.unwrap();
    backend.dequeue(None).await.unwrap().unwrap();

    assert!(!backend.cancel(&job_id).await.unwrap());
    assert_eq!(
        backend.get(&job_id).await.unwrap().unwrap().status,
        JobStatus::Running
    );
}

/// E. Filter never crosses job types
async fn filter_excludes_other_types(backend: Arc<dyn QueueBackend>) {
    let b = backend.enqueue(job("B", 0)).await.unwrap();

    assert!(backend.dequeue(Some("A")).await.unwrap().is_none());
    assert_eq!(backend.dequeue(Some("B")).await.unwrap().unwrap().id, b);
}

async fn terminal_records_are_frozen(backend: Arc<dyn QueueBackend>) {
    let job_id = backend.enqueue(job("export", 0)).await.unwrap();
    let mut claimed = backend.dequeue(None).await.unwrap().unwrap();
    claimed.complete(json!("done"));
    backend.update(claimed.clone()).await.unwrap();

    // Same terminal record again is accepted
    backend.update(claimed.clone()).await.unwrap();

    let mut reopened = claimed.clone();
    reopened.status = JobStatus::Queued;
    let result = backend.update(reopened).await;
    assert!(matches!(result, Err(QueueError::JobAlreadyTerminal(id)) if id == job_id));

    let result = backend.enqueue(claimed).await;
    assert!(matches!(result, Err(QueueError::JobAlreadyTerminal(_))));
    assert!(backend.dequeue(None).await.unwrap().is_none());
}

async fn retry_requeues_behind_peers(backend: Arc<dyn QueueBackend>) {
    let first = backend.enqueue(job("report", 1)).await.unwrap();
    let second = backend.enqueue(job("report", 1)).await.unwrap();

    let mut claimed = backend.dequeue(None).await.unwrap().unwrap();
    assert_eq!(claimed.id, first);
    claimed.error = Some("timeout".to_string());
    claimed.schedule_retry();
    backend.update(claimed).await.unwrap();

    assert_eq!(backend.dequeue(None).await.unwrap().unwrap().id, second);
    let retried = backend.dequeue(None).await.unwrap().unwrap();
    assert_eq!(retried.id, first);
    assert_eq!(retried.retry_count, 1);
    assert!(retried.error.is_none());
}

async fn resubmitting_claimed_job_is_rejected(backend: Arc<dyn QueueBackend>) {
    let job_id = backend.enqueue(job("export", 0)).await.unwrap();
    let claimed = backend.dequeue(None).await.unwrap().unwrap();

    let result = backend.enqueue(claimed).await;
    assert!(matches!(result, Err(QueueError::Validation(_))));

    // Nobody else can claim it while the first claimant holds it
    assert!(backend.dequeue(None).await.unwrap().is_none());
    assert_eq!(
        backend.get(&job_id).await.unwrap().unwrap().status,
        JobStatus::Running
    );
}

async fn queued_update_reorders_and_refilters(backend: Arc<dyn QueueBackend>) {
    let low = backend.enqueue(job("A", 1)).await.unwrap();
    let high = backend.enqueue(job("A", 5)).await.unwrap();
    let moved = backend.enqueue(job("A", 0)).await.unwrap();

    let mut raised = backend.get(&low).await.unwrap().unwrap();
    raised.priority = 10;
    backend.update(raised).await.unwrap();

    let mut retyped = backend.get(&moved).await.unwrap().unwrap();
    retyped.job_type = "B".to_string();
    backend.update(retyped).await.unwrap();

    assert_eq!(backend.dequeue(Some("A")).await.unwrap().unwrap().id, low);
    assert_eq!(backend.dequeue(Some("A")).await.unwrap().unwrap().id, high);
    assert!(backend.dequeue(Some("A")).await.unwrap().is_none());

    let claimed = backend.dequeue(Some("B")).await.unwrap().unwrap();
    assert_eq!(claimed.id, moved);
    assert_eq!(claimed.job_type, "B");
}

async fn invalid_jobs_rejected(backend: Arc<dyn QueueBackend>) {
    let result = backend.enqueue(JobRecord::new("", json!({}))).await;
    assert!(matches!(result, Err(QueueError::Validation(_))));

    let mut overdrawn = JobRecord::new("report", json!({})).with_max_retries(1);
    overdrawn.retry_count = 2;
    let result = backend.enqueue(overdrawn).await;
    assert!(matches!(result, Err(QueueError::Validation(_))));

    assert!(backend.dequeue(None).await.unwrap().is_none());
}

async fn concurrent_claims_are_exclusive(backend: Arc<dyn QueueBackend>) {
    const JOBS: usize = 50;
    const CLAIMANTS: usize = 8;

    let mut enqueued = HashSet::new();
    for i in 0..JOBS {
        enqueued.insert(backend.enqueue(job("bulk", (i % 4) as i32)).await.unwrap());
    }

    let tasks: Vec<_> = (0..CLAIMANTS)
        .map(|_| {
            let backend = backend.clone();
            tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(job) = backend.dequeue(None).await.unwrap() {
                    claimed.push(job.id);
                }
                claimed
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for task in tasks {
        for id in task.await.unwrap() {
            assert!(seen.insert(id), "job claimed twice");
        }
    }
    assert_eq!(seen, enqueued);
}

macro_rules! conformance_suite {
    ($module:ident, $factory:expr) => {
        mod $module {
            use super::*;

            fn backend() -> Arc<dyn QueueBackend> {
                $factory
            }

            #[tokio::test]
            async fn test_priority_wins() {
                priority_wins(backend()).await;
            }

            #[tokio::test]
            async fn test_fifo_within_priority() {
                fifo_within_priority(backend()).await;
            }

            #[tokio::test]
            async fn test_negative_priorities_sort_last() {
                negative_priorities_sort_last(backend()).await;
            }

            #[tokio::test]
            async fn test_record_round_trips() {
                record_round_trips(backend()).await;
            }

            #[tokio::test]
            async fn test_cancel_before_claim() {
                cancel_before_claim(backend()).await;
            }

            #[tokio::test]
            async fn test_cancel_after_claim_is_refused() {
                cancel_after_claim_is_refused(backend()).await;
            }

            #[tokio::test]
            async fn test_filter_excludes_other_types() {
                filter_excludes_other_types(backend()).await;
            }

            #[tokio::test]
            async fn test_terminal_records_are_frozen() {
                terminal_records_are_frozen(backend()).await;
            }

            #[tokio::test]
            async fn test_retry_requeues_behind_peers() {
                retry_requeues_behind_peers(backend()).await;
            }

            #[tokio::test]
            async fn test_resubmitting_claimed_job_is_rejected() {
                resubmitting_claimed_job_is_rejected(backend()).await;
            }

            #[tokio::test]
            async fn test_queued_update_reorders_and_refilters() {
                queued_update_reorders_and_refilters(backend()).await;
            }

            #[tokio::test]
            async fn test_invalid_jobs_rejected() {
                invalid_jobs_rejected(backend()).await;
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn test_concurrent_claims_are_exclusive() {
                concurrent_claims_are_exclusive(backend()).await;
            }
        }
    };
}

conformance_suite!(memory, Arc::new(MemoryBackend::new()));
conformance_suite!(durable_local, Arc::new(DurableBackend::new(LocalStore::new(), "conformance:")));
