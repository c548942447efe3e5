use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;

use dog_jobs::{backend::QueueBackend, DurableBackend, JobId, JobRecord, LocalStore, MemoryBackend};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Enqueue jobs with the given priorities, drain the queue, and return the claim order
/// together with the order a stable sort by descending priority expects.
fn drain(backend: Arc<dyn QueueBackend>, priorities: &[i32]) -> (Vec<JobId>, Vec<JobId>) {
    runtime().block_on(async {
        let mut enqueued = Vec::new();
        for priority in priorities {
            let id = backend
                .enqueue(JobRecord::new("prop", json!(null)).with_priority(*priority))
                .await
                .unwrap();
            enqueued.push((*priority, id));
        }

        let mut claimed = Vec::new();
        while let Some(job) = backend.dequeue(None).await.unwrap() {
            claimed.push(job.id);
        }

        enqueued.sort_by(|a, b| b.0.cmp(&a.0));
        (claimed, enqueued.into_iter().map(|(_, id)| id).collect())
    })
}

proptest! {
    #[test]
    fn memory_claims_by_priority_then_fifo(priorities in prop::collection::vec(-5i32..5, 0..40)) {
        let (claimed, expected) = drain(Arc::new(MemoryBackend::new()), &priorities);
        prop_assert_eq!(claimed, expected);
    }

    #[test]
    fn durable_claims_by_priority_then_fifo(priorities in prop::collection::vec(-5i32..5, 0..40)) {
        let backend = Arc::new(DurableBackend::new(LocalStore::new(), "prop:"));
        let (claimed, expected) = drain(backend, &priorities);
        prop_assert_eq!(claimed, expected);
    }

    #[test]
    fn extreme_priorities_keep_their_order(priorities in prop::collection::vec(any::<i32>(), 1..20)) {
        let backend = Arc::new(DurableBackend::new(LocalStore::new(), "extreme:"));
        let (claimed, expected) = drain(backend, &priorities);
        prop_assert_eq!(claimed, expected);
    }
}
