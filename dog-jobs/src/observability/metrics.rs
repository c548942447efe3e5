use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Live counters for queue activity
#[derive(Default)]
pub struct LiveMetrics {
    jobs_enqueued: AtomicU64,
    jobs_claimed: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_canceled: AtomicU64,

    // Per-job-type metrics
    job_type_metrics: RwLock<HashMap<String, JobTypeMetrics>>,
}

/// Counters for a single job type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTypeMetrics {
    pub enqueued: u64,
    pub claimed: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub canceled: u64,
}

/// Point-in-time copy of [`LiveMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub jobs_enqueued: u64,
    pub jobs_claimed: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_retried: u64,
    pub jobs_canceled: u64,
    pub by_job_type: HashMap<String, JobTypeMetrics>,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_type(&self, job_type: &str, apply: impl FnOnce(&mut JobTypeMetrics)) {
        let mut metrics = self.job_type_metrics.write();
        apply(metrics.entry(job_type.to_string()).or_default());
    }

    pub fn increment_jobs_enqueued(&self, job_type: &str) {
        self.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
        self.bump_type(job_type, |m| m.enqueued += 1);
    }

    pub fn increment_jobs_claimed(&self, job_type: &str) {
        self.jobs_claimed.fetch_add(1, Ordering::Relaxed);
        self.bump_type(job_type, |m| m.claimed += 1);
    }

    pub fn increment_jobs_completed(&self, job_type: &str) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.bump_type(job_type, |m| m.completed += 1);
    }

    pub fn increment_jobs_failed(&self, job_type: &str) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        self.bump_type(job_type, |m| m.failed += 1);
    }

    pub fn increment_jobs_retried(&self, job_type: &str) {
        self.jobs_retried.fetch_add(1, Ordering::Relaxed);
        self.bump_type(job_type, |m| m.retried += 1);
    }

    pub fn increment_jobs_canceled(&self, job_type: &str) {
        self.jobs_canceled.fetch_add(1, Ordering::Relaxed);
        self.bump_type(job_type, |m| m.canceled += 1);
    }

    // Getters for global metrics
    pub fn jobs_enqueued(&self) -> u64 {
        self.jobs_enqueued.load(Ordering::Relaxed)
    }

    pub fn jobs_claimed(&self) -> u64 {
        self.jobs_claimed.load(Ordering::Relaxed)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn jobs_retried(&self) -> u64 {
        self.jobs_retried.load(Ordering::Relaxed)
    }

    pub fn jobs_canceled(&self) -> u64 {
        self.jobs_canceled.load(Ordering::Relaxed)
    }

    /// Get metrics for a specific job type
    pub fn job_type_metrics(&self, job_type: &str) -> Option<JobTypeMetrics> {
        self.job_type_metrics.read().get(job_type).cloned()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_enqueued: self.jobs_enqueued(),
            jobs_claimed: self.jobs_claimed(),
            jobs_completed: self.jobs_completed(),
            jobs_failed: self.jobs_failed(),
            jobs_retried: self.jobs_retried(),
            jobs_canceled: self.jobs_canceled(),
            by_job_type: self.job_type_metrics.read().clone(),
        }
    }
}
