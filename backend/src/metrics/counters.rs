use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub sched_published: Arc<AtomicU64>,
    pub sched_idle_ticks: Arc<AtomicU64>,
    pub sched_publish_errors: Arc<AtomicU64>,
    pub sched_retries: Arc<AtomicU64>,

    pub worker_completed: Arc<AtomicU64>,
    pub worker_failed: Arc<AtomicU64>,

    pub jobs_registered: Arc<AtomicU64>,
    pub hooks_fired: Arc<AtomicU64>,
}
