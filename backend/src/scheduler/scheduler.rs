//! The scheduler loop and its service handle.
//!
//! Responsibilities:
//! - Publish exactly one chunk per tick, chosen by the registry's
//!   round-robin cursor over all active task instances.
//! - Relay worker state reports into the registry and forward the
//!   resulting completion events to the completion worker.
//!
//! Non-responsibilities:
//! - Executing chunks (worker pool does this).
//! - Finalizing jobs, chaining phases, releasing locks (completion
//!   worker does this).

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::bus::MessageBus;
use crate::error::TaskError;
use crate::job::model::{ChunkState, ProgressSnapshot};
use crate::metrics::counters::Counters;
use crate::scheduler::registry::{
    CompletionEvent, CompletionHook, TaskInstance, TaskRegistry,
};
use crate::time::now_ms;

/// Background publisher. One per backend process.
pub struct Scheduler {
    registry: Arc<TaskRegistry>,
    bus: Arc<MessageBus>,
    counters: Counters,
    tick: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<TaskRegistry>,
        bus: Arc<MessageBus>,
        counters: Counters,
        tick_ms: u64,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            registry,
            bus,
            counters,
            tick: Duration::from_millis(tick_ms.max(1)),
            shutdown,
        }
    }

    /// Run until shutdown. In-flight chunks are unaffected by exit; their
    /// reports keep flowing through the registry via the handle.
    pub async fn run(mut self) {
        info!(tick_ms = self.tick.as_millis() as u64, "scheduler loop started");

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            self.tick_once(now_ms());
        }

        info!("scheduler loop stopped");
    }

    /// One scheduling tick: publish at most one chunk.
    #[instrument(skip(self), target = "scheduler", level = "debug")]
    pub fn tick_once(&self, now_ms: u64) {
        let Some(env) = self.registry.select_next(now_ms) else {
            self.counters.sched_idle_ticks.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let chunk_id = env.chunk_id;
        let job_id = env.job_id;

        match self.bus.publish(env) {
            Ok(()) => {
                self.counters.sched_published.fetch_add(1, Ordering::Relaxed);
                debug!(%job_id, %chunk_id, "chunk published");
            }
            Err(e) => {
                // Chunk goes back to pending; a later tick retries it.
                self.counters
                    .sched_publish_errors
                    .fetch_add(1, Ordering::Relaxed);
                self.registry.unpublish(&chunk_id);
                warn!(%job_id, %chunk_id, error = %e, "publish failed; chunk re-pended");
            }
        }
    }
}

/// Cheap-to-clone handle for everyone who talks to the scheduler:
/// orchestrators register instances and query progress, workers report
/// chunk transitions.
#[derive(Clone)]
pub struct SchedulerHandle {
    registry: Arc<TaskRegistry>,
    completion_tx: mpsc::Sender<CompletionEvent>,
    counters: Counters,
}

impl SchedulerHandle {
    pub fn new(
        registry: Arc<TaskRegistry>,
        completion_tx: mpsc::Sender<CompletionEvent>,
        counters: Counters,
    ) -> Self {
        Self {
            registry,
            completion_tx,
            counters,
        }
    }

    pub fn register(&self, instance: TaskInstance, hook: Option<CompletionHook>) {
        self.counters.jobs_registered.fetch_add(1, Ordering::Relaxed);
        self.registry.register(instance, hook);
    }

    /// Report a chunk entering processing or completing.
    pub async fn report(&self, chunk_id: &Uuid, state: ChunkState) {
        if state == ChunkState::Completed {
            self.counters.worker_completed.fetch_add(1, Ordering::Relaxed);
        }
        let out = self
            .registry
            .report_state_change(chunk_id, state, None, now_ms());
        self.forward(out.completion).await;
    }

    /// Report a chunk failure; the registry decides retry vs terminal.
    pub async fn report_failure(&self, chunk_id: &Uuid, error: &TaskError) {
        self.counters.worker_failed.fetch_add(1, Ordering::Relaxed);

        let out =
            self.registry
                .report_state_change(chunk_id, ChunkState::Failed, Some(error), now_ms());
        if out.retried {
            self.counters.sched_retries.fetch_add(1, Ordering::Relaxed);
        }
        self.forward(out.completion).await;
    }

    /// Soft-cancel a job's instance.
    pub async fn cancel(&self, job_id: &Uuid) {
        let ev = self.registry.cancel(job_id);
        self.forward(ev).await;
    }

    pub fn progress(&self, job_id: &Uuid) -> Option<ProgressSnapshot> {
        self.registry.progress(job_id)
    }

    pub fn progress_by_election(&self, election_id: &Uuid) -> Vec<ProgressSnapshot> {
        self.registry.progress_by_election(election_id)
    }

    async fn forward(&self, ev: Option<CompletionEvent>) {
        if let Some(ev) = ev {
            if self.completion_tx.send(ev).await.is_err() {
                warn!("completion channel closed; event dropped");
            }
        }
    }
}
