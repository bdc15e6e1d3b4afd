//! Queue consumers.
//!
//! Each of the four queues gets `concurrency` consumer tasks. A consumer
//! takes one message, runs the handler, reports the outcome to the
//! scheduler, writes an audit row, then pauses briefly before taking the
//! next message so per-chunk buffers are returned between chunks.
//!
//! Failures never escape a consumer task: the handler's error is mapped
//! into the taxonomy upstream and lands here as a value, and the
//! scheduler decides retry vs permanent failure.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span};

use crate::bus::{Envelope, MessageBus, QueueConsumer, queue_name};
use crate::cws::client::CwsApi;
use crate::job::model::{ChunkState, TaskType, WorkerLogRow};
use crate::scheduler::scheduler::SchedulerHandle;
use crate::time::now_ms;
use crate::worker::handlers::{self, WorkerContext};

/// Spawn all consumers. Returned handles complete after shutdown is
/// signalled and each consumer's in-flight chunk has finished.
pub fn spawn_workers<C: CwsApi>(
    bus: &MessageBus,
    ctx: WorkerContext<C>,
    scheduler: SchedulerHandle,
    concurrency: usize,
    pause_ms: u64,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    for task_type in TaskType::ALL {
        for worker_idx in 0..concurrency.max(1) {
            let consumer = bus.consumer(task_type);
            let ctx = ctx.clone();
            let scheduler = scheduler.clone();
            let shutdown = shutdown.clone();

            handles.push(tokio::spawn(consume_loop(
                worker_idx, consumer, ctx, scheduler, pause_ms, shutdown,
            )));
        }
    }

    handles
}

async fn consume_loop<C: CwsApi>(
    worker_idx: usize,
    consumer: QueueConsumer,
    ctx: WorkerContext<C>,
    scheduler: SchedulerHandle,
    pause_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let queue = queue_name(consumer.task_type());
    info!(queue, worker_idx, "worker started");

    loop {
        let env = tokio::select! {
            m = consumer.next() => match m {
                Some(env) => env,
                None => break,
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        let span = info_span!(
            "chunk",
            queue,
            worker_idx,
            chunk_id = %env.chunk_id,
            job_id = %env.job_id
        );
        process_one(env, &ctx, &scheduler).instrument(span).await;

        // Breathing room between chunks; large per-chunk allocations are
        // out of scope by now and can be reclaimed.
        tokio::time::sleep(Duration::from_millis(pause_ms)).await;
    }

    info!(queue, worker_idx, "worker exiting");
}

/// Handle exactly one message: receive, process, report, log.
async fn process_one<C: CwsApi>(
    env: Envelope,
    ctx: &WorkerContext<C>,
    scheduler: &SchedulerHandle,
) {
    scheduler.report(&env.chunk_id, ChunkState::Processing).await;

    let started_at_ms = now_ms();
    let result = handlers::handle(&env, ctx).await;
    let ended_at_ms = now_ms();

    let (election_id, election_center_id, guardian_sequence) = handlers::audit_fields(&env);

    match &result {
        Ok(()) => {
            ctx.store
                .log_worker_attempt(WorkerLogRow {
                    election_id,
                    election_center_id,
                    guardian_sequence,
                    phase: env.task_type,
                    started_at_ms,
                    ended_at_ms,
                    status: "SUCCESS".into(),
                    error_message: None,
                })
                .await;

            scheduler.report(&env.chunk_id, ChunkState::Completed).await;
            debug!(elapsed_ms = ended_at_ms.saturating_sub(started_at_ms), "chunk completed");
        }
        Err(e) => {
            error!(error = %e, code = e.code(), "chunk failed");

            ctx.store
                .log_worker_attempt(WorkerLogRow {
                    election_id,
                    election_center_id,
                    guardian_sequence,
                    phase: env.task_type,
                    started_at_ms,
                    ended_at_ms,
                    status: "FAILED".into(),
                    error_message: Some(e.to_string()),
                })
                .await;

            scheduler.report_failure(&env.chunk_id, e).await;
        }
    }
}
