//! In-memory registry of live task instances.
//!
//! The registry is the scheduler's single source of truth for in-flight
//! work. It stores chunk ids and serialized payloads only, never store
//! entities; workers and orchestrators interact with it exclusively
//! through ids. All mutation happens under one mutex, which keeps the
//! round-robin cursor, chunk states, and completion detection consistent
//! without async locking.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::Envelope;
use crate::error::TaskError;
use crate::job::model::{ChunkState, ProgressSnapshot, TaskType};

/// One chunk's scheduling slot.
#[derive(Clone, Debug)]
pub struct ChunkSlot {
    pub chunk_id: Uuid,
    pub chunk_number: u32,
    pub state: ChunkState,
    pub retry_count: u32,
    /// Publish gate: a retried chunk is not eligible before this time.
    pub not_before_ms: u64,
    pub last_error: Option<String>,
    pub payload: serde_json::Value,
}

impl ChunkSlot {
    pub fn new(chunk_number: u32, payload: serde_json::Value) -> Self {
        Self {
            chunk_id: Uuid::new_v4(),
            chunk_number,
            state: ChunkState::Pending,
            retry_count: 0,
            not_before_ms: 0,
            last_error: None,
            payload,
        }
    }
}

/// A job's live view inside the scheduler.
#[derive(Clone, Debug)]
pub struct TaskInstance {
    pub job_id: Uuid,
    pub election_id: Uuid,
    pub task_type: TaskType,
    pub chunks: Vec<ChunkSlot>,
    pub registered_at_ms: u64,
    cancelled: bool,
}

impl TaskInstance {
    pub fn new(
        job_id: Uuid,
        election_id: Uuid,
        task_type: TaskType,
        chunks: Vec<ChunkSlot>,
        registered_at_ms: u64,
    ) -> Self {
        Self {
            job_id,
            election_id,
            task_type,
            chunks,
            registered_at_ms,
            cancelled: false,
        }
    }

    fn has_publishable(&self, now_ms: u64) -> bool {
        !self.cancelled
            && self
                .chunks
                .iter()
                .any(|c| c.state == ChunkState::Pending && c.not_before_ms <= now_ms)
    }

    /// Terminal check. A cancelled instance is done once nothing is on a
    /// queue or in a worker; its untouched pending chunks are abandoned.
    fn is_complete(&self) -> bool {
        if self.cancelled {
            !self
                .chunks
                .iter()
                .any(|c| matches!(c.state, ChunkState::Queued | ChunkState::Processing))
        } else {
            self.chunks.iter().all(|c| c.state.is_terminal())
        }
    }

    fn progress(&self) -> ProgressSnapshot {
        let mut snap = ProgressSnapshot {
            job_id: self.job_id,
            task_type: Some(self.task_type),
            ..Default::default()
        };
        for c in &self.chunks {
            match c.state {
                ChunkState::Pending => snap.pending += 1,
                ChunkState::Queued => snap.queued += 1,
                ChunkState::Processing => snap.processing += 1,
                ChunkState::Completed => snap.completed += 1,
                ChunkState::Failed => snap.failed += 1,
            }
        }
        snap
    }
}

/// What to do when the last chunk of an instance settles. Registered at
/// instance creation, fired at most once, executed by the completion
/// worker — services never call each other directly.
#[derive(Clone, Debug)]
pub enum CompletionHook {
    /// Plain finalize: release the named lock.
    ReleaseLock { lock_key: String },

    /// Partial decryption finished: chain the compensated phase for the
    /// listed missing guardians (or finalize directly when none).
    ChainCompensated {
        election_id: Uuid,
        guardian_sequence: i64,
        missing_guardians: Vec<i64>,
        lock_key: String,
    },

    /// Compensated phase finished: mark the guardian done and scrub its
    /// cached material.
    FinalizeDecryption {
        election_id: Uuid,
        guardian_sequence: i64,
        lock_key: String,
    },
}

/// Emitted exactly once per instance when it reaches a terminal state.
#[derive(Clone, Debug)]
pub struct CompletionEvent {
    pub job_id: Uuid,
    pub election_id: Uuid,
    pub task_type: TaskType,
    pub processed: u32,
    pub failed: u32,
    pub total: u32,
    pub cancelled: bool,
    pub last_error: Option<String>,
    pub hook: Option<CompletionHook>,
}

/// Outcome of one state-change report.
#[derive(Debug, Default)]
pub struct ReportOutcome {
    pub completion: Option<CompletionEvent>,
    /// True when the chunk was re-queued for another attempt.
    pub retried: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl RetryPolicy {
    /// Delay before attempt `retry_count + 1`: base, 2x base, 4x base, ...
    pub fn backoff_ms(&self, retry_count: u32) -> u64 {
        self.backoff_base_ms.saturating_mul(1u64 << retry_count.min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 5_000,
        }
    }
}

struct Inner {
    instances: HashMap<Uuid, TaskInstance>,
    /// Registration order; the round-robin scan walks this.
    order: Vec<Uuid>,
    /// Advances one step per published tick and picks which instance
    /// publishes next.
    cursor: usize,
    chunk_index: HashMap<Uuid, Uuid>,
    hooks: HashMap<Uuid, CompletionHook>,
}

pub struct TaskRegistry {
    retry: RetryPolicy,
    inner: Mutex<Inner>,
}

impl TaskRegistry {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            inner: Mutex::new(Inner {
                instances: HashMap::new(),
                order: Vec::new(),
                cursor: 0,
                chunk_index: HashMap::new(),
                hooks: HashMap::new(),
            }),
        }
    }

    /// Register a new instance. O(1) amortized; safe from any task.
    pub fn register(&self, instance: TaskInstance, hook: Option<CompletionHook>) {
        debug_assert!(
            !instance.chunks.is_empty(),
            "empty instances are completed by the caller, not registered"
        );

        let mut g = self.inner.lock();
        for c in &instance.chunks {
            g.chunk_index.insert(c.chunk_id, instance.job_id);
        }
        if let Some(h) = hook {
            g.hooks.insert(instance.job_id, h);
        }
        g.order.push(instance.job_id);

        debug!(
            job_id = %instance.job_id,
            task_type = %instance.task_type,
            chunks = instance.chunks.len(),
            "task instance registered"
        );

        g.instances.insert(instance.job_id, instance);
    }

    /// Pick the next chunk to publish and mark it queued.
    ///
    /// The eligible set is every instance with a publishable pending chunk,
    /// in registration order; the cursor selects one instance per call and
    /// then advances, so with `k` competitors each instance publishes at
    /// least once every `k` calls. Within an instance the lowest-numbered
    /// pending chunk goes first.
    pub fn select_next(&self, now_ms: u64) -> Option<Envelope> {
        let mut g = self.inner.lock();

        let active: Vec<Uuid> = g
            .order
            .iter()
            .filter(|id| {
                g.instances
                    .get(*id)
                    .map(|i| i.has_publishable(now_ms))
                    .unwrap_or(false)
            })
            .copied()
            .collect();

        if active.is_empty() {
            return None;
        }

        let picked = active[g.cursor % active.len()];
        g.cursor = g.cursor.wrapping_add(1);

        let instance = g.instances.get_mut(&picked)?;
        let task_type = instance.task_type;

        let slot = instance
            .chunks
            .iter_mut()
            .filter(|c| c.state == ChunkState::Pending && c.not_before_ms <= now_ms)
            .min_by_key(|c| c.chunk_number)?;

        slot.state = ChunkState::Queued;

        Some(Envelope {
            chunk_id: slot.chunk_id,
            job_id: picked,
            task_type,
            payload: slot.payload.clone(),
        })
    }

    /// Revert a chunk whose publish failed back to pending. The next tick
    /// will try again.
    pub fn unpublish(&self, chunk_id: &Uuid) {
        let mut g = self.inner.lock();
        let Some(job_id) = g.chunk_index.get(chunk_id).copied() else {
            return;
        };
        if let Some(slot) = g
            .instances
            .get_mut(&job_id)
            .and_then(|i| i.chunks.iter_mut().find(|c| c.chunk_id == *chunk_id))
        {
            if slot.state == ChunkState::Queued {
                slot.state = ChunkState::Pending;
            }
        }
    }

    /// Apply a worker-reported state transition.
    ///
    /// Reports against unknown chunks or already-terminal slots are
    /// no-ops, which makes redelivered messages and duplicate reports
    /// harmless. A retriable failure below the attempt budget re-enters
    /// pending behind an exponential backoff gate; anything else is
    /// terminal.
    pub fn report_state_change(
        &self,
        chunk_id: &Uuid,
        new_state: ChunkState,
        error: Option<&TaskError>,
        now_ms: u64,
    ) -> ReportOutcome {
        let mut g = self.inner.lock();

        let Some(job_id) = g.chunk_index.get(chunk_id).copied() else {
            warn!(%chunk_id, "state report for unknown chunk ignored");
            return ReportOutcome::default();
        };

        let mut outcome = ReportOutcome::default();

        {
            let Some(instance) = g.instances.get_mut(&job_id) else {
                return outcome;
            };
            let Some(slot) = instance
                .chunks
                .iter_mut()
                .find(|c| c.chunk_id == *chunk_id)
            else {
                return outcome;
            };

            if slot.state.is_terminal() {
                return outcome;
            }

            match new_state {
                ChunkState::Processing => slot.state = ChunkState::Processing,
                ChunkState::Completed => slot.state = ChunkState::Completed,
                ChunkState::Failed => {
                    let retriable = error.map(TaskError::is_retriable).unwrap_or(false);
                    slot.last_error = error.map(|e| e.to_string());

                    if retriable && slot.retry_count < self.retry.max_attempts {
                        slot.not_before_ms = now_ms + self.retry.backoff_ms(slot.retry_count);
                        slot.retry_count += 1;
                        slot.state = ChunkState::Pending;
                        outcome.retried = true;

                        debug!(
                            %chunk_id,
                            retry_count = slot.retry_count,
                            not_before_ms = slot.not_before_ms,
                            "chunk re-queued after transient failure"
                        );
                    } else {
                        slot.state = ChunkState::Failed;
                    }
                }
                ChunkState::Pending | ChunkState::Queued => {
                    warn!(%chunk_id, ?new_state, "workers may not report this state");
                    return outcome;
                }
            }
        }

        outcome.completion = self.settle_if_complete(&mut g, job_id);
        outcome
    }

    /// Soft-cancel: abandon pending chunks, let in-flight ones finish.
    /// Returns the completion event immediately when nothing is in flight.
    pub fn cancel(&self, job_id: &Uuid) -> Option<CompletionEvent> {
        let mut g = self.inner.lock();
        g.instances.get_mut(job_id)?.cancelled = true;
        debug!(%job_id, "instance cancelled; pending chunks will be skipped");
        self.settle_if_complete(&mut g, *job_id)
    }

    pub fn progress(&self, job_id: &Uuid) -> Option<ProgressSnapshot> {
        self.inner.lock().instances.get(job_id).map(|i| i.progress())
    }

    pub fn progress_by_election(&self, election_id: &Uuid) -> Vec<ProgressSnapshot> {
        let g = self.inner.lock();
        g.order
            .iter()
            .filter_map(|id| g.instances.get(id))
            .filter(|i| i.election_id == *election_id)
            .map(|i| i.progress())
            .collect()
    }

    pub fn active_len(&self) -> usize {
        self.inner.lock().instances.len()
    }

    fn settle_if_complete(&self, g: &mut Inner, job_id: Uuid) -> Option<CompletionEvent> {
        let done = g.instances.get(&job_id).map(|i| i.is_complete())?;
        if !done {
            return None;
        }

        let instance = g.instances.remove(&job_id)?;
        g.order.retain(|id| *id != job_id);
        for c in &instance.chunks {
            g.chunk_index.remove(&c.chunk_id);
        }
        let hook = g.hooks.remove(&job_id);

        let snap = instance.progress();
        let last_error = instance
            .chunks
            .iter()
            .filter(|c| c.state == ChunkState::Failed)
            .filter_map(|c| c.last_error.clone())
            .next_back();

        debug!(
            %job_id,
            completed = snap.completed,
            failed = snap.failed,
            cancelled = instance.cancelled,
            "instance settled"
        );

        Some(CompletionEvent {
            job_id,
            election_id: instance.election_id,
            task_type: instance.task_type,
            processed: snap.completed,
            failed: snap.failed,
            total: snap.total(),
            cancelled: instance.cancelled,
            last_error,
            hook,
        })
    }
}
