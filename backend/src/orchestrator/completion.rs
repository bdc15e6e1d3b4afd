//! Terminal-transition worker.
//!
//! The single consumer of completion events: it alone writes terminal job
//! state, which keeps those transitions serialized per process. Phase
//! chaining lives here too — the partial-decryption hook registers the
//! compensated instance, so the two decryption services never call each
//! other.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::job::model::{CompensatedDecryptPayload, Job, JobStatus, TaskType};
use crate::job::store::JobStore;
use crate::locks::LockManager;
use crate::metrics::counters::Counters;
use crate::scheduler::registry::{ChunkSlot, CompletionEvent, CompletionHook, TaskInstance};
use crate::scheduler::scheduler::SchedulerHandle;
use crate::secrets::{SecretCache, polynomial_key, private_key_key};
use crate::time::now_ms;

pub struct CompletionWorker {
    store: Arc<JobStore>,
    locks: Arc<LockManager>,
    secrets: Arc<SecretCache>,
    scheduler: SchedulerHandle,
    counters: Counters,
}

impl CompletionWorker {
    pub fn new(
        store: Arc<JobStore>,
        locks: Arc<LockManager>,
        secrets: Arc<SecretCache>,
        scheduler: SchedulerHandle,
        counters: Counters,
    ) -> Self {
        Self {
            store,
            locks,
            secrets,
            scheduler,
            counters,
        }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<CompletionEvent>) {
        info!("completion worker started");

        while let Some(ev) = rx.recv().await {
            if let Err(e) = self.handle_event(ev).await {
                error!(error = ?e, "completion handling failed");
            }
        }

        warn!("completion channel closed; worker exiting");
    }

    #[instrument(
        skip(self, ev),
        target = "completion",
        fields(job_id = %ev.job_id, task_type = %ev.task_type)
    )]
    async fn handle_event(&self, ev: CompletionEvent) -> anyhow::Result<()> {
        // Settlements are the natural moment to sweep expired material.
        self.secrets.purge_expired();

        let status = if ev.cancelled {
            JobStatus::Cancelled
        } else if ev.failed > 0 {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };

        self.store
            .repo
            .finalize_job(
                &ev.job_id,
                status,
                ev.processed,
                ev.failed,
                now_ms(),
                ev.last_error.as_deref(),
            )
            .await?;

        info!(
            status = status.as_str(),
            processed = ev.processed,
            failed = ev.failed,
            total = ev.total,
            "job settled"
        );

        let Some(hook) = ev.hook else {
            return Ok(());
        };
        self.counters.hooks_fired.fetch_add(1, Ordering::Relaxed);

        match hook {
            CompletionHook::ReleaseLock { lock_key } => {
                self.locks.release(&lock_key);
            }

            CompletionHook::ChainCompensated {
                election_id,
                guardian_sequence,
                missing_guardians,
                lock_key,
            } => {
                if status != JobStatus::Completed {
                    // Chain broken: scrub credentials and free the lock;
                    // the guardian must re-submit to try again.
                    self.scrub_guardian(&election_id, guardian_sequence);
                    self.locks.release(&lock_key);
                } else if missing_guardians.is_empty() {
                    self.finish_guardian(&election_id, guardian_sequence, &lock_key)
                        .await?;
                } else {
                    self.chain_compensated(
                        ev.job_id,
                        election_id,
                        guardian_sequence,
                        missing_guardians,
                        lock_key,
                    )
                    .await?;
                }
            }

            CompletionHook::FinalizeDecryption {
                election_id,
                guardian_sequence,
                lock_key,
            } => {
                if status == JobStatus::Completed {
                    self.finish_guardian(&election_id, guardian_sequence, &lock_key)
                        .await?;
                } else {
                    self.scrub_guardian(&election_id, guardian_sequence);
                    self.locks.release(&lock_key);
                }
            }
        }

        Ok(())
    }

    /// Register the compensated-decryption instance chained off a
    /// finished partial job: one chunk per (tally chunk, missing
    /// guardian) pair. Runs at most once per partial job — the hook it
    /// reacts to is consumed when the instance settles.
    async fn chain_compensated(
        &self,
        parent_job_id: Uuid,
        election_id: Uuid,
        guardian_sequence: i64,
        missing_guardians: Vec<i64>,
        lock_key: String,
    ) -> anyhow::Result<()> {
        let center_ids = self.store.repo.fetch_election_center_ids(&election_id).await?;

        let created_by = self
            .store
            .repo
            .fetch_job(&parent_job_id)
            .await?
            .map(|j: Job| j.created_by)
            .unwrap_or_else(|| "system".to_string());

        let total = (center_ids.len() * missing_guardians.len()) as u32;
        let job_id = Uuid::new_v4();

        let job = Job {
            job_id,
            election_id,
            operation_type: TaskType::CompensatedDecrypt,
            status: JobStatus::Queued,
            total_chunks: total,
            processed_chunks: 0,
            failed_chunks: 0,
            created_by,
            started_at_ms: None,
            completed_at_ms: None,
            error_message: None,
            metadata: json!({
                "lockKey": lock_key,
                "parentJobId": parent_job_id,
                "guardianSequence": guardian_sequence,
            }),
        };
        self.store.repo.insert_job(&job).await?;
        self.store.repo.mark_job_started(&job_id, now_ms()).await?;

        let mut chunks = Vec::with_capacity(total as usize);
        let mut chunk_number = 0u32;
        for missing in &missing_guardians {
            for center_id in &center_ids {
                let payload = serde_json::to_value(CompensatedDecryptPayload {
                    election_id,
                    election_center_id: *center_id,
                    compensating_sequence: guardian_sequence,
                    missing_sequence: *missing,
                })?;
                chunks.push(ChunkSlot::new(chunk_number, payload));
                chunk_number += 1;
            }
        }

        self.scheduler.register(
            TaskInstance::new(
                job_id,
                election_id,
                TaskType::CompensatedDecrypt,
                chunks,
                now_ms(),
            ),
            Some(CompletionHook::FinalizeDecryption {
                election_id,
                guardian_sequence,
                lock_key,
            }),
        );

        info!(
            %job_id,
            %parent_job_id,
            total_chunks = total,
            missing = missing_guardians.len(),
            "compensated decryption chained"
        );

        Ok(())
    }

    /// Guardian is decryption-done: flag it, scrub its material, free the
    /// chain lock.
    async fn finish_guardian(
        &self,
        election_id: &Uuid,
        guardian_sequence: i64,
        lock_key: &str,
    ) -> anyhow::Result<()> {
        self.store
            .repo
            .set_guardian_decrypted(election_id, guardian_sequence)
            .await?;
        self.scrub_guardian(election_id, guardian_sequence);
        self.locks.release(lock_key);

        info!(guardian = guardian_sequence, "guardian decryption finished");
        Ok(())
    }

    fn scrub_guardian(&self, election_id: &Uuid, guardian_sequence: i64) {
        self.secrets
            .delete(&private_key_key(election_id, guardian_sequence));
        self.secrets
            .delete(&polynomial_key(election_id, guardian_sequence));
    }
}
