//! Thin glue between the (out-of-scope) API surface and the core.
//!
//! Each operation follows the same sequence: validate the request,
//! acquire the operation lock, plan chunks, persist the job, register a
//! task instance, and hand back a job id for polling. Only invalid input
//! and the informational already-locked outcome surface synchronously;
//! everything else is observable through progress polling.

pub mod combine;
pub mod completion;
pub mod decryption;
pub mod progress;
pub mod tally;
pub mod types;

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::error::TaskError;
use crate::job::model::{Job, JobStatus, TaskType};
use crate::job::store::JobStore;
use crate::locks::LockManager;
use crate::scheduler::scheduler::SchedulerHandle;
use crate::secrets::SecretCache;
use crate::time::now_ms;

pub struct Orchestrator {
    store: Arc<JobStore>,
    locks: Arc<LockManager>,
    secrets: Arc<SecretCache>,
    scheduler: SchedulerHandle,
    chunk_size: usize,
}

impl Orchestrator {
    pub fn new(
        store: Arc<JobStore>,
        locks: Arc<LockManager>,
        secrets: Arc<SecretCache>,
        scheduler: SchedulerHandle,
        chunk_size: usize,
    ) -> Self {
        Self {
            store,
            locks,
            secrets,
            scheduler,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Soft cancel: pending chunks are skipped, in-flight chunks finish,
    /// and the job settles as CANCELLED. Unknown or already-terminal jobs
    /// are a no-op.
    pub async fn cancel_job(&self, job_id: &Uuid) {
        self.scheduler.cancel(job_id).await;
    }

    /// Persist a fresh QUEUED job row and immediately move it to
    /// IN_PROGRESS; the instance registers right after.
    pub(crate) async fn insert_started_job(
        &self,
        job_id: Uuid,
        election_id: Uuid,
        operation_type: TaskType,
        total_chunks: u32,
        created_by: &str,
        metadata: Value,
    ) -> Result<(), TaskError> {
        let job = Job {
            job_id,
            election_id,
            operation_type,
            status: JobStatus::Queued,
            total_chunks,
            processed_chunks: 0,
            failed_chunks: 0,
            created_by: created_by.to_string(),
            started_at_ms: None,
            completed_at_ms: None,
            error_message: None,
            metadata,
        };

        self.store.repo.insert_job(&job).await.map_err(store_err)?;
        self.store
            .repo
            .mark_job_started(&job_id, now_ms())
            .await
            .map_err(store_err)?;

        Ok(())
    }
}

pub(crate) fn store_err(e: anyhow::Error) -> TaskError {
    TaskError::TransientStore(format!("{e:#}"))
}

pub(crate) fn encode_payload<T: serde::Serialize>(payload: &T) -> Result<Value, TaskError> {
    serde_json::to_value(payload).map_err(|e| TaskError::Internal(e.to_string()))
}
