use tracing::instrument;
use uuid::Uuid;

use crate::error::TaskError;
use crate::job::model::{Job, JobStatus, ProgressSnapshot, TaskType};
use crate::locks::LockMetadata;
use crate::orchestrator::{Orchestrator, store_err};
use crate::time::ms_to_rfc3339;

/// Poll-facing view of one job.
#[derive(Clone, Debug)]
pub struct JobProgress {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub current_phase: Option<TaskType>,
    pub total_chunks: u32,
    pub processed_chunks: u32,
    pub failed_chunks: u32,
    pub error_message: Option<String>,
    pub lock_holder: Option<String>,
    pub lock_start_time: Option<String>,
}

impl Orchestrator {
    /// Progress for one job.
    ///
    /// The scheduler registry answers for in-flight jobs — it is ahead of
    /// the store, which only learns terminal state. The store answers for
    /// settled jobs.
    #[instrument(skip(self), target = "orchestrator", fields(job_id = %job_id))]
    pub async fn progress(&self, job_id: &Uuid) -> Result<Option<JobProgress>, TaskError> {
        let job = self.store.fetch_job(job_id).await.map_err(store_err)?;

        if let Some(snap) = self.scheduler.progress(job_id) {
            let lock = job.as_ref().and_then(|j| self.lock_metadata_for(j));
            return Ok(Some(in_flight_progress(snap, job, lock)));
        }

        Ok(job.map(|j| {
            let lock = self.lock_metadata_for(&j);
            terminal_progress(j, lock)
        }))
    }

    /// Live snapshots for every active instance of an election.
    pub fn progress_by_election(&self, election_id: &Uuid) -> Vec<ProgressSnapshot> {
        self.scheduler.progress_by_election(election_id)
    }

    fn lock_metadata_for(&self, job: &Job) -> Option<LockMetadata> {
        let key = job.metadata.get("lockKey")?.as_str()?;
        self.locks.get_metadata(key)
    }
}

fn in_flight_progress(
    snap: ProgressSnapshot,
    job: Option<Job>,
    lock: Option<LockMetadata>,
) -> JobProgress {
    let (holder, start) = split_lock(lock);
    JobProgress {
        job_id: snap.job_id,
        status: JobStatus::InProgress,
        current_phase: snap.task_type,
        total_chunks: snap.total(),
        processed_chunks: snap.completed,
        failed_chunks: snap.failed,
        error_message: job.and_then(|j| j.error_message),
        lock_holder: holder,
        lock_start_time: start,
    }
}

fn terminal_progress(job: Job, lock: Option<LockMetadata>) -> JobProgress {
    let (holder, start) = split_lock(lock);
    JobProgress {
        job_id: job.job_id,
        status: job.status,
        current_phase: Some(job.operation_type),
        total_chunks: job.total_chunks,
        processed_chunks: job.processed_chunks,
        failed_chunks: job.failed_chunks,
        error_message: job.error_message,
        lock_holder: holder,
        lock_start_time: start,
    }
}

fn split_lock(lock: Option<LockMetadata>) -> (Option<String>, Option<String>) {
    match lock {
        Some(meta) => (
            Some(meta.holder),
            Some(ms_to_rfc3339(meta.acquired_at_ms)),
        ),
        None => (None, None),
    }
}
