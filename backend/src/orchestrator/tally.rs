use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::TaskError;
use crate::job::model::{TallyChunkPayload, TaskType};
use crate::locks::{AcquireOutcome, tally_lock_key};
use crate::orchestrator::types::{CreateTallyRequest, InitiationOutcome};
use crate::orchestrator::{Orchestrator, encode_payload, store_err};
use crate::planner::partition::{plan, shuffle_seed};
use crate::scheduler::registry::{ChunkSlot, CompletionHook, TaskInstance};
use crate::time::now_ms;

impl Orchestrator {
    /// Turn an election's cast ballots into one tally job.
    ///
    /// A second concurrent initiation for the same election gets the
    /// current holder's metadata back instead of a second job.
    #[instrument(skip(self, req), target = "orchestrator", fields(election_id = %req.election_id))]
    pub async fn create_tally(
        &self,
        req: CreateTallyRequest,
    ) -> Result<InitiationOutcome, TaskError> {
        let election = self
            .store
            .repo
            .fetch_election(&req.election_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| {
                TaskError::InvalidInput(format!("unknown election {}", req.election_id))
            })?;

        let ballot_ids = self
            .store
            .repo
            .fetch_ballot_ids(&req.election_id)
            .await
            .map_err(store_err)?;

        if ballot_ids.is_empty() {
            return Err(TaskError::InvalidInput(format!(
                "election {} has no cast ballots to tally",
                req.election_id
            )));
        }

        let lock_key = tally_lock_key(&req.election_id);
        match self
            .locks
            .try_acquire(&lock_key, &req.created_by, TaskType::Tally)
        {
            AcquireOutcome::Held(meta) => return Ok(InitiationOutcome::already(meta)),
            AcquireOutcome::Acquired => {}
        }

        // Lock is ours: any failure past this point must give it back.
        match self
            .register_tally_job(&election.joint_public_key, ballot_ids, &req, &lock_key)
            .await
        {
            Ok(job_id) => Ok(InitiationOutcome::Started { job_id }),
            Err(e) => {
                self.locks.release(&lock_key);
                Err(e)
            }
        }
    }

    async fn register_tally_job(
        &self,
        joint_public_key: &str,
        ballot_ids: Vec<Uuid>,
        req: &CreateTallyRequest,
        lock_key: &str,
    ) -> Result<Uuid, TaskError> {
        let seed = shuffle_seed(&req.election_id, TaskType::Tally);
        let chunk_plan = plan(&ballot_ids, self.chunk_size, seed);

        // One election_center row per chunk, created up front so decrypt
        // and combine phases can enumerate them later.
        let center_ids: Vec<Uuid> = chunk_plan.chunks.iter().map(|_| Uuid::new_v4()).collect();
        self.store
            .repo
            .insert_election_centers(&req.election_id, &center_ids)
            .await
            .map_err(store_err)?;

        let job_id = Uuid::new_v4();
        self.insert_started_job(
            job_id,
            req.election_id,
            TaskType::Tally,
            chunk_plan.total_chunks(),
            &req.created_by,
            json!({ "lockKey": lock_key }),
        )
        .await?;

        let mut chunks = Vec::with_capacity(chunk_plan.chunks.len());
        for (planned, center_id) in chunk_plan.chunks.iter().zip(&center_ids) {
            let payload = encode_payload(&TallyChunkPayload {
                election_id: req.election_id,
                election_center_id: *center_id,
                ballot_ids: planned.item_ids.clone(),
                joint_public_key: joint_public_key.to_string(),
            })?;
            chunks.push(ChunkSlot::new(planned.chunk_number, payload));
        }

        self.scheduler.register(
            TaskInstance::new(job_id, req.election_id, TaskType::Tally, chunks, now_ms()),
            Some(CompletionHook::ReleaseLock {
                lock_key: lock_key.to_string(),
            }),
        );

        info!(
            %job_id,
            total_chunks = chunk_plan.total_chunks(),
            ballots = chunk_plan.total_items(),
            "tally job registered"
        );

        Ok(job_id)
    }
}
