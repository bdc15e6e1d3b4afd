use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::TaskError;
use crate::job::model::{CombinePayload, TaskType};
use crate::locks::{AcquireOutcome, combine_lock_key};
use crate::orchestrator::types::{CreateCombineRequest, InitiationOutcome};
use crate::orchestrator::{Orchestrator, encode_payload, store_err};
use crate::scheduler::registry::{ChunkSlot, CompletionHook, TaskInstance};
use crate::time::now_ms;

impl Orchestrator {
    /// Merge partial and compensated shares into the plaintext tally,
    /// one combine chunk per tally chunk.
    ///
    /// Requires a decryption quorum: at least `quorum` guardians must
    /// have finished their decryption chain.
    #[instrument(skip(self, req), target = "orchestrator", fields(election_id = %req.election_id))]
    pub async fn create_combine(
        &self,
        req: CreateCombineRequest,
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

        let guardians = self
            .store
            .repo
            .fetch_guardians(&req.election_id)
            .await
            .map_err(store_err)?;

        let decrypted = guardians.iter().filter(|g| g.decrypted_or_not).count() as i64;
        if decrypted < election.quorum {
            return Err(TaskError::InvalidInput(format!(
                "decryption quorum not reached: {decrypted} of {} guardians done",
                election.quorum
            )));
        }

        let center_ids = self
            .store
            .repo
            .fetch_election_center_ids(&req.election_id)
            .await
            .map_err(store_err)?;

        if center_ids.is_empty() {
            return Err(TaskError::InvalidInput(format!(
                "election {} has no tally chunks to combine",
                req.election_id
            )));
        }

        let lock_key = combine_lock_key(&req.election_id);
        match self
            .locks
            .try_acquire(&lock_key, &req.created_by, TaskType::Combine)
        {
            AcquireOutcome::Held(meta) => return Ok(InitiationOutcome::already(meta)),
            AcquireOutcome::Acquired => {}
        }

        match self
            .register_combine_job(center_ids, election.quorum, &req, &lock_key)
            .await
        {
            Ok(job_id) => Ok(InitiationOutcome::Started { job_id }),
            Err(e) => {
                self.locks.release(&lock_key);
                Err(e)
            }
        }
    }

    async fn register_combine_job(
        &self,
        center_ids: Vec<Uuid>,
        quorum: i64,
        req: &CreateCombineRequest,
        lock_key: &str,
    ) -> Result<Uuid, TaskError> {
        let job_id = Uuid::new_v4();
        self.insert_started_job(
            job_id,
            req.election_id,
            TaskType::Combine,
            center_ids.len() as u32,
            &req.created_by,
            json!({ "lockKey": lock_key }),
        )
        .await?;

        let mut chunks = Vec::with_capacity(center_ids.len());
        for (i, center_id) in center_ids.iter().enumerate() {
            let payload = encode_payload(&CombinePayload {
                election_id: req.election_id,
                election_center_id: *center_id,
                quorum,
            })?;
            chunks.push(ChunkSlot::new(i as u32, payload));
        }

        self.scheduler.register(
            TaskInstance::new(job_id, req.election_id, TaskType::Combine, chunks, now_ms()),
            Some(CompletionHook::ReleaseLock {
                lock_key: lock_key.to_string(),
            }),
        );

        info!(%job_id, total_chunks = center_ids.len(), "combine job registered");
        Ok(job_id)
    }
}
