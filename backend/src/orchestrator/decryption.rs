use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::TaskError;
use crate::job::model::{PartialDecryptPayload, TaskType};
use crate::locks::{AcquireOutcome, decryption_lock_key};
use crate::orchestrator::types::{InitiationOutcome, StartDecryptionRequest};
use crate::orchestrator::{Orchestrator, encode_payload, store_err};
use crate::scheduler::registry::{ChunkSlot, CompletionHook, TaskInstance};
use crate::secrets::{polynomial_key, private_key_key};
use crate::time::now_ms;

impl Orchestrator {
    /// Start the decryption chain for one guardian: a partial-decryption
    /// job over every tally chunk now, and a compensated job for the
    /// declared missing guardians chained on its completion.
    ///
    /// The guardian's decrypted material goes into the secret cache for
    /// the duration of the chain and is scrubbed when it settles.
    #[instrument(
        skip(self, req),
        target = "orchestrator",
        fields(election_id = %req.election_id, guardian = req.guardian_sequence)
    )]
    pub async fn start_guardian_decryption(
        &self,
        req: StartDecryptionRequest,
    ) -> Result<InitiationOutcome, TaskError> {
        if req.private_key.is_empty() || req.polynomial.is_empty() {
            return Err(TaskError::InvalidInput(
                "guardian credentials must not be empty".into(),
            ));
        }

        let guardians = self
            .store
            .repo
            .fetch_guardians(&req.election_id)
            .await
            .map_err(store_err)?;

        if !guardians
            .iter()
            .any(|g| g.sequence_order == req.guardian_sequence)
        {
            return Err(TaskError::InvalidInput(format!(
                "guardian {} is not part of election {}",
                req.guardian_sequence, req.election_id
            )));
        }

        for missing in &req.missing_guardians {
            if *missing == req.guardian_sequence {
                return Err(TaskError::InvalidInput(
                    "a guardian cannot be missing from its own decryption".into(),
                ));
            }
            if !guardians.iter().any(|g| g.sequence_order == *missing) {
                return Err(TaskError::InvalidInput(format!(
                    "missing guardian {missing} is not part of election {}",
                    req.election_id
                )));
            }
        }

        let center_ids = self
            .store
            .repo
            .fetch_election_center_ids(&req.election_id)
            .await
            .map_err(store_err)?;

        if center_ids.is_empty() {
            return Err(TaskError::InvalidInput(format!(
                "election {} has no encrypted tally to decrypt",
                req.election_id
            )));
        }

        let lock_key = decryption_lock_key(&req.election_id, req.guardian_sequence);
        match self
            .locks
            .try_acquire(&lock_key, &req.created_by, TaskType::PartialDecrypt)
        {
            AcquireOutcome::Held(meta) => return Ok(InitiationOutcome::already(meta)),
            AcquireOutcome::Acquired => {}
        }

        // Credentials live in the cache for the whole partial+compensated
        // chain and are deleted when it settles.
        self.secrets.put(
            &private_key_key(&req.election_id, req.guardian_sequence),
            req.private_key.clone(),
        );
        self.secrets.put(
            &polynomial_key(&req.election_id, req.guardian_sequence),
            req.polynomial.clone(),
        );

        match self.register_partial_job(center_ids, &req, &lock_key).await {
            Ok(job_id) => Ok(InitiationOutcome::Started { job_id }),
            Err(e) => {
                self.secrets
                    .delete(&private_key_key(&req.election_id, req.guardian_sequence));
                self.secrets
                    .delete(&polynomial_key(&req.election_id, req.guardian_sequence));
                self.locks.release(&lock_key);
                Err(e)
            }
        }
    }

    async fn register_partial_job(
        &self,
        center_ids: Vec<Uuid>,
        req: &StartDecryptionRequest,
        lock_key: &str,
    ) -> Result<Uuid, TaskError> {
        let job_id = Uuid::new_v4();
        self.insert_started_job(
            job_id,
            req.election_id,
            TaskType::PartialDecrypt,
            center_ids.len() as u32,
            &req.created_by,
            json!({
                "lockKey": lock_key,
                "guardianSequence": req.guardian_sequence,
                "missingGuardians": req.missing_guardians,
            }),
        )
        .await?;

        let mut chunks = Vec::with_capacity(center_ids.len());
        for (i, center_id) in center_ids.iter().enumerate() {
            let payload = encode_payload(&PartialDecryptPayload {
                election_id: req.election_id,
                election_center_id: *center_id,
                guardian_sequence: req.guardian_sequence,
            })?;
            chunks.push(ChunkSlot::new(i as u32, payload));
        }

        self.scheduler.register(
            TaskInstance::new(
                job_id,
                req.election_id,
                TaskType::PartialDecrypt,
                chunks,
                now_ms(),
            ),
            Some(CompletionHook::ChainCompensated {
                election_id: req.election_id,
                guardian_sequence: req.guardian_sequence,
                missing_guardians: req.missing_guardians.clone(),
                lock_key: lock_key.to_string(),
            }),
        );

        info!(
            %job_id,
            total_chunks = center_ids.len(),
            missing = req.missing_guardians.len(),
            "partial decryption job registered"
        );

        Ok(job_id)
    }
}
