use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::cws::types::{EncryptedBallot, SubmittedBallotRecord};
use crate::job::model::{
    CompensatedShareRow, DecryptionShareRow, Job, WorkerLogRow,
};
use crate::job::repository::JobRepository;
use crate::logger::warn_if_slow;

/// Worker- and orchestrator-facing store.
///
/// Thin over the repository: adds slow-call warnings and context on the
/// chunk hot path. Orchestrators reach less-frequent operations through
/// `repo` directly.
pub struct JobStore {
    pub repo: Arc<dyn JobRepository>,
}

impl JobStore {
    pub fn new(repo: Arc<dyn JobRepository>) -> Self {
        Self { repo }
    }

    #[instrument(skip(self), target = "store", fields(job_id = %job_id))]
    pub async fn fetch_job(&self, job_id: &Uuid) -> Result<Option<Job>> {
        warn_if_slow("db_fetch_job", Duration::from_millis(100), async {
            self.repo.fetch_job(job_id).await
        })
        .await
        .context("repository fetch failed")
    }

    /// Projection load for one tally chunk: ids and ciphertexts only.
    #[instrument(skip(self, ballot_ids), target = "store", fields(count = ballot_ids.len()))]
    pub async fn fetch_ballot_ciphertexts(
        &self,
        ballot_ids: &[Uuid],
    ) -> Result<Vec<EncryptedBallot>> {
        warn_if_slow("db_fetch_ballots", Duration::from_millis(250), async {
            self.repo.fetch_ballot_ciphertexts(ballot_ids).await
        })
        .await
        .context("failed to load ballot ciphertexts")
    }

    #[instrument(skip(self), target = "store", fields(center = %election_center_id))]
    pub async fn fetch_encrypted_tally(&self, election_center_id: &Uuid) -> Result<Option<String>> {
        self.repo
            .fetch_encrypted_tally(election_center_id)
            .await
            .context("failed to load encrypted tally")
    }

    #[instrument(
        skip(self, encrypted_tally, submitted),
        target = "store",
        fields(center = %election_center_id, ballots = submitted.len())
    )]
    pub async fn save_tally_result(
        &self,
        election_center_id: &Uuid,
        encrypted_tally: &str,
        submitted: &[SubmittedBallotRecord],
    ) -> Result<()> {
        warn_if_slow("db_save_tally", Duration::from_millis(250), async {
            self.repo
                .save_tally_result(election_center_id, encrypted_tally, submitted)
                .await
        })
        .await
        .context("failed to persist tally chunk")?;

        debug!("tally chunk persisted");
        Ok(())
    }

    pub async fn save_partial_decryption(&self, row: &DecryptionShareRow) -> Result<()> {
        warn_if_slow("db_save_partial", Duration::from_millis(100), async {
            self.repo.save_partial_decryption(row).await
        })
        .await
        .context("failed to persist partial decryption")
    }

    pub async fn save_compensated_decryption(&self, row: &CompensatedShareRow) -> Result<()> {
        warn_if_slow("db_save_compensated", Duration::from_millis(100), async {
            self.repo.save_compensated_decryption(row).await
        })
        .await
        .context("failed to persist compensated decryption")
    }

    pub async fn fetch_shares_for_center(
        &self,
        election_center_id: &Uuid,
    ) -> Result<(Vec<DecryptionShareRow>, Vec<CompensatedShareRow>)> {
        warn_if_slow("db_fetch_shares", Duration::from_millis(250), async {
            self.repo.fetch_shares_for_center(election_center_id).await
        })
        .await
        .context("failed to load decryption shares")
    }

    pub async fn save_combined_result(
        &self,
        election_center_id: &Uuid,
        election_result: &str,
    ) -> Result<()> {
        self.repo
            .save_combined_result(election_center_id, election_result)
            .await
            .context("failed to persist combined result")
    }

    /// Audit write; never fails the chunk. A lost log row is a warning,
    /// not a processing error.
    pub async fn log_worker_attempt(&self, row: WorkerLogRow) {
        if let Err(e) = self.repo.insert_worker_log(&row).await {
            warn!(error = %e, phase = %row.phase, "worker log write failed");
        }
    }
}
