use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::cws::types::{EncryptedBallot, SubmittedBallotRecord};
use crate::job::model::{
    CompensatedShareRow, DecryptionShareRow, Election, Guardian, Job, JobStatus, WorkerLogRow,
};

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn insert_job(&self, job: &Job) -> Result<()>;

    async fn fetch_job(&self, job_id: &Uuid) -> Result<Option<Job>>;

    async fn mark_job_started(&self, job_id: &Uuid, started_at_ms: u64) -> Result<()>;

    /// Writes a job's terminal state. Must be idempotent: replaying the
    /// same terminal write leaves the row unchanged.
    async fn finalize_job(
        &self,
        job_id: &Uuid,
        status: JobStatus,
        processed_chunks: u32,
        failed_chunks: u32,
        completed_at_ms: u64,
        error_message: Option<&str>,
    ) -> Result<()>;

    async fn fetch_election(&self, election_id: &Uuid) -> Result<Option<Election>>;

    async fn fetch_guardians(&self, election_id: &Uuid) -> Result<Vec<Guardian>>;

    async fn set_guardian_decrypted(&self, election_id: &Uuid, sequence: i64) -> Result<()>;

    async fn fetch_ballot_ids(&self, election_id: &Uuid) -> Result<Vec<Uuid>>;

    /// Projection fetch: ids and ciphertexts only, never whole entities.
    async fn fetch_ballot_ciphertexts(&self, ballot_ids: &[Uuid]) -> Result<Vec<EncryptedBallot>>;

    async fn insert_election_centers(
        &self,
        election_id: &Uuid,
        center_ids: &[Uuid],
    ) -> Result<()>;

    async fn fetch_election_center_ids(&self, election_id: &Uuid) -> Result<Vec<Uuid>>;

    async fn fetch_encrypted_tally(&self, election_center_id: &Uuid) -> Result<Option<String>>;

    /// Persists one tally chunk's output. Atomic and idempotent: a
    /// redelivered chunk overwrites with identical rows.
    async fn save_tally_result(
        &self,
        election_center_id: &Uuid,
        encrypted_tally: &str,
        submitted: &[SubmittedBallotRecord],
    ) -> Result<()>;

    async fn save_partial_decryption(&self, row: &DecryptionShareRow) -> Result<()>;

    async fn save_compensated_decryption(&self, row: &CompensatedShareRow) -> Result<()>;

    /// All partial and compensated shares accumulated for one chunk.
    async fn fetch_shares_for_center(
        &self,
        election_center_id: &Uuid,
    ) -> Result<(Vec<DecryptionShareRow>, Vec<CompensatedShareRow>)>;

    async fn save_combined_result(
        &self,
        election_center_id: &Uuid,
        election_result: &str,
    ) -> Result<()>;

    async fn insert_worker_log(&self, row: &WorkerLogRow) -> Result<()>;
}
