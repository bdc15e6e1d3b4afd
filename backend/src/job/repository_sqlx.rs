use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::cws::types::{EncryptedBallot, SubmittedBallotRecord};
use crate::job::model::{
    CompensatedShareRow, DecryptionShareRow, Election, Guardian, Job, JobStatus, TaskType,
    WorkerLogRow,
};
use crate::job::repository::JobRepository;

/// SQLx-backed implementation of JobRepository.
/// Responsible only for persistence and row mapping.
pub struct SqlxJobRepository {
    pool: AnyPool,
}

impl SqlxJobRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn insert_job(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO job (
  job_id, election_id, operation_type, status,
  total_chunks, processed_chunks, failed_chunks,
  created_by, started_at_ms, completed_at_ms, error_message, metadata
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(job.job_id.to_string())
        .bind(job.election_id.to_string())
        .bind(job.operation_type.as_str())
        .bind(job.status.as_str())
        .bind(job.total_chunks as i64)
        .bind(job.processed_chunks as i64)
        .bind(job.failed_chunks as i64)
        .bind(job.created_by.as_str())
        .bind(job.started_at_ms.map(|v| v as i64))
        .bind(job.completed_at_ms.map(|v| v as i64))
        .bind(job.error_message.as_deref())
        .bind(job.metadata.to_string())
        .execute(&self.pool)
        .await
        .context("insert job")?;

        Ok(())
    }

    async fn fetch_job(&self, job_id: &Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(
            r#"
SELECT
  job_id, election_id, operation_type, status,
  total_chunks, processed_chunks, failed_chunks,
  created_by, started_at_ms, completed_at_ms, error_message, metadata
FROM job
WHERE job_id = ?;
"#,
        )
        .bind(job_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_job(&r)?)),
            None => Ok(None),
        }
    }

    async fn mark_job_started(&self, job_id: &Uuid, started_at_ms: u64) -> Result<()> {
        sqlx::query(
            r#"
UPDATE job
SET status = ?, started_at_ms = ?
WHERE job_id = ? AND status = ?;
"#,
        )
        .bind(JobStatus::InProgress.as_str())
        .bind(started_at_ms as i64)
        .bind(job_id.to_string())
        .bind(JobStatus::Queued.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn finalize_job(
        &self,
        job_id: &Uuid,
        status: JobStatus,
        processed_chunks: u32,
        failed_chunks: u32,
        completed_at_ms: u64,
        error_message: Option<&str>,
    ) -> Result<()> {
        // Guarded on non-terminal status so a replayed terminal write is a
        // no-op instead of clobbering an earlier outcome.
        sqlx::query(
            r#"
UPDATE job
SET status = ?, processed_chunks = ?, failed_chunks = ?,
    completed_at_ms = ?, error_message = ?
WHERE job_id = ? AND status IN (?, ?);
"#,
        )
        .bind(status.as_str())
        .bind(processed_chunks as i64)
        .bind(failed_chunks as i64)
        .bind(completed_at_ms as i64)
        .bind(error_message)
        .bind(job_id.to_string())
        .bind(JobStatus::Queued.as_str())
        .bind(JobStatus::InProgress.as_str())
        .execute(&self.pool)
        .await
        .context("finalize job")?;

        Ok(())
    }

    async fn fetch_election(&self, election_id: &Uuid) -> Result<Option<Election>> {
        let row = sqlx::query(
            r#"
SELECT election_id, name, joint_public_key, quorum, number_of_guardians
FROM election
WHERE election_id = ?;
"#,
        )
        .bind(election_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(Election {
                election_id: parse_uuid(&r, "election_id")?,
                name: r.try_get("name")?,
                joint_public_key: r.try_get("joint_public_key")?,
                quorum: r.try_get("quorum")?,
                number_of_guardians: r.try_get("number_of_guardians")?,
            })),
            None => Ok(None),
        }
    }

    async fn fetch_guardians(&self, election_id: &Uuid) -> Result<Vec<Guardian>> {
        let rows = sqlx::query(
            r#"
SELECT election_id, sequence_order, email, public_key,
       CAST(decrypted_or_not AS INTEGER) AS decrypted_i
FROM guardian
WHERE election_id = ?
ORDER BY sequence_order;
"#,
        )
        .bind(election_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(Guardian {
                election_id: parse_uuid(&r, "election_id")?,
                sequence_order: r.try_get("sequence_order")?,
                email: r.try_get("email")?,
                public_key: r.try_get("public_key")?,
                decrypted_or_not: r.try_get::<i64, _>("decrypted_i")? != 0,
            });
        }

        Ok(out)
    }

    async fn set_guardian_decrypted(&self, election_id: &Uuid, sequence: i64) -> Result<()> {
        sqlx::query(
            r#"
UPDATE guardian
SET decrypted_or_not = TRUE
WHERE election_id = ? AND sequence_order = ?;
"#,
        )
        .bind(election_id.to_string())
        .bind(sequence)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_ballot_ids(&self, election_id: &Uuid) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(r#"SELECT ballot_id FROM ballot WHERE election_id = ?;"#)
            .bind(election_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(|r| parse_uuid(r, "ballot_id")).collect()
    }

    async fn fetch_ballot_ciphertexts(&self, ballot_ids: &[Uuid]) -> Result<Vec<EncryptedBallot>> {
        if ballot_ids.is_empty() {
            return Ok(vec![]);
        }

        let placeholders = vec!["?"; ballot_ids.len()].join(", ");
        let sql = format!(
            "SELECT ballot_id, cipher_text FROM ballot WHERE ballot_id IN ({placeholders});"
        );

        let mut query = sqlx::query(&sql);
        for id in ballot_ids {
            query = query.bind(id.to_string());
        }

        let rows = query.fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(EncryptedBallot {
                ballot_id: parse_uuid(&r, "ballot_id")?,
                cipher_text: r.try_get("cipher_text")?,
            });
        }

        Ok(out)
    }

    async fn insert_election_centers(
        &self,
        election_id: &Uuid,
        center_ids: &[Uuid],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for id in center_ids {
            sqlx::query(
                r#"
INSERT INTO election_center (election_center_id, election_id, encrypted_tally, election_result)
VALUES (?, ?, NULL, NULL)
ON CONFLICT (election_center_id) DO NOTHING;
"#,
            )
            .bind(id.to_string())
            .bind(election_id.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await.context("insert election centers")?;
        Ok(())
    }

    async fn fetch_election_center_ids(&self, election_id: &Uuid) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
SELECT election_center_id FROM election_center
WHERE election_id = ?
ORDER BY election_center_id;
"#,
        )
        .bind(election_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| parse_uuid(r, "election_center_id"))
            .collect()
    }

    async fn fetch_encrypted_tally(&self, election_center_id: &Uuid) -> Result<Option<String>> {
        let row = sqlx::query(
            r#"SELECT encrypted_tally FROM election_center WHERE election_center_id = ?;"#,
        )
        .bind(election_center_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(r.try_get("encrypted_tally")?),
            None => Ok(None),
        }
    }

    async fn save_tally_result(
        &self,
        election_center_id: &Uuid,
        encrypted_tally: &str,
        submitted: &[SubmittedBallotRecord],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
UPDATE election_center
SET encrypted_tally = ?
WHERE election_center_id = ?;
"#,
        )
        .bind(encrypted_tally)
        .bind(election_center_id.to_string())
        .execute(&mut *tx)
        .await?;

        for b in submitted {
            sqlx::query(
                r#"
INSERT INTO submitted_ballot (id, election_center_id, cipher_text)
VALUES (?, ?, ?)
ON CONFLICT (id) DO UPDATE SET cipher_text = excluded.cipher_text;
"#,
            )
            .bind(b.ballot_id.to_string())
            .bind(election_center_id.to_string())
            .bind(b.cipher_text.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await.context("save tally result")?;
        Ok(())
    }

    async fn save_partial_decryption(&self, row: &DecryptionShareRow) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO decryption (election_center_id, guardian_sequence, tally_share, ballot_share)
VALUES (?, ?, ?, ?)
ON CONFLICT (election_center_id, guardian_sequence) DO UPDATE
SET tally_share = excluded.tally_share, ballot_share = excluded.ballot_share;
"#,
        )
        .bind(row.election_center_id.to_string())
        .bind(row.guardian_sequence)
        .bind(row.tally_share.as_str())
        .bind(row.ballot_share.as_str())
        .execute(&self.pool)
        .await
        .context("save partial decryption")?;

        Ok(())
    }

    async fn save_compensated_decryption(&self, row: &CompensatedShareRow) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO compensated_decryption (
  election_center_id, compensating_sequence, missing_sequence,
  compensated_tally_share, compensated_ballot_share
) VALUES (?, ?, ?, ?, ?)
ON CONFLICT (election_center_id, compensating_sequence, missing_sequence) DO UPDATE
SET compensated_tally_share = excluded.compensated_tally_share,
    compensated_ballot_share = excluded.compensated_ballot_share;
"#,
        )
        .bind(row.election_center_id.to_string())
        .bind(row.compensating_sequence)
        .bind(row.missing_sequence)
        .bind(row.compensated_tally_share.as_str())
        .bind(row.compensated_ballot_share.as_str())
        .execute(&self.pool)
        .await
        .context("save compensated decryption")?;

        Ok(())
    }

    async fn fetch_shares_for_center(
        &self,
        election_center_id: &Uuid,
    ) -> Result<(Vec<DecryptionShareRow>, Vec<CompensatedShareRow>)> {
        let partial_rows = sqlx::query(
            r#"
SELECT election_center_id, guardian_sequence, tally_share, ballot_share
FROM decryption
WHERE election_center_id = ?
ORDER BY guardian_sequence;
"#,
        )
        .bind(election_center_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut partials = Vec::with_capacity(partial_rows.len());
        for r in partial_rows {
            partials.push(DecryptionShareRow {
                election_center_id: parse_uuid(&r, "election_center_id")?,
                guardian_sequence: r.try_get("guardian_sequence")?,
                tally_share: r.try_get("tally_share")?,
                ballot_share: r.try_get("ballot_share")?,
            });
        }

        let comp_rows = sqlx::query(
            r#"
SELECT election_center_id, compensating_sequence, missing_sequence,
       compensated_tally_share, compensated_ballot_share
FROM compensated_decryption
WHERE election_center_id = ?
ORDER BY compensating_sequence, missing_sequence;
"#,
        )
        .bind(election_center_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut compensated = Vec::with_capacity(comp_rows.len());
        for r in comp_rows {
            compensated.push(CompensatedShareRow {
                election_center_id: parse_uuid(&r, "election_center_id")?,
                compensating_sequence: r.try_get("compensating_sequence")?,
                missing_sequence: r.try_get("missing_sequence")?,
                compensated_tally_share: r.try_get("compensated_tally_share")?,
                compensated_ballot_share: r.try_get("compensated_ballot_share")?,
            });
        }

        Ok((partials, compensated))
    }

    async fn save_combined_result(
        &self,
        election_center_id: &Uuid,
        election_result: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
UPDATE election_center
SET election_result = ?
WHERE election_center_id = ?;
"#,
        )
        .bind(election_result)
        .bind(election_center_id.to_string())
        .execute(&self.pool)
        .await
        .context("save combined result")?;

        Ok(())
    }

    async fn insert_worker_log(&self, row: &WorkerLogRow) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO worker_log (
  election_id, election_center_id, guardian_sequence, phase,
  started_at_ms, ended_at_ms, status, error_message
) VALUES (?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(row.election_id.to_string())
        .bind(row.election_center_id.map(|v| v.to_string()))
        .bind(row.guardian_sequence)
        .bind(row.phase.as_str())
        .bind(row.started_at_ms as i64)
        .bind(row.ended_at_ms as i64)
        .bind(row.status.as_str())
        .bind(row.error_message.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn parse_uuid(row: &sqlx::any::AnyRow, col: &str) -> Result<Uuid> {
    let raw: String = row.try_get(col)?;
    Uuid::parse_str(&raw).map_err(|e| anyhow!("malformed uuid in {col}: {e}"))
}

fn row_to_job(r: &sqlx::any::AnyRow) -> Result<Job> {
    let operation_raw: String = r.try_get("operation_type")?;
    let status_raw: String = r.try_get("status")?;
    let metadata_raw: String = r.try_get("metadata")?;

    Ok(Job {
        job_id: parse_uuid(r, "job_id")?,
        election_id: parse_uuid(r, "election_id")?,
        operation_type: TaskType::parse(&operation_raw)
            .ok_or_else(|| anyhow!("unknown operation type: {operation_raw}"))?,
        status: JobStatus::parse(&status_raw)
            .ok_or_else(|| anyhow!("unknown job status: {status_raw}"))?,
        total_chunks: r.try_get::<i64, _>("total_chunks")? as u32,
        processed_chunks: r.try_get::<i64, _>("processed_chunks")? as u32,
        failed_chunks: r.try_get::<i64, _>("failed_chunks")? as u32,
        created_by: r.try_get("created_by")?,
        started_at_ms: r
            .try_get::<Option<i64>, _>("started_at_ms")?
            .map(|v| v as u64),
        completed_at_ms: r
            .try_get::<Option<i64>, _>("completed_at_ms")?
            .map(|v| v as u64),
        error_message: r.try_get("error_message")?,
        metadata: serde_json::from_str(&metadata_raw).unwrap_or(serde_json::Value::Null),
    })
}
