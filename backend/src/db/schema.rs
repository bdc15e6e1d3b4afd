use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Jobs
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS job (
  job_id TEXT PRIMARY KEY,
  election_id TEXT NOT NULL,
  operation_type TEXT NOT NULL,
  status TEXT NOT NULL,

  total_chunks INTEGER NOT NULL,
  processed_chunks INTEGER NOT NULL,
  failed_chunks INTEGER NOT NULL,

  created_by TEXT NOT NULL,
  started_at_ms BIGINT,
  completed_at_ms BIGINT,
  error_message TEXT,
  metadata TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Elections and guardians
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS election (
  election_id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  joint_public_key TEXT NOT NULL,
  quorum INTEGER NOT NULL,
  number_of_guardians INTEGER NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS guardian (
  election_id TEXT NOT NULL,
  sequence_order INTEGER NOT NULL,
  email TEXT NOT NULL,
  public_key TEXT NOT NULL,
  decrypted_or_not BOOLEAN NOT NULL,
  PRIMARY KEY (election_id, sequence_order)
);
"#,
    )
    .execute(pool)
    .await?;

    // Cast ballots, as received from the (out-of-scope) voting surface.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS ballot (
  ballot_id TEXT PRIMARY KEY,
  election_id TEXT NOT NULL,
  cipher_text TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // One row per tally chunk; decrypt/combine phases hang off it.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS election_center (
  election_center_id TEXT PRIMARY KEY,
  election_id TEXT NOT NULL,
  encrypted_tally TEXT,
  election_result TEXT
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS submitted_ballot (
  id TEXT PRIMARY KEY,
  election_center_id TEXT NOT NULL,
  cipher_text TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS decryption (
  election_center_id TEXT NOT NULL,
  guardian_sequence INTEGER NOT NULL,
  tally_share TEXT NOT NULL,
  ballot_share TEXT NOT NULL,
  PRIMARY KEY (election_center_id, guardian_sequence)
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS compensated_decryption (
  election_center_id TEXT NOT NULL,
  compensating_sequence INTEGER NOT NULL,
  missing_sequence INTEGER NOT NULL,
  compensated_tally_share TEXT NOT NULL,
  compensated_ballot_share TEXT NOT NULL,
  PRIMARY KEY (election_center_id, compensating_sequence, missing_sequence)
);
"#,
    )
    .execute(pool)
    .await?;

    // Per-chunk audit log; one row per attempt, all phases.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS worker_log (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  election_id TEXT NOT NULL,
  election_center_id TEXT,
  guardian_sequence INTEGER,
  phase TEXT NOT NULL,
  started_at_ms BIGINT NOT NULL,
  ended_at_ms BIGINT NOT NULL,
  status TEXT NOT NULL,
  error_message TEXT
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_job_election ON job(election_id);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_ballot_election ON ballot(election_id);"#)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_election_center_election ON election_center(election_id);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_submitted_ballot_center ON submitted_ballot(election_center_id);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_worker_log_election ON worker_log(election_id);"#)
        .execute(pool)
        .await?;

    Ok(())
}
