//! Per-chunk handlers for the four task families.
//!
//! Every handler follows the same shape: decode the payload, load the
//! minimal projection from the store, call the cryptographic service,
//! persist the result in one short transaction. Handlers are idempotent
//! per chunk — persists are upserts, so a redelivered message converges
//! to the same store state. They never report to the scheduler
//! themselves; the pool loop does that around them.

use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::bus::Envelope;
use crate::cws::client::CwsApi;
use crate::cws::types::{
    CombineSharesRequest, CompensatedShareInput, CreateCompensatedDecryptionRequest,
    CreatePartialDecryptionRequest, CreateTallyRequest, TallyShareInput,
};
use crate::error::TaskError;
use crate::job::model::{
    CombinePayload, CompensatedDecryptPayload, CompensatedShareRow, DecryptionShareRow,
    PartialDecryptPayload, TallyChunkPayload, TaskType,
};
use crate::job::store::JobStore;
use crate::secrets::{SecretCache, polynomial_key, private_key_key};

/// Everything a handler needs. Cloned per consumer task.
pub struct WorkerContext<C: CwsApi> {
    pub store: Arc<JobStore>,
    pub secrets: Arc<SecretCache>,
    pub cws: Arc<C>,
}

impl<C: CwsApi> Clone for WorkerContext<C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            secrets: Arc::clone(&self.secrets),
            cws: Arc::clone(&self.cws),
        }
    }
}

/// Static dispatch over the four task families.
#[instrument(
    skip(env, ctx),
    target = "worker",
    fields(chunk_id = %env.chunk_id, task_type = %env.task_type)
)]
pub async fn handle<C: CwsApi>(env: &Envelope, ctx: &WorkerContext<C>) -> Result<(), TaskError> {
    match env.task_type {
        TaskType::Tally => handle_tally(env, ctx).await,
        TaskType::PartialDecrypt => handle_partial(env, ctx).await,
        TaskType::CompensatedDecrypt => handle_compensated(env, ctx).await,
        TaskType::Combine => handle_combine(env, ctx).await,
    }
}

/// Audit columns pulled out of any payload shape for the worker log.
pub fn audit_fields(env: &Envelope) -> (Uuid, Option<Uuid>, Option<i64>) {
    let election = env
        .payload
        .get("electionId")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or(env.job_id);

    let center = env
        .payload
        .get("electionCenterId")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok());

    let guardian = env
        .payload
        .get("guardianSequence")
        .or_else(|| env.payload.get("compensatingSequence"))
        .and_then(|v| v.as_i64());

    (election, center, guardian)
}

async fn handle_tally<C: CwsApi>(env: &Envelope, ctx: &WorkerContext<C>) -> Result<(), TaskError> {
    let p: TallyChunkPayload = decode(env)?;

    let ballots = ctx
        .store
        .fetch_ballot_ciphertexts(&p.ballot_ids)
        .await
        .map_err(store_err)?;

    if ballots.len() != p.ballot_ids.len() {
        return Err(TaskError::InvalidInput(format!(
            "chunk references {} ballots but {} were found",
            p.ballot_ids.len(),
            ballots.len()
        )));
    }

    let resp = ctx
        .cws
        .create_encrypted_tally(CreateTallyRequest {
            election_id: p.election_id,
            joint_public_key: p.joint_public_key,
            ballots,
        })
        .await?;

    ctx.store
        .save_tally_result(&p.election_center_id, &resp.encrypted_tally, &resp.submitted_ballots)
        .await
        .map_err(store_err)?;

    Ok(())
}

async fn handle_partial<C: CwsApi>(
    env: &Envelope,
    ctx: &WorkerContext<C>,
) -> Result<(), TaskError> {
    let p: PartialDecryptPayload = decode(env)?;

    let private_key = require_secret(
        &ctx.secrets,
        &private_key_key(&p.election_id, p.guardian_sequence),
    )?;
    let polynomial = require_secret(
        &ctx.secrets,
        &polynomial_key(&p.election_id, p.guardian_sequence),
    )?;

    let encrypted_tally = ctx
        .store
        .fetch_encrypted_tally(&p.election_center_id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| {
            TaskError::InvalidInput(format!(
                "election center {} has no encrypted tally",
                p.election_center_id
            ))
        })?;

    let resp = ctx
        .cws
        .create_partial_decryption(CreatePartialDecryptionRequest {
            election_id: p.election_id,
            guardian_sequence: p.guardian_sequence,
            guardian_private_key: private_key,
            guardian_polynomial: polynomial,
            encrypted_tally,
        })
        .await?;

    ctx.store
        .save_partial_decryption(&DecryptionShareRow {
            election_center_id: p.election_center_id,
            guardian_sequence: p.guardian_sequence,
            tally_share: resp.tally_share,
            ballot_share: resp.ballot_share,
        })
        .await
        .map_err(store_err)?;

    Ok(())
}

async fn handle_compensated<C: CwsApi>(
    env: &Envelope,
    ctx: &WorkerContext<C>,
) -> Result<(), TaskError> {
    let p: CompensatedDecryptPayload = decode(env)?;

    let private_key = require_secret(
        &ctx.secrets,
        &private_key_key(&p.election_id, p.compensating_sequence),
    )?;
    let polynomial = require_secret(
        &ctx.secrets,
        &polynomial_key(&p.election_id, p.compensating_sequence),
    )?;

    let guardians = ctx
        .store
        .repo
        .fetch_guardians(&p.election_id)
        .await
        .map_err(store_err)?;

    let missing_public_key = guardians
        .iter()
        .find(|g| g.sequence_order == p.missing_sequence)
        .map(|g| g.public_key.clone())
        .ok_or_else(|| {
            TaskError::InvalidInput(format!(
                "missing guardian {} is not part of election {}",
                p.missing_sequence, p.election_id
            ))
        })?;

    let encrypted_tally = ctx
        .store
        .fetch_encrypted_tally(&p.election_center_id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| {
            TaskError::InvalidInput(format!(
                "election center {} has no encrypted tally",
                p.election_center_id
            ))
        })?;

    let resp = ctx
        .cws
        .create_compensated_decryption(CreateCompensatedDecryptionRequest {
            election_id: p.election_id,
            compensating_sequence: p.compensating_sequence,
            missing_sequence: p.missing_sequence,
            compensating_private_key: private_key,
            compensating_polynomial: polynomial,
            missing_guardian_public_key: missing_public_key,
            encrypted_tally,
        })
        .await?;

    ctx.store
        .save_compensated_decryption(&CompensatedShareRow {
            election_center_id: p.election_center_id,
            compensating_sequence: p.compensating_sequence,
            missing_sequence: p.missing_sequence,
            compensated_tally_share: resp.compensated_tally_share,
            compensated_ballot_share: resp.compensated_ballot_share,
        })
        .await
        .map_err(store_err)?;

    Ok(())
}

async fn handle_combine<C: CwsApi>(
    env: &Envelope,
    ctx: &WorkerContext<C>,
) -> Result<(), TaskError> {
    let p: CombinePayload = decode(env)?;

    let encrypted_tally = ctx
        .store
        .fetch_encrypted_tally(&p.election_center_id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| {
            TaskError::InvalidInput(format!(
                "election center {} has no encrypted tally",
                p.election_center_id
            ))
        })?;

    let (partials, compensated) = ctx
        .store
        .fetch_shares_for_center(&p.election_center_id)
        .await
        .map_err(store_err)?;

    if partials.is_empty() {
        return Err(TaskError::InvalidInput(format!(
            "election center {} has no decryption shares to combine",
            p.election_center_id
        )));
    }

    let resp = ctx
        .cws
        .combine_decryption_shares(CombineSharesRequest {
            election_id: p.election_id,
            quorum: p.quorum,
            encrypted_tally,
            tally_shares: partials
                .into_iter()
                .map(|s| TallyShareInput {
                    guardian_sequence: s.guardian_sequence,
                    tally_share: s.tally_share,
                    ballot_share: s.ballot_share,
                })
                .collect(),
            compensated_shares: compensated
                .into_iter()
                .map(|s| CompensatedShareInput {
                    compensating_sequence: s.compensating_sequence,
                    missing_sequence: s.missing_sequence,
                    compensated_tally_share: s.compensated_tally_share,
                    compensated_ballot_share: s.compensated_ballot_share,
                })
                .collect(),
        })
        .await?;

    let election_result = serde_json::json!({
        "decryptedTally": resp.decrypted_tally,
        "decryptedBallots": resp.decrypted_ballots,
    })
    .to_string();

    ctx.store
        .save_combined_result(&p.election_center_id, &election_result)
        .await
        .map_err(store_err)?;

    Ok(())
}

fn decode<T: serde::de::DeserializeOwned>(env: &Envelope) -> Result<T, TaskError> {
    serde_json::from_value(env.payload.clone())
        .map_err(|e| TaskError::InvalidInput(format!("malformed {} payload: {e}", env.task_type)))
}

fn require_secret(secrets: &SecretCache, key: &str) -> Result<String, TaskError> {
    secrets
        .get(key)
        .ok_or_else(|| TaskError::CredentialsExpired(key.to_string()))
}

fn store_err(e: anyhow::Error) -> TaskError {
    TaskError::TransientStore(format!("{e:#}"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::cws::errors::CwsError;
    use crate::cws::types::*;
    use crate::job::model::*;
    use crate::job::repository::JobRepository;

    /// Store double backed by plain maps. Only what handlers touch is
    /// implemented with behavior; the rest returns empty defaults.
    #[derive(Default)]
    pub(crate) struct MemRepo {
        pub ballots: Mutex<Vec<EncryptedBallot>>,
        pub guardians: Mutex<Vec<Guardian>>,
        pub encrypted_tallies: Mutex<std::collections::HashMap<Uuid, String>>,
        pub tally_saves: Mutex<Vec<(Uuid, String, usize)>>,
        pub partial_saves: Mutex<Vec<DecryptionShareRow>>,
        pub compensated_saves: Mutex<Vec<CompensatedShareRow>>,
        pub combined_saves: Mutex<Vec<(Uuid, String)>>,
        pub worker_logs: Mutex<Vec<WorkerLogRow>>,
    }

    #[async_trait]
    impl JobRepository for MemRepo {
        async fn insert_job(&self, _: &Job) -> Result<()> {
            Ok(())
        }
        async fn fetch_job(&self, _: &Uuid) -> Result<Option<Job>> {
            Ok(None)
        }
        async fn mark_job_started(&self, _: &Uuid, _: u64) -> Result<()> {
            Ok(())
        }
        async fn finalize_job(
            &self,
            _: &Uuid,
            _: JobStatus,
            _: u32,
            _: u32,
            _: u64,
            _: Option<&str>,
        ) -> Result<()> {
            Ok(())
        }
        async fn fetch_election(&self, _: &Uuid) -> Result<Option<Election>> {
            Ok(None)
        }
        async fn fetch_guardians(&self, _: &Uuid) -> Result<Vec<Guardian>> {
            Ok(self.guardians.lock().clone())
        }
        async fn set_guardian_decrypted(&self, _: &Uuid, _: i64) -> Result<()> {
            Ok(())
        }
        async fn fetch_ballot_ids(&self, _: &Uuid) -> Result<Vec<Uuid>> {
            Ok(self.ballots.lock().iter().map(|b| b.ballot_id).collect())
        }
        async fn fetch_ballot_ciphertexts(&self, ids: &[Uuid]) -> Result<Vec<EncryptedBallot>> {
            Ok(self
                .ballots
                .lock()
                .iter()
                .filter(|b| ids.contains(&b.ballot_id))
                .cloned()
                .collect())
        }
        async fn insert_election_centers(&self, _: &Uuid, _: &[Uuid]) -> Result<()> {
            Ok(())
        }
        async fn fetch_election_center_ids(&self, _: &Uuid) -> Result<Vec<Uuid>> {
            Ok(vec![])
        }
        async fn fetch_encrypted_tally(&self, id: &Uuid) -> Result<Option<String>> {
            Ok(self.encrypted_tallies.lock().get(id).cloned())
        }
        async fn save_tally_result(
            &self,
            id: &Uuid,
            tally: &str,
            submitted: &[SubmittedBallotRecord],
        ) -> Result<()> {
            self.encrypted_tallies.lock().insert(*id, tally.to_string());
            self.tally_saves
                .lock()
                .push((*id, tally.to_string(), submitted.len()));
            Ok(())
        }
        async fn save_partial_decryption(&self, row: &DecryptionShareRow) -> Result<()> {
            self.partial_saves.lock().push(row.clone());
            Ok(())
        }
        async fn save_compensated_decryption(&self, row: &CompensatedShareRow) -> Result<()> {
            self.compensated_saves.lock().push(row.clone());
            Ok(())
        }
        async fn fetch_shares_for_center(
            &self,
            id: &Uuid,
        ) -> Result<(Vec<DecryptionShareRow>, Vec<CompensatedShareRow>)> {
            let p = self
                .partial_saves
                .lock()
                .iter()
                .filter(|r| r.election_center_id == *id)
                .cloned()
                .collect();
            let c = self
                .compensated_saves
                .lock()
                .iter()
                .filter(|r| r.election_center_id == *id)
                .cloned()
                .collect();
            Ok((p, c))
        }
        async fn save_combined_result(&self, id: &Uuid, result: &str) -> Result<()> {
            self.combined_saves.lock().push((*id, result.to_string()));
            Ok(())
        }
        async fn insert_worker_log(&self, row: &WorkerLogRow) -> Result<()> {
            self.worker_logs.lock().push(row.clone());
            Ok(())
        }
    }

    /// Scripted CWS double: counts calls, optionally fails the first N.
    pub(crate) struct MockCws {
        pub calls: AtomicUsize,
        pub fail_first: usize,
        pub fail_status: u16,
    }

    impl Default for MockCws {
        fn default() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first: 0,
                fail_status: 503,
            }
        }
    }

    impl MockCws {
        fn gate(&self) -> Result<(), CwsError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                Err(CwsError::Status {
                    code: self.fail_status,
                    message: "scripted failure".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CwsApi for MockCws {
        async fn create_encrypted_tally(
            &self,
            req: CreateTallyRequest,
        ) -> Result<CreateTallyResponse, CwsError> {
            self.gate()?;
            Ok(CreateTallyResponse {
                encrypted_tally: format!("tally-of-{}", req.ballots.len()),
                submitted_ballots: req
                    .ballots
                    .iter()
                    .map(|b| SubmittedBallotRecord {
                        ballot_id: b.ballot_id,
                        cipher_text: b.cipher_text.clone(),
                    })
                    .collect(),
            })
        }

        async fn create_partial_decryption(
            &self,
            req: CreatePartialDecryptionRequest,
        ) -> Result<CreatePartialDecryptionResponse, CwsError> {
            self.gate()?;
            Ok(CreatePartialDecryptionResponse {
                tally_share: format!("share-{}", req.guardian_sequence),
                ballot_share: "ballot-share".into(),
            })
        }

        async fn create_compensated_decryption(
            &self,
            req: CreateCompensatedDecryptionRequest,
        ) -> Result<CreateCompensatedDecryptionResponse, CwsError> {
            self.gate()?;
            Ok(CreateCompensatedDecryptionResponse {
                compensated_tally_share: format!(
                    "comp-{}-{}",
                    req.compensating_sequence, req.missing_sequence
                ),
                compensated_ballot_share: "comp-ballot".into(),
            })
        }

        async fn combine_decryption_shares(
            &self,
            req: CombineSharesRequest,
        ) -> Result<CombineSharesResponse, CwsError> {
            self.gate()?;
            Ok(CombineSharesResponse {
                decrypted_tally: format!("plain-from-{}", req.tally_shares.len()),
                decrypted_ballots: vec![],
            })
        }
    }

    fn ctx(repo: Arc<MemRepo>, cws: Arc<MockCws>) -> WorkerContext<MockCws> {
        WorkerContext {
            store: Arc::new(JobStore::new(repo)),
            secrets: Arc::new(SecretCache::new(60)),
            cws,
        }
    }

    fn envelope(task_type: TaskType, payload: serde_json::Value) -> Envelope {
        Envelope {
            chunk_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            task_type,
            payload,
        }
    }

    #[tokio::test]
    async fn tally_chunk_persists_tally_and_submitted_ballots() {
        let repo = Arc::new(MemRepo::default());
        let ids: Vec<Uuid> = (0..10).map(|_| Uuid::new_v4()).collect();
        *repo.ballots.lock() = ids
            .iter()
            .map(|id| EncryptedBallot {
                ballot_id: *id,
                cipher_text: "ct".into(),
            })
            .collect();

        let center = Uuid::new_v4();
        let cws = Arc::new(MockCws::default());
        let ctx = ctx(Arc::clone(&repo), Arc::clone(&cws));

        let env = envelope(
            TaskType::Tally,
            serde_json::to_value(TallyChunkPayload {
                election_id: Uuid::new_v4(),
                election_center_id: center,
                ballot_ids: ids,
                joint_public_key: "jpk".into(),
            })
            .unwrap(),
        );

        handle(&env, &ctx).await.unwrap();

        let saves = repo.tally_saves.lock();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].0, center);
        assert_eq!(saves[0].1, "tally-of-10");
        assert_eq!(saves[0].2, 10);
    }

    #[tokio::test]
    async fn partial_chunk_without_cached_secret_fails_non_retriably() {
        let repo = Arc::new(MemRepo::default());
        let cws = Arc::new(MockCws::default());
        let ctx = ctx(repo, Arc::clone(&cws));

        let env = envelope(
            TaskType::PartialDecrypt,
            serde_json::to_value(PartialDecryptPayload {
                election_id: Uuid::new_v4(),
                election_center_id: Uuid::new_v4(),
                guardian_sequence: 1,
            })
            .unwrap(),
        );

        let err = handle(&env, &ctx).await.unwrap_err();
        assert_eq!(err.code(), "CREDENTIALS_EXPIRED");
        assert!(!err.is_retriable());
        assert_eq!(cws.calls.load(Ordering::SeqCst), 0, "no CWS call made");
    }

    #[tokio::test]
    async fn partial_chunk_uses_cached_material_and_persists_share() {
        let repo = Arc::new(MemRepo::default());
        let election = Uuid::new_v4();
        let center = Uuid::new_v4();
        repo.encrypted_tallies.lock().insert(center, "enc".into());

        let cws = Arc::new(MockCws::default());
        let ctx = ctx(Arc::clone(&repo), cws);
        ctx.secrets.put(&private_key_key(&election, 2), "pk".into());
        ctx.secrets.put(&polynomial_key(&election, 2), "poly".into());

        let env = envelope(
            TaskType::PartialDecrypt,
            serde_json::to_value(PartialDecryptPayload {
                election_id: election,
                election_center_id: center,
                guardian_sequence: 2,
            })
            .unwrap(),
        );

        handle(&env, &ctx).await.unwrap();

        let saves = repo.partial_saves.lock();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].guardian_sequence, 2);
        assert_eq!(saves[0].tally_share, "share-2");
    }

    #[tokio::test]
    async fn compensated_chunk_resolves_missing_guardian_key() {
        let repo = Arc::new(MemRepo::default());
        let election = Uuid::new_v4();
        let center = Uuid::new_v4();
        repo.encrypted_tallies.lock().insert(center, "enc".into());
        *repo.guardians.lock() = vec![Guardian {
            election_id: election,
            sequence_order: 3,
            email: "g3@example.com".into(),
            public_key: "pub3".into(),
            decrypted_or_not: false,
        }];

        let cws = Arc::new(MockCws::default());
        let ctx = ctx(Arc::clone(&repo), cws);
        ctx.secrets.put(&private_key_key(&election, 1), "pk".into());
        ctx.secrets.put(&polynomial_key(&election, 1), "poly".into());

        let env = envelope(
            TaskType::CompensatedDecrypt,
            serde_json::to_value(CompensatedDecryptPayload {
                election_id: election,
                election_center_id: center,
                compensating_sequence: 1,
                missing_sequence: 3,
            })
            .unwrap(),
        );

        handle(&env, &ctx).await.unwrap();

        let saves = repo.compensated_saves.lock();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].compensated_tally_share, "comp-1-3");
    }

    #[tokio::test]
    async fn compensated_chunk_for_unknown_guardian_is_invalid_input() {
        let repo = Arc::new(MemRepo::default());
        let election = Uuid::new_v4();
        let center = Uuid::new_v4();
        repo.encrypted_tallies.lock().insert(center, "enc".into());

        let cws = Arc::new(MockCws::default());
        let ctx = ctx(repo, cws);
        ctx.secrets.put(&private_key_key(&election, 1), "pk".into());
        ctx.secrets.put(&polynomial_key(&election, 1), "poly".into());

        let env = envelope(
            TaskType::CompensatedDecrypt,
            serde_json::to_value(CompensatedDecryptPayload {
                election_id: election,
                election_center_id: center,
                compensating_sequence: 1,
                missing_sequence: 9,
            })
            .unwrap(),
        );

        let err = handle(&env, &ctx).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn combine_chunk_merges_all_shares() {
        let repo = Arc::new(MemRepo::default());
        let center = Uuid::new_v4();
        repo.encrypted_tallies.lock().insert(center, "enc".into());
        repo.partial_saves.lock().extend([
            DecryptionShareRow {
                election_center_id: center,
                guardian_sequence: 1,
                tally_share: "s1".into(),
                ballot_share: "b1".into(),
            },
            DecryptionShareRow {
                election_center_id: center,
                guardian_sequence: 2,
                tally_share: "s2".into(),
                ballot_share: "b2".into(),
            },
        ]);

        let cws = Arc::new(MockCws::default());
        let ctx = ctx(Arc::clone(&repo), cws);

        let env = envelope(
            TaskType::Combine,
            serde_json::to_value(CombinePayload {
                election_id: Uuid::new_v4(),
                election_center_id: center,
                quorum: 2,
            })
            .unwrap(),
        );

        handle(&env, &ctx).await.unwrap();

        let saves = repo.combined_saves.lock();
        assert_eq!(saves.len(), 1);
        assert!(saves[0].1.contains("plain-from-2"));
    }

    #[tokio::test]
    async fn cws_5xx_maps_to_retriable_failure() {
        let repo = Arc::new(MemRepo::default());
        let center = Uuid::new_v4();
        repo.encrypted_tallies.lock().insert(center, "enc".into());

        let election = Uuid::new_v4();
        let cws = Arc::new(MockCws {
            fail_first: 1,
            ..Default::default()
        });
        let ctx = ctx(Arc::clone(&repo), Arc::clone(&cws));
        ctx.secrets.put(&private_key_key(&election, 1), "pk".into());
        ctx.secrets.put(&polynomial_key(&election, 1), "poly".into());

        let env = envelope(
            TaskType::PartialDecrypt,
            serde_json::to_value(PartialDecryptPayload {
                election_id: election,
                election_center_id: center,
                guardian_sequence: 1,
            })
            .unwrap(),
        );

        let err = handle(&env, &ctx).await.unwrap_err();
        assert!(err.is_retriable());
        assert!(repo.partial_saves.lock().is_empty(), "nothing persisted");

        // Second delivery succeeds and converges.
        handle(&env, &ctx).await.unwrap();
        assert_eq!(repo.partial_saves.lock().len(), 1);
    }

    #[tokio::test]
    async fn cws_4xx_maps_to_permanent_failure() {
        let repo = Arc::new(MemRepo::default());
        let ids = vec![Uuid::new_v4()];
        *repo.ballots.lock() = vec![EncryptedBallot {
            ballot_id: ids[0],
            cipher_text: "ct".into(),
        }];

        let cws = Arc::new(MockCws {
            fail_first: 1,
            fail_status: 400,
            ..Default::default()
        });
        let ctx = ctx(repo, cws);

        let env = envelope(
            TaskType::Tally,
            serde_json::to_value(TallyChunkPayload {
                election_id: Uuid::new_v4(),
                election_center_id: Uuid::new_v4(),
                ballot_ids: ids,
                joint_public_key: "jpk".into(),
            })
            .unwrap(),
        );

        let err = handle(&env, &ctx).await.unwrap_err();
        assert_eq!(err.code(), "PERMANENT_CWS");
        assert!(!err.is_retriable());
    }

    #[tokio::test]
    async fn malformed_payload_is_invalid_input() {
        let repo = Arc::new(MemRepo::default());
        let ctx = ctx(repo, Arc::new(MockCws::default()));

        let env = envelope(TaskType::Tally, serde_json::json!({ "nope": true }));
        let err = handle(&env, &ctx).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn audit_fields_extracts_common_columns() {
        let election = Uuid::new_v4();
        let center = Uuid::new_v4();
        let env = envelope(
            TaskType::PartialDecrypt,
            serde_json::json!({
                "electionId": election.to_string(),
                "electionCenterId": center.to_string(),
                "guardianSequence": 4,
            }),
        );

        let (e, c, g) = audit_fields(&env);
        assert_eq!(e, election);
        assert_eq!(c, Some(center));
        assert_eq!(g, Some(4));
    }
}
