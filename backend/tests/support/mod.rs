//! Shared wiring for integration tests: isolated in-memory database,
//! scripted CWS double, and a fully assembled backend stack.
#![allow(dead_code)]

use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use backend::bus::MessageBus;
use backend::cws::client::CwsApi;
use backend::cws::errors::CwsError;
use backend::cws::types::*;
use backend::job::model::JobStatus;
use backend::job::repository_sqlx::SqlxJobRepository;
use backend::job::store::JobStore;
use backend::locks::LockManager;
use backend::metrics::counters::Counters;
use backend::orchestrator::Orchestrator;
use backend::orchestrator::completion::CompletionWorker;
use backend::scheduler::registry::{RetryPolicy, TaskRegistry};
use backend::scheduler::scheduler::{Scheduler, SchedulerHandle};
use backend::secrets::SecretCache;
use backend::worker::handlers::WorkerContext;
use backend::worker::pool::spawn_workers;

static DRIVERS: Once = Once::new();

/// Isolated in-memory DB per test.
/// Unique name prevents test interference during parallel execution;
/// `cache=shared` lets all pool connections see the same in-memory DB.
pub async fn setup_db() -> AnyPool {
    DRIVERS.call_once(sqlx::any::install_default_drivers);

    let db_name = Uuid::new_v4().to_string();
    let conn = format!("sqlite:file:{db_name}?mode=memory&cache=shared");

    let pool = AnyPoolOptions::new()
        .max_connections(5)
        .connect(&conn)
        .await
        .expect("connect sqlite memory db");

    backend::db::schema::migrate(&pool).await.expect("migrate");

    pool
}

pub async fn seed_election(pool: &AnyPool, n_guardians: i64, quorum: i64) -> Uuid {
    let election_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO election (election_id, name, joint_public_key, quorum, number_of_guardians)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(election_id.to_string())
    .bind("test election")
    .bind("joint-pk")
    .bind(quorum)
    .bind(n_guardians)
    .execute(pool)
    .await
    .expect("insert election");

    for seq in 1..=n_guardians {
        sqlx::query(
            "INSERT INTO guardian (election_id, sequence_order, email, public_key, decrypted_or_not)
             VALUES (?, ?, ?, ?, FALSE)",
        )
        .bind(election_id.to_string())
        .bind(seq)
        .bind(format!("guardian{seq}@example.com"))
        .bind(format!("pub-{seq}"))
        .execute(pool)
        .await
        .expect("insert guardian");
    }

    election_id
}

pub async fn seed_ballots(pool: &AnyPool, election_id: &Uuid, n: usize) -> Vec<Uuid> {
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO ballot (ballot_id, election_id, cipher_text) VALUES (?, ?, ?)")
            .bind(id.to_string())
            .bind(election_id.to_string())
            .bind(format!("cipher-{i}"))
            .execute(pool)
            .await
            .expect("insert ballot");
        ids.push(id);
    }
    ids
}

/// Pretend the tally phase already ran: centers exist with an encrypted
/// tally attached.
pub async fn seed_tally_done(pool: &AnyPool, election_id: &Uuid, n_centers: usize) -> Vec<Uuid> {
    let mut ids = Vec::with_capacity(n_centers);
    for i in 0..n_centers {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO election_center (election_center_id, election_id, encrypted_tally, election_result)
             VALUES (?, ?, ?, NULL)",
        )
        .bind(id.to_string())
        .bind(election_id.to_string())
        .bind(format!("enc-tally-{i}"))
        .execute(pool)
        .await
        .expect("insert election center");
        ids.push(id);
    }
    ids
}

/// Scripted CWS double. Counts calls per endpoint and can fail the first
/// N calls of one endpoint with a given status.
pub struct ScriptedCws {
    pub tally_calls: AtomicUsize,
    pub partial_calls: AtomicUsize,
    pub compensated_calls: AtomicUsize,
    pub combine_calls: AtomicUsize,
    pub fail_first_partial: usize,
    pub fail_status: u16,
}

impl Default for ScriptedCws {
    fn default() -> Self {
        Self {
            tally_calls: AtomicUsize::new(0),
            partial_calls: AtomicUsize::new(0),
            compensated_calls: AtomicUsize::new(0),
            combine_calls: AtomicUsize::new(0),
            fail_first_partial: 0,
            fail_status: 503,
        }
    }
}

#[async_trait]
impl CwsApi for ScriptedCws {
    async fn create_encrypted_tally(
        &self,
        req: CreateTallyRequest,
    ) -> Result<CreateTallyResponse, CwsError> {
        self.tally_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CreateTallyResponse {
            encrypted_tally: format!("encrypted-{}", req.ballots.len()),
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
        let n = self.partial_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.fail_first_partial {
            return Err(CwsError::Status {
                code: self.fail_status,
                message: "scripted outage".into(),
            });
        }
        Ok(CreatePartialDecryptionResponse {
            tally_share: format!("share-{}", req.guardian_sequence),
            ballot_share: "ballot-share".into(),
        })
    }

    async fn create_compensated_decryption(
        &self,
        req: CreateCompensatedDecryptionRequest,
    ) -> Result<CreateCompensatedDecryptionResponse, CwsError> {
        self.compensated_calls.fetch_add(1, Ordering::SeqCst);
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
        self.combine_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CombineSharesResponse {
            decrypted_tally: format!("plaintext-from-{}", req.tally_shares.len()),
            decrypted_ballots: vec![],
        })
    }
}

/// A fully wired backend over an isolated DB and a scripted CWS.
pub struct TestStack {
    pub pool: AnyPool,
    pub store: Arc<JobStore>,
    pub registry: Arc<TaskRegistry>,
    pub locks: Arc<LockManager>,
    pub secrets: Arc<SecretCache>,
    pub bus: Arc<MessageBus>,
    pub counters: Counters,
    pub orchestrator: Orchestrator,
    pub cws: Arc<ScriptedCws>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handle: SchedulerHandle,
}

impl TestStack {
    /// Build the stack without starting any background loops.
    pub async fn build(cws: ScriptedCws, retry_backoff_base_ms: u64) -> Self {
        let pool = setup_db().await;
        let repo = Arc::new(SqlxJobRepository::new(pool.clone()));
        let store = Arc::new(JobStore::new(repo));

        let secrets = Arc::new(SecretCache::new(60));
        let locks = Arc::new(LockManager::new(7_200));
        let bus = Arc::new(MessageBus::new(256));
        let counters = Counters::default();

        let registry = Arc::new(TaskRegistry::new(RetryPolicy {
            max_attempts: 3,
            backoff_base_ms: retry_backoff_base_ms,
        }));

        let (completion_tx, completion_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = SchedulerHandle::new(Arc::clone(&registry), completion_tx, counters.clone());

        tokio::spawn(
            CompletionWorker::new(
                Arc::clone(&store),
                Arc::clone(&locks),
                Arc::clone(&secrets),
                handle.clone(),
                counters.clone(),
            )
            .run(completion_rx),
        );

        let orchestrator = Orchestrator::new(
            Arc::clone(&store),
            Arc::clone(&locks),
            Arc::clone(&secrets),
            handle.clone(),
            64,
        );

        Self {
            pool,
            store,
            registry,
            locks,
            secrets,
            bus,
            counters,
            orchestrator,
            cws: Arc::new(cws),
            shutdown_tx,
            shutdown_rx,
            handle,
        }
    }

    /// Start the scheduler loop and queue consumers with fast timings.
    pub fn start_runtime(&self) {
        tokio::spawn(
            Scheduler::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.bus),
                self.counters.clone(),
                5,
                self.shutdown_rx.clone(),
            )
            .run(),
        );

        spawn_workers(
            &self.bus,
            WorkerContext {
                store: Arc::clone(&self.store),
                secrets: Arc::clone(&self.secrets),
                cws: Arc::clone(&self.cws),
            },
            self.handle.clone(),
            2,
            1,
            self.shutdown_rx.clone(),
        );
    }

    /// Poll until the job reaches `status` in the store, or panic after
    /// five seconds.
    pub async fn wait_for_status(&self, job_id: &Uuid, status: JobStatus) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(job) = self.store.fetch_job(job_id).await.expect("fetch job") {
                if job.status == status {
                    return;
                }
                assert!(
                    !job.status.is_terminal(),
                    "job settled as {:?} while waiting for {:?} (error: {:?})",
                    job.status,
                    status,
                    job.error_message
                );
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for job {job_id} to reach {status:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for TestStack {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}
