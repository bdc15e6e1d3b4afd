use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use backend::{
    bus::MessageBus,
    config::AppConfig,
    cws::client::CwsClient,
    db::Db,
    job::{repository_sqlx::SqlxJobRepository, store::JobStore},
    locks::LockManager,
    logger::init_tracing,
    metrics::counters::Counters,
    orchestrator::{Orchestrator, completion::CompletionWorker},
    scheduler::{
        registry::{RetryPolicy, TaskRegistry},
        scheduler::{Scheduler, SchedulerHandle},
    },
    secrets::SecretCache,
    worker::{handlers::WorkerContext, pool::spawn_workers},
};

/// Initializes DB, runs migrations, and constructs the store.
async fn init_store(cfg: &AppConfig) -> anyhow::Result<Arc<JobStore>> {
    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await?;

    let repo = Arc::new(SqlxJobRepository::new((*db.pool).clone()));
    Ok(Arc::new(JobStore::new(repo)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    tracing::info!("Starting election backend...");

    let cfg = AppConfig::from_env();
    let counters = Counters::default();

    let store = init_store(&cfg).await?;
    let secrets = Arc::new(SecretCache::new(cfg.secret_ttl_minutes));
    let locks = Arc::new(LockManager::new(cfg.lock_ttl_seconds));
    let bus = Arc::new(MessageBus::new(cfg.bus_queue_capacity));

    let registry = Arc::new(TaskRegistry::new(RetryPolicy {
        max_attempts: cfg.retry_max_attempts,
        backoff_base_ms: cfg.retry_backoff_base_ms,
    }));

    let (completion_tx, completion_rx) = mpsc::channel(256);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler_handle =
        SchedulerHandle::new(Arc::clone(&registry), completion_tx, counters.clone());

    // Background loops: publisher, completion worker, queue consumers.
    let scheduler_task = tokio::spawn(
        Scheduler::new(
            Arc::clone(&registry),
            Arc::clone(&bus),
            counters.clone(),
            cfg.scheduler_tick_ms,
            shutdown_rx.clone(),
        )
        .run(),
    );

    let completion_task = tokio::spawn(
        CompletionWorker::new(
            Arc::clone(&store),
            Arc::clone(&locks),
            Arc::clone(&secrets),
            scheduler_handle.clone(),
            counters.clone(),
        )
        .run(completion_rx),
    );

    let cws = Arc::new(CwsClient::new(&cfg)?);
    let worker_tasks = spawn_workers(
        &bus,
        WorkerContext {
            store: Arc::clone(&store),
            secrets: Arc::clone(&secrets),
            cws,
        },
        scheduler_handle.clone(),
        cfg.worker_concurrency,
        cfg.worker_pause_ms,
        shutdown_rx,
    );

    // The REST surface drives this; constructed here so the process owns
    // one wired instance of every service.
    let _orchestrator = Orchestrator::new(
        Arc::clone(&store),
        Arc::clone(&locks),
        Arc::clone(&secrets),
        scheduler_handle,
        cfg.chunk_size,
    );

    tracing::info!(
        tick_ms = cfg.scheduler_tick_ms,
        worker_concurrency = cfg.worker_concurrency,
        "Backend started; waiting for shutdown signal"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    // Stop the publisher and consumers; in-flight chunks finish first.
    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;
    futures::future::join_all(worker_tasks).await;

    completion_task.abort();

    tracing::info!("Backend stopped");
    Ok(())
}
