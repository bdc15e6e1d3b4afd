use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    /// Base URL of the external cryptographic worker service.
    pub cws_base_url: String,

    // =========================
    // Planner configuration
    // =========================
    /// Target number of items per chunk.
    ///
    /// This is a target, not a hard cap: the planner always produces
    /// `max(1, floor(N / chunk_size))` chunks, so individual chunks may
    /// exceed this by the spread of the remainder (at most one extra item
    /// per chunk). Bounds the worst-case memory footprint of a worker.
    pub chunk_size: usize,

    // =========================
    // Scheduler configuration
    // =========================
    /// Interval between scheduler ticks, in milliseconds.
    ///
    /// One chunk is published per tick, so with `k` concurrently active
    /// jobs every job publishes at least once per `k * tick` milliseconds.
    pub scheduler_tick_ms: u64,

    /// Maximum retry attempts for a failed chunk before it is permanently
    /// failed.
    pub retry_max_attempts: u32,

    /// Base delay before the first retry. Doubles per attempt.
    pub retry_backoff_base_ms: u64,

    // =========================
    // Worker configuration
    // =========================
    /// Consumer tasks per queue family. Each consumer takes exactly one
    /// message at a time, so in-flight work per process is bounded by
    /// `4 * worker_concurrency` chunks.
    pub worker_concurrency: usize,

    /// Pause between chunks on each consumer, letting the allocator return
    /// per-chunk buffers before the next message is taken.
    pub worker_pause_ms: u64,

    /// Capacity of each bus queue.
    pub bus_queue_capacity: usize,

    // =========================
    // CWS client configuration
    // =========================
    pub cws_max_connections: usize,
    pub cws_max_per_route: usize,

    /// Request ceiling for tally chunks. Tallying a chunk is the slowest
    /// CWS operation by a wide margin.
    pub cws_tally_timeout: Duration,

    /// Request ceiling for decrypt / compensate / combine chunks.
    pub cws_default_timeout: Duration,

    // =========================
    // Secrets & locks
    // =========================
    /// Sliding TTL for decrypted guardian material.
    pub secret_ttl_minutes: u64,

    /// TTL for operation locks. Crashed holders are reclaimed after this.
    pub lock_ttl_seconds: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://election_dev.db".to_string());
        let cws_base_url =
            std::env::var("CWS_BASE_URL").unwrap_or_else(|_| "http://localhost:5000".to_string());

        Self {
            database_url,
            cws_base_url,

            chunk_size: env_usize("CHUNK_SIZE", 64).max(1),

            scheduler_tick_ms: env_u64("SCHEDULER_TICK_MS", 100),
            retry_max_attempts: env_u64("RETRY_MAX_ATTEMPTS", 3) as u32,
            retry_backoff_base_ms: env_u64("RETRY_BACKOFF_BASE_MS", 5_000),

            worker_concurrency: env_usize("WORKER_CONCURRENCY", 4).max(1),
            worker_pause_ms: env_u64("WORKER_PAUSE_MS", 100),
            bus_queue_capacity: env_usize("BUS_QUEUE_CAPACITY", 256),

            cws_max_connections: env_usize("CWS_MAX_CONNECTIONS", 100),
            cws_max_per_route: env_usize("CWS_MAX_PER_ROUTE", 50),
            cws_tally_timeout: Duration::from_secs(env_u64("CWS_TALLY_TIMEOUT_SECS", 30 * 60)),
            cws_default_timeout: Duration::from_secs(env_u64("CWS_DEFAULT_TIMEOUT_SECS", 10 * 60)),

            secret_ttl_minutes: env_u64("SECRET_TTL_MINUTES", 60),
            lock_ttl_seconds: env_u64("LOCK_TTL_SECONDS", 7_200),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
