use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The four kinds of work a job can carry. Doubles as the chunk task type:
/// every chunk of a job goes to the queue of the job's operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Tally,
    PartialDecrypt,
    CompensatedDecrypt,
    Combine,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Tally => "TALLY",
            TaskType::PartialDecrypt => "PARTIAL_DECRYPT",
            TaskType::CompensatedDecrypt => "COMPENSATED_DECRYPT",
            TaskType::Combine => "COMBINE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TALLY" => Some(TaskType::Tally),
            "PARTIAL_DECRYPT" => Some(TaskType::PartialDecrypt),
            "COMPENSATED_DECRYPT" => Some(TaskType::CompensatedDecrypt),
            "COMBINE" => Some(TaskType::Combine),
            _ => None,
        }
    }

    /// All task types, in queue declaration order.
    pub const ALL: [TaskType; 4] = [
        TaskType::Tally,
        TaskType::PartialDecrypt,
        TaskType::CompensatedDecrypt,
        TaskType::Combine,
    ];
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(JobStatus::Queued),
            "IN_PROGRESS" => Some(JobStatus::InProgress),
            "COMPLETED" => Some(JobStatus::Completed),
            "FAILED" => Some(JobStatus::Failed),
            "CANCELLED" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// One user-initiated operation over an election.
///
/// `processed_chunks + failed_chunks <= total_chunks` at all times; the
/// terminal counters are written exactly once, by the completion worker.
#[derive(Clone, Debug)]
pub struct Job {
    pub job_id: Uuid,
    pub election_id: Uuid,
    pub operation_type: TaskType,
    pub status: JobStatus,
    pub total_chunks: u32,
    pub processed_chunks: u32,
    pub failed_chunks: u32,
    pub created_by: String,
    pub started_at_ms: Option<u64>,
    pub completed_at_ms: Option<u64>,
    pub error_message: Option<String>,
    /// Opaque job annotations (lock key, parent job, guardian sequence).
    pub metadata: serde_json::Value,
}

/// Scheduling state of one chunk, as tracked by the in-memory registry.
///
/// A transiently failed chunk goes back to `Pending` with a backoff gate
/// rather than parking in `Failed`; `Failed` is reserved for chunks that
/// exhausted their retry budget or hit a non-retriable error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkState {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl ChunkState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChunkState::Completed | ChunkState::Failed)
    }
}

/// Live per-state chunk counts for one task instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub job_id: Uuid,
    pub task_type: Option<TaskType>,
    pub pending: u32,
    pub queued: u32,
    pub processing: u32,
    pub completed: u32,
    pub failed: u32,
}

impl ProgressSnapshot {
    pub fn total(&self) -> u32 {
        self.pending + self.queued + self.processing + self.completed + self.failed
    }
}

// =========================
// Store row shapes
// =========================

#[derive(Clone, Debug)]
pub struct Election {
    pub election_id: Uuid,
    pub name: String,
    pub joint_public_key: String,
    pub quorum: i64,
    pub number_of_guardians: i64,
}

#[derive(Clone, Debug)]
pub struct Guardian {
    pub election_id: Uuid,
    pub sequence_order: i64,
    pub email: String,
    pub public_key: String,
    pub decrypted_or_not: bool,
}

/// Partial decryption output for one tally chunk by one guardian.
#[derive(Clone, Debug)]
pub struct DecryptionShareRow {
    pub election_center_id: Uuid,
    pub guardian_sequence: i64,
    pub tally_share: String,
    pub ballot_share: String,
}

/// Compensated share produced by a present guardian on behalf of a
/// missing one, for one tally chunk.
#[derive(Clone, Debug)]
pub struct CompensatedShareRow {
    pub election_center_id: Uuid,
    pub compensating_sequence: i64,
    pub missing_sequence: i64,
    pub compensated_tally_share: String,
    pub compensated_ballot_share: String,
}

/// Per-chunk audit record. Retries append rows; nothing is overwritten.
#[derive(Clone, Debug)]
pub struct WorkerLogRow {
    pub election_id: Uuid,
    pub election_center_id: Option<Uuid>,
    pub guardian_sequence: Option<i64>,
    pub phase: TaskType,
    pub started_at_ms: u64,
    pub ended_at_ms: u64,
    pub status: String,
    pub error_message: Option<String>,
}

// =========================
// Chunk payloads
// =========================

/// Message payload for one tally chunk.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TallyChunkPayload {
    pub election_id: Uuid,
    pub election_center_id: Uuid,
    pub ballot_ids: Vec<Uuid>,
    pub joint_public_key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialDecryptPayload {
    pub election_id: Uuid,
    pub election_center_id: Uuid,
    pub guardian_sequence: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensatedDecryptPayload {
    pub election_id: Uuid,
    pub election_center_id: Uuid,
    pub compensating_sequence: i64,
    pub missing_sequence: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinePayload {
    pub election_id: Uuid,
    pub election_center_id: Uuid,
    pub quorum: i64,
}
