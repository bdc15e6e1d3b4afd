use uuid::Uuid;

use crate::job::model::TaskType;
use crate::locks::LockMetadata;
use crate::time::ms_to_rfc3339;

#[derive(Clone, Debug)]
pub struct CreateTallyRequest {
    pub election_id: Uuid,
    pub created_by: String,
}

#[derive(Clone, Debug)]
pub struct StartDecryptionRequest {
    pub election_id: Uuid,
    pub guardian_sequence: i64,
    pub created_by: String,
    /// Guardian material, already decrypted from the password-protected
    /// blob at the API boundary. Held only in the secret cache.
    pub private_key: String,
    pub polynomial: String,
    /// Guardians who will not participate; the compensated phase covers
    /// them once the partial phase completes.
    pub missing_guardians: Vec<i64>,
}

#[derive(Clone, Debug)]
pub struct CreateCombineRequest {
    pub election_id: Uuid,
    pub created_by: String,
}

/// Outcome of a job initiation. A concurrent initiation is not an error:
/// the caller learns who already holds the operation and since when.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InitiationOutcome {
    Started {
        job_id: Uuid,
    },
    AlreadyInProgress {
        holder: String,
        operation_type: TaskType,
        acquired_at: String,
    },
}

impl InitiationOutcome {
    pub fn already(meta: LockMetadata) -> Self {
        InitiationOutcome::AlreadyInProgress {
            holder: meta.holder,
            operation_type: meta.operation_type,
            acquired_at: ms_to_rfc3339(meta.acquired_at_ms),
        }
    }

    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            InitiationOutcome::Started { job_id } => Some(*job_id),
            InitiationOutcome::AlreadyInProgress { .. } => None,
        }
    }
}
