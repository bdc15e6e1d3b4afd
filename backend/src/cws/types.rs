//! Request/response envelopes for the cryptographic worker service.
//!
//! The service itself is opaque; only these shapes matter. Share and
//! ciphertext values are opaque strings end to end.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedBallot {
    pub ballot_id: Uuid,
    pub cipher_text: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTallyRequest {
    pub election_id: Uuid,
    pub joint_public_key: String,
    pub ballots: Vec<EncryptedBallot>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedBallotRecord {
    pub ballot_id: Uuid,
    pub cipher_text: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTallyResponse {
    pub encrypted_tally: String,
    pub submitted_ballots: Vec<SubmittedBallotRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePartialDecryptionRequest {
    pub election_id: Uuid,
    pub guardian_sequence: i64,
    pub guardian_private_key: String,
    pub guardian_polynomial: String,
    pub encrypted_tally: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePartialDecryptionResponse {
    pub tally_share: String,
    pub ballot_share: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCompensatedDecryptionRequest {
    pub election_id: Uuid,
    pub compensating_sequence: i64,
    pub missing_sequence: i64,
    pub compensating_private_key: String,
    pub compensating_polynomial: String,
    pub missing_guardian_public_key: String,
    pub encrypted_tally: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCompensatedDecryptionResponse {
    pub compensated_tally_share: String,
    pub compensated_ballot_share: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TallyShareInput {
    pub guardian_sequence: i64,
    pub tally_share: String,
    pub ballot_share: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensatedShareInput {
    pub compensating_sequence: i64,
    pub missing_sequence: i64,
    pub compensated_tally_share: String,
    pub compensated_ballot_share: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombineSharesRequest {
    pub election_id: Uuid,
    pub quorum: i64,
    pub encrypted_tally: String,
    pub tally_shares: Vec<TallyShareInput>,
    pub compensated_shares: Vec<CompensatedShareInput>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombineSharesResponse {
    pub decrypted_tally: String,
    pub decrypted_ballots: Vec<serde_json::Value>,
}

/// Structured error body returned by the service on HTTP failures.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CwsErrorBody {
    pub error: String,
    pub code: String,
}
