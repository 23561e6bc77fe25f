//! Core data types shared across the poller, coordinator, worker pool and
//! submission gate. Kept free of any I/O so they stay trivially testable.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// The active challenge as published by the network. `latest_submission`
/// and `no_pre_mine_hour` may change without the `challenge_id` changing
/// (a mutation); only a changed `challenge_id` is a rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub challenge_id: String,
    /// 8 lowercase hex characters (32 bits).
    pub difficulty: String,
    pub no_pre_mine: String,
    pub no_pre_mine_hour: u64,
    pub latest_submission: String,
}

/// What the poller last observed from `GET /challenge`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeState {
    Before,
    Active(Challenge),
    After,
}

/// A signing-capable address handed to the coordinator. Derivation of the
/// underlying keypair happens outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub index: u32,
    pub identifier: String,
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
    pub registered: bool,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

pub type WorkerId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Mining,
    Submitting,
    Completed,
}

#[derive(Debug, Clone)]
pub struct WorkerState {
    pub id: WorkerId,
    pub target_address: String,
    pub hashes_computed: u64,
    pub hash_rate: f64,
    pub solutions_found: u32,
    pub status: WorkerStatus,
    pub current_challenge: Option<String>,
    pub started_at: Instant,
}

impl WorkerState {
    pub fn new(id: WorkerId, target_address: String) -> Self {
        Self {
            id,
            target_address,
            hashes_computed: 0,
            hash_rate: 0.0,
            solutions_found: 0,
            status: WorkerStatus::Idle,
            current_challenge: None,
            started_at: Instant::now(),
        }
    }
}

/// A nonce/hash pair a worker believes satisfies the dual predicate,
/// frozen against the challenge snapshot it was found under.
#[derive(Debug, Clone)]
pub struct SolutionCandidate {
    pub worker_id: WorkerId,
    pub address: Address,
    pub challenge_snapshot: Challenge,
    /// 16 lowercase hex characters.
    pub nonce: String,
    pub preimage: Vec<u8>,
    pub hash: String,
}

/// An append-only, immutable record of an accepted submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub address: String,
    pub address_index: u32,
    pub challenge_id: String,
    pub nonce: String,
    pub hash: String,
    pub is_dev_fee: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crypto_receipt: Option<serde_json::Value>,
}

/// An append-only record of a rejected or failed submission attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub address: String,
    pub address_index: u32,
    pub challenge_id: String,
    pub nonce: String,
    pub hash: String,
    pub is_dev_fee: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
}
