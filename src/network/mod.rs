pub mod client;
pub mod dev_fee;
pub mod hash_engine;

pub use client::{ChallengeResponse, HttpNetworkClient, NetworkClient, SubmissionOutcome};
pub use dev_fee::{DevFeeAddressSource, RoundRobinDevFeePool};
pub use hash_engine::{HashEngine, Sha256HashEngine};
