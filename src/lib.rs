//! Library surface for the challenge mining client, re-exported so an
//! external operator tool or integration test can drive the coordinator
//! without going through the `main.rs` binary.

pub mod config;
pub mod events;
pub mod miner;
pub mod model;
pub mod network;
pub mod orchestrator;
pub mod preimage;
pub mod state;

pub use config::Config;
pub use events::{EventBus, MiningEvent};
pub use model::{
    Address, Challenge, ChallengeState, ErrorRecord, Receipt, SolutionCandidate, WorkerId,
    WorkerState, WorkerStatus,
};
pub use orchestrator::{
    ChallengePoller, ChallengePollerConfig, CoordinatorConfig, CoordinatorPhase, FileReceiptLog,
    GateOutcome, MiningCoordinator, MiningStatistics, PollError, PollOutcome, ReceiptLog,
    StatsCollector, SubmissionGate,
};
