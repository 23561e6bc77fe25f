pub mod pool;
pub mod solution;
pub mod worker;

pub use pool::{run_cohort, CohortOutcome};
pub use solution::WorkerOutcome;
pub use worker::{run_worker, WorkerConfig, NONCE_SPACE_PER_WORKER};
