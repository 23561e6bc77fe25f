//! The worker pool: spawns a fixed-size cohort of workers bound to one
//! `(address, challenge snapshot)` pair, joins them, and reports back
//! whichever `WorkerOutcome`s and `GateOutcome`s resulted. `MiningEngine::
//! start_mining` likewise fans out N workers over a partitioned nonce
//! space and waits for the first result; generalized here from a single
//! best-of-N race via `should_stop` to a full `JoinSet` so the coordinator
//! can distinguish *why* each worker ended, and from "stop everyone the
//! instant one solves" to handing each candidate to the Submission Gate as
//! soon as it is found while siblings keep mining concurrently, the Gate
//! itself is what stops them, and what lets them resume if the candidate
//! turns out to be stale or gets rejected.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::info;

use crate::events::EventBus;
use crate::model::{Address, Challenge};
use crate::network::HashEngine;
use crate::orchestrator::poller::ChallengePoller;
use crate::orchestrator::stats::StatsCollector;
use crate::orchestrator::submission_gate::{GateOutcome, SubmissionGate};
use crate::state::SharedMiningState;

use super::solution::WorkerOutcome;
use super::worker::{run_worker, WorkerConfig};

pub struct CohortOutcome {
    pub worker_outcomes: Vec<WorkerOutcome>,
    pub gate_outcomes: Vec<GateOutcome>,
}

impl CohortOutcome {
    /// True if any candidate this cohort produced was accepted.
    pub fn solved(&self) -> bool {
        self.gate_outcomes.iter().any(|o| *o == GateOutcome::Accepted)
    }
}

/// Runs one full cohort: `worker_threads` workers mining `address` under
/// `challenge` until one solves it, all exhaust their ranges, the
/// coordinator stops them, or the challenge rotates. Every candidate a
/// worker finds is handed to `gate` the moment it is found, concurrently
/// with whichever siblings are still mining, the Gate's own
/// `stop_all_workers`/`unpause` calls are what coordinate them, not this
/// function.
#[allow(clippy::too_many_arguments)]
pub async fn run_cohort(
    address: Address,
    challenge: Challenge,
    worker_threads: u32,
    batch_size: u32,
    max_submission_failures: u32,
    hash_engine: Arc<dyn HashEngine>,
    shared: Arc<SharedMiningState>,
    live_challenge_id: watch::Receiver<Option<String>>,
    events: EventBus,
    gate: Arc<SubmissionGate>,
    poller: Arc<ChallengePoller>,
    stats: Arc<Mutex<StatsCollector>>,
    is_dev_fee: bool,
) -> CohortOutcome {
    let key = (address.identifier.clone(), challenge.challenge_id.clone());
    shared.start_cohort(key.clone());
    shared.reset_cohort_state(&key);

    info!(
        address = %address.identifier,
        challenge_id = %challenge.challenge_id,
        worker_threads,
        "spawning cohort"
    );

    let mut join_set = JoinSet::new();
    for worker_id in 0..worker_threads {
        let config = WorkerConfig {
            worker_id,
            address: address.clone(),
            challenge: challenge.clone(),
            batch_size,
            max_submission_failures,
        };
        let hash_engine = hash_engine.clone();
        let shared = shared.clone();
        let live_challenge_id = live_challenge_id.clone();
        let events = events.clone();
        let stats = stats.clone();
        join_set.spawn(run_worker(config, hash_engine, shared, live_challenge_id, events, stats));
    }

    let mut worker_outcomes = Vec::with_capacity(worker_threads as usize);
    let mut gate_tasks: JoinSet<GateOutcome> = JoinSet::new();

    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(WorkerOutcome::Solved(candidate)) => {
                worker_outcomes.push(WorkerOutcome::Solved(candidate.clone()));
                let gate = gate.clone();
                let poller = poller.clone();
                gate_tasks.spawn(async move {
                    let live = poller.live_challenge().await;
                    gate.submit(candidate, live, is_dev_fee).await
                });
            }
            Ok(outcome) => worker_outcomes.push(outcome),
            Err(join_err) => {
                tracing::warn!(error = %join_err, "worker task panicked or was cancelled");
            }
        }
    }

    let mut gate_outcomes = Vec::new();
    while let Some(result) = gate_tasks.join_next().await {
        match result {
            Ok(outcome) => gate_outcomes.push(outcome),
            Err(join_err) => {
                tracing::warn!(error = %join_err, "submission gate task panicked or was cancelled");
            }
        }
    }

    shared.end_cohort(&key);

    CohortOutcome { worker_outcomes, gate_outcomes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{ChallengeResponse, NetworkClient, Sha256HashEngine, SubmissionOutcome};
    use crate::orchestrator::durable_state::{ReceiptLog, ReplayedState};
    use crate::orchestrator::poller::ChallengePollerConfig;
    use async_trait::async_trait;

    struct AcceptingNetwork;

    #[async_trait]
    impl NetworkClient for AcceptingNetwork {
        async fn get_challenge(&self) -> anyhow::Result<ChallengeResponse> {
            Ok(ChallengeResponse::Before)
        }
        async fn get_terms(&self) -> anyhow::Result<String> {
            Ok(String::new())
        }
        async fn register(&self, _: &str, _: &str, _: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn submit_solution(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> anyhow::Result<SubmissionOutcome> {
            Ok(SubmissionOutcome::Accepted { crypto_receipt: None })
        }
    }

    struct NullLog;
    impl ReceiptLog for NullLog {
        fn append_receipt(&self, _: &crate::model::Receipt) -> anyhow::Result<()> {
            Ok(())
        }
        fn append_error(&self, _: &crate::model::ErrorRecord) -> anyhow::Result<()> {
            Ok(())
        }
        fn replay(&self) -> anyhow::Result<ReplayedState> {
            Ok(Default::default())
        }
    }

    fn test_gate(shared: Arc<SharedMiningState>, worker_threads: u32) -> Arc<SubmissionGate> {
        Arc::new(SubmissionGate::new(
            Arc::new(AcceptingNetwork),
            Arc::new(Sha256HashEngine::new()),
            Arc::new(NullLog),
            shared,
            EventBus::new(),
            6,
            worker_threads,
        ))
    }

    fn test_poller() -> Arc<ChallengePoller> {
        Arc::new(ChallengePoller::new(Arc::new(AcceptingNetwork), ChallengePollerConfig::default()))
    }

    fn test_stats() -> Arc<Mutex<StatsCollector>> {
        Arc::new(Mutex::new(StatsCollector::new()))
    }

    fn test_address() -> Address {
        Address {
            index: 0,
            identifier: "addr-1".into(),
            public_key: vec![],
            registered: true,
        }
    }

    fn test_challenge() -> Challenge {
        Challenge {
            challenge_id: "chal-1".into(),
            difficulty: "ffffffff".into(),
            no_pre_mine: "seed".into(),
            no_pre_mine_hour: 1,
            latest_submission: "sub".into(),
        }
    }

    #[tokio::test]
    async fn a_trivial_difficulty_is_solved_almost_immediately() {
        let shared = Arc::new(SharedMiningState::new());
        shared.set_running(true);
        let (_tx, rx) = watch::channel(Some("chal-1".to_string()));
        let gate = test_gate(shared.clone(), 4);
        let poller = test_poller();

        let outcome = run_cohort(
            test_address(),
            test_challenge(),
            4,
            16,
            6,
            Arc::new(Sha256HashEngine::new()),
            shared,
            rx,
            EventBus::new(),
            gate,
            poller,
            test_stats(),
            false,
        )
        .await;

        assert!(outcome.solved());
    }

    #[tokio::test]
    async fn worker_nonce_ranges_are_pairwise_disjoint() {
        use super::super::worker::NONCE_SPACE_PER_WORKER;
        let ranges: Vec<(u64, u64)> = (0..8u32)
            .map(|w| {
                let start = w as u64 * NONCE_SPACE_PER_WORKER;
                (start, start + NONCE_SPACE_PER_WORKER)
            })
            .collect();
        for i in 0..ranges.len() {
            for j in (i + 1)..ranges.len() {
                let (a_start, a_end) = ranges[i];
                let (b_start, b_end) = ranges[j];
                assert!(a_end <= b_start || b_end <= a_start);
            }
        }
    }
}
