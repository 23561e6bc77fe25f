//! The Mining Coordinator: the top-level state machine that sequences
//! addresses through worker cohorts, reacts to challenge rotation and
//! window closure, schedules the hourly hard reset, and triggers the
//! dev-fee obligation. Shaped after `MiningOrchestrator`: an owned struct
//! built from a config plus its collaborators, a `run()` entry point
//! driving a phase-tagged loop, `tracing` at the same granularity,
//! generalized from an epoch/commit-reveal chain state machine to the
//! challenge/address one this core mines against.

pub mod durable_state;
pub mod poller;
pub mod stats;
pub mod submission_gate;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Timelike, Utc};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

pub use durable_state::{apply_replay, FileReceiptLog, ReceiptLog, ReplayedState};
pub use poller::{ChallengePoller, ChallengePollerConfig, PollError, PollOutcome};
pub use stats::{MiningStatistics, StatsCollector};
pub use submission_gate::{GateOutcome, SubmissionGate};

use crate::events::{EventBus, MiningEvent};
use crate::miner::run_cohort;
use crate::model::{Address, Challenge, ChallengeState};
use crate::network::{DevFeeAddressSource, HashEngine, NetworkClient};
use crate::state::SharedMiningState;

/// The Coordinator's own lifecycle phase, distinct from any per-worker
/// status: `Idle → Registering → Running → Draining → Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorPhase {
    Idle,
    Registering,
    Running,
    Draining,
}

pub struct CoordinatorConfig {
    pub worker_threads: u32,
    pub batch_size: u32,
    pub max_submission_failures: u32,
    pub dev_fee_ratio: u32,
    pub dev_fee_enabled: bool,
    pub poll: ChallengePollerConfig,
}

/// Why the Running phase returned to Draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunningExit {
    WindowClosed,
    Stopped,
    NetworkDown,
}

pub struct MiningCoordinator {
    config: CoordinatorConfig,
    network: Arc<dyn NetworkClient>,
    hash_engine: Arc<dyn HashEngine>,
    receipt_log: Arc<dyn ReceiptLog>,
    dev_fee_pool: Arc<dyn DevFeeAddressSource>,
    shared: Arc<SharedMiningState>,
    events: EventBus,
    stats: Arc<Mutex<StatsCollector>>,
    poller: Arc<ChallengePoller>,
    gate: Arc<SubmissionGate>,
    addresses: Vec<Address>,
    phase: Mutex<CoordinatorPhase>,
}

impl MiningCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CoordinatorConfig,
        network: Arc<dyn NetworkClient>,
        hash_engine: Arc<dyn HashEngine>,
        receipt_log: Arc<dyn ReceiptLog>,
        dev_fee_pool: Arc<dyn DevFeeAddressSource>,
        addresses: Vec<Address>,
    ) -> Self {
        let shared = Arc::new(SharedMiningState::new());
        let events = EventBus::new();
        let poller = Arc::new(ChallengePoller::new(
            network.clone(),
            ChallengePollerConfig {
                poll_interval: config.poll.poll_interval,
                max_consecutive_failures: config.poll.max_consecutive_failures,
            },
        ));
        let gate = Arc::new(SubmissionGate::new(
            network.clone(),
            hash_engine.clone(),
            receipt_log.clone(),
            shared.clone(),
            events.clone(),
            config.max_submission_failures,
            config.worker_threads,
        ));

        Self {
            config,
            network,
            hash_engine,
            receipt_log,
            dev_fee_pool,
            shared,
            events,
            stats: Arc::new(Mutex::new(StatsCollector::new())),
            poller,
            gate,
            addresses,
            phase: Mutex::new(CoordinatorPhase::Idle),
        }
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    pub fn stats(&self) -> Arc<Mutex<StatsCollector>> {
        self.stats.clone()
    }

    pub fn shared(&self) -> Arc<SharedMiningState> {
        self.shared.clone()
    }

    /// Flips the cancellation flag; in-flight workers observe it at their
    /// next barrier check and exit.
    pub fn request_stop(&self) {
        self.shared.set_running(false);
    }

    /// Replays the durable receipt/error log to reconstruct the
    /// already-submitted and already-solved sets before mining starts.
    /// Idempotent, safe to call more than once.
    pub fn replay_durable_state(&self) -> Result<()> {
        let replayed = self.receipt_log.replay().context("replaying durable state")?;
        info!(
            receipts = replayed.receipts.len(),
            errors = replayed.errors.len(),
            "replayed durable state"
        );
        apply_replay(&self.shared, &replayed);
        Ok(())
    }

    /// Runs the full Idle → Registering → Running → Draining → Idle
    /// lifecycle once. Returns once the mining window closes or
    /// `request_stop` is called.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        self.replay_durable_state()?;

        let poller_task = tokio::spawn(self.poller.clone().run());
        let stats_task = tokio::spawn(self.clone().run_stats_emitter());

        *self.phase.lock().await = CoordinatorPhase::Registering;
        self.events.publish(MiningEvent::Status { phase: "registering".into() });
        let ready_addresses = self.register_addresses();

        *self.phase.lock().await = CoordinatorPhase::Running;
        self.shared.set_running(true);
        self.events.publish(MiningEvent::Status { phase: "running".into() });
        self.stats.lock().await.update_phase("running").await;

        let exit = self.run_running_phase(&ready_addresses).await?;

        *self.phase.lock().await = CoordinatorPhase::Draining;
        self.events.publish(MiningEvent::Status { phase: "draining".into() });
        self.drain().await;

        *self.phase.lock().await = CoordinatorPhase::Idle;
        self.events.publish(MiningEvent::Status { phase: "idle".into() });

        poller_task.abort();
        stats_task.abort();

        match exit {
            RunningExit::WindowClosed => info!("mining window closed, coordinator idle"),
            RunningExit::Stopped => info!("coordinator stopped by request"),
            RunningExit::NetworkDown => warn!("coordinator stopped: network appears down"),
        }
        Ok(())
    }

    /// Unregistered addresses are filtered out; registration itself
    /// (signing, submitting the registration transaction) happens outside
    /// this crate before an `Address` ever reaches the coordinator.
    fn register_addresses(&self) -> Vec<Address> {
        let total = self.addresses.len() as u32;
        let ready: Vec<Address> = self.addresses.iter().filter(|a| a.registered).cloned().collect();
        let completed = ready.len() as u32;
        if completed < total {
            warn!(
                completed,
                total,
                "some configured addresses are not registered and will be skipped"
            );
        }
        self.events.publish(MiningEvent::RegistrationProgress { completed, total });
        ready
    }

    async fn run_running_phase(&self, addresses: &[Address]) -> Result<RunningExit> {
        if addresses.is_empty() {
            warn!("no registered addresses available, nothing to mine");
            return Ok(RunningExit::Stopped);
        }

        let mut live_id_rx = self.poller.subscribe_live_challenge_id();
        let mut next_hour = tokio::time::Instant::now() + duration_until_next_hour();

        loop {
            if !self.shared.is_running() {
                return Ok(RunningExit::Stopped);
            }

            match self.poller.current_state().await {
                ChallengeState::After => return Ok(RunningExit::WindowClosed),
                ChallengeState::Before => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    continue;
                }
                ChallengeState::Active(challenge) => {
                    if !self.hash_engine.is_rom_ready(&challenge.no_pre_mine).await {
                        if let Err(e) = self.hash_engine.init_rom(&challenge.no_pre_mine).await {
                            warn!(error = %e, "ROM init failed, retrying next tick");
                            self.events.publish(MiningEvent::Error {
                                message: format!("ROM init failed: {e}"),
                            });
                            tokio::time::sleep(Duration::from_millis(500)).await;
                            continue;
                        }
                    }

                    tokio::select! {
                        _ = tokio::time::sleep_until(next_hour) => {
                            self.perform_hourly_reset(&challenge).await;
                            next_hour = tokio::time::Instant::now() + duration_until_next_hour();
                        }
                        () = self.mine_address_queue(&challenge, addresses, &mut live_id_rx) => {}
                    }
                }
            }
        }
    }

    /// Sequentially mines each not-yet-solved address under `challenge`,
    /// then triggers the end-of-queue dev-fee obligation. Returns early if
    /// the challenge rotates mid-queue so the Running loop can re-read the
    /// fresh challenge.
    async fn mine_address_queue(
        &self,
        challenge: &Challenge,
        addresses: &[Address],
        live_id_rx: &mut watch::Receiver<Option<String>>,
    ) {
        for address in addresses {
            if !self.shared.is_running() {
                return;
            }
            if live_id_rx.has_changed().unwrap_or(false) {
                let live = live_id_rx.borrow_and_update().clone();
                if live.as_deref() != Some(challenge.challenge_id.as_str()) {
                    debug!("challenge rotated mid-queue, restarting address sweep");
                    return;
                }
            }
            if self.shared.is_solved(&address.identifier, &challenge.challenge_id) {
                continue;
            }

            self.events.publish(MiningEvent::MiningStart {
                address: address.identifier.clone(),
                challenge_id: challenge.challenge_id.clone(),
            });
            self.stats
                .lock()
                .await
                .start_cohort(&address.identifier, &challenge.challenge_id, &challenge.difficulty)
                .await;

            let outcome = run_cohort(
                address.clone(),
                challenge.clone(),
                self.config.worker_threads,
                self.config.batch_size,
                self.config.max_submission_failures,
                self.hash_engine.clone(),
                self.shared.clone(),
                live_id_rx.clone(),
                self.events.clone(),
                self.gate.clone(),
                self.poller.clone(),
                self.stats.clone(),
                false,
            )
            .await;

            for gate_outcome in &outcome.gate_outcomes {
                self.stats.lock().await.solution_submitted().await;
                if let GateOutcome::Accepted = gate_outcome {
                    self.stats.lock().await.solution_accepted(false).await;
                }
            }

            if self.shared.is_solved(&address.identifier, &challenge.challenge_id) {
                self.maybe_trigger_dev_fee(challenge).await;
            }
        }

        self.maybe_trigger_dev_fee(challenge).await;
    }

    /// Computes the outstanding dev-fee obligation and fires fee-mining
    /// cohorts without blocking the user address queue.
    async fn maybe_trigger_dev_fee(&self, challenge: &Challenge) {
        if !self.config.dev_fee_enabled {
            return;
        }
        let user_solutions = self.shared.user_solutions();
        let dev_fee_solutions = self.shared.dev_fee_solutions();
        let owed = dev_fee_units_owed(user_solutions, dev_fee_solutions, self.config.dev_fee_ratio);
        if owed == 0 {
            return;
        }

        for _ in 0..owed {
            let Some(dev_address) = self.next_dev_fee_address(&challenge.challenge_id) else {
                debug!("dev-fee pool exhausted this round, skipping");
                break;
            };

            let challenge = challenge.clone();
            let worker_threads = self.config.worker_threads;
            let batch_size = self.config.batch_size;
            let max_submission_failures = self.config.max_submission_failures;
            let hash_engine = self.hash_engine.clone();
            let shared = self.shared.clone();
            let live_id_rx = self.poller.subscribe_live_challenge_id();
            let events = self.events.clone();
            let gate = self.gate.clone();
            let poller = self.poller.clone();
            let stats = self.stats.clone();

            // Fire-and-forget: dev-fee mining must never block user mining.
            tokio::spawn(async move {
                let outcome = run_cohort(
                    dev_address,
                    challenge,
                    worker_threads,
                    batch_size,
                    max_submission_failures,
                    hash_engine,
                    shared,
                    live_id_rx,
                    events,
                    gate,
                    poller,
                    stats.clone(),
                    true,
                )
                .await;
                for gate_outcome in &outcome.gate_outcomes {
                    stats.lock().await.solution_submitted().await;
                    if let GateOutcome::Accepted = gate_outcome {
                        stats.lock().await.solution_accepted(true).await;
                    }
                }
            });
        }
    }

    /// Draws a dev-fee address that doesn't already have a receipt for
    /// `challenge_id`, skipping colliding candidates rather than blocking.
    fn next_dev_fee_address(&self, challenge_id: &str) -> Option<Address> {
        const MAX_ATTEMPTS: u32 = 8;
        for attempt in 0..MAX_ATTEMPTS {
            let identifier = self.dev_fee_pool.next_address()?;
            if self.shared.is_solved(&identifier, challenge_id) {
                continue;
            }
            return Some(Address {
                index: attempt,
                identifier,
                public_key: Vec::new(),
                registered: true,
            });
        }
        None
    }

    /// Pause, drain workers, kill hash batches, clear every transient
    /// set, re-init the ROM, resume. Bounds worst-case memory growth and
    /// recovers from any latent worker wedging.
    async fn perform_hourly_reset(&self, challenge: &Challenge) {
        info!("hourly reset firing");
        self.shared.set_running(false);
        self.hash_engine.kill_workers();
        self.shared.reset_transient_state();
        if let Err(e) = self.hash_engine.init_rom(&challenge.no_pre_mine).await {
            warn!(error = %e, "ROM re-init failed during hourly reset");
        }
        self.shared.set_running(true);
    }

    async fn drain(&self) {
        self.shared.set_running(false);
        self.hash_engine.kill_workers();
        self.shared.reset_transient_state();
    }

    /// Publishes a `Stats` event on a fixed tick so an operator surface can
    /// observe hashrate and solution counts without polling the collector
    /// directly. Aborted alongside the poller task when `run()` returns.
    async fn run_stats_emitter(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(2));
        loop {
            ticker.tick().await;
            let snapshot = self.stats.lock().await.get_stats().await;
            self.events.publish(MiningEvent::Stats {
                hash_rate: snapshot.current_hashrate,
                total_hashes: snapshot.total_hashes,
                solutions_found: snapshot.solutions_found as u32,
                user_solutions: snapshot.user_solutions as u32,
                dev_fee_solutions: snapshot.dev_fee_solutions as u32,
            });
        }
    }
}

fn duration_until_next_hour() -> Duration {
    let now = Utc::now();
    let seconds_into_hour = now.minute() as u64 * 60 + now.second() as u64;
    Duration::from_secs((3600 - seconds_into_hour).max(1))
}

/// `⌊user_solutions / R⌋ − dev_fee_solutions`, floored at zero.
fn dev_fee_units_owed(user_solutions: u32, dev_fee_solutions: u32, ratio: u32) -> u32 {
    if ratio == 0 {
        return 0;
    }
    let expected = user_solutions / ratio;
    expected.saturating_sub(dev_fee_solutions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_fee_owed_is_floor_division_minus_paid() {
        assert_eq!(dev_fee_units_owed(17, 0, 17), 1);
        assert_eq!(dev_fee_units_owed(16, 0, 17), 0);
        assert_eq!(dev_fee_units_owed(34, 1, 17), 1);
        assert_eq!(dev_fee_units_owed(48, 2, 24), 0);
    }

    #[test]
    fn dev_fee_owed_never_goes_negative() {
        assert_eq!(dev_fee_units_owed(10, 5, 17), 0);
    }

    #[test]
    fn dev_fee_ratio_is_a_configured_parameter_not_hard_coded() {
        // Both 17 and 24 have shown up as the ratio in the wild; both must
        // work as plain inputs to the same formula.
        assert_eq!(dev_fee_units_owed(24, 0, 24), 1);
        assert_eq!(dev_fee_units_owed(17, 0, 17), 1);
    }

    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use crate::network::{ChallengeResponse, RoundRobinDevFeePool, Sha256HashEngine, SubmissionOutcome};

    struct ScriptedNetwork {
        responses: StdMutex<VecDeque<ChallengeResponse>>,
    }

    #[async_trait]
    impl NetworkClient for ScriptedNetwork {
        async fn get_challenge(&self) -> Result<ChallengeResponse> {
            let mut responses = self.responses.lock().unwrap();
            Ok(responses.pop_front().unwrap_or(ChallengeResponse::After))
        }
        async fn get_terms(&self) -> Result<String> {
            Ok(String::new())
        }
        async fn register(&self, _: &str, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn submit_solution(&self, _: &str, _: &str, _: &str) -> Result<SubmissionOutcome> {
            Ok(SubmissionOutcome::Accepted { crypto_receipt: None })
        }
    }

    fn scripted_challenge() -> Challenge {
        Challenge {
            challenge_id: "chal-1".into(),
            difficulty: "ffffffff".into(),
            no_pre_mine: "seed".into(),
            no_pre_mine_hour: 1,
            latest_submission: "sub-1".into(),
        }
    }

    #[tokio::test]
    async fn coordinator_runs_idle_to_idle_once_the_window_closes() {
        let mut responses = VecDeque::new();
        for _ in 0..20 {
            responses.push_back(ChallengeResponse::Active { challenge: scripted_challenge() });
        }
        for _ in 0..20 {
            responses.push_back(ChallengeResponse::After);
        }
        let network = Arc::new(ScriptedNetwork { responses: StdMutex::new(responses) });

        let dir = tempfile::tempdir().unwrap();
        let log: Arc<dyn ReceiptLog> = Arc::new(FileReceiptLog::new(dir.path().join("receipts.jsonl")));
        let dev_pool = Arc::new(RoundRobinDevFeePool::new(vec![]));
        let addresses = vec![Address {
            index: 0,
            identifier: "addr-1".into(),
            public_key: vec![],
            registered: true,
        }];
        let config = CoordinatorConfig {
            worker_threads: 2,
            batch_size: 8,
            max_submission_failures: 6,
            dev_fee_ratio: 17,
            dev_fee_enabled: false,
            poll: ChallengePollerConfig {
                poll_interval: Duration::from_millis(5),
                max_consecutive_failures: 10,
            },
        };
        let coordinator = Arc::new(MiningCoordinator::new(
            config,
            network,
            Arc::new(Sha256HashEngine::new()),
            log,
            dev_pool,
            addresses,
        ));

        let result = tokio::time::timeout(Duration::from_secs(10), coordinator.run()).await;
        assert!(result.is_ok(), "coordinator did not reach idle before the timeout");
        assert!(result.unwrap().is_ok());
    }

    #[test]
    fn registration_filters_out_unregistered_addresses() {
        let network = Arc::new(ScriptedNetwork { responses: StdMutex::new(VecDeque::new()) });
        let addresses = vec![
            Address { index: 0, identifier: "addr-1".into(), public_key: vec![], registered: true },
            Address { index: 1, identifier: "addr-2".into(), public_key: vec![], registered: false },
        ];
        let config = CoordinatorConfig {
            worker_threads: 1,
            batch_size: 8,
            max_submission_failures: 6,
            dev_fee_ratio: 17,
            dev_fee_enabled: false,
            poll: ChallengePollerConfig::default(),
        };
        let dir = tempfile::tempdir().unwrap();
        let log: Arc<dyn ReceiptLog> = Arc::new(FileReceiptLog::new(dir.path().join("receipts.jsonl")));
        let coordinator = MiningCoordinator::new(
            config,
            network,
            Arc::new(Sha256HashEngine::new()),
            log,
            Arc::new(RoundRobinDevFeePool::new(vec![])),
            addresses,
        );

        let ready = coordinator.register_addresses();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].identifier, "addr-1");
    }
}
