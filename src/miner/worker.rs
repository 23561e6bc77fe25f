//! A single worker's mining loop: barrier checks, batch generation,
//! batch hashing, the rotation guard, and the difficulty scan. Based on
//! `MiningWorker::mine`'s nonce loop and hash-counter batching,
//! generalized from one CPU-bound hash call per nonce to pipelined
//! batches against an external hash engine, and from a single scalar
//! difficulty byte to the dual predicate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::events::{EventBus, MiningEvent};
use crate::model::{Address, Challenge, SolutionCandidate, WorkerId};
use crate::network::HashEngine;
use crate::orchestrator::stats::StatsCollector;
use crate::preimage;
use crate::state::SharedMiningState;

use super::solution::WorkerOutcome;

/// Size of each worker's nonce window: 2^30 nonces.
pub const NONCE_SPACE_PER_WORKER: u64 = 1 << 30;

const HASH_BATCH_RETRIABLE_BACKOFF: Duration = Duration::from_secs(2);
const HASH_BATCH_NON_RETRIABLE_BACKOFF: Duration = Duration::from_secs(1);
const PROGRESS_EMIT_INTERVAL: Duration = Duration::from_millis(500);

pub struct WorkerConfig {
    pub worker_id: WorkerId,
    pub address: Address,
    pub challenge: Challenge,
    pub batch_size: u32,
    pub max_submission_failures: u32,
}

/// Runs one worker to completion: a solution, range exhaustion, rotation,
/// or cancellation. Never panics on a transient hash-engine failure; it
/// backs off and keeps going, per the rule that nothing in the core is
/// fatal to the process.
#[allow(clippy::too_many_arguments)]
pub async fn run_worker(
    config: WorkerConfig,
    hash_engine: Arc<dyn HashEngine>,
    shared: Arc<SharedMiningState>,
    mut live_challenge_id: watch::Receiver<Option<String>>,
    events: EventBus,
    stats: Arc<Mutex<StatsCollector>>,
) -> WorkerOutcome {
    let WorkerConfig {
        worker_id,
        address,
        challenge,
        batch_size,
        max_submission_failures,
    } = config;

    let key = (address.identifier.clone(), challenge.challenge_id.clone());
    let range_start = (worker_id as u64) * NONCE_SPACE_PER_WORKER;
    let range_end = range_start + NONCE_SPACE_PER_WORKER;
    let mut cursor = range_start;

    let hashes_computed = AtomicU64::new(0);
    let started_at = Instant::now();
    let mut last_emit = Instant::now();

    info!(
        worker_id,
        address = %address.identifier,
        challenge_id = %challenge.challenge_id,
        range_start,
        range_end,
        "worker starting cohort"
    );
    events.publish(MiningEvent::WorkerUpdate { worker_id, status: "mining".to_string() });

    loop {
        // --- barrier checks ---
        if !shared.is_running() {
            events.publish(MiningEvent::WorkerUpdate { worker_id, status: "cancelled".to_string() });
            return WorkerOutcome::Cancelled { worker_id };
        }
        if !shared.is_cohort_active(&key) {
            events.publish(MiningEvent::WorkerUpdate { worker_id, status: "cancelled".to_string() });
            return WorkerOutcome::Cancelled { worker_id };
        }
        if shared.is_worker_stopped(&key, worker_id) {
            events.publish(MiningEvent::WorkerUpdate { worker_id, status: "cancelled".to_string() });
            return WorkerOutcome::Cancelled { worker_id };
        }
        if shared.is_paused(&key) {
            events.publish(MiningEvent::WorkerUpdate { worker_id, status: "cancelled".to_string() });
            return WorkerOutcome::Cancelled { worker_id };
        }
        if shared.failure_count(&key) >= max_submission_failures {
            events.publish(MiningEvent::WorkerUpdate { worker_id, status: "cancelled".to_string() });
            return WorkerOutcome::Cancelled { worker_id };
        }
        if shared.is_solved(&address.identifier, &challenge.challenge_id) {
            events.publish(MiningEvent::WorkerUpdate { worker_id, status: "cancelled".to_string() });
            return WorkerOutcome::Cancelled { worker_id };
        }
        if cursor >= range_end {
            events.publish(MiningEvent::WorkerUpdate { worker_id, status: "cap_reached".to_string() });
            return WorkerOutcome::CapReached {
                worker_id,
                hashes_computed: hashes_computed.load(Ordering::Relaxed),
            };
        }

        // --- batch generation ---
        let batch_end = (cursor + batch_size as u64).min(range_end);
        let mut nonces = Vec::with_capacity((batch_end - cursor) as usize);
        let mut preimages = Vec::with_capacity((batch_end - cursor) as usize);
        for nonce in cursor..batch_end {
            let preimage = preimage::serialize(nonce, &address.identifier, &challenge);
            nonces.push(nonce);
            preimages.push(preimage);
        }

        // --- batch hash ---
        let hashes = match hash_engine.hash_batch(&preimages).await {
            Ok(hashes) => hashes,
            Err(e) => {
                let retriable = is_retriable(&e);
                warn!(worker_id, error = %e, retriable, "hash batch failed");
                tokio::time::sleep(if retriable {
                    HASH_BATCH_RETRIABLE_BACKOFF
                } else {
                    HASH_BATCH_NON_RETRIABLE_BACKOFF
                })
                .await;
                if !retriable {
                    cursor = batch_end;
                }
                continue;
            }
        };

        // --- rotation guard ---
        if live_challenge_id
            .has_changed()
            .unwrap_or(false)
        {
            let live = live_challenge_id.borrow_and_update().clone();
            if live.as_deref() != Some(challenge.challenge_id.as_str()) {
                debug!(worker_id, "challenge rotated, worker exiting");
                events.publish(MiningEvent::WorkerUpdate { worker_id, status: "rotated".to_string() });
                return WorkerOutcome::Rotated { worker_id };
            }
        }

        stats.lock().await.update_hashes(nonces.len() as u64).await;

        // --- scan for a qualifying hash ---
        for (nonce, hash) in nonces.iter().zip(hashes.iter()) {
            if preimage::matches_difficulty(hash, &challenge.difficulty) {
                let nonce_hex = preimage::format_nonce(*nonce);
                let preimage_bytes = preimage::serialize(*nonce, &address.identifier, &challenge);
                stats.lock().await.solution_found().await;
                events.publish(MiningEvent::WorkerUpdate { worker_id, status: "solved".to_string() });
                return WorkerOutcome::Solved(SolutionCandidate {
                    worker_id,
                    address: address.clone(),
                    challenge_snapshot: challenge.clone(),
                    nonce: nonce_hex,
                    preimage: preimage_bytes,
                    hash: hash.clone(),
                });
            }
        }

        hashes_computed.fetch_add(nonces.len() as u64, Ordering::Relaxed);
        cursor = batch_end;

        // --- throttled progress emit ---
        if last_emit.elapsed() >= PROGRESS_EMIT_INTERVAL {
            let elapsed_secs = started_at.elapsed().as_secs_f64().max(0.001);
            let total = hashes_computed.load(Ordering::Relaxed);
            events.publish(MiningEvent::HashProgress {
                worker_id,
                address: address.identifier.clone(),
                hashes_computed: total,
                hash_rate: total as f64 / elapsed_secs,
            });
            last_emit = Instant::now();
        }
    }
}

fn is_retriable(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("408") || msg.contains("timed out") || msg.contains("timeout")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Sha256HashEngine;

    fn test_address(identifier: &str) -> Address {
        Address {
            index: 0,
            identifier: identifier.to_string(),
            public_key: vec![],
            registered: true,
        }
    }

    fn test_challenge(difficulty: &str) -> Challenge {
        Challenge {
            challenge_id: "chal-1".into(),
            difficulty: difficulty.into(),
            no_pre_mine: "seed".into(),
            no_pre_mine_hour: 1,
            latest_submission: "sub".into(),
        }
    }

    fn test_stats() -> Arc<Mutex<StatsCollector>> {
        Arc::new(Mutex::new(StatsCollector::new()))
    }

    #[tokio::test]
    async fn worker_exits_cleanly_on_stop_flag() {
        let shared = Arc::new(SharedMiningState::new());
        let key = ("addr-1".to_string(), "chal-1".to_string());
        shared.set_running(true);
        shared.start_cohort(key.clone());
        shared.stop_worker(key, 0);

        let (_tx, rx) = watch::channel(None);
        let outcome = run_worker(
            WorkerConfig {
                worker_id: 0,
                address: test_address("addr-1"),
                challenge: test_challenge("ffffffff"),
                batch_size: 10,
                max_submission_failures: 6,
            },
            Arc::new(Sha256HashEngine::new()),
            shared,
            rx,
            EventBus::new(),
            test_stats(),
        )
        .await;

        assert!(matches!(outcome, WorkerOutcome::Cancelled { worker_id: 0 }));
    }

    #[tokio::test]
    async fn worker_exits_on_rotation() {
        let shared = Arc::new(SharedMiningState::new());
        let key = ("addr-1".to_string(), "chal-1".to_string());
        shared.set_running(true);
        shared.start_cohort(key);

        let (tx, rx) = watch::channel(Some("chal-1".to_string()));
        tx.send(Some("chal-2".to_string())).unwrap();

        let outcome = run_worker(
            WorkerConfig {
                worker_id: 0,
                address: test_address("addr-1"),
                // ffffffff accepts everything instantly, but the rotation
                // guard must still fire before the scan would matter.
                challenge: test_challenge("00000000"),
                batch_size: 4,
                max_submission_failures: 6,
            },
            Arc::new(Sha256HashEngine::new()),
            shared,
            rx,
            EventBus::new(),
            test_stats(),
        )
        .await;

        assert!(matches!(outcome, WorkerOutcome::Rotated { worker_id: 0 }));
    }

    #[tokio::test]
    async fn worker_feeds_hash_count_into_stats() {
        let shared = Arc::new(SharedMiningState::new());
        let key = ("addr-1".to_string(), "chal-1".to_string());
        shared.set_running(true);
        shared.start_cohort(key);

        let (_tx, rx) = watch::channel(None);
        let stats = test_stats();
        let outcome = run_worker(
            WorkerConfig {
                worker_id: 0,
                address: test_address("addr-1"),
                challenge: test_challenge("ffffffff"),
                batch_size: 10,
                max_submission_failures: 6,
            },
            Arc::new(Sha256HashEngine::new()),
            shared,
            rx,
            EventBus::new(),
            stats.clone(),
        )
        .await;

        assert!(matches!(outcome, WorkerOutcome::Solved(_)));
        let snapshot = stats.lock().await.get_stats().await;
        assert_eq!(snapshot.solutions_found, 1);
        assert!(snapshot.total_hashes >= 1);
    }
}
