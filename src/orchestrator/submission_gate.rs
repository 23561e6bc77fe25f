//! The submission gate: the exact, lock-guarded sequence a candidate
//! solution must pass before (and during) being sent to the network.
//! Follows `TransactionManager`'s retry/backoff and status-handling
//! idiom, though the domain semantics are entirely different: there is
//! no commit/reveal/claim pipeline here, only a single submit with a
//! freshness revalidation immediately beforehand.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::events::{EventBus, MiningEvent};
use crate::model::{Challenge, ErrorRecord, Receipt, SolutionCandidate};
use crate::network::{HashEngine, NetworkClient, SubmissionOutcome};
use crate::orchestrator::durable_state::ReceiptLog;
use crate::preimage;
use crate::state::SharedMiningState;

#[derive(Debug, PartialEq, Eq)]
pub enum GateOutcome {
    /// The candidate was accepted by the network.
    Accepted,
    /// Abandoned before a submission attempt: duplicate hash, lock already
    /// held, or the candidate no longer qualifies against a fresher
    /// challenge. Mining continues on this address.
    Abandoned,
    /// Rejected or failed; the per-(address, challenge) failure counter
    /// was incremented. `cap_reached` tells the coordinator whether to
    /// give up on this address for this rotation.
    Failed { cap_reached: bool },
}

pub struct SubmissionGate {
    network: Arc<dyn NetworkClient>,
    hash_engine: Arc<dyn HashEngine>,
    receipt_log: Arc<dyn ReceiptLog>,
    shared: Arc<SharedMiningState>,
    events: EventBus,
    max_submission_failures: u32,
    worker_threads: u32,
}

impl SubmissionGate {
    pub fn new(
        network: Arc<dyn NetworkClient>,
        hash_engine: Arc<dyn HashEngine>,
        receipt_log: Arc<dyn ReceiptLog>,
        shared: Arc<SharedMiningState>,
        events: EventBus,
        max_submission_failures: u32,
        worker_threads: u32,
    ) -> Self {
        Self {
            network,
            hash_engine,
            receipt_log,
            shared,
            events,
            max_submission_failures,
            worker_threads,
        }
    }

    /// Reads the live challenge for freshness revalidation. `None` means
    /// the poller has nothing fresher than the candidate's own snapshot,
    /// in which case the candidate is already as fresh as it can be.
    pub async fn submit(
        &self,
        candidate: SolutionCandidate,
        live_challenge: Option<Challenge>,
        is_dev_fee: bool,
    ) -> GateOutcome {
        let key = (
            candidate.address.identifier.clone(),
            candidate.challenge_snapshot.challenge_id.clone(),
        );

        // 1. dedupe
        if self.shared.has_submitted_hash(&candidate.hash) {
            return GateOutcome::Abandoned;
        }

        // 2. acquire lock
        if !self.shared.try_acquire_submitting(key.clone()) {
            return GateOutcome::Abandoned;
        }

        // From here on every exit path must release the lock (step 8).
        let outcome = self.submit_locked(candidate, live_challenge, is_dev_fee, &key).await;
        self.shared.release_submitting(&key);
        outcome
    }

    async fn submit_locked(
        &self,
        mut candidate: SolutionCandidate,
        live_challenge: Option<Challenge>,
        is_dev_fee: bool,
        key: &(String, String),
    ) -> GateOutcome {
        // 3. stop siblings, pause the address
        self.shared.stop_all_workers(key, self.worker_threads);
        self.shared.pause(key.clone());

        self.shared.insert_submitted_hash(candidate.hash.clone());

        // 4. pre-submit freshness check
        if let Some(live) = &live_challenge {
            let snapshot = &candidate.challenge_snapshot;
            let drifted = live.latest_submission != snapshot.latest_submission
                || live.no_pre_mine_hour != snapshot.no_pre_mine_hour
                || live.no_pre_mine != snapshot.no_pre_mine
                || live.difficulty != snapshot.difficulty;

            if drifted {
                let nonce_value = u64::from_str_radix(&candidate.nonce, 16).unwrap_or(0);
                let fresh_preimage =
                    preimage::serialize(nonce_value, &candidate.address.identifier, live);
                let fresh_hash = match self.hash_engine.hash_batch(&[fresh_preimage.clone()]).await {
                    Ok(hashes) => hashes.into_iter().next(),
                    Err(e) => {
                        warn!(error = %e, "freshness re-hash failed, abandoning candidate");
                        self.shared.remove_submitted_hash(&candidate.hash);
                        self.shared.clear_stopped_workers_for(key);
                        self.shared.unpause(key);
                        return GateOutcome::Abandoned;
                    }
                };

                let Some(fresh_hash) = fresh_hash else {
                    self.shared.remove_submitted_hash(&candidate.hash);
                    self.shared.clear_stopped_workers_for(key);
                    self.shared.unpause(key);
                    return GateOutcome::Abandoned;
                };

                if !preimage::matches_difficulty(&fresh_hash, &live.difficulty) {
                    // 5a. stale-challenge self-detection: silent discard,
                    // not counted as a failure, mining continues.
                    self.shared.remove_submitted_hash(&candidate.hash);
                    self.shared.clear_stopped_workers_for(key);
                    self.shared.unpause(key);
                    return GateOutcome::Abandoned;
                }

                candidate.preimage = fresh_preimage;
                candidate.hash = fresh_hash;
                candidate.challenge_snapshot = live.clone();
            }
        }

        self.events.publish(MiningEvent::SolutionSubmit {
            address: candidate.address.identifier.clone(),
            challenge_id: candidate.challenge_snapshot.challenge_id.clone(),
            nonce: candidate.nonce.clone(),
        });

        // 5. submit
        let result = self
            .network
            .submit_solution(
                &candidate.address.identifier,
                &candidate.challenge_snapshot.challenge_id,
                &candidate.nonce,
            )
            .await;

        match result {
            Ok(SubmissionOutcome::Accepted { crypto_receipt }) => {
                self.on_accept(candidate, crypto_receipt, is_dev_fee, key).await
            }
            Ok(SubmissionOutcome::Rejected { message }) => {
                self.on_reject(candidate, message, is_dev_fee, key).await
            }
            Ok(SubmissionOutcome::TransportFailure { message }) => {
                self.on_reject(candidate, message, is_dev_fee, key).await
            }
            Err(e) => self.on_reject(candidate, e.to_string(), is_dev_fee, key).await,
        }
    }

    async fn on_accept(
        &self,
        candidate: SolutionCandidate,
        crypto_receipt: Option<serde_json::Value>,
        is_dev_fee: bool,
        key: &(String, String),
    ) -> GateOutcome {
        // 6. accept
        self.shared.mark_solved(&candidate.address.identifier, key.1.as_str());
        if is_dev_fee {
            self.shared.increment_dev_fee_solutions();
        } else {
            self.shared.increment_user_solutions();
        }
        self.shared.reset_failures(key);
        self.shared.unpause(key);

        let receipt = Receipt {
            timestamp: Utc::now(),
            address: candidate.address.identifier.clone(),
            address_index: candidate.address.index,
            challenge_id: candidate.challenge_snapshot.challenge_id.clone(),
            nonce: candidate.nonce.clone(),
            hash: candidate.hash.clone(),
            is_dev_fee,
            crypto_receipt,
        };
        if let Err(e) = self.receipt_log.append_receipt(&receipt) {
            warn!(error = %e, "failed to persist receipt");
        }

        self.events.publish(MiningEvent::SolutionResult {
            address: candidate.address.identifier.clone(),
            challenge_id: candidate.challenge_snapshot.challenge_id.clone(),
            accepted: true,
        });
        self.events.publish(MiningEvent::Solution {
            address: candidate.address.identifier,
            challenge_id: receipt.challenge_id,
            nonce: receipt.nonce,
            is_dev_fee,
        });

        info!("solution accepted");
        GateOutcome::Accepted
    }

    async fn on_reject(
        &self,
        candidate: SolutionCandidate,
        message: String,
        is_dev_fee: bool,
        key: &(String, String),
    ) -> GateOutcome {
        // 7. reject/error
        self.shared.remove_submitted_hash(&candidate.hash);
        self.shared.clear_stopped_workers_for(key);
        self.shared.unpause(key);

        let error_record = ErrorRecord {
            timestamp: Utc::now(),
            address: candidate.address.identifier.clone(),
            address_index: candidate.address.index,
            challenge_id: candidate.challenge_snapshot.challenge_id.clone(),
            nonce: candidate.nonce.clone(),
            hash: candidate.hash.clone(),
            is_dev_fee,
            error: message.clone(),
            response: None,
        };
        if let Err(e) = self.receipt_log.append_error(&error_record) {
            warn!(error = %e, "failed to persist error record");
        }

        self.events.publish(MiningEvent::SolutionResult {
            address: candidate.address.identifier,
            challenge_id: key.1.clone(),
            accepted: false,
        });

        let failures = self.shared.record_failure(key.clone());
        let cap_reached = failures >= self.max_submission_failures;
        warn!(failures, cap_reached, error = %message, "submission failed");
        GateOutcome::Failed { cap_reached }
    }
}

/// A small fixed delay used by callers retrying a submission with a
/// different nonce after a retriable failure.
pub const SUBMISSION_RETRY_BACKOFF: Duration = Duration::from_secs(1);

pub type LiveChallengeReceiver = watch::Receiver<Option<Challenge>>;
