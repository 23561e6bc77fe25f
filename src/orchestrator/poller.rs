//! The challenge poller: a background task that periodically fetches the
//! active challenge, distinguishes rotation from in-place mutation, and
//! never blocks the coordinator. Based on `EpochMonitor`'s
//! `tokio::time::interval` loop writing into a shared
//! `Arc<RwLock<Option<_>>>` and logging on phase transitions,
//! generalized from a block-height-derived epoch phase to a
//! directly-polled `ChallengeState`.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

use crate::model::{Challenge, ChallengeState};
use crate::network::{ChallengeResponse, NetworkClient};

#[derive(Debug, Error)]
pub enum PollError {
    #[error("transient poll failure: {0}")]
    PollFailure(String),
    #[error("network appears down after {0} consecutive failures")]
    NetworkDown(u32),
}

/// What the coordinator sees after one poll tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Rotation(Challenge),
    Mutation(Challenge),
    Unchanged,
    WindowBefore,
    WindowClosed,
}

pub struct ChallengePollerConfig {
    pub poll_interval: Duration,
    pub max_consecutive_failures: u32,
}

impl Default for ChallengePollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            max_consecutive_failures: 10,
        }
    }
}

pub struct ChallengePoller {
    network: Arc<dyn NetworkClient>,
    config: ChallengePollerConfig,
    current_state: Arc<RwLock<ChallengeState>>,
    live_challenge_id_tx: watch::Sender<Option<String>>,
    consecutive_failures: std::sync::atomic::AtomicU32,
}

impl ChallengePoller {
    pub fn new(network: Arc<dyn NetworkClient>, config: ChallengePollerConfig) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            network,
            config,
            current_state: Arc::new(RwLock::new(ChallengeState::Before)),
            live_challenge_id_tx: tx,
            consecutive_failures: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn subscribe_live_challenge_id(&self) -> watch::Receiver<Option<String>> {
        self.live_challenge_id_tx.subscribe()
    }

    pub async fn current_state(&self) -> ChallengeState {
        self.current_state.read().await.clone()
    }

    /// The live `Challenge`, if one is currently active. Read directly by
    /// the Submission Gate for freshness revalidation rather than through
    /// the rotation-only `live_challenge_id` watch channel.
    pub async fn live_challenge(&self) -> Option<Challenge> {
        match &*self.current_state.read().await {
            ChallengeState::Active(challenge) => Some(challenge.clone()),
            _ => None,
        }
    }

    /// Performs a single poll and diffs it against the previously observed
    /// state. Never panics; transport failures come back as `PollError`
    /// for the caller to log and retry on the next tick.
    pub async fn poll_once(&self) -> Result<PollOutcome, PollError> {
        let response = self
            .network
            .get_challenge()
            .await
            .map_err(|e| PollError::PollFailure(e.to_string()));

        let response = match response {
            Ok(r) => {
                self.consecutive_failures
                    .store(0, std::sync::atomic::Ordering::Release);
                r
            }
            Err(e) => {
                let failures = self
                    .consecutive_failures
                    .fetch_add(1, std::sync::atomic::Ordering::AcqRel)
                    + 1;
                if failures >= self.config.max_consecutive_failures {
                    return Err(PollError::NetworkDown(failures));
                }
                return Err(e);
            }
        };

        let new_state = match response {
            ChallengeResponse::Before => ChallengeState::Before,
            ChallengeResponse::After => ChallengeState::After,
            ChallengeResponse::Active { challenge } => ChallengeState::Active(challenge),
        };

        let previous = {
            let mut guard = self.current_state.write().await;
            std::mem::replace(&mut *guard, new_state.clone())
        };

        let outcome = match (&previous, &new_state) {
            (_, ChallengeState::Before) => PollOutcome::WindowBefore,
            (_, ChallengeState::After) => PollOutcome::WindowClosed,
            (ChallengeState::Active(old), ChallengeState::Active(new))
                if old.challenge_id == new.challenge_id =>
            {
                if old == new {
                    PollOutcome::Unchanged
                } else {
                    PollOutcome::Mutation(new.clone())
                }
            }
            (_, ChallengeState::Active(new)) => PollOutcome::Rotation(new.clone()),
        };

        if let ChallengeState::Active(challenge) = &new_state {
            let _ = self
                .live_challenge_id_tx
                .send(Some(challenge.challenge_id.clone()));
        }

        match &outcome {
            PollOutcome::Rotation(c) => info!(challenge_id = %c.challenge_id, "challenge rotated"),
            PollOutcome::Mutation(c) => info!(challenge_id = %c.challenge_id, "challenge mutated in place"),
            PollOutcome::WindowClosed => info!("mining window closed"),
            _ => {}
        }

        Ok(outcome)
    }

    /// Runs the poll loop forever at the configured cadence. Poll
    /// failures are logged and retried on the next tick; they never
    /// propagate to the coordinator as a fatal error.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        loop {
            interval.tick().await;
            match self.poll_once().await {
                Ok(_) => {}
                Err(PollError::PollFailure(msg)) => {
                    warn!(error = %msg, "challenge poll failed, retrying next tick");
                }
                Err(PollError::NetworkDown(failures)) => {
                    warn!(failures, "network appears down");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct FakeNetwork {
        responses: StdMutex<std::collections::VecDeque<anyhow::Result<ChallengeResponse>>>,
    }

    #[async_trait]
    impl NetworkClient for FakeNetwork {
        async fn get_challenge(&self) -> anyhow::Result<ChallengeResponse> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(ChallengeResponse::Before))
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
        ) -> anyhow::Result<crate::network::SubmissionOutcome> {
            Ok(crate::network::SubmissionOutcome::Accepted { crypto_receipt: None })
        }
    }

    fn chal(id: &str, latest_submission: &str) -> Challenge {
        Challenge {
            challenge_id: id.into(),
            difficulty: "0fffffff".into(),
            no_pre_mine: "seed".into(),
            no_pre_mine_hour: 1,
            latest_submission: latest_submission.into(),
        }
    }

    #[tokio::test]
    async fn detects_rotation_when_challenge_id_changes() {
        let network = Arc::new(FakeNetwork {
            responses: StdMutex::new(
                vec![
                    Ok(ChallengeResponse::Active { challenge: chal("c1", "a") }),
                    Ok(ChallengeResponse::Active { challenge: chal("c2", "a") }),
                ]
                .into(),
            ),
        });
        let poller = ChallengePoller::new(network, ChallengePollerConfig::default());

        let first = poller.poll_once().await.unwrap();
        assert_eq!(first, PollOutcome::Rotation(chal("c1", "a")));

        let second = poller.poll_once().await.unwrap();
        assert_eq!(second, PollOutcome::Rotation(chal("c2", "a")));
    }

    #[tokio::test]
    async fn detects_mutation_when_id_is_stable_but_fields_change() {
        let network = Arc::new(FakeNetwork {
            responses: StdMutex::new(
                vec![
                    Ok(ChallengeResponse::Active { challenge: chal("c1", "a") }),
                    Ok(ChallengeResponse::Active { challenge: chal("c1", "b") }),
                ]
                .into(),
            ),
        });
        let poller = ChallengePoller::new(network, ChallengePollerConfig::default());

        poller.poll_once().await.unwrap();
        let second = poller.poll_once().await.unwrap();
        assert_eq!(second, PollOutcome::Mutation(chal("c1", "b")));
    }

    #[tokio::test]
    async fn repeated_failures_escalate_to_network_down() {
        let network = Arc::new(FakeNetwork {
            responses: StdMutex::new(
                std::iter::repeat_with(|| Err(anyhow::anyhow!("connection refused")))
                    .take(12)
                    .collect(),
            ),
        });
        let poller = ChallengePoller::new(
            network,
            ChallengePollerConfig {
                poll_interval: Duration::from_millis(1),
                max_consecutive_failures: 3,
            },
        );

        for _ in 0..2 {
            assert!(matches!(
                poller.poll_once().await,
                Err(PollError::PollFailure(_))
            ));
        }
        assert!(matches!(
            poller.poll_once().await,
            Err(PollError::NetworkDown(3))
        ));
    }
}
