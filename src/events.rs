//! Typed, multi-subscriber event stream. Built on `tokio::sync::broadcast`
//! rather than a callback/emitter: a subscriber that falls behind only
//! drops events destined for itself, and the core never blocks waiting on
//! a listener. This is a local operator surface rather than a remote
//! telemetry sink.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::WorkerId;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MiningEvent {
    Status { phase: String },
    Stats {
        hash_rate: f64,
        total_hashes: u64,
        solutions_found: u32,
        user_solutions: u32,
        dev_fee_solutions: u32,
    },
    RegistrationProgress { completed: u32, total: u32 },
    MiningStart { address: String, challenge_id: String },
    HashProgress {
        worker_id: WorkerId,
        address: String,
        hashes_computed: u64,
        hash_rate: f64,
    },
    SolutionSubmit { address: String, challenge_id: String, nonce: String },
    SolutionResult { address: String, challenge_id: String, accepted: bool },
    WorkerUpdate { worker_id: WorkerId, status: String },
    Solution { address: String, challenge_id: String, nonce: String, is_dev_fee: bool },
    Error { message: String },
}

/// Thin wrapper so callers don't need to import `tokio::sync::broadcast`
/// directly and so the capacity stays fixed in one place.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MiningEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MiningEvent> {
        self.tx.subscribe()
    }

    /// Never fails the caller: if there are no subscribers, or a send
    /// would only matter to subscribers who are already gone, that is not
    /// this crate's problem.
    pub fn publish(&self, event: MiningEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(MiningEvent::Status { phase: "running".into() });
        let event = rx.recv().await.unwrap();
        matches!(event, MiningEvent::Status { .. });
    }

    #[tokio::test]
    async fn a_lagging_subscriber_only_loses_its_own_events() {
        let bus = EventBus::new();
        let mut lagging = bus.subscribe();
        let mut fresh = bus.subscribe();

        for i in 0..(CHANNEL_CAPACITY + 10) {
            bus.publish(MiningEvent::WorkerUpdate { worker_id: 0, status: i.to_string() });
        }

        // The lagging subscriber missed messages and gets a Lagged error,
        // not a panic or a blocked publisher.
        let err = lagging.recv().await;
        assert!(matches!(err, Err(broadcast::error::RecvError::Lagged(_))));

        // A freshly-draining subscriber can still make progress.
        assert!(fresh.recv().await.is_ok());
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(MiningEvent::Error { message: "no one is listening".into() });
    }
}
