//! Mining statistics collection, generalized from
//! `gmine_miner::orchestrator::stats::StatsCollector`'s epoch-keyed fields
//! to the challenge/address framing this core mines against. Kept behind
//! an `Arc<RwLock<_>>` the same way so an external operator surface can
//! read a snapshot without ever taking a Coordinator lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Point-in-time mining statistics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningStatistics {
    // Performance metrics
    pub current_hashrate: f64,
    pub average_hashrate: f64,
    pub total_hashes: u64,
    pub mining_duration: Duration,

    // Current state
    pub current_address: Option<String>,
    pub current_challenge_id: Option<String>,
    pub current_difficulty: Option<String>,
    pub current_phase: String,

    // Results
    pub solutions_found: u64,
    pub solutions_submitted: u64,
    pub solutions_accepted: u64,
    pub user_solutions: u64,
    pub dev_fee_solutions: u64,

    // Errors
    pub connection_errors: u64,
    pub mining_errors: u64,
    pub last_error: Option<String>,
}

impl Default for MiningStatistics {
    fn default() -> Self {
        Self {
            current_hashrate: 0.0,
            average_hashrate: 0.0,
            total_hashes: 0,
            mining_duration: Duration::from_secs(0),
            current_address: None,
            current_challenge_id: None,
            current_difficulty: None,
            current_phase: "idle".to_string(),
            solutions_found: 0,
            solutions_submitted: 0,
            solutions_accepted: 0,
            user_solutions: 0,
            dev_fee_solutions: 0,
            connection_errors: 0,
            mining_errors: 0,
            last_error: None,
        }
    }
}

/// Statistics collector shared across the coordinator, worker pool, and
/// submission gate.
pub struct StatsCollector {
    stats: Arc<RwLock<MiningStatistics>>,
    start_time: Option<Instant>,
    hash_count_window: std::sync::Mutex<Vec<(Instant, u64)>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(RwLock::new(MiningStatistics::default())),
            start_time: None,
            hash_count_window: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Begins a cohort against `address`/`challenge_id` at `difficulty`.
    pub async fn start_cohort(&mut self, address: &str, challenge_id: &str, difficulty: &str) {
        self.start_time = Some(Instant::now());
        self.hash_count_window.lock().unwrap_or_else(|p| p.into_inner()).clear();

        let mut stats = self.stats.write().await;
        stats.current_address = Some(address.to_string());
        stats.current_challenge_id = Some(challenge_id.to_string());
        stats.current_difficulty = Some(difficulty.to_string());
        stats.current_phase = "running".to_string();
    }

    pub async fn update_hashes(&self, new_hashes: u64) {
        let now = Instant::now();
        let window_hashes = {
            let mut window = self.hash_count_window.lock().unwrap_or_else(|p| p.into_inner());
            window.push((now, new_hashes));
            let cutoff = now - Duration::from_secs(5);
            window.retain(|(time, _)| *time > cutoff);
            window.iter().map(|(_, h)| h).sum::<u64>()
        };
        let window_duration = {
            let window = self.hash_count_window.lock().unwrap_or_else(|p| p.into_inner());
            window
                .first()
                .map(|(first, _)| now.duration_since(*first).as_secs_f64())
                .unwrap_or(1.0)
        };
        let current_hashrate = window_hashes as f64 / window_duration.max(1.0);

        let mut stats = self.stats.write().await;
        stats.total_hashes += new_hashes;
        stats.current_hashrate = current_hashrate;
        if let Some(start) = self.start_time {
            let elapsed = now.duration_since(start);
            stats.average_hashrate = stats.total_hashes as f64 / elapsed.as_secs_f64().max(1.0);
            stats.mining_duration = elapsed;
        }
    }

    pub async fn update_phase(&self, phase: &str) {
        self.stats.write().await.current_phase = phase.to_string();
    }

    pub async fn solution_found(&self) {
        self.stats.write().await.solutions_found += 1;
    }

    pub async fn solution_submitted(&self) {
        self.stats.write().await.solutions_submitted += 1;
    }

    pub async fn solution_accepted(&self, is_dev_fee: bool) {
        let mut stats = self.stats.write().await;
        stats.solutions_accepted += 1;
        if is_dev_fee {
            stats.dev_fee_solutions += 1;
        } else {
            stats.user_solutions += 1;
        }
    }

    pub async fn record_error(&self, error_type: &str, message: String) {
        let mut stats = self.stats.write().await;
        match error_type {
            "connection" => stats.connection_errors += 1,
            "mining" => stats.mining_errors += 1,
            _ => {}
        }
        stats.last_error = Some(message);
    }

    pub async fn get_stats(&self) -> MiningStatistics {
        self.stats.read().await.clone()
    }

    pub async fn reset(&mut self) {
        *self.stats.write().await = MiningStatistics::default();
        self.start_time = None;
        self.hash_count_window.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_cohort_populates_current_fields() {
        let mut collector = StatsCollector::new();
        collector.start_cohort("addr-1", "chal-1", "0fffffff").await;
        let stats = collector.get_stats().await;
        assert_eq!(stats.current_address.as_deref(), Some("addr-1"));
        assert_eq!(stats.current_phase, "running");
    }

    #[tokio::test]
    async fn solution_accepted_splits_user_and_dev_fee_counts() {
        let collector = StatsCollector::new();
        collector.solution_accepted(false).await;
        collector.solution_accepted(false).await;
        collector.solution_accepted(true).await;
        let stats = collector.get_stats().await;
        assert_eq!(stats.user_solutions, 2);
        assert_eq!(stats.dev_fee_solutions, 1);
        assert_eq!(stats.solutions_accepted, 3);
    }

    #[tokio::test]
    async fn reset_clears_accumulated_totals() {
        let mut collector = StatsCollector::new();
        collector.update_hashes(1000).await;
        collector.reset().await;
        let stats = collector.get_stats().await;
        assert_eq!(stats.total_hashes, 0);
    }
}
