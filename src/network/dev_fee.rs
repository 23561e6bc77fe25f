//! The developer-fee address pool: a small, pre-warmed set of addresses
//! the dev-fee obligation mines against in round-robin order, skipping
//! any address that already has a receipt for the current challenge
//! rather than blocking user mining to wait for a fresh one.

use std::sync::Mutex;

pub trait DevFeeAddressSource: Send + Sync {
    /// Returns the next candidate address, or `None` if the pool is
    /// exhausted and has nothing to offer this round.
    fn next_address(&self) -> Option<String>;
}

pub struct RoundRobinDevFeePool {
    addresses: Vec<String>,
    cursor: Mutex<usize>,
}

impl RoundRobinDevFeePool {
    pub fn new(addresses: Vec<String>) -> Self {
        Self {
            addresses,
            cursor: Mutex::new(0),
        }
    }
}

impl DevFeeAddressSource for RoundRobinDevFeePool {
    fn next_address(&self) -> Option<String> {
        if self.addresses.is_empty() {
            return None;
        }
        let mut cursor = self.cursor.lock().unwrap_or_else(|p| p.into_inner());
        let addr = self.addresses[*cursor % self.addresses.len()].clone();
        *cursor = (*cursor + 1) % self.addresses.len();
        Some(addr)
    }
}
