//! Shared, concurrently-accessed mining state. The coordinator owns this;
//! workers and the submission gate only ever see it through an `Arc`, and
//! every field here is the kind of small, flat, identifier-keyed state the
//! design notes call for in place of cross-referencing objects directly.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use crate::model::WorkerId;

pub type AddressChallengeKey = (String, String);

#[derive(Default)]
pub struct SharedMiningState {
    pub running: AtomicBool,
    /// `(address, challenge_id)` pairs with a cohort currently mining them.
    /// More than one entry at a time is normal: a dev-fee cohort runs
    /// concurrently with the user cohort that triggered it.
    pub active_cohorts: Mutex<HashSet<AddressChallengeKey>>,
    /// Stopped worker ids, scoped by cohort so that two concurrently
    /// running cohorts (each numbering its own workers `0..worker_threads`)
    /// never stop each other's workers by id collision.
    pub stopped_workers: Mutex<HashSet<(AddressChallengeKey, WorkerId)>>,
    pub paused_addresses: Mutex<HashSet<AddressChallengeKey>>,
    pub submitting: Mutex<HashSet<AddressChallengeKey>>,
    /// address -> set of challenge_ids already solved for that address.
    pub solved: Mutex<HashMap<String, HashSet<String>>>,
    pub submission_failures: Mutex<HashMap<AddressChallengeKey, u32>>,
    pub submitted_hashes: Mutex<HashSet<String>>,
    pub user_solutions_count: AtomicU32,
    pub dev_fee_solutions_count: AtomicU32,
}

impl SharedMiningState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Marks a cohort's `(address, challenge_id)` key active. Workers
    /// belonging to this cohort check this rather than a single global
    /// "current address" so that a dev-fee cohort and a user cohort can be
    /// active at the same time.
    pub fn start_cohort(&self, key: AddressChallengeKey) {
        self.active_cohorts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key);
    }

    pub fn end_cohort(&self, key: &AddressChallengeKey) {
        self.active_cohorts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(key);
    }

    pub fn is_cohort_active(&self, key: &AddressChallengeKey) -> bool {
        self.active_cohorts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(key)
    }

    pub fn is_worker_stopped(&self, key: &AddressChallengeKey, id: WorkerId) -> bool {
        self.stopped_workers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&(key.clone(), id))
    }

    pub fn stop_worker(&self, key: AddressChallengeKey, id: WorkerId) {
        self.stopped_workers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert((key, id));
    }

    /// Clears every stopped-worker entry belonging to `key`, leaving any
    /// concurrently running cohort's entries untouched.
    pub fn clear_stopped_workers_for(&self, key: &AddressChallengeKey) {
        self.stopped_workers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|(k, _)| k != key);
    }

    /// Clears every stopped-worker entry across every cohort. Used only by
    /// the hourly reset and shutdown drain, which mean to stop everything.
    pub fn clear_all_stopped_workers(&self) {
        self.stopped_workers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }

    /// Marks every worker id in `0..count` stopped for `key`'s cohort. Used
    /// by the submission gate (which knows the cohort's worker count but
    /// not its individual task handles) to free sibling CPU the moment a
    /// candidate is found, without touching any other cohort's workers.
    pub fn stop_all_workers(&self, key: &AddressChallengeKey, count: u32) {
        let mut set = self.stopped_workers.lock().unwrap_or_else(|p| p.into_inner());
        for id in 0..count {
            set.insert((key.clone(), id));
        }
    }

    pub fn is_paused(&self, key: &AddressChallengeKey) -> bool {
        self.paused_addresses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(key)
    }

    pub fn pause(&self, key: AddressChallengeKey) {
        self.paused_addresses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key);
    }

    pub fn unpause(&self, key: &AddressChallengeKey) {
        self.paused_addresses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(key);
    }

    pub fn clear_paused_addresses(&self) {
        self.paused_addresses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }

    /// Test-and-set acquire of the per-(address, challenge_id) submission
    /// lock. Returns true if this caller now holds it.
    pub fn try_acquire_submitting(&self, key: AddressChallengeKey) -> bool {
        self.submitting
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key)
    }

    pub fn release_submitting(&self, key: &AddressChallengeKey) {
        self.submitting
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(key);
    }

    pub fn clear_submitting(&self) {
        self.submitting
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }

    pub fn is_solved(&self, address: &str, challenge_id: &str) -> bool {
        self.solved
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(address)
            .map(|set| set.contains(challenge_id))
            .unwrap_or(false)
    }

    pub fn mark_solved(&self, address: &str, challenge_id: &str) {
        self.solved
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(address.to_string())
            .or_default()
            .insert(challenge_id.to_string());
    }

    pub fn failure_count(&self, key: &AddressChallengeKey) -> u32 {
        *self
            .submission_failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .unwrap_or(&0)
    }

    pub fn record_failure(&self, key: AddressChallengeKey) -> u32 {
        let mut failures = self.submission_failures.lock().unwrap_or_else(|p| p.into_inner());
        let count = failures.entry(key).or_insert(0);
        *count += 1;
        *count
    }

    pub fn reset_failures(&self, key: &AddressChallengeKey) {
        self.submission_failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(key);
    }

    pub fn has_submitted_hash(&self, hash: &str) -> bool {
        self.submitted_hashes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(hash)
    }

    pub fn insert_submitted_hash(&self, hash: String) {
        self.submitted_hashes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(hash);
    }

    pub fn remove_submitted_hash(&self, hash: &str) {
        self.submitted_hashes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(hash);
    }

    /// Full reset performed on hourly tick and on shutdown drain: every
    /// transient coordination set goes back to empty across every cohort,
    /// concurrent dev-fee cohorts included, because both mean to stop
    /// everything (invariant 4).
    pub fn reset_transient_state(&self) {
        self.active_cohorts.lock().unwrap_or_else(|p| p.into_inner()).clear();
        self.clear_all_stopped_workers();
        self.clear_paused_addresses();
        self.clear_submitting();
    }

    /// Clears only the leftover state belonging to one cohort's own key,
    /// leaving any other concurrently active cohort alone. Called at
    /// cohort start so a stale pause/stop/submitting entry from a previous
    /// attempt at this same `(address, challenge_id)` doesn't block the
    /// new one.
    pub fn reset_cohort_state(&self, key: &AddressChallengeKey) {
        self.clear_stopped_workers_for(key);
        self.unpause(key);
        self.release_submitting(key);
    }

    pub fn user_solutions(&self) -> u32 {
        self.user_solutions_count.load(Ordering::Acquire)
    }

    pub fn dev_fee_solutions(&self) -> u32 {
        self.dev_fee_solutions_count.load(Ordering::Acquire)
    }

    pub fn increment_user_solutions(&self) {
        self.user_solutions_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn increment_dev_fee_solutions(&self) {
        self.dev_fee_solutions_count.fetch_add(1, Ordering::AcqRel);
    }
}
