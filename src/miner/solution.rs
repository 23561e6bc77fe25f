//! Outcome type a worker task resolves to, so the pool can dispatch on a
//! joined set rather than polling ad-hoc stop flags from the outside.

use crate::model::{SolutionCandidate, WorkerId};

#[derive(Debug)]
pub enum WorkerOutcome {
    Solved(SolutionCandidate),
    /// This worker exhausted its nonce range without a hit.
    CapReached { worker_id: WorkerId, hashes_computed: u64 },
    /// The challenge rotated out from under this worker mid-batch.
    Rotated { worker_id: WorkerId },
    /// Stopped by the coordinator, a sibling's solution, or a failure cap.
    Cancelled { worker_id: WorkerId },
}

impl WorkerOutcome {
    pub fn worker_id(&self) -> WorkerId {
        match self {
            WorkerOutcome::Solved(candidate) => candidate.worker_id,
            WorkerOutcome::CapReached { worker_id, .. }
            | WorkerOutcome::Rotated { worker_id }
            | WorkerOutcome::Cancelled { worker_id } => *worker_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Address, Challenge};

    #[test]
    fn worker_id_is_recoverable_from_every_variant() {
        let cancelled = WorkerOutcome::Cancelled { worker_id: 3 };
        assert_eq!(cancelled.worker_id(), 3);

        let solved = WorkerOutcome::Solved(SolutionCandidate {
            worker_id: 2,
            address: Address {
                index: 0,
                identifier: "addr".into(),
                public_key: vec![],
                registered: true,
            },
            challenge_snapshot: Challenge {
                challenge_id: "c".into(),
                difficulty: "ffffffff".into(),
                no_pre_mine: "n".into(),
                no_pre_mine_hour: 0,
                latest_submission: "l".into(),
            },
            nonce: "0000000000000000".into(),
            preimage: vec![],
            hash: "00".into(),
        });
        assert_eq!(solved.worker_id(), 2);
    }
}
