use serde::{Deserialize, Serialize};
use std::fmt;

/// Counters gathered during one interpretation run.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct RunStats {
    /// Instruction states taken off the queue.
    pub states_processed: usize,
    pub batches: usize,
    /// Size of the largest batch.
    pub max_batch: usize,
    pub widenings: usize,
    pub back_branch_merges: usize,
    /// Loops whose caches were purged after execution stepped out of them.
    pub loop_exits: usize,
    /// States skipped because a cached state already covered them.
    pub subsumed: usize,
}

impl RunStats {
    pub(super) fn record_batch(&mut self, len: usize) {
        self.batches += 1;
        self.max_batch = self.max_batch.max(len);
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} states in {} batches (max {}), {} widenings, {} back branch merges, {} loop exits, {} subsumed",
            self.states_processed,
            self.batches,
            self.max_batch,
            self.widenings,
            self.back_branch_merges,
            self.loop_exits,
            self.subsumed
        )
    }
}
