use serde::{Deserialize, Serialize};

use crate::Error;

/// Default limit of states for one instruction within one batch.
pub const DEFAULT_COMPLEXITY_LIMIT: usize = 300;

/// Default limit of instruction states processed during one run.
pub const DEFAULT_STATE_LIMIT: usize = 50_000;

/// Default batch size above which queued states are forcibly merged.
pub const DEFAULT_FORCE_MERGE_THRESHOLD: usize = 100;

/// Default divisor of the complexity limit at which back branches start to
/// be merged.
pub const DEFAULT_BACK_BRANCH_MERGE_DIVISOR: usize = 6;

/// Limits and switches of an interpretation run.
///
/// All limits are tuning knobs. Lowering them trades precision for speed,
/// raising them lets the interpreter chew on harder units before it gives up
/// with [`RunnerResult::TooComplex`](crate::RunnerResult::TooComplex).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of states for one instruction in one batch, and
    /// maximum number of states remembered for one join instruction.
    pub complexity_limit: usize,
    /// Maximum number of instruction states processed during one run.
    pub state_limit: usize,
    /// Queue batches larger than this are forcibly merged.
    pub force_merge_threshold: usize,
    /// Back branches are merged once a join instruction remembers more than
    /// `complexity_limit / back_branch_merge_divisor` states.
    pub back_branch_merge_divisor: usize,
    /// Check the operand stack when a control transfer ends a path.
    pub verify_transfer_stack: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            complexity_limit: DEFAULT_COMPLEXITY_LIMIT,
            state_limit: DEFAULT_STATE_LIMIT,
            force_merge_threshold: DEFAULT_FORCE_MERGE_THRESHOLD,
            back_branch_merge_divisor: DEFAULT_BACK_BRANCH_MERGE_DIVISOR,
            verify_transfer_stack: true,
        }
    }
}

impl Config {
    /// Read a `Config` from json. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Config, Error> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_complexity_limit(mut self, complexity_limit: usize) -> Config {
        self.complexity_limit = complexity_limit;
        self
    }

    pub fn with_state_limit(mut self, state_limit: usize) -> Config {
        self.state_limit = state_limit;
        self
    }

    pub fn with_force_merge_threshold(mut self, force_merge_threshold: usize) -> Config {
        self.force_merge_threshold = force_merge_threshold;
        self
    }

    pub fn with_back_branch_merge_divisor(mut self, back_branch_merge_divisor: usize) -> Config {
        self.back_branch_merge_divisor = back_branch_merge_divisor;
        self
    }

    pub fn with_verify_transfer_stack(mut self, verify_transfer_stack: bool) -> Config {
        self.verify_transfer_stack = verify_transfer_stack;
        self
    }

    /// Number of remembered states above which back branches are merged.
    pub fn back_branch_merge_limit(&self) -> usize {
        self.complexity_limit / self.back_branch_merge_divisor.max(1)
    }
}
