//! Flowrunner: a worklist abstract interpreter over instruction flow graphs.
//!
//! Flowrunner executes a [`FlowGraph`](flow::FlowGraph) of instructions
//! against symbolic memory states until a fixed point is reached, or until
//! one of the configured complexity bounds gives up on the analysis.
//!
//! The crate does not know what a memory state tracks. States are plugged in
//! through the [`MemoryState`](state::MemoryState) trait, and instruction
//! semantics through the [`Domain`](domain::Domain) trait. The
//! [`interpreter`] module owns the fixed-point loop, the deduplicating state
//! queue, join-point caches and loop-exit cleanup.
//!
//! ```ignore
//! let graph = RC::new(FlowGraph::new(anchor, instructions)?);
//! let mut interpreter = Interpreter::new(graph, domain);
//! match interpreter.interpret(InstructionState::new(0, initial_state))? {
//!     RunnerResult::Ok => { /* use results gathered by the visitor */ }
//!     _ => { /* inconclusive, report nothing */ }
//! }
//! ```

use thiserror::Error;

pub mod bitset;
pub mod domain;
pub mod flow;
pub mod graph;
pub mod interpreter;
pub mod state;
#[cfg(test)]
mod tests;

#[cfg(not(feature = "thread_safe"))]
pub use std::rc::Rc as RC;
#[cfg(feature = "thread_safe")]
pub use std::sync::Arc as RC;

pub use crate::flow::{Anchor, FlowGraph, Instruction, InstructionKind, InstructionState};
pub use crate::interpreter::{Interpreter, ReachabilityInterpreter, RunnerResult};

/// Flowrunner Error types.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Analysis cancelled")]
    Cancelled,
    #[error("Custom: {0}")]
    Custom(String),
    #[error("Graph vertex not found {0}")]
    GraphVertexNotFound(usize),
    #[error("Fault executing instruction {index}: {source}")]
    InstructionFault {
        index: usize,
        state: String,
        #[source]
        source: Box<Error>,
    },
    #[error("Instruction at position {position} has index {index}")]
    InstructionIndexMismatch { position: usize, index: usize },
    #[error("Instruction {0} not found")]
    InstructionNotFound(usize),
    #[error("Instruction {index} targets {target}, past the end of the flow graph")]
    InvalidTarget { index: usize, target: usize },
    #[error("Json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Loop numbers cover {found} instructions, expected {expected}")]
    LoopNumberMismatch { expected: usize, found: usize },
}

impl From<&str> for Error {
    fn from(s: &str) -> Error {
        Error::Custom(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Error {
        Error::Custom(s)
    }
}
