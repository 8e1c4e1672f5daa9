//! The fixed-point loop over a flow graph.
//!
//! An [`Interpreter`] takes starting states, executes them instruction by
//! instruction, and requeues the states flowing out of every instruction
//! until no state is left. States are reconciled at join instructions, which
//! are instructions with more than one way in:
//!
//! * Every batch of states waiting at a join instruction is squashed with
//!   exact joins by the [`StateQueue`].
//! * Inside loops, states already executed at a join instruction are
//!   remembered, and states covered by them are dropped.
//! * States flowing back along a loop's back edge are widened.
//!
//! Once execution provably left a loop, everything remembered for that loop
//! is purged. Runs give up with [`RunnerResult::TooComplex`] instead of
//! exhausting memory on pathological units.

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::Domain;
use crate::flow::{Anchor, FlowGraph, Instruction, InstructionState};
use crate::state::MemoryState;
use crate::{Error, RC};

mod cancellation;
mod config;
mod diagnostics;
mod queue;
mod reachability;
mod runner;
mod stats;

pub use self::cancellation::Cancellation;
pub use self::config::{
    Config, DEFAULT_BACK_BRANCH_MERGE_DIVISOR, DEFAULT_COMPLEXITY_LIMIT,
    DEFAULT_FORCE_MERGE_THRESHOLD, DEFAULT_STATE_LIMIT,
};
pub use self::diagnostics::{DiagnosticSink, FaultKind, FaultReport, LogSink};
pub use self::queue::StateQueue;
pub use self::reachability::{Reached, ReachabilityInterpreter};
pub use self::runner::{Runner, Visitor};
pub use self::stats::RunStats;

use self::diagnostics::{describe, instruction_fault};
use self::runner::StateCaches;

/// How an interpretation run ended.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerResult {
    /// Every state was executed to a fixed point.
    Ok,
    /// A complexity bound was exceeded. The analysis is inconclusive.
    TooComplex,
    /// The run was cancelled through [`Runner::cancel`] or
    /// [`Interpreter::cancel`]. Partial results must be discarded.
    Cancelled,
    /// Executing an instruction, or merging, widening or joining states,
    /// failed. The fault was handed to the diagnostic sink.
    Aborted,
}

impl RunnerResult {
    /// Returns `true` if results gathered during the run may be used.
    pub fn is_ok(&self) -> bool {
        *self == RunnerResult::Ok
    }
}

impl fmt::Display for RunnerResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RunnerResult::Ok => write!(f, "OK"),
            RunnerResult::TooComplex => write!(f, "TOO_COMPLEX"),
            RunnerResult::Cancelled => write!(f, "CANCELLED"),
            RunnerResult::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// A worklist abstract interpreter over one flow graph.
///
/// `V` is notified of every instruction execution, see [`Visitor`].
pub struct Interpreter<D: Domain, V = ()> {
    runner: Runner<D>,
    visitor: V,
    forcibly_merged: bool,
    cancel_requested: bool,
}

impl<D: Domain> Interpreter<D, ()> {
    pub fn new(graph: RC<FlowGraph<D>>, domain: D) -> Interpreter<D, ()> {
        Interpreter::with_visitor(graph, domain, ())
    }
}

impl<D: Domain, V: Visitor<D>> Interpreter<D, V> {
    pub fn with_visitor(graph: RC<FlowGraph<D>>, domain: D, visitor: V) -> Interpreter<D, V> {
        Interpreter {
            runner: Runner::new(graph, domain),
            visitor,
            forcibly_merged: false,
            cancel_requested: false,
        }
    }

    pub fn with_config(mut self, config: Config) -> Interpreter<D, V> {
        self.runner.config = config;
        self
    }

    /// Replace the sink receiving fault reports. The default sink logs them.
    pub fn with_sink<S: DiagnosticSink + 'static>(mut self, sink: S) -> Interpreter<D, V> {
        self.runner.set_sink(Box::new(sink));
        self
    }

    /// Poll `cancellation` once per processed state. A cancelled token makes
    /// the run return `Err(Error::Cancelled)`.
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Interpreter<D, V> {
        self.runner.cancellation = cancellation;
        self
    }

    pub fn interpret(
        &mut self,
        starting_state: InstructionState<D::State>,
    ) -> Result<RunnerResult, Error> {
        self.interpret_all(vec![starting_state])
    }

    /// Run the fixed-point loop from every state in `starting_states`.
    ///
    /// Returns an error if a starting state waits at an instruction outside
    /// the flow graph, or if the run was cancelled through the
    /// [`Cancellation`] token. Every other outcome is a [`RunnerResult`].
    pub fn interpret_all(
        &mut self,
        starting_states: Vec<InstructionState<D::State>>,
    ) -> Result<RunnerResult, Error> {
        let len = self.runner.graph.len();
        if let Some(starting_state) = starting_states.iter().find(|state| state.index() >= len) {
            return Err(Error::InstructionNotFound(starting_state.index()));
        }

        self.runner.reset();
        self.forcibly_merged = false;
        if std::mem::take(&mut self.cancel_requested) {
            self.runner.cancel();
        }

        let mut queue = StateQueue::new(self.runner.config.force_merge_threshold);
        for starting_state in starting_states {
            queue.offer(starting_state);
        }

        let result = self.run(&mut queue);
        self.forcibly_merged = queue.was_forcibly_merged();
        let result = result?;

        debug!(
            "{} interpreting {}: {}",
            result,
            self.runner.graph.anchor(),
            self.runner.stats
        );
        Ok(result)
    }

    fn run(&mut self, queue: &mut StateQueue<D::State>) -> Result<RunnerResult, Error> {
        let graph = self.runner.graph.clone();
        let complexity_limit = self.runner.config.complexity_limit;

        while !queue.is_empty() {
            let batch = match queue.next_instruction_states(graph.join_instructions()) {
                Ok(batch) => batch,
                Err(error) => return self.abort(None, error),
            };
            let batch_len = batch.len();
            self.runner.stats.record_batch(batch_len);
            if batch_len > complexity_limit {
                warn!(
                    "{} states waiting at one instruction of {}, giving up",
                    batch_len,
                    graph.anchor()
                );
                return Ok(RunnerResult::TooComplex);
            }

            for (position, mut instruction_state) in batch.into_iter().enumerate() {
                self.runner.stats.states_processed += 1;
                if self.runner.stats.states_processed > self.runner.config.state_limit {
                    warn!(
                        "more than {} states processed for {}, giving up",
                        self.runner.config.state_limit,
                        graph.anchor()
                    );
                    return Ok(RunnerResult::TooComplex);
                }
                self.runner.cancellation.check()?;

                let index = instruction_state.index();
                let instruction = graph.instruction(index)?;

                if !instruction.is_linear() {
                    let merge_limit = self.runner.config.back_branch_merge_limit();
                    let processed = &mut self.runner.caches.processed[index];
                    if contains_state(processed, instruction_state.state()) {
                        self.runner.stats.subsumed += 1;
                        continue;
                    }
                    if processed.len() > merge_limit {
                        let merged = merge_back_branches(processed, instruction_state.state_mut())
                            .map_err(|error| instruction_fault(index, instruction_state.state(), error));
                        match merged {
                            Ok(true) => self.runner.stats.back_branch_merges += 1,
                            Ok(false) => {}
                            Err(error) => return self.abort(Some(index), error),
                        }
                        if contains_state(processed, instruction_state.state()) {
                            self.runner.stats.subsumed += 1;
                            continue;
                        }
                    }
                    if processed.len() > complexity_limit {
                        warn!(
                            "more than {} states remembered at {} of {}, giving up",
                            complexity_limit,
                            index,
                            graph.anchor()
                        );
                        return Ok(RunnerResult::TooComplex);
                    }
                    if graph.loop_number(index) != 0 {
                        processed.push(instruction_state.state().clone());
                    }
                }

                let successors = match self
                    .visitor
                    .accept_instruction(&mut self.runner, instruction_state)
                {
                    Ok(successors) => successors,
                    Err(error) => return self.abort(Some(index), error),
                };

                let successors: Vec<InstructionState<D::State>> = successors
                    .into_iter()
                    .filter(|successor| successor.index() < graph.len())
                    .collect();
                let targets: Vec<usize> = successors.iter().map(|successor| successor.index()).collect();
                let in_flight = batch_len - position - 1;

                for mut successor in successors {
                    let target = successor.index();

                    let loop_number = graph.loop_number(index);
                    if loop_number != 0
                        && graph.loop_number(target) != loop_number
                        && step_out_of_loop(
                            &graph,
                            &mut self.runner.caches,
                            loop_number,
                            in_flight,
                            &targets,
                            queue,
                        )
                    {
                        self.runner.stats.loop_exits += 1;
                    }

                    if target < index && instruction.widens_back_edge() {
                        if let Err(error) = successor.state_mut().widen() {
                            let error = instruction_fault(index, successor.state(), error);
                            return self.abort(Some(index), error);
                        }
                        self.runner.stats.widenings += 1;
                    }

                    if !self.offer_to_join(&graph, &successor)? {
                        self.runner.stats.subsumed += 1;
                        continue;
                    }

                    queue.offer(successor);
                }
            }

            if self.runner.cancelled {
                return Ok(RunnerResult::Cancelled);
            }
        }

        Ok(RunnerResult::Ok)
    }

    /// Returns `false` if `successor` waits at a join instruction which
    /// already saw a state covering it.
    fn offer_to_join(
        &mut self,
        graph: &FlowGraph<D>,
        successor: &InstructionState<D::State>,
    ) -> Result<bool, Error> {
        let target = successor.index();
        if graph.instruction(target)?.is_linear() {
            return Ok(true);
        }

        let caches = &mut self.runner.caches;
        if contains_state(&caches.processed[target], successor.state())
            || contains_state(&caches.incoming[target], successor.state())
        {
            return Ok(false);
        }
        if graph.loop_number(target) != 0 {
            caches.incoming[target].push(successor.state().clone());
        }
        Ok(true)
    }

    /// Report `error` and end the run with [`RunnerResult::Aborted`].
    /// [`Error::Cancelled`] is passed through unreported.
    fn abort(&self, index: Option<usize>, error: Error) -> Result<RunnerResult, Error> {
        let (index, state, message) = match error {
            Error::Cancelled => return Err(Error::Cancelled),
            Error::InstructionFault {
                index,
                state,
                source,
            } => (Some(index), Some(state), describe(&source)),
            error => (index, None, describe(&error)),
        };
        self.runner
            .report_fault(FaultKind::Execution, index, state, message);
        Ok(RunnerResult::Aborted)
    }

    /// Cancel the next run. It stops once its first batch is done, and
    /// returns [`RunnerResult::Cancelled`]. Later runs are not affected.
    pub fn cancel(&mut self) {
        self.cancel_requested = true;
    }

    pub fn instruction(&self, index: usize) -> Result<&Instruction<D>, Error> {
        self.runner.instruction(index)
    }

    pub fn graph(&self) -> &FlowGraph<D> {
        self.runner.graph()
    }

    /// Starting states of nested scopes, recorded during the last run.
    pub fn closures(&self) -> &BTreeMap<Anchor, Vec<D::State>> {
        self.runner.closures()
    }

    pub fn complexity_limit(&self) -> usize {
        self.runner.config.complexity_limit
    }

    /// Returns `true` if the last run forcibly merged states, and lost
    /// precision doing so.
    pub fn was_forcibly_merged(&self) -> bool {
        self.forcibly_merged
    }

    pub fn stats(&self) -> &RunStats {
        &self.runner.stats
    }

    pub fn visitor(&self) -> &V {
        &self.visitor
    }

    pub fn visitor_mut(&mut self) -> &mut V {
        &mut self.visitor
    }

    pub fn into_visitor(self) -> V {
        self.visitor
    }
}

/// Returns `true` if some state in `states` covers `state`.
fn contains_state<S: MemoryState>(states: &[S], state: &S) -> bool {
    states
        .iter()
        .any(|cached| cached == state || cached.is_super_state_of(state))
}

/// Fold every remembered state sharing `state`'s mergeability key into
/// `state`, then widen it. `state` is widened even if no remembered state
/// was compatible. Returns `false` in that case.
fn merge_back_branches<S: MemoryState>(processed: &[S], state: &mut S) -> Result<bool, Error> {
    let key = state.mergeability_key();
    let mut merged = false;
    for cached in processed
        .iter()
        .filter(|cached| cached.mergeability_key() == key)
    {
        state.merge(cached)?;
        merged = true;
    }
    state.widen()?;
    Ok(merged)
}

/// Purge the caches of loop `loop_number`, unless a state still belongs to
/// it. Returns `true` if the caches were purged.
///
/// `in_flight` counts the states of the current batch not yet processed.
/// They all wait at the instruction execution is stepping out from.
fn step_out_of_loop<D: Domain>(
    graph: &FlowGraph<D>,
    caches: &mut StateCaches<D::State>,
    loop_number: usize,
    in_flight: usize,
    successors: &[usize],
    queue: &StateQueue<D::State>,
) -> bool {
    if in_flight > 0
        || successors
            .iter()
            .any(|successor| graph.loop_number(*successor) == loop_number)
        || !queue.process_all(|index, _| graph.loop_number(index) != loop_number)
    {
        return false;
    }

    let mut purged = 0;
    for instruction in graph.instructions() {
        let index = instruction.index();
        if graph.loop_number(index) == loop_number && !instruction.is_linear() {
            caches.clear(index);
            purged += 1;
        }
    }
    trace!(
        "stepped out of loop {}, purged {} join instructions",
        loop_number,
        purged
    );
    true
}
