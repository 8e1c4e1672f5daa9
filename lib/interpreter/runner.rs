use std::collections::BTreeMap;

use crate::domain::Domain;
use crate::flow::{Anchor, Flow, FlowGraph, Instruction, InstructionKind, InstructionState};
use crate::interpreter::cancellation::Cancellation;
use crate::interpreter::config::Config;
use crate::interpreter::diagnostics::{
    describe, instruction_fault, DiagnosticSink, FaultKind, FaultReport, LogSink,
};
use crate::interpreter::stats::RunStats;
use crate::state::MemoryState;
use crate::{Error, RC};

/// States remembered for every instruction of a flow graph, indexed by
/// instruction.
pub(super) struct StateCaches<S> {
    /// States already executed at a join instruction inside a loop.
    pub(super) processed: Vec<Vec<S>>,
    /// States queued towards a join instruction inside a loop.
    pub(super) incoming: Vec<Vec<S>>,
}

impl<S> StateCaches<S> {
    fn new(len: usize) -> StateCaches<S> {
        StateCaches {
            processed: (0..len).map(|_| Vec::new()).collect(),
            incoming: (0..len).map(|_| Vec::new()).collect(),
        }
    }

    pub(super) fn clear(&mut self, index: usize) {
        if let Some(processed) = self.processed.get_mut(index) {
            processed.clear();
        }
        if let Some(incoming) = self.incoming.get_mut(index) {
            incoming.clear();
        }
    }
}

/// The context of one interpretation run, as seen by a [`Visitor`].
pub struct Runner<D: Domain> {
    pub(super) graph: RC<FlowGraph<D>>,
    domain: D,
    pub(super) config: Config,
    sink: Box<dyn DiagnosticSink>,
    pub(super) cancellation: Cancellation,
    pub(super) cancelled: bool,
    closures: BTreeMap<Anchor, Vec<D::State>>,
    pub(super) caches: StateCaches<D::State>,
    pub(super) stats: RunStats,
}

impl<D: Domain> Runner<D> {
    pub(super) fn new(graph: RC<FlowGraph<D>>, domain: D) -> Runner<D> {
        let caches = StateCaches::new(graph.len());
        Runner {
            graph,
            domain,
            config: Config::default(),
            sink: Box::new(LogSink),
            cancellation: Cancellation::new(),
            cancelled: false,
            closures: BTreeMap::new(),
            caches,
            stats: RunStats::default(),
        }
    }

    pub(super) fn set_sink(&mut self, sink: Box<dyn DiagnosticSink>) {
        self.sink = sink;
    }

    /// Forget everything a previous run left behind.
    pub(super) fn reset(&mut self) {
        self.cancelled = false;
        self.closures.clear();
        self.caches = StateCaches::new(self.graph.len());
        self.stats = RunStats::default();
    }

    /// Execute the instruction `instruction_state` waits at, and return the
    /// states flowing to its successors.
    ///
    /// Domain errors are wrapped in [`Error::InstructionFault`], except for
    /// [`Error::Cancelled`] which is returned as is. When a control transfer
    /// ends the path, the operand stack is checked and a violation is handed
    /// to the diagnostic sink.
    pub fn execute(
        &mut self,
        instruction_state: InstructionState<D::State>,
    ) -> Result<Vec<InstructionState<D::State>>, Error> {
        let graph = self.graph.clone();
        let (index, mut state) = instruction_state.into_parts();
        let instruction = graph.instruction(index)?;

        if let InstructionKind::Closure { anchor } = instruction.kind() {
            self.create_closure_state(anchor.clone(), &state);
        }

        let flow = match instruction.execute(&self.domain, &mut state) {
            Ok(flow) => flow,
            Err(error) => return Err(instruction_fault(index, &state, error)),
        };

        if instruction.is_transfer() && self.config.verify_transfer_stack {
            let ends_path = match flow {
                Flow::Halt => true,
                Flow::Spread(ref targets) => targets.iter().all(|target| *target >= graph.len()),
                _ => false,
            };
            if ends_path {
                self.verify_stack(index, &state);
            }
        }

        Ok(flow.into_successors(state))
    }

    /// A path ended at a control transfer, either with no target or only at
    /// the exit of the unit. Whatever is left on the stack must be a single
    /// transfer sentinel.
    fn verify_stack(&self, index: usize, state: &D::State) {
        let mut remaining = state.clone();
        let clean = match remaining.pop() {
            None => true,
            Some(value) => self.domain.is_transfer_sentinel(&value) && remaining.is_empty_stack(),
        };
        if !clean {
            self.report_fault(
                FaultKind::StackCorruption,
                Some(index),
                Some(describe(state)),
                "stack not empty after the path ended at a control transfer".to_string(),
            );
        }
    }

    /// Stop the run once the current batch is done. The run then ends with
    /// [`RunnerResult::Cancelled`](crate::RunnerResult::Cancelled).
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn instruction(&self, index: usize) -> Result<&Instruction<D>, Error> {
        self.graph.instruction(index)
    }

    pub fn graph(&self) -> &FlowGraph<D> {
        &self.graph
    }

    pub fn domain(&self) -> &D {
        &self.domain
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Remember the starting state of the nested scope `anchor`.
    pub fn create_closure_state(&mut self, anchor: Anchor, state: &D::State) {
        self.closures
            .entry(anchor)
            .or_default()
            .push(state.create_closure_state());
    }

    pub fn closures(&self) -> &BTreeMap<Anchor, Vec<D::State>> {
        &self.closures
    }

    /// States already executed at `index`, for join instructions inside a
    /// loop.
    pub fn processed_states(&self, index: usize) -> &[D::State] {
        self.caches
            .processed
            .get(index)
            .map(|states| states.as_slice())
            .unwrap_or(&[])
    }

    /// States queued towards `index`, for join instructions inside a loop.
    pub fn incoming_states(&self, index: usize) -> &[D::State] {
        self.caches
            .incoming
            .get(index)
            .map(|states| states.as_slice())
            .unwrap_or(&[])
    }

    pub(super) fn report_fault(
        &self,
        kind: FaultKind,
        index: Option<usize>,
        state: Option<String>,
        message: String,
    ) {
        let flow_graph = match index {
            Some(index) => self.graph.dump_marked(index),
            None => describe(&*self.graph),
        };
        let report = FaultReport {
            kind,
            anchor_text: self.graph.anchor().text().to_string(),
            index,
            flow_graph,
            state,
            message,
        };
        self.sink.report(&report);
    }
}

/// Hooks into every instruction execution of an interpretation run.
pub trait Visitor<D: Domain> {
    /// Execute `instruction_state`, and return the states flowing to its
    /// successors. Implementations usually inspect the state, delegate to
    /// [`Runner::execute`], and may [`Runner::cancel`] the run once they
    /// found what they were looking for.
    fn accept_instruction(
        &mut self,
        runner: &mut Runner<D>,
        instruction_state: InstructionState<D::State>,
    ) -> Result<Vec<InstructionState<D::State>>, Error> {
        runner.execute(instruction_state)
    }
}

impl<D: Domain> Visitor<D> for () {}
