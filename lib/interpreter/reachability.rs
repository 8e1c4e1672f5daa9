use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::bitset::BitSet;
use crate::domain::Domain;
use crate::flow::{Anchor, FlowGraph, Instruction, InstructionState};
use crate::interpreter::{
    Cancellation, Config, DiagnosticSink, Interpreter, RunStats, Runner, RunnerResult, Visitor,
};
use crate::{Error, RC};

/// A visitor recording every instruction executed without error, before
/// handing it to `V`.
pub struct Reached<V> {
    inner: V,
    reached: BitSet,
}

impl<V> Reached<V> {
    fn new(inner: V) -> Reached<V> {
        Reached {
            inner,
            reached: BitSet::new(0),
        }
    }

    pub fn reached(&self) -> &BitSet {
        &self.reached
    }

    pub fn inner(&self) -> &V {
        &self.inner
    }
}

impl<D: Domain, V: Visitor<D>> Visitor<D> for Reached<V> {
    fn accept_instruction(
        &mut self,
        runner: &mut Runner<D>,
        instruction_state: InstructionState<D::State>,
    ) -> Result<Vec<InstructionState<D::State>>, Error> {
        let index = instruction_state.index();
        let successors = self.inner.accept_instruction(runner, instruction_state)?;
        self.reached.insert(index);
        Ok(successors)
    }
}

/// An [`Interpreter`] which also tracks the instructions it reached.
///
/// Instructions before the first starting state count as reached, so code
/// preceding the entry point of the analysis is never reported.
pub struct ReachabilityInterpreter<D: Domain, V = ()> {
    interpreter: Interpreter<D, Reached<V>>,
}

impl<D: Domain> ReachabilityInterpreter<D, ()> {
    pub fn new(graph: RC<FlowGraph<D>>, domain: D) -> ReachabilityInterpreter<D, ()> {
        ReachabilityInterpreter::with_visitor(graph, domain, ())
    }
}

impl<D: Domain, V: Visitor<D>> ReachabilityInterpreter<D, V> {
    pub fn with_visitor(
        graph: RC<FlowGraph<D>>,
        domain: D,
        visitor: V,
    ) -> ReachabilityInterpreter<D, V> {
        ReachabilityInterpreter {
            interpreter: Interpreter::with_visitor(graph, domain, Reached::new(visitor)),
        }
    }

    pub fn with_config(self, config: Config) -> ReachabilityInterpreter<D, V> {
        ReachabilityInterpreter {
            interpreter: self.interpreter.with_config(config),
        }
    }

    pub fn with_sink<S: DiagnosticSink + 'static>(self, sink: S) -> ReachabilityInterpreter<D, V> {
        ReachabilityInterpreter {
            interpreter: self.interpreter.with_sink(sink),
        }
    }

    pub fn with_cancellation(self, cancellation: Cancellation) -> ReachabilityInterpreter<D, V> {
        ReachabilityInterpreter {
            interpreter: self.interpreter.with_cancellation(cancellation),
        }
    }

    pub fn interpret(
        &mut self,
        starting_state: InstructionState<D::State>,
    ) -> Result<RunnerResult, Error> {
        self.interpret_all(vec![starting_state])
    }

    pub fn interpret_all(
        &mut self,
        starting_states: Vec<InstructionState<D::State>>,
    ) -> Result<RunnerResult, Error> {
        let len = self.interpreter.graph().len();
        let start = starting_states
            .iter()
            .map(|state| state.index())
            .min()
            .unwrap_or(0);

        let mut reached = BitSet::new(len);
        reached.insert_range(0..start.min(len));
        self.interpreter.visitor_mut().reached = reached;

        self.interpreter.interpret_all(starting_states)
    }

    /// Anchors of the instructions the last run never reached. Only
    /// meaningful after a run ended with [`RunnerResult::Ok`].
    pub fn unreachable(&self) -> BTreeSet<Anchor> {
        self.interpreter
            .graph()
            .compute_unreachable(self.interpreter.visitor().reached())
    }

    pub fn reached(&self) -> &BitSet {
        self.interpreter.visitor().reached()
    }

    pub fn cancel(&mut self) {
        self.interpreter.cancel();
    }

    pub fn instruction(&self, index: usize) -> Result<&Instruction<D>, Error> {
        self.interpreter.instruction(index)
    }

    pub fn closures(&self) -> &BTreeMap<Anchor, Vec<D::State>> {
        self.interpreter.closures()
    }

    pub fn complexity_limit(&self) -> usize {
        self.interpreter.complexity_limit()
    }

    pub fn was_forcibly_merged(&self) -> bool {
        self.interpreter.was_forcibly_merged()
    }

    pub fn stats(&self) -> &RunStats {
        self.interpreter.stats()
    }

    pub fn visitor(&self) -> &V {
        self.interpreter.visitor().inner()
    }

    pub fn into_visitor(self) -> V {
        self.interpreter.into_visitor().inner
    }
}
