use proptest::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;

use crate::interpreter::{
    Cancellation, Config, DiagnosticSink, FaultKind, FaultReport, Interpreter,
    ReachabilityInterpreter, Runner, RunnerResult, Visitor,
};
use crate::{Anchor, Error, FlowGraph, Instruction, InstructionKind, InstructionState, RC};


use self::interval::{Condition, Effect, Interval, IntervalDomain, IntervalState, TRANSFER_SENTINEL};

fn init_logging() {
    let _ = simplelog::TestLogger::init(simplelog::LevelFilter::Trace, simplelog::Config::default());
}

/// Keeps every fault report it receives.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    reports: Rc<RefCell<Vec<FaultReport>>>,
}

impl RecordingSink {
    pub fn reports(&self) -> Vec<FaultReport> {
        self.reports.borrow().clone()
    }
}

impl DiagnosticSink for RecordingSink {
    fn report(&self, report: &FaultReport) {
        self.reports.borrow_mut().push(report.clone());
    }
}

/// Counts executions per instruction.
#[derive(Default)]
struct Counter {
    executions: Vec<usize>,
}

impl Visitor<IntervalDomain> for Counter {
    fn accept_instruction(
        &mut self,
        runner: &mut Runner<IntervalDomain>,
        instruction_state: InstructionState<IntervalState>,
    ) -> Result<Vec<InstructionState<IntervalState>>, Error> {
        let index = instruction_state.index();
        if self.executions.len() <= index {
            self.executions.resize(index + 1, 0);
        }
        self.executions[index] += 1;
        runner.execute(instruction_state)
    }
}

impl Counter {
    fn total(&self) -> usize {
        self.executions.iter().sum()
    }
}

fn graph(instructions: Vec<Instruction<IntervalDomain>>) -> RC<FlowGraph<IntervalDomain>> {
    RC::new(FlowGraph::new(Anchor::new(0, "fn test() {}"), instructions).unwrap())
}

fn finish(index: usize) -> Instruction<IntervalDomain> {
    Instruction::new(index, InstructionKind::Finish { flush: None })
}

fn start(index: usize) -> InstructionState<IntervalState> {
    InstructionState::new(index, IntervalState::new())
}

fn linear() -> RC<FlowGraph<IntervalDomain>> {
    graph(vec![
        Instruction::effect(0, Effect::assign("x", 0)),
        Instruction::effect(1, Effect::add("x", 1)),
        Instruction::effect(2, Effect::assign("y", 5)),
        Instruction::effect(3, Effect::add("y", 2)),
        finish(4),
    ])
}

/**
 * 0: x = 0
 * 1: if x < bound goto 3
 * 2: goto 5
 * 3: x += 1
 * 4: goto 1
 * 5: finish
 */
fn counting_loop(bound: i64, widen: bool) -> RC<FlowGraph<IntervalDomain>> {
    graph(vec![
        Instruction::effect(0, Effect::assign("x", 0)),
        Instruction::conditional_goto(1, 3, Condition::less_than("x", bound)),
        Instruction::goto(2, 5),
        Instruction::effect(3, Effect::add("x", 1)),
        Instruction::new(4, InstructionKind::Goto { target: 1, widen }),
        finish(5),
    ])
}

/// One counting loop per bound, each nested in the previous one.
fn nested_loops(bounds: &[i64]) -> RC<FlowGraph<IntervalDomain>> {
    fn emit(bounds: &[i64], depth: usize, instructions: &mut Vec<Instruction<IntervalDomain>>) {
        let (bound, inner) = match bounds.split_first() {
            Some(split) => split,
            None => return,
        };
        let name = format!("v{}", depth);
        let head = instructions.len() + 1;
        let exit = head + 2 + inner.len() * 5 + 2;

        instructions.push(Instruction::effect(head - 1, Effect::assign(&name, 0)));
        instructions.push(Instruction::conditional_goto(
            head,
            head + 2,
            Condition::less_than(&name, *bound),
        ));
        instructions.push(Instruction::goto(head + 1, exit));
        emit(inner, depth + 1, instructions);
        instructions.push(Instruction::effect(instructions.len(), Effect::add(&name, 1)));
        instructions.push(Instruction::goto(instructions.len(), head));
    }

    let mut instructions = Vec::new();
    emit(bounds, 0, &mut instructions);
    instructions.push(finish(instructions.len()));
    graph(instructions)
}

#[test]
fn linear_graph() {
    init_logging();
    let mut interpreter = Interpreter::with_visitor(linear(), IntervalDomain, Counter::default());

    assert_eq!(interpreter.interpret(start(0)).unwrap(), RunnerResult::Ok);
    assert_eq!(interpreter.visitor().total(), 5);
    assert_eq!(interpreter.visitor().executions, vec![1, 1, 1, 1, 1]);
    assert!(!interpreter.was_forcibly_merged());
    assert_eq!(interpreter.stats().states_processed, 5);
    assert_eq!(interpreter.complexity_limit(), 300);
}

#[test]
fn counting_loop_converges() {
    init_logging();
    let mut interpreter =
        Interpreter::with_visitor(counting_loop(10, true), IntervalDomain, Counter::default());

    assert_eq!(interpreter.interpret(start(0)).unwrap(), RunnerResult::Ok);
    assert_eq!(interpreter.visitor().executions, vec![1, 2, 1, 2, 2, 1]);
    assert_eq!(interpreter.stats().widenings, 2);
    assert_eq!(interpreter.stats().subsumed, 1);
}

#[test]
fn loops_without_widening_are_too_complex() {
    init_logging();
    let config = Config::default()
        .with_state_limit(1000)
        .with_complexity_limit(1_000_000);

    let mut widening = Interpreter::new(counting_loop(1_000_000, true), IntervalDomain)
        .with_config(config.clone());
    assert_eq!(widening.interpret(start(0)).unwrap(), RunnerResult::Ok);
    assert!(widening.stats().states_processed < 20);

    let mut growing =
        Interpreter::new(counting_loop(1_000_000, false), IntervalDomain).with_config(config);
    assert_eq!(growing.interpret(start(0)).unwrap(), RunnerResult::TooComplex);
}

#[test]
fn back_branch_merge_bounds_unwidened_loops() {
    // Past 300 / 6 remembered states the loop head folds its history.
    let mut interpreter = Interpreter::new(counting_loop(1_000_000, false), IntervalDomain);

    assert_eq!(interpreter.interpret(start(0)).unwrap(), RunnerResult::Ok);
    assert!(interpreter.stats().back_branch_merges > 0);
}

#[test]
fn large_batches_are_forcibly_merged() {
    init_logging();
    let graph = graph(vec![
        Instruction::conditional_goto(0, 2, Condition::less_than("x", 0)),
        Instruction::effect(1, Effect::add("x", 1)),
        finish(2),
    ]);
    let starting_states = (0..150)
        .map(|x| {
            InstructionState::new(
                0,
                IntervalState::new().with_variable("x", Interval::constant(x * 10)),
            )
        })
        .collect();
    let mut interpreter = Interpreter::with_visitor(graph, IntervalDomain, Counter::default());

    assert_eq!(interpreter.interpret_all(starting_states).unwrap(), RunnerResult::Ok);
    assert!(interpreter.visitor().executions[0] < 150);
    assert!(interpreter.was_forcibly_merged());
}

#[test]
fn batch_above_complexity_limit() {
    let starting_states = (0..5)
        .map(|x| {
            InstructionState::new(
                0,
                IntervalState::new().with_variable("x", Interval::constant(x)),
            )
        })
        .collect();
    let mut interpreter =
        Interpreter::new(linear(), IntervalDomain).with_config(Config::default().with_complexity_limit(2));

    assert_eq!(
        interpreter.interpret_all(starting_states).unwrap(),
        RunnerResult::TooComplex
    );
}

struct CancelAfterFirst {
    executed: usize,
}

impl Visitor<IntervalDomain> for CancelAfterFirst {
    fn accept_instruction(
        &mut self,
        runner: &mut Runner<IntervalDomain>,
        instruction_state: InstructionState<IntervalState>,
    ) -> Result<Vec<InstructionState<IntervalState>>, Error> {
        self.executed += 1;
        runner.cancel();
        runner.execute(instruction_state)
    }
}

#[test]
fn visitor_cancels_run() {
    let mut interpreter =
        Interpreter::with_visitor(linear(), IntervalDomain, CancelAfterFirst { executed: 0 });

    assert_eq!(interpreter.interpret(start(0)).unwrap(), RunnerResult::Cancelled);
    assert_eq!(interpreter.visitor().executed, 1);

    // Every run starts uncancelled.
    assert_eq!(interpreter.interpret(start(3)).unwrap(), RunnerResult::Cancelled);
    assert_eq!(interpreter.into_visitor().executed, 2);
}

#[test]
fn cancel_stops_the_next_run_after_one_batch() {
    let mut interpreter = Interpreter::with_visitor(linear(), IntervalDomain, Counter::default());
    interpreter.cancel();

    assert_eq!(interpreter.interpret(start(0)).unwrap(), RunnerResult::Cancelled);
    assert_eq!(interpreter.visitor().total(), 1);

    assert_eq!(interpreter.interpret(start(0)).unwrap(), RunnerResult::Ok);
    assert_eq!(interpreter.stats().states_processed, 5);
}

#[test]
fn reachability_cancel_stops_the_next_run() {
    let mut interpreter = ReachabilityInterpreter::new(linear(), IntervalDomain);
    interpreter.cancel();

    assert_eq!(interpreter.interpret(start(0)).unwrap(), RunnerResult::Cancelled);
    assert_eq!(interpreter.stats().states_processed, 1);
}

#[test]
fn faults_abort_the_run() {
    init_logging();
    let sink = RecordingSink::default();
    let graph = graph(vec![
        Instruction::effect(0, Effect::assign("x", 4)),
        Instruction::effect(1, Effect::push(1)),
        Instruction::effect(2, Effect::fail("boom")),
        finish(3),
    ]);
    let mut interpreter = Interpreter::new(graph, IntervalDomain).with_sink(sink.clone());

    assert_eq!(interpreter.interpret(start(0)).unwrap(), RunnerResult::Aborted);

    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.kind, FaultKind::Execution);
    assert_eq!(report.index, Some(2));
    assert_eq!(report.anchor_text, "fn test() {}");
    assert!(report.flow_graph.contains("--> 2: fail boom"));
    assert!(report.state.as_ref().unwrap().contains("x: 4"));
    assert!(report.message.contains("boom"));
}

#[test]
fn faults_in_one_branch_abort_the_run() {
    let sink = RecordingSink::default();
    let graph = graph(vec![
        Instruction::conditional_goto(0, 2, Condition::less_than("x", 5)),
        Instruction::effect(1, Effect::fail("unbalanced")),
        Instruction::effect(2, Effect::add("x", 1)),
        finish(3),
    ]);
    let mut interpreter = Interpreter::new(graph, IntervalDomain).with_sink(sink.clone());

    assert_eq!(interpreter.interpret(start(0)).unwrap(), RunnerResult::Aborted);
    assert_eq!(sink.reports()[0].index, Some(1));
}

#[test]
fn external_cancellation_is_an_error() {
    let cancellation = Cancellation::new();
    let mut interpreter =
        Interpreter::new(linear(), IntervalDomain).with_cancellation(cancellation.clone());

    assert_eq!(interpreter.interpret(start(0)).unwrap(), RunnerResult::Ok);

    cancellation.cancel();
    assert!(matches!(interpreter.interpret(start(0)), Err(Error::Cancelled)));
}

struct CancelToken {
    cancellation: Cancellation,
}

impl Visitor<IntervalDomain> for CancelToken {
    fn accept_instruction(
        &mut self,
        runner: &mut Runner<IntervalDomain>,
        instruction_state: InstructionState<IntervalState>,
    ) -> Result<Vec<InstructionState<IntervalState>>, Error> {
        if instruction_state.index() == 2 {
            self.cancellation.cancel();
            return Err(Error::Cancelled);
        }
        runner.execute(instruction_state)
    }
}

#[test]
fn cancellation_is_never_reported_as_fault() {
    let sink = RecordingSink::default();
    let visitor = CancelToken {
        cancellation: Cancellation::new(),
    };
    let mut interpreter =
        Interpreter::with_visitor(linear(), IntervalDomain, visitor).with_sink(sink.clone());

    assert!(matches!(interpreter.interpret(start(0)), Err(Error::Cancelled)));
    assert!(sink.reports().is_empty());
}

#[test]
fn starting_state_outside_graph() {
    let mut interpreter = Interpreter::new(linear(), IntervalDomain);

    assert!(matches!(
        interpreter.interpret(start(99)),
        Err(Error::InstructionNotFound(99))
    ));
}

#[test]
fn closures_are_collected() {
    let lambda = Anchor::new(3, "|y| y + x");
    let graph = graph(vec![
        Instruction::effect(0, Effect::assign("x", 1)),
        Instruction::new(
            1,
            InstructionKind::Closure {
                anchor: lambda.clone(),
            },
        ),
        finish(2),
    ]);
    let mut interpreter = Interpreter::new(graph, IntervalDomain);

    assert_eq!(interpreter.interpret(start(0)).unwrap(), RunnerResult::Ok);

    let closures = interpreter.closures();
    assert_eq!(closures.len(), 1);
    assert_eq!(
        closures[&lambda][0].variable("x"),
        Some(&Interval::constant(1))
    );
    assert!(interpreter.instruction(1).unwrap().is_linear());
}

fn transfer_graph(pushed: &[i64]) -> RC<FlowGraph<IntervalDomain>> {
    let mut instructions: Vec<Instruction<IntervalDomain>> = pushed
        .iter()
        .enumerate()
        .map(|(index, value)| Instruction::effect(index, Effect::push(*value)))
        .collect();
    instructions.push(Instruction::transfer(pushed.len(), vec![]));
    graph(instructions)
}

fn stack_reports(pushed: &[i64], config: Config) -> Vec<FaultReport> {
    let sink = RecordingSink::default();
    let mut interpreter = Interpreter::new(transfer_graph(pushed), IntervalDomain)
        .with_config(config)
        .with_sink(sink.clone());

    assert_eq!(interpreter.interpret(start(0)).unwrap(), RunnerResult::Ok);
    sink.reports()
}

#[test]
fn stack_check_after_halting_transfer() {
    assert!(stack_reports(&[], Config::default()).is_empty());
    assert!(stack_reports(&[TRANSFER_SENTINEL], Config::default()).is_empty());

    let reports = stack_reports(&[7], Config::default());
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].kind, FaultKind::StackCorruption);
    assert_eq!(reports[0].index, Some(1));

    assert_eq!(stack_reports(&[7, TRANSFER_SENTINEL], Config::default()).len(), 1);
    assert!(stack_reports(&[7], Config::default().with_verify_transfer_stack(false)).is_empty());
}

#[test]
fn transfer_spreads_to_every_target() {
    let graph = graph(vec![
        Instruction::transfer(0, vec![1, 2]),
        Instruction::effect(1, Effect::assign("x", 1)),
        finish(2),
    ]);
    let mut interpreter = Interpreter::with_visitor(graph, IntervalDomain, Counter::default());

    assert_eq!(interpreter.interpret(start(0)).unwrap(), RunnerResult::Ok);
    // Both states reaching 2 are squashed, the unconstrained one covers x = 1.
    assert_eq!(interpreter.visitor().executions, vec![1, 1, 1]);
}

/// Records the processed states of the loop head whenever `observed`
/// executes.
struct CacheWatcher {
    observed: usize,
    head: usize,
    seen: Vec<usize>,
}

impl Visitor<IntervalDomain> for CacheWatcher {
    fn accept_instruction(
        &mut self,
        runner: &mut Runner<IntervalDomain>,
        instruction_state: InstructionState<IntervalState>,
    ) -> Result<Vec<InstructionState<IntervalState>>, Error> {
        if instruction_state.index() == self.observed {
            self.seen.push(runner.processed_states(self.head).len());
        }
        runner.execute(instruction_state)
    }
}

#[test]
fn caches_are_purged_after_leaving_a_loop() {
    init_logging();
    let watcher = CacheWatcher {
        observed: 2,
        head: 1,
        seen: Vec::new(),
    };
    let mut interpreter = Interpreter::with_visitor(counting_loop(3, false), IntervalDomain, watcher);

    assert_eq!(interpreter.interpret(start(0)).unwrap(), RunnerResult::Ok);
    assert_eq!(interpreter.stats().loop_exits, 1);
    assert_eq!(interpreter.visitor().seen, vec![0]);
}

#[test]
fn caches_survive_while_loop_is_still_running() {
    // The loop head forks into the body and the exit at once, so leaving
    // the loop must not purge what the body still needs.
    let watcher = CacheWatcher {
        observed: 5,
        head: 1,
        seen: Vec::new(),
    };
    let mut interpreter =
        Interpreter::with_visitor(counting_loop(10, true), IntervalDomain, watcher);

    assert_eq!(interpreter.interpret(start(0)).unwrap(), RunnerResult::Ok);
    assert_eq!(interpreter.stats().loop_exits, 0);
    assert_eq!(interpreter.visitor().seen, vec![2]);
}

#[test]
fn unreachable_code() {
    let dead = Anchor::new(2, "x = 1;");
    let graph = graph(vec![
        Instruction::effect(0, Effect::assign("x", 0)).with_anchor(Anchor::new(1, "x = 0;")),
        Instruction::goto(1, 3),
        Instruction::effect(2, Effect::assign("x", 1)).with_anchor(dead.clone()),
        finish(3),
    ]);
    let mut interpreter = ReachabilityInterpreter::new(graph, IntervalDomain);

    assert_eq!(interpreter.interpret(start(0)).unwrap(), RunnerResult::Ok);
    assert_eq!(interpreter.reached().iter().collect::<Vec<usize>>(), vec![0, 1, 3]);
    assert_eq!(interpreter.unreachable(), vec![dead].into_iter().collect());
}

#[test]
fn code_before_entry_point_counts_as_reached() {
    let graph = graph(vec![
        Instruction::effect(0, Effect::assign("x", 0)).with_anchor(Anchor::new(1, "x = 0;")),
        Instruction::effect(1, Effect::assign("x", 1)).with_anchor(Anchor::new(2, "x = 1;")),
        Instruction::effect(2, Effect::assign("x", 2)).with_anchor(Anchor::new(3, "x = 2;")),
        finish(3),
    ]);
    let mut interpreter = ReachabilityInterpreter::new(graph, IntervalDomain);

    assert_eq!(interpreter.interpret(start(2)).unwrap(), RunnerResult::Ok);
    assert_eq!(interpreter.reached().count(), 4);
    assert!(interpreter.unreachable().is_empty());
}

#[test]
fn failed_instructions_are_not_reached() {
    let graph = graph(vec![
        Instruction::effect(0, Effect::assign("x", 0)),
        Instruction::effect(1, Effect::fail("boom")),
        finish(2),
    ]);
    let mut interpreter =
        ReachabilityInterpreter::with_visitor(graph, IntervalDomain, Counter::default())
            .with_sink(RecordingSink::default());

    assert_eq!(interpreter.interpret(start(0)).unwrap(), RunnerResult::Aborted);
    assert!(interpreter.reached().contains(0));
    assert!(!interpreter.reached().contains(1));
    assert_eq!(interpreter.visitor().total(), 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn nested_loops_terminate(bounds in proptest::collection::vec(1i64..1000, 1..5)) {
        let graph = nested_loops(&bounds);
        let config = Config::default().with_state_limit(20_000);
        let mut interpreter = ReachabilityInterpreter::new(graph.clone(), IntervalDomain)
            .with_config(config);

        let result = interpreter.interpret(start(0)).unwrap();

        prop_assert!(result == RunnerResult::Ok || result == RunnerResult::TooComplex);
        prop_assert!(interpreter.stats().states_processed <= 20_001);
        if result.is_ok() {
            for index in interpreter.reached().iter() {
                prop_assert!(graph.instruction(index).is_ok());
            }
            prop_assert_eq!(interpreter.reached().count(), graph.len());
        }
    }
}

#[test]
fn popping_an_empty_stack_aborts() {
    let sink = RecordingSink::default();
    let graph = graph(vec![
        Instruction::effect(0, Effect::push(2)),
        Instruction::effect(1, Effect::Pop),
        Instruction::effect(2, Effect::Pop),
        finish(3),
    ]);
    let mut interpreter = Interpreter::new(graph, IntervalDomain).with_sink(sink.clone());

    assert_eq!(interpreter.interpret(start(0)).unwrap(), RunnerResult::Aborted);
    assert_eq!(sink.reports()[0].index, Some(2));
    assert!(sink.reports()[0].message.contains("empty stack"));
}

/**
 * 0: x = 0
 * 1: if x < 10 goto 3
 * 2: goto 6
 * 3: taint
 * 4: x += 1
 * 5: goto 1
 * 6: finish
 */
#[test]
fn failing_widen_aborts_the_run() {
    init_logging();
    let sink = RecordingSink::default();
    let graph = graph(vec![
        Instruction::effect(0, Effect::assign("x", 0)),
        Instruction::conditional_goto(1, 3, Condition::less_than("x", 10)),
        Instruction::goto(2, 6),
        Instruction::effect(3, Effect::Taint),
        Instruction::effect(4, Effect::add("x", 1)),
        Instruction::goto(5, 1),
        finish(6),
    ]);
    let mut interpreter = Interpreter::new(graph, IntervalDomain).with_sink(sink.clone());

    assert_eq!(interpreter.interpret(start(0)).unwrap(), RunnerResult::Aborted);
    assert_eq!(interpreter.stats().widenings, 0);

    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].kind, FaultKind::Execution);
    assert_eq!(reports[0].index, Some(5));
    assert!(reports[0].flow_graph.contains("--> 5: goto 1"));
    assert!(reports[0].state.as_ref().unwrap().contains("tainted"));
    assert!(reports[0].message.contains("cannot widen a tainted state"));
}
