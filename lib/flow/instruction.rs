use std::fmt;

use crate::domain::{Branch, Domain};
use crate::flow::Anchor;
use crate::Error;

/// The kinds of instructions a flow graph is made of.
///
/// What an effect or a condition means is up to the [`Domain`]. The kind
/// only decides where execution may continue.
pub enum InstructionKind<D: Domain> {
    /// Apply an effect, then continue with the next instruction.
    Effect(D::Effect),
    /// Continue at `target`. A goto with `widen == false` does not widen
    /// states flowing back along it.
    Goto { target: usize, widen: bool },
    /// Continue at `target` when `condition` holds, otherwise fall through.
    ConditionalGoto {
        target: usize,
        condition: D::Condition,
    },
    /// Transfer control to some of `targets`, as chosen by the domain. A
    /// transfer choosing no target ends the path.
    Transfer { targets: Vec<usize> },
    /// End of a scope. When `flush` is given it is applied to the state, and
    /// the next instruction becomes a join instruction.
    Finish { flush: Option<D::Effect> },
    /// Capture the starting state of the nested scope `anchor`.
    Closure { anchor: Anchor },
}

impl<D: Domain> fmt::Debug for InstructionKind<D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InstructionKind::Effect(effect) => f.debug_tuple("Effect").field(effect).finish(),
            InstructionKind::Goto { target, widen } => f
                .debug_struct("Goto")
                .field("target", target)
                .field("widen", widen)
                .finish(),
            InstructionKind::ConditionalGoto { target, condition } => f
                .debug_struct("ConditionalGoto")
                .field("target", target)
                .field("condition", condition)
                .finish(),
            InstructionKind::Transfer { targets } => f
                .debug_struct("Transfer")
                .field("targets", targets)
                .finish(),
            InstructionKind::Finish { flush } => {
                f.debug_struct("Finish").field("flush", flush).finish()
            }
            InstructionKind::Closure { anchor } => {
                f.debug_struct("Closure").field("anchor", anchor).finish()
            }
        }
    }
}

impl<D: Domain> fmt::Display for InstructionKind<D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InstructionKind::Effect(effect) => write!(f, "{}", effect),
            InstructionKind::Goto {
                target,
                widen: true,
            } => write!(f, "goto {}", target),
            InstructionKind::Goto {
                target,
                widen: false,
            } => write!(f, "goto {} (no widen)", target),
            InstructionKind::ConditionalGoto { target, condition } => {
                write!(f, "if {} goto {}", condition, target)
            }
            InstructionKind::Transfer { targets } => {
                write!(f, "transfer [")?;
                for (i, target) in targets.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", target)?;
                }
                write!(f, "]")
            }
            InstructionKind::Finish { flush: None } => write!(f, "finish"),
            InstructionKind::Finish { flush: Some(flush) } => write!(f, "finish, flush {}", flush),
            InstructionKind::Closure { anchor } => write!(f, "closure {}", anchor),
        }
    }
}

/// A node of a [`FlowGraph`](crate::flow::FlowGraph).
pub struct Instruction<D: Domain> {
    index: usize,
    kind: InstructionKind<D>,
    anchor: Option<Anchor>,
}

impl<D: Domain> Instruction<D> {
    pub fn new(index: usize, kind: InstructionKind<D>) -> Instruction<D> {
        Instruction {
            index,
            kind,
            anchor: None,
        }
    }

    pub fn effect(index: usize, effect: D::Effect) -> Instruction<D> {
        Instruction::new(index, InstructionKind::Effect(effect))
    }

    pub fn goto(index: usize, target: usize) -> Instruction<D> {
        Instruction::new(
            index,
            InstructionKind::Goto {
                target,
                widen: true,
            },
        )
    }

    pub fn conditional_goto(index: usize, target: usize, condition: D::Condition) -> Instruction<D> {
        Instruction::new(index, InstructionKind::ConditionalGoto { target, condition })
    }

    pub fn transfer(index: usize, targets: Vec<usize>) -> Instruction<D> {
        Instruction::new(index, InstructionKind::Transfer { targets })
    }

    /// Attach the source element this instruction was created for.
    pub fn with_anchor(mut self, anchor: Anchor) -> Instruction<D> {
        self.anchor = Some(anchor);
        self
    }

    /// The index of this instruction in its flow graph.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> &InstructionKind<D> {
        &self.kind
    }

    /// The source element this instruction was created for, if any.
    pub fn anchor(&self) -> Option<&Anchor> {
        self.anchor.as_ref()
    }

    /// Linear instructions always continue with the next instruction, so
    /// states never need to be reconciled at them.
    pub fn is_linear(&self) -> bool {
        match self.kind {
            InstructionKind::Effect(_)
            | InstructionKind::Finish { .. }
            | InstructionKind::Closure { .. } => true,
            InstructionKind::Goto { .. }
            | InstructionKind::ConditionalGoto { .. }
            | InstructionKind::Transfer { .. } => false,
        }
    }

    pub fn is_transfer(&self) -> bool {
        matches!(self.kind, InstructionKind::Transfer { .. })
    }

    /// Returns `false` for a goto which must not widen states flowing back
    /// along it.
    pub fn widens_back_edge(&self) -> bool {
        !matches!(self.kind, InstructionKind::Goto { widen: false, .. })
    }

    /// Every index execution may continue at after this instruction. The
    /// index one past the last instruction denotes the exit of the unit.
    pub fn possible_targets(&self) -> Vec<usize> {
        let next = self.index + 1;
        match self.kind {
            InstructionKind::Effect(_)
            | InstructionKind::Finish { .. }
            | InstructionKind::Closure { .. } => vec![next],
            InstructionKind::Goto { target, .. } => vec![target],
            InstructionKind::ConditionalGoto { target, .. } => {
                if target == next {
                    vec![target]
                } else {
                    vec![target, next]
                }
            }
            InstructionKind::Transfer { ref targets } => targets.clone(),
        }
    }

    /// Execute this instruction against `state`.
    ///
    /// `state` is left as the state flowing to the first successor. On error,
    /// `state` holds whatever the domain left in it.
    pub fn execute(&self, domain: &D, state: &mut D::State) -> Result<Flow<D::State>, Error> {
        let next = self.index + 1;
        Ok(match self.kind {
            InstructionKind::Effect(ref effect) => {
                domain.apply(effect, state)?;
                Flow::Jump(next)
            }
            InstructionKind::Goto { target, .. } => Flow::Jump(target),
            InstructionKind::ConditionalGoto {
                target,
                ref condition,
            } => match domain.branch(condition, state)? {
                Branch::Taken => Flow::Jump(target),
                Branch::NotTaken => Flow::Jump(next),
                Branch::Both(fallthrough_state) => Flow::Fork {
                    taken: target,
                    fallthrough: next,
                    fallthrough_state,
                },
            },
            InstructionKind::Transfer { ref targets } => {
                let targets = domain.transfer(targets, state)?;
                if targets.is_empty() {
                    Flow::Halt
                } else {
                    Flow::Spread(targets)
                }
            }
            InstructionKind::Finish { ref flush } => {
                if let Some(flush) = flush {
                    domain.apply(flush, state)?;
                }
                Flow::Jump(next)
            }
            InstructionKind::Closure { .. } => Flow::Jump(next),
        })
    }
}

impl<D: Domain> fmt::Debug for Instruction<D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Instruction")
            .field("index", &self.index)
            .field("kind", &self.kind)
            .field("anchor", &self.anchor)
            .finish()
    }
}

impl<D: Domain> fmt::Display for Instruction<D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.index, self.kind)
    }
}

/// Where execution continues after an instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Flow<S> {
    /// The path ends here.
    Halt,
    /// Continue at one instruction.
    Jump(usize),
    /// Continue at `taken` with the executed state, and at `fallthrough`
    /// with `fallthrough_state`.
    Fork {
        taken: usize,
        fallthrough: usize,
        fallthrough_state: S,
    },
    /// Continue at every target with a copy of the executed state.
    Spread(Vec<usize>),
}

impl<S: Clone> Flow<S> {
    /// Pair every continuation with the state flowing to it.
    pub fn into_successors(self, state: S) -> Vec<InstructionState<S>> {
        match self {
            Flow::Halt => Vec::new(),
            Flow::Jump(target) => vec![InstructionState::new(target, state)],
            Flow::Fork {
                taken,
                fallthrough,
                fallthrough_state,
            } => vec![
                InstructionState::new(taken, state),
                InstructionState::new(fallthrough, fallthrough_state),
            ],
            Flow::Spread(targets) => {
                let (last, rest) = match targets.split_last() {
                    Some(split) => split,
                    None => return Vec::new(),
                };
                let mut successors: Vec<InstructionState<S>> = rest
                    .iter()
                    .map(|target| InstructionState::new(*target, state.clone()))
                    .collect();
                successors.push(InstructionState::new(*last, state));
                successors
            }
        }
    }
}

/// A memory state waiting to be executed at an instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstructionState<S> {
    index: usize,
    state: S,
}

impl<S> InstructionState<S> {
    pub fn new(index: usize, state: S) -> InstructionState<S> {
        InstructionState { index, state }
    }

    /// The index of the instruction this state is waiting at.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    pub fn into_state(self) -> S {
        self.state
    }

    pub fn into_parts(self) -> (usize, S) {
        (self.index, self.state)
    }
}
