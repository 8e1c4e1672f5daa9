//! Instruction semantics, supplied by the user of the interpreter.

use std::fmt::{Debug, Display};

use crate::state::MemoryState;
use crate::Error;

/// The result of evaluating a branch condition against a state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Branch<S> {
    /// The condition always holds, execution continues at the branch target.
    Taken,
    /// The condition never holds, execution falls through.
    NotTaken,
    /// Both outcomes are possible. The evaluated state continues at the
    /// branch target, and the returned state falls through.
    Both(S),
}

/// An abstract domain gives meaning to the effects and conditions held by
/// instructions.
///
/// The interpreter only decides where states flow. Everything a state learns
/// along the way is decided here.
pub trait Domain {
    type State: MemoryState;
    /// A linear operation on a state.
    type Effect: Clone + Debug + Display;
    /// A branch condition.
    type Condition: Clone + Debug + Display;

    /// Apply `effect` to `state`.
    fn apply(&self, effect: &Self::Effect, state: &mut Self::State) -> Result<(), Error>;

    /// Evaluate `condition` against `state`, refining it for the taken branch.
    fn branch(
        &self,
        condition: &Self::Condition,
        state: &mut Self::State,
    ) -> Result<Branch<Self::State>, Error>;

    /// Choose which of `targets` a control transfer continues at. Returning
    /// no targets ends this path.
    fn transfer(&self, targets: &[usize], _state: &mut Self::State) -> Result<Vec<usize>, Error> {
        Ok(targets.to_vec())
    }

    /// Returns `true` if `value` may legitimately remain on the stack after a
    /// control transfer ended a path.
    fn is_transfer_sentinel(&self, _value: &<Self::State as MemoryState>::Value) -> bool {
        false
    }
}
