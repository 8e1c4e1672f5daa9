//! The algebraic contract every memory state must satisfy.
//!
//! The interpreter never looks inside a memory state. It copies states with
//! `Clone`, compares them with `PartialEq` and `is_super_state_of`, and
//! reconciles them with `merge`, `widen` and `try_join_exactly`. Two states
//! whose `mergeability_key`s differ are never merged or joined.
//!
//! An error returned by `merge`, `widen` or `try_join_exactly` aborts the run
//! like a failing instruction does.

use std::fmt::{Debug, Display};
use std::hash::Hash;

use crate::Error;

/// The outcome of a successful exact join between `left` and `right`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Join<S> {
    /// `left` already represents both states.
    Left,
    /// `right` already represents both states.
    Right,
    /// A new state representing exactly both states.
    Merged(S),
}

/// An abstract memory state.
pub trait MemoryState: Clone + Debug + Display + PartialEq {
    /// Equivalence class of states which may be merged with one another.
    type Key: Clone + Debug + Eq + Hash;
    /// A value held on the operand stack.
    type Value: Clone + Debug;

    /// Absorb `other` into this state, losing precision if necessary.
    fn merge(&mut self, other: &Self) -> Result<(), Error>;

    /// Abstract this state so that repeated loop iterations converge.
    fn widen(&mut self) -> Result<(), Error>;

    /// Returns `true` if every concrete state represented by `other` is also
    /// represented by `self`.
    fn is_super_state_of(&self, other: &Self) -> bool;

    fn mergeability_key(&self) -> Self::Key;

    /// Attempt a lossless join of `self` and `other`.
    ///
    /// Returns `Ok(None)` when the two states cannot be joined without losing
    /// precision.
    fn try_join_exactly(&self, other: &Self) -> Result<Option<Join<Self>>, Error>;

    /// Called when `other`, equal to `self`, was offered to a queue which
    /// already holds `self`.
    fn after_merge(&mut self, _other: &Self) {}

    /// Create the starting state of a nested scope captured at this state.
    fn create_closure_state(&self) -> Self {
        self.clone()
    }

    fn push(&mut self, value: Self::Value);

    fn pop(&mut self) -> Option<Self::Value>;

    fn peek(&self) -> Option<&Self::Value>;

    fn is_empty_stack(&self) -> bool;
}
