//! The deduplicating worklist of an interpretation run.

use log::{debug, trace};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

use crate::bitset::BitSet;
use crate::flow::InstructionState;
use crate::interpreter::diagnostics::instruction_fault;
use crate::state::{Join, MemoryState};
use crate::Error;

/// Pending `(instruction, state)` pairs, ordered by instruction index.
///
/// Offering a state equal to one already pending at the same instruction
/// only hands the new state to the pending one through
/// [`MemoryState::after_merge`]. All states pending at the lowest instruction
/// index are released together as one batch.
#[derive(Clone, Debug)]
pub struct StateQueue<S> {
    pending: BTreeMap<usize, Vec<S>>,
    len: usize,
    force_merge_threshold: usize,
    forcibly_merged: bool,
}

impl<S: MemoryState> StateQueue<S> {
    pub fn new(force_merge_threshold: usize) -> StateQueue<S> {
        StateQueue {
            pending: BTreeMap::new(),
            len: 0,
            force_merge_threshold,
            forcibly_merged: false,
        }
    }

    pub fn offer(&mut self, instruction_state: InstructionState<S>) {
        let (index, state) = instruction_state.into_parts();
        let states = self.pending.entry(index).or_default();
        match states.iter_mut().find(|pending| **pending == state) {
            Some(pending) => pending.after_merge(&state),
            None => {
                states.push(state);
                self.len += 1;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of pending states.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if `predicate` holds for every pending state.
    pub fn process_all<F>(&self, mut predicate: F) -> bool
    where
        F: FnMut(usize, &S) -> bool,
    {
        self.pending
            .iter()
            .all(|(index, states)| states.iter().all(|state| predicate(*index, state)))
    }

    /// Returns `true` if some batch was forcibly merged since this queue was
    /// created.
    pub fn was_forcibly_merged(&self) -> bool {
        self.forcibly_merged
    }

    /// Remove every state pending at the lowest instruction index.
    ///
    /// Batches larger than the force merge threshold are merged within their
    /// mergeability classes. At join instructions, states which can be joined
    /// exactly are squashed together. Returns an empty batch when the queue is
    /// empty.
    ///
    /// A failing merge or join is returned as [`Error::InstructionFault`] for
    /// the instruction of the batch.
    pub fn next_instruction_states(
        &mut self,
        join_instructions: &BitSet,
    ) -> Result<Vec<InstructionState<S>>, Error> {
        let (index, mut states) = match self.pending.pop_first() {
            Some(pending) => pending,
            None => return Ok(Vec::new()),
        };
        self.len -= states.len();

        if states.len() > self.force_merge_threshold {
            states = self.force_merge(index, states)?;
        }
        if states.len() > 1 && join_instructions.contains(index) {
            let before = states.len();
            squash(index, &mut states)?;
            trace!("squashed {} states at {} into {}", before, index, states.len());
        }

        Ok(states
            .into_iter()
            .map(|state| InstructionState::new(index, state))
            .collect())
    }

    fn force_merge(&mut self, index: usize, states: Vec<S>) -> Result<Vec<S>, Error> {
        self.forcibly_merged = true;
        let before = states.len();

        let mut groups: Vec<Vec<S>> = Vec::new();
        let mut group_of: FxHashMap<S::Key, usize> = FxHashMap::default();
        for state in states {
            let group = *group_of.entry(state.mergeability_key()).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[group].push(state);
        }

        let mut total = before;
        while total >= self.force_merge_threshold && groups.iter().any(|group| group.len() > 1) {
            total = 0;
            for group in &mut groups {
                *group = merge_pairwise(index, std::mem::take(group))?;
                total += group.len();
            }
        }

        debug!(
            "forcibly merged {} states at {} into {} ({} mergeability classes)",
            before,
            index,
            total,
            groups.len()
        );

        Ok(groups.into_iter().flatten().collect())
    }
}

/// Halve a group of states sharing one mergeability key.
fn merge_pairwise<S: MemoryState>(index: usize, group: Vec<S>) -> Result<Vec<S>, Error> {
    let mut merged = Vec::with_capacity(group.len().div_ceil(2));
    let mut states = group.into_iter();
    while let Some(mut left) = states.next() {
        if let Some(right) = states.next() {
            if let Err(error) = left.merge(&right) {
                return Err(instruction_fault(index, &left, error));
            }
        }
        merged.push(left);
    }
    Ok(merged)
}

/// Replace states which can be joined exactly by their join.
fn squash<S: MemoryState>(index: usize, states: &mut Vec<S>) -> Result<(), Error> {
    let mut slots: Vec<Option<S>> = states.drain(..).map(Some).collect();

    let mut i = 1;
    while i < slots.len() {
        for j in 0..i {
            let join = match (&slots[i], &slots[j]) {
                (None, _) => break,
                (Some(_), None) => continue,
                (Some(left), Some(right)) => {
                    if left.mergeability_key() != right.mergeability_key() {
                        continue;
                    }
                    left.try_join_exactly(right)
                        .map_err(|error| instruction_fault(index, left, error))?
                }
            };
            match join {
                Some(Join::Left) => slots[j] = None,
                Some(Join::Right) => {
                    slots[i] = None;
                    break;
                }
                Some(Join::Merged(joined)) => {
                    slots[i] = None;
                    slots[j] = None;
                    slots.push(Some(joined));
                    break;
                }
                None => {}
            }
        }
        i += 1;
    }

    states.extend(slots.into_iter().flatten());
    Ok(())
}
