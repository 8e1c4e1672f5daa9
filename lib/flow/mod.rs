//! Flow graphs: the instructions an interpretation run executes.
//!
//! A [`FlowGraph`] is built once per analyzed unit, and is never modified by
//! the interpreter. Several runs may share one graph through [`RC`](crate::RC).

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::bitset::BitSet;
use crate::domain::Domain;
use crate::graph::Graph;
use crate::Error;

mod instruction;

pub use self::instruction::{Flow, Instruction, InstructionKind, InstructionState};

/// An opaque reference to a source element, such as the analyzed unit, a
/// nested function, or the statement an instruction was created for.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Anchor {
    id: usize,
    text: String,
}

impl Anchor {
    pub fn new<S: Into<String>>(id: usize, text: S) -> Anchor {
        Anchor {
            id,
            text: text.into(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// The source text of the element.
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{} {}", self.id, self.text)
    }
}

/// An ordered sequence of instructions with loop membership.
pub struct FlowGraph<D: Domain> {
    anchor: Anchor,
    instructions: Vec<Instruction<D>>,
    loop_numbers: Vec<usize>,
    join_instructions: BitSet,
}

impl<D: Domain> FlowGraph<D> {
    /// Create a flow graph, computing loop numbers from the instructions'
    /// possible targets.
    pub fn new(anchor: Anchor, instructions: Vec<Instruction<D>>) -> Result<FlowGraph<D>, Error> {
        validate(&instructions)?;
        let loop_numbers = build_graph(&instructions)?.compute_loop_numbers();
        Ok(FlowGraph::build(anchor, instructions, loop_numbers))
    }

    /// Create a flow graph with loop numbers computed by the caller. A loop
    /// number of 0 means the instruction is not part of any loop.
    pub fn with_loop_numbers(
        anchor: Anchor,
        instructions: Vec<Instruction<D>>,
        loop_numbers: Vec<usize>,
    ) -> Result<FlowGraph<D>, Error> {
        validate(&instructions)?;
        if loop_numbers.len() != instructions.len() {
            return Err(Error::LoopNumberMismatch {
                expected: instructions.len(),
                found: loop_numbers.len(),
            });
        }
        Ok(FlowGraph::build(anchor, instructions, loop_numbers))
    }

    fn build(
        anchor: Anchor,
        instructions: Vec<Instruction<D>>,
        loop_numbers: Vec<usize>,
    ) -> FlowGraph<D> {
        let mut join_instructions = BitSet::new(instructions.len());
        for instruction in &instructions {
            if !instruction.is_linear() {
                for target in instruction.possible_targets() {
                    join_instructions.insert(target);
                }
            }
            // Good chances to squash something once a scope flushed its state.
            if let InstructionKind::Finish { flush: Some(_) } = instruction.kind() {
                join_instructions.insert(instruction.index() + 1);
            }
        }

        FlowGraph {
            anchor,
            instructions,
            loop_numbers,
            join_instructions,
        }
    }

    /// The analyzed unit.
    pub fn anchor(&self) -> &Anchor {
        &self.anchor
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instruction(&self, index: usize) -> Result<&Instruction<D>, Error> {
        self.instructions
            .get(index)
            .ok_or(Error::InstructionNotFound(index))
    }

    pub fn instructions(&self) -> &[Instruction<D>] {
        &self.instructions
    }

    /// The loop `index` belongs to, or 0 when it is not part of a loop.
    pub fn loop_number(&self, index: usize) -> usize {
        self.loop_numbers.get(index).copied().unwrap_or(0)
    }

    pub fn loop_numbers(&self) -> &[usize] {
        &self.loop_numbers
    }

    /// Instructions where the incoming states of one batch should be
    /// squashed: every target of a non-linear instruction, and every
    /// instruction following a flushing `Finish`.
    pub fn join_instructions(&self) -> &BitSet {
        &self.join_instructions
    }

    /// The anchors of every instruction not in `reached`, except anchors which
    /// also belong to a reached instruction.
    pub fn compute_unreachable(&self, reached: &BitSet) -> BTreeSet<Anchor> {
        let reached_anchors: FxHashSet<&Anchor> = self
            .instructions
            .iter()
            .filter(|instruction| reached.contains(instruction.index()))
            .filter_map(|instruction| instruction.anchor())
            .collect();

        self.instructions
            .iter()
            .filter(|instruction| !reached.contains(instruction.index()))
            .filter_map(|instruction| instruction.anchor())
            .filter(|anchor| !reached_anchors.contains(anchor))
            .cloned()
            .collect()
    }

    /// A textual listing of the flow graph, with the instruction at `marked`
    /// highlighted.
    pub fn dump_marked(&self, marked: usize) -> String {
        let mut dump = String::new();
        for instruction in &self.instructions {
            let marker = if instruction.index() == marked {
                "--> "
            } else {
                "    "
            };
            dump.push_str(marker);
            dump.push_str(&instruction.to_string());
            dump.push('\n');
        }
        dump
    }

    /// Returns a string in the graphviz format
    pub fn dot_graph(&self) -> Result<String, Error> {
        let graph = build_graph(&self.instructions)?;
        Ok(graph.dot_graph(|index| {
            self.instructions
                .get(index)
                .map(|instruction| instruction.to_string())
                .unwrap_or_default()
        }))
    }
}

impl<D: Domain> fmt::Debug for FlowGraph<D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FlowGraph")
            .field("anchor", &self.anchor)
            .field("instructions", &self.instructions)
            .field("loop_numbers", &self.loop_numbers)
            .finish()
    }
}

impl<D: Domain> fmt::Display for FlowGraph<D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for instruction in &self.instructions {
            writeln!(f, "{}", instruction)?;
        }
        Ok(())
    }
}

fn validate<D: Domain>(instructions: &[Instruction<D>]) -> Result<(), Error> {
    for (position, instruction) in instructions.iter().enumerate() {
        if instruction.index() != position {
            return Err(Error::InstructionIndexMismatch {
                position,
                index: instruction.index(),
            });
        }
        for target in instruction.possible_targets() {
            if target > instructions.len() {
                return Err(Error::InvalidTarget {
                    index: position,
                    target,
                });
            }
        }
    }
    Ok(())
}

fn build_graph<D: Domain>(instructions: &[Instruction<D>]) -> Result<Graph, Error> {
    let mut graph = Graph::new(instructions.len());
    for instruction in instructions {
        for target in instruction.possible_targets() {
            // The index past the last instruction is the exit of the unit.
            if target < instructions.len() {
                graph.insert_edge(instruction.index(), target)?;
            }
        }
    }
    Ok(graph)
}
