//! Implements a dense directed graph over instruction indices.

use crate::Error;

/// A directed graph whose vertices are the indices `0..num_vertices`.
///
/// Flow graphs index their instructions densely, so adjacency is stored in
/// vectors indexed by vertex rather than in maps.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Graph {
    successors: Vec<Vec<usize>>,
}

impl Graph {
    pub fn new(num_vertices: usize) -> Graph {
        Graph {
            successors: vec![Vec::new(); num_vertices],
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.successors.len()
    }

    /// Returns true if the vertex with the given index exists in this graph
    pub fn has_vertex(&self, index: usize) -> bool {
        index < self.num_vertices()
    }

    /// Returns true if the edge with the given head and tail index exists in this graph
    pub fn has_edge(&self, head: usize, tail: usize) -> bool {
        self.successors
            .get(head)
            .map(|successors| successors.binary_search(&tail).is_ok())
            .unwrap_or(false)
    }

    /// Inserts an edge into the graph. Inserting an existing edge again is a
    /// no-op.
    /// # Errors
    /// Error if either end of the edge is not a vertex of this graph.
    pub fn insert_edge(&mut self, head: usize, tail: usize) -> Result<(), Error> {
        if !self.has_vertex(head) {
            return Err(Error::GraphVertexNotFound(head));
        }
        if !self.has_vertex(tail) {
            return Err(Error::GraphVertexNotFound(tail));
        }

        if let Err(position) = self.successors[head].binary_search(&tail) {
            self.successors[head].insert(position, tail);
        }

        Ok(())
    }

    /// Returns the indices of all immediate successors of a vertex, in
    /// ascending order.
    pub fn successors(&self, index: usize) -> Result<&[usize], Error> {
        self.successors
            .get(index)
            .map(|successors| successors.as_slice())
            .ok_or(Error::GraphVertexNotFound(index))
    }

    /// Computes the strongly connected components of the graph.
    ///
    /// This is an iterative version of Tarjan's algorithm, so deep graphs do
    /// not exhaust the call stack. Each component is sorted, and components
    /// are returned in reverse topological order.
    pub fn compute_sccs(&self) -> Vec<Vec<usize>> {
        let num_vertices = self.num_vertices();

        let mut next_index = 0;
        let mut indices: Vec<Option<usize>> = vec![None; num_vertices];
        let mut lowlinks: Vec<usize> = vec![0; num_vertices];
        let mut on_stack: Vec<bool> = vec![false; num_vertices];
        let mut stack: Vec<usize> = Vec::new();
        let mut sccs: Vec<Vec<usize>> = Vec::new();

        for root in 0..num_vertices {
            if indices[root].is_some() {
                continue;
            }

            // (vertex, position of the next successor to visit)
            let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
            indices[root] = Some(next_index);
            lowlinks[root] = next_index;
            next_index += 1;
            stack.push(root);
            on_stack[root] = true;

            while let Some(frame) = frames.last_mut() {
                let vertex = frame.0;

                if frame.1 < self.successors[vertex].len() {
                    let successor = self.successors[vertex][frame.1];
                    frame.1 += 1;

                    match indices[successor] {
                        None => {
                            indices[successor] = Some(next_index);
                            lowlinks[successor] = next_index;
                            next_index += 1;
                            stack.push(successor);
                            on_stack[successor] = true;
                            frames.push((successor, 0));
                        }
                        Some(successor_index) => {
                            if on_stack[successor] {
                                lowlinks[vertex] = lowlinks[vertex].min(successor_index);
                            }
                        }
                    }
                    continue;
                }

                frames.pop();
                if let Some(&(parent, _)) = frames.last() {
                    lowlinks[parent] = lowlinks[parent].min(lowlinks[vertex]);
                }

                if indices[vertex] == Some(lowlinks[vertex]) {
                    let mut component = Vec::new();
                    while let Some(member) = stack.pop() {
                        on_stack[member] = false;
                        component.push(member);
                        if member == vertex {
                            break;
                        }
                    }
                    component.sort_unstable();
                    sccs.push(component);
                }
            }
        }

        sccs
    }

    /// Assigns a loop number to every vertex.
    ///
    /// Every cyclic strongly connected component (more than one vertex, or a
    /// single vertex with an edge to itself) receives a distinct number,
    /// starting at 1 and ordered by the component's lowest vertex. Vertices
    /// which are not part of any cycle get 0. Nested loops share the number of
    /// their outermost loop.
    pub fn compute_loop_numbers(&self) -> Vec<usize> {
        let mut cycles: Vec<Vec<usize>> = self
            .compute_sccs()
            .into_iter()
            .filter(|component| {
                component.len() > 1 || self.has_edge(component[0], component[0])
            })
            .collect();
        cycles.sort_by_key(|component| component[0]);

        let mut loop_numbers = vec![0; self.num_vertices()];
        for (number, component) in cycles.iter().enumerate() {
            for &vertex in component {
                loop_numbers[vertex] = number + 1;
            }
        }
        loop_numbers
    }

    /// Returns a string in the graphviz format, labelling each vertex with
    /// `label`.
    pub fn dot_graph<F>(&self, label: F) -> String
    where
        F: Fn(usize) -> String,
    {
        let vertices = (0..self.num_vertices())
            .map(|index| {
                format!(
                    "{} [shape=\"box\", label=\"{}\", style=\"filled\", fillcolor=\"#ffddcc\", fontcolor=\"#000000\"];",
                    index,
                    label(index).replace('"', "\\\"").replace('\n', "\\l"),
                )
            })
            .collect::<Vec<String>>();

        let edges = self
            .successors
            .iter()
            .enumerate()
            .flat_map(|(head, successors)| {
                successors
                    .iter()
                    .map(move |tail| format!("{} -> {};", head, tail))
            })
            .collect::<Vec<String>>();

        let options = vec![
            "graph [fontname = \"Courier New\", splines=\"polyline\"]",
            "node [fontname = \"Courier New\"]",
            "edge [fontname = \"Courier New\"]",
        ];

        format!(
            "digraph G {{\n{}\n\n{}\n{}\n}}",
            options.join("\n"),
            vertices.join("\n"),
            edges.join("\n")
        )
    }
}
