//! A small arena-backed directed acyclic graph.
//!
//! Nodes are addressed by dense integer handles, which keeps every derived
//! per-node table (dependency levels, queue assignments, barrier ranges) a
//! flat vector indexed by handle.

use failure::Fail;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Dense handle of a graph node.
pub type NodeHandle = u32;

/// The graph contains at least one cycle and cannot be sorted.
#[derive(Fail, Debug, Clone, Eq, PartialEq)]
#[fail(display = "The dependency graph contains a cycle.")]
pub struct GraphCycleError;

/// Result of a topological sort.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct TopologicalOrder {
    /// Node handles in topological order, monotonic in depth. Ties are
    /// broken by the smaller handle so that sorting an unchanged graph is
    /// reproducible.
    pub sorted: Vec<NodeHandle>,

    /// Per-node longest path from any source, indexed by handle.
    pub depths: Vec<u32>,

    /// Highest value in `depths`, 0 for an empty graph.
    pub max_depth: u32,
}

/// Directed acyclic graph over nodes of type `T`.
#[derive(Debug, Clone)]
pub struct Dag<T> {
    nodes: Vec<T>,
    adjacency: Vec<Vec<NodeHandle>>,
}

impl<T> Default for Dag<T> {
    fn default() -> Self {
        Dag {
            nodes: Vec::new(),
            adjacency: Vec::new(),
        }
    }
}

impl<T> Dag<T> {
    pub fn new() -> Self {
        Default::default()
    }

    /// Appends a node and returns its handle.
    pub fn add_node(&mut self, node: T) -> NodeHandle {
        let handle = self.nodes.len() as NodeHandle;
        self.nodes.push(node);
        self.adjacency.push(Vec::new());
        handle
    }

    /// Adds the edge `from -> to`. Duplicate edges are ignored.
    pub fn add_edge(&mut self, from: NodeHandle, to: NodeHandle) {
        let list = &mut self.adjacency[from as usize];
        if !list.contains(&to) {
            list.push(to);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, handle: NodeHandle) -> &T {
        &self.nodes[handle as usize]
    }

    pub fn node_mut(&mut self, handle: NodeHandle) -> &mut T {
        &mut self.nodes[handle as usize]
    }

    /// Successors of `handle`.
    pub fn adjacency(&self, handle: NodeHandle) -> &[NodeHandle] {
        &self.adjacency[handle as usize]
    }

    pub fn handles(&self) -> impl Iterator<Item = NodeHandle> {
        0..self.nodes.len() as NodeHandle
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.nodes.iter()
    }

    /// The same graph with every edge reversed and unit node payloads.
    pub fn reverse(&self) -> Dag<()> {
        let mut reversed = Dag::default();
        for _ in 0..self.nodes.len() {
            reversed.add_node(());
        }

        for from in self.handles() {
            for &to in self.adjacency(from) {
                reversed.add_edge(to, from);
            }
        }

        reversed
    }

    /// Kahn's algorithm producing the sorted order and per-node longest-path
    /// depths. Fails if the graph contains a cycle.
    pub fn topological_sort(&self) -> Result<TopologicalOrder, GraphCycleError> {
        let count = self.nodes.len();
        let mut in_degree = vec![0u32; count];

        for from in 0..count {
            for &to in &self.adjacency[from] {
                in_degree[to as usize] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<NodeHandle>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &degree)| degree == 0)
            .map(|(handle, _)| Reverse(handle as NodeHandle))
            .collect();

        let mut sorted = Vec::with_capacity(count);
        let mut depths = vec![0u32; count];
        let mut max_depth = 0;

        while let Some(Reverse(handle)) = ready.pop() {
            sorted.push(handle);

            for &next in self.adjacency(handle) {
                let next_depth = depths[handle as usize] + 1;
                if next_depth > depths[next as usize] {
                    depths[next as usize] = next_depth;
                    max_depth = max_depth.max(next_depth);
                }

                in_degree[next as usize] -= 1;
                if in_degree[next as usize] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if sorted.len() != count {
            return Err(GraphCycleError);
        }

        // Every (depth, handle) order is topological since each edge strictly
        // increases depth. Scheduling requires the order to walk dependency
        // levels monotonically.
        sorted.sort_by_key(|&handle| (depths[handle as usize], handle));

        Ok(TopologicalOrder {
            sorted,
            depths,
            max_depth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> Dag<&'static str> {
        // a -> b -> d, a -> c -> d
        let mut dag = Dag::new();
        let a = dag.add_node("a");
        let b = dag.add_node("b");
        let c = dag.add_node("c");
        let d = dag.add_node("d");
        dag.add_edge(a, b);
        dag.add_edge(a, c);
        dag.add_edge(b, d);
        dag.add_edge(c, d);
        dag
    }

    #[test]
    fn sort_respects_edges() {
        let dag = diamond();
        let order = dag.topological_sort().unwrap();

        let position = |handle: NodeHandle| order.sorted.iter().position(|&h| h == handle).unwrap();

        for from in dag.handles() {
            for &to in dag.adjacency(from) {
                assert!(position(from) < position(to));
                assert!(order.depths[from as usize] < order.depths[to as usize]);
            }
        }
    }

    #[test]
    fn depths_are_longest_paths() {
        let mut dag = diamond();
        // Lengthen one branch: a -> b -> e -> d.
        let e = dag.add_node("e");
        dag.add_edge(1, e);
        dag.add_edge(e, 3);

        let order = dag.topological_sort().unwrap();
        assert_eq!(order.depths, vec![0, 1, 1, 3, 2]);
        assert_eq!(order.max_depth, 3);
    }

    #[test]
    fn sort_is_reproducible() {
        let dag = diamond();
        let first = dag.topological_sort().unwrap();
        let second = dag.topological_sort().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn cycle_is_detected() {
        let mut dag = diamond();
        dag.add_edge(3, 0);
        assert_eq!(dag.topological_sort(), Err(GraphCycleError));
    }

    #[test]
    fn duplicate_edges_collapse() {
        let mut dag = Dag::new();
        let a = dag.add_node(0);
        let b = dag.add_node(1);
        dag.add_edge(a, b);
        dag.add_edge(a, b);
        assert_eq!(dag.adjacency(a), &[b]);
    }

    #[test]
    fn reverse_flips_edges() {
        let dag = diamond();
        let reversed = dag.reverse();
        assert_eq!(reversed.adjacency(0), &[] as &[NodeHandle]);
        assert_eq!(reversed.adjacency(3), &[1, 2]);
    }
}
