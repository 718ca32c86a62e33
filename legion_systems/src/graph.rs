//! Dependency graph + runtime tracer (spec §4.H).
//!
//! `DependencyGraph` is built once, at `AsyncSystemsManager::init`, and
//! reused for the process lifetime. `Tracer` is the per-tick runtime state
//! (spec: "one per graph instance, reset per tick") — cheap enough to
//! rebuild every `update()` since it's only a couple of `Vec`s sized by
//! system count.
//!
//! `finalize`'s cycle check is a Kahn's-algorithm pass (count-down
//! in-degrees, the usual topological-sort-or-bust) against a scratch copy
//! of the predecessor counts, so a rejected graph is left untouched.

use bit_set::BitSet;
use legion_core::error::ContractError;
use parking_lot::Mutex;

pub type NodeId = usize;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    Done,
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    successors: Vec<Vec<NodeId>>,
    initial_predecessor_count: Vec<usize>,
    finalized: bool,
}

impl DependencyGraph {
    pub fn init_nodes(n: usize) -> Self {
        DependencyGraph {
            successors: vec![Vec::new(); n],
            initial_predecessor_count: vec![0; n],
            finalized: false,
        }
    }

    pub fn len(&self) -> usize { self.successors.len() }

    pub fn is_empty(&self) -> bool { self.successors.is_empty() }

    /// Adds edge `u -> v`: `u` must finish before `v` starts.
    pub fn add_dependency(&mut self, u: NodeId, v: NodeId) {
        debug_assert!(!self.finalized, "add_dependency called after finalize()");
        self.successors[u].push(v);
        self.initial_predecessor_count[v] += 1;
    }

    /// Validates the graph is acyclic and locks in its shape.
    pub fn finalize(&mut self) -> Result<(), ContractError> {
        let n = self.successors.len();
        let mut remaining = self.initial_predecessor_count.clone();
        let mut frontier: Vec<NodeId> = (0..n).filter(|&v| remaining[v] == 0).collect();
        let mut visited = BitSet::with_capacity(n);
        let mut processed = 0usize;

        while let Some(u) = frontier.pop() {
            if !visited.insert(u) {
                continue;
            }
            processed += 1;
            for &v in &self.successors[u] {
                remaining[v] -= 1;
                if remaining[v] == 0 {
                    frontier.push(v);
                }
            }
        }

        if processed != n {
            return Err(ContractError::CyclicDependency);
        }
        self.finalized = true;
        Ok(())
    }

    pub fn new_tracer(&self) -> Tracer { Tracer::new(self.successors.clone(), &self.initial_predecessor_count) }
}

struct TracerInner {
    state: Vec<NodeState>,
    remaining_predecessors: Vec<usize>,
}

/// Per-tick runtime state tracking each node's progress through
/// `Pending -> Ready -> Running -> Done`. Safe to share across the worker
/// threads running systems: `run_system`/`finish_system` are called from
/// whichever thread is executing or finalizing the corresponding task.
///
/// Owns a clone of the graph's successor lists rather than borrowing them,
/// so a tracer can be wrapped in an `Arc` and captured by the `'static`
/// task closures the thread pool requires.
pub struct Tracer {
    successors: Vec<Vec<NodeId>>,
    inner: Mutex<TracerInner>,
}

impl Tracer {
    fn new(successors: Vec<Vec<NodeId>>, initial_predecessor_count: &[usize]) -> Self {
        let state = initial_predecessor_count
            .iter()
            .map(|&c| if c == 0 { NodeState::Ready } else { NodeState::Pending })
            .collect();
        Tracer {
            successors,
            inner: Mutex::new(TracerInner {
                state,
                remaining_predecessors: initial_predecessor_count.to_vec(),
            }),
        }
    }

    pub fn get_next_systems_to_run(&self) -> Vec<NodeId> {
        let inner = self.inner.lock();
        inner
            .state
            .iter()
            .enumerate()
            .filter(|&(_, &s)| s == NodeState::Ready)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn run_system(&self, v: NodeId) {
        let mut inner = self.inner.lock();
        debug_assert_eq!(inner.state[v], NodeState::Ready, "run_system on a non-ready node");
        inner.state[v] = NodeState::Running;
    }

    pub fn finish_system(&self, v: NodeId) {
        let mut inner = self.inner.lock();
        debug_assert_eq!(inner.state[v], NodeState::Running, "finish_system on a non-running node");
        inner.state[v] = NodeState::Done;
        for i in 0..self.successors[v].len() {
            let w = self.successors[v][i];
            inner.remaining_predecessors[w] -= 1;
            if inner.remaining_predecessors[w] == 0 {
                inner.state[w] = NodeState::Ready;
            }
        }
    }

    pub fn is_done(&self, v: NodeId) -> bool { self.inner.lock().state[v] == NodeState::Done }

    pub fn all_done(&self) -> bool { self.inner.lock().state.iter().all(|&s| s == NodeState::Done) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodes_with_no_predecessors_start_ready() {
        let mut graph = DependencyGraph::init_nodes(3);
        graph.add_dependency(0, 2);
        graph.finalize().unwrap();
        let tracer = graph.new_tracer();
        let mut ready = tracer.get_next_systems_to_run();
        ready.sort_unstable();
        assert_eq!(ready, vec![0, 1]);
    }

    #[test]
    fn finish_system_unlocks_successor_once_all_predecessors_done() {
        let mut graph = DependencyGraph::init_nodes(3);
        graph.add_dependency(0, 2);
        graph.add_dependency(1, 2);
        graph.finalize().unwrap();
        let tracer = graph.new_tracer();

        tracer.run_system(0);
        tracer.finish_system(0);
        assert!(!tracer.get_next_systems_to_run().contains(&2));

        tracer.run_system(1);
        tracer.finish_system(1);
        assert!(tracer.get_next_systems_to_run().contains(&2));
    }

    #[test]
    fn finalize_rejects_a_cycle() {
        let mut graph = DependencyGraph::init_nodes(3);
        graph.add_dependency(0, 1);
        graph.add_dependency(1, 2);
        graph.add_dependency(2, 0);
        assert_eq!(graph.finalize(), Err(ContractError::CyclicDependency));
    }

    #[test]
    fn a_tick_completes_when_every_node_is_done() {
        let mut graph = DependencyGraph::init_nodes(2);
        graph.add_dependency(0, 1);
        graph.finalize().unwrap();
        let tracer = graph.new_tracer();

        assert!(!tracer.all_done());
        tracer.run_system(0);
        tracer.finish_system(0);
        tracer.run_system(1);
        tracer.finish_system(1);
        assert!(tracer.all_done());
    }
}
