//! Couvreur's SCC-based liveness search.
//!
//! An iterative DFS over the zone graph maintains two stacks: `roots`
//! holds candidate SCC roots together with the union of the labels seen in
//! their partial SCC, `active` holds the nodes of all live SCCs in DFS
//! order. A back edge into the active set merges the roots above the
//! target, and when a merged label set covers the acceptance condition an
//! accepting lasso exists and the search halts. When a root is closed,
//! every node above it on `active` is marked dead; edges into dead nodes
//! are ignored.

use crate::graph::{EdgeKind, Graph, NodeId};
use crate::ExploreError;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use zonecheck_system::decl::SystemDecl;
use zonecheck_system::model::System;
use zonecheck_zg::{Bound, Extrapolation, RefClockKind, RefZg, Semantics, StateId, Ts, Zg};

/// Run statistics of the liveness search.
#[derive(Debug, Clone, Default)]
pub struct CouvsccStats {
    /// Nodes assigned a DFS number.
    pub visited: usize,
    /// Actual transitions recorded.
    pub transitions: usize,
    /// Entries popped from the roots stack (merges and closed SCCs).
    pub root_pops: usize,
    /// Whether an accepting cycle was found.
    pub accepting_cycle: bool,
    pub running_time: Duration,
}

impl fmt::Display for CouvsccStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CYCLE {}", self.accepting_cycle)?;
        writeln!(f, "VISITED_STATES {}", self.visited)?;
        writeln!(f, "TRANSITIONS {}", self.transitions)?;
        writeln!(f, "ROOT_POPS {}", self.root_pops)?;
        write!(f, "RUNNING_TIME_SECONDS {}", self.running_time.as_secs_f64())
    }
}

struct Frame {
    node: NodeId,
    succs: Vec<NodeId>,
    next: usize,
}

struct Search<'a, T: Ts> {
    ts: &'a mut T,
    graph: Graph,
    /// DFS number per node; 0 means unvisited.
    dfsnum: Vec<usize>,
    dead: Vec<bool>,
    count: usize,
    roots: Vec<(NodeId, u64)>,
    active: Vec<NodeId>,
    todo: Vec<Frame>,
    stats: CouvsccStats,
}

impl<'a, T: Ts> Search<'a, T> {
    /// Find the node of a state, adding it to the graph if it is fresh.
    /// Node identity is full state equality, zone included.
    fn get_or_add(&mut self, s: StateId) -> NodeId {
        let hash = self.ts.state_hash(s);
        for &m in self.graph.candidates(hash) {
            if self.ts.state_eq(s, self.graph.node(m).state) {
                self.ts.release_state(s);
                return m;
            }
        }
        let node = self
            .graph
            .add_node(s, hash, self.ts.state_attributes(s));
        self.dfsnum.push(0);
        self.dead.push(false);
        node
    }

    /// Expand a node: materialize its successors in the graph.
    fn expand(&mut self, node: NodeId) -> Vec<NodeId> {
        let state = self.graph.node(node).state;
        let mut succs = Vec::new();
        for sst in self.ts.outgoing(state) {
            if !sst.status.is_ok() {
                continue;
            }
            let s = sst.state.expect("OK triple without state");
            let t = sst.transition.expect("OK triple without transition");
            let label = self
                .ts
                .transition_attributes(t)
                .into_iter()
                .map(|(_, v)| v)
                .collect::<Vec<_>>()
                .join(" ");
            self.ts.release_transition(t);
            let m = self.get_or_add(s);
            self.graph.add_edge(node, m, EdgeKind::Actual, label);
            self.stats.transitions += 1;
            succs.push(m);
        }
        succs
    }

    fn push_frame(&mut self, node: NodeId) {
        self.count += 1;
        self.dfsnum[node] = self.count;
        self.stats.visited += 1;
        let labels = self.ts.labels(self.graph.node(node).state);
        self.roots.push((node, labels));
        self.active.push(node);
        let succs = self.expand(node);
        self.todo.push(Frame {
            node,
            succs,
            next: 0,
        });
    }

    /// Merge the partial SCCs above `w` on a back edge. Returns true iff
    /// the merged label set covers the acceptance condition.
    fn merge(&mut self, w: NodeId, accepting: u64) -> bool {
        let d = self.dfsnum[w];
        let mut acc = 0u64;
        loop {
            let (root, labels) = self.roots.pop().expect("roots stack underflow");
            self.stats.root_pops += 1;
            acc |= labels;
            if self.dfsnum[root] <= d {
                self.roots.push((root, acc));
                break;
            }
        }
        accepting != 0 && acc & accepting == accepting
    }

    /// DFS from a fresh node. Returns true iff an accepting cycle was
    /// found.
    fn dfs(&mut self, root: NodeId, accepting: u64) -> bool {
        self.push_frame(root);
        loop {
            let next = match self.todo.last_mut() {
                Some(frame) if frame.next < frame.succs.len() => {
                    let w = frame.succs[frame.next];
                    frame.next += 1;
                    Some(w)
                }
                Some(_) => None,
                None => break,
            };
            match next {
                Some(w) => {
                    if self.dead[w] {
                        continue;
                    }
                    if self.dfsnum[w] == 0 {
                        self.push_frame(w);
                    } else if self.merge(w, accepting) {
                        debug!(node = w, "accepting lasso found");
                        return true;
                    }
                }
                None => {
                    let v = self.todo.pop().expect("todo stack underflow").node;
                    if self.roots.last().map(|&(top, _)| top) == Some(v) {
                        self.roots.pop();
                        self.stats.root_pops += 1;
                        // Close the SCC: kill v and everything above it.
                        loop {
                            let n = self.active.pop().expect("active stack underflow");
                            self.dead[n] = true;
                            if n == v {
                                break;
                            }
                        }
                    }
                }
            }
        }
        false
    }

    fn run(&mut self, accepting: u64) {
        let mut initial_nodes = Vec::new();
        for sst in self.ts.initial() {
            if !sst.status.is_ok() {
                continue;
            }
            let s = sst.state.expect("OK triple without state");
            self.ts
                .release_transition(sst.transition.expect("OK triple without transition"));
            initial_nodes.push(self.get_or_add(s));
        }
        for node in initial_nodes {
            if self.dfsnum[node] == 0 && !self.dead[node] && self.dfs(node, accepting) {
                self.stats.accepting_cycle = true;
                return;
            }
        }
    }
}

/// Couvreur's algorithm: does the zone graph contain a reachable cycle
/// whose labels cover `accepting`? An empty acceptance set never reports a
/// cycle.
pub fn couvscc<T: Ts>(ts: &mut T, accepting: u64) -> (CouvsccStats, Graph) {
    let start = Instant::now();
    let mut search = Search {
        ts,
        graph: Graph::new(),
        dfsnum: Vec::new(),
        dead: Vec::new(),
        count: 0,
        roots: Vec::new(),
        active: Vec::new(),
        todo: Vec::new(),
        stats: CouvsccStats::default(),
    };
    search.run(accepting);
    search.stats.running_time = start.elapsed();
    info!(
        cycle = search.stats.accepting_cycle,
        visited = search.stats.visited,
        "couvscc finished"
    );
    (search.stats, search.graph)
}

/// Build the zone graph of a system declaration and run the liveness
/// search on the given accepting labels (a comma-separated list).
pub fn run_liveness(
    sysdecl: &SystemDecl,
    labels: &str,
    block_size: usize,
    table_size: usize,
) -> Result<(CouvsccStats, Graph), ExploreError> {
    let system = Arc::new(System::new(sysdecl)?);
    let accepting = system.labels_mask(labels)?;
    let mut zg = Zg::new(
        system,
        Semantics::Elapsed,
        Extrapolation::LuLocal,
        block_size,
        table_size,
        true,
    );
    Ok(couvscc(&mut zg, accepting))
}

/// As [`run_liveness`], but over the reference-clock zone graph with the
/// given reference clock layout and spread bound.
pub fn run_liveness_refzg(
    sysdecl: &SystemDecl,
    labels: &str,
    refclocks: RefClockKind,
    spread: Bound,
    block_size: usize,
    table_size: usize,
) -> Result<(CouvsccStats, Graph), ExploreError> {
    let system = Arc::new(System::new(sysdecl)?);
    let accepting = system.labels_mask(labels)?;
    let mut refzg = RefZg::new(system, refclocks, spread, block_size, table_size, true)?;
    Ok(couvscc(&mut refzg, accepting))
}
