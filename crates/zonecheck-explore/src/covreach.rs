//! Subsumption-based reachability.
//!
//! The search discards a freshly generated state when a stored node with
//! the same discrete part carries a larger-or-equal zone, recording a
//! subsumption edge instead; conversely a new state evicts the stored
//! nodes it covers. With `Covering::Full` any stored node may be evicted
//! and its incoming edges are redirected to the covering node; with
//! `Covering::LeafNodes` only nodes still waiting (never expanded) are
//! eligible. On equal zones the first-seen node wins.

use crate::graph::{EdgeKind, Graph, NodeId};
use crate::waiting::{SearchOrder, Waiting};
use crate::ExploreError;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use zonecheck_system::decl::SystemDecl;
use zonecheck_system::model::System;
use zonecheck_zg::{Bound, Extrapolation, RefClockKind, RefZg, Semantics, StateId, Ts, Zg};

/// Which stored nodes a new state may evict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Covering {
    #[default]
    Full,
    LeafNodes,
}

/// Run statistics of the reachability search.
#[derive(Debug, Clone, Default)]
pub struct CovreachStats {
    /// Nodes popped from the waiting set and expanded.
    pub visited: usize,
    /// Nodes still stored when the search ended.
    pub stored: usize,
    /// Stored nodes evicted by covering.
    pub covered: usize,
    /// Subsumption edges recorded.
    pub subsumptions: usize,
    /// Actual transitions recorded.
    pub transitions: usize,
    /// Whether an accepting node was reached.
    pub reachable: bool,
    pub running_time: Duration,
}

impl fmt::Display for CovreachStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "REACHABLE {}", self.reachable)?;
        writeln!(f, "VISITED_STATES {}", self.visited)?;
        writeln!(f, "STORED_STATES {}", self.stored)?;
        writeln!(f, "COVERED_STATES {}", self.covered)?;
        writeln!(f, "SUBSUMPTION_EDGES {}", self.subsumptions)?;
        writeln!(f, "TRANSITIONS {}", self.transitions)?;
        write!(f, "RUNNING_TIME_SECONDS {}", self.running_time.as_secs_f64())
    }
}

struct Search<'a, T: Ts> {
    ts: &'a mut T,
    graph: Graph,
    waiting: Waiting,
    in_waiting: Vec<bool>,
    covering: Covering,
    stats: CovreachStats,
}

impl<'a, T: Ts> Search<'a, T> {
    /// Insert a state into the graph unless a stored node subsumes it.
    fn insert_or_subsume(&mut self, s: StateId, pred: Option<(NodeId, String)>) {
        let hash = self.ts.discrete_hash(s);

        // Subsumed by a stored node: drop the state, keep an edge.
        let mut subsumed_by = None;
        for &m in self.graph.candidates(hash) {
            let ms = self.graph.node(m).state;
            if self.ts.same_discrete(s, ms) && self.ts.zone_le(s, ms) {
                subsumed_by = Some(m);
                break;
            }
        }
        if let Some(m) = subsumed_by {
            self.stats.subsumptions += 1;
            if let Some((pred, label)) = pred {
                self.graph.add_edge(pred, m, EdgeKind::Subsumed, label);
            }
            self.ts.release_state(s);
            return;
        }

        // Stored nodes covered by the new state.
        let mut evicted: Vec<NodeId> = Vec::new();
        for &m in self.graph.candidates(hash) {
            let ms = self.graph.node(m).state;
            if self.ts.same_discrete(ms, s) && self.ts.zone_le(ms, s) {
                let eligible = match self.covering {
                    Covering::Full => true,
                    Covering::LeafNodes => self.in_waiting[m],
                };
                if eligible {
                    evicted.push(m);
                }
            }
        }

        let node = self
            .graph
            .add_node(s, hash, self.ts.state_attributes(s));
        self.in_waiting.push(true);
        debug_assert_eq!(self.in_waiting.len(), node + 1);
        if let Some((pred, label)) = pred {
            self.graph.add_edge(pred, node, EdgeKind::Actual, label);
            self.stats.transitions += 1;
        }

        for m in evicted {
            self.graph.remove_from_store(m);
            self.in_waiting[m] = false;
            self.stats.covered += 1;
            if self.covering == Covering::Full {
                self.stats.subsumptions += self.graph.redirect_incoming(m, node);
            }
        }

        self.waiting.push(node);
    }

    fn run(&mut self, accepting: u64) {
        for sst in self.ts.initial() {
            if !sst.status.is_ok() {
                continue;
            }
            let s = sst.state.expect("OK triple without state");
            self.ts
                .release_transition(sst.transition.expect("OK triple without transition"));
            self.insert_or_subsume(s, None);
        }

        while let Some(n) = self.waiting.pop() {
            if self.graph.node(n).covered {
                continue;
            }
            self.in_waiting[n] = false;
            self.stats.visited += 1;
            let state = self.graph.node(n).state;

            if accepting != 0
                && self.ts.labels(state) & accepting == accepting
                && self.ts.is_valid_final(state)
            {
                debug!(node = n, "accepting node reached");
                self.stats.reachable = true;
                return;
            }

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
                self.insert_or_subsume(s, Some((n, label)));
            }
        }
    }
}

/// Subsumption reachability of states whose labels cover `accepting`.
/// An empty accepting set makes the search exhaust the state space.
pub fn covreach<T: Ts>(
    ts: &mut T,
    accepting: u64,
    order: SearchOrder,
    covering: Covering,
) -> (CovreachStats, Graph) {
    let start = Instant::now();
    let mut search = Search {
        ts,
        graph: Graph::new(),
        waiting: Waiting::new(order),
        in_waiting: Vec::new(),
        covering,
        stats: CovreachStats::default(),
    };
    search.run(accepting);
    search.stats.stored = search.graph.stored_count();
    search.stats.running_time = start.elapsed();
    info!(
        reachable = search.stats.reachable,
        visited = search.stats.visited,
        stored = search.stats.stored,
        "covreach finished"
    );
    (search.stats, search.graph)
}

/// Build the zone graph of a system declaration and run covreach on the
/// given accepting labels (a comma-separated list).
pub fn run_reach(
    sysdecl: &SystemDecl,
    labels: &str,
    order: SearchOrder,
    covering: Covering,
    block_size: usize,
    table_size: usize,
) -> Result<(CovreachStats, Graph), ExploreError> {
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
    Ok(covreach(&mut zg, accepting, order, covering))
}

/// As [`run_reach`], but over the reference-clock zone graph with the
/// given reference clock layout and spread bound.
pub fn run_reach_refzg(
    sysdecl: &SystemDecl,
    labels: &str,
    order: SearchOrder,
    covering: Covering,
    refclocks: RefClockKind,
    spread: Bound,
    block_size: usize,
    table_size: usize,
) -> Result<(CovreachStats, Graph), ExploreError> {
    let system = Arc::new(System::new(sysdecl)?);
    let accepting = system.labels_mask(labels)?;
    let mut refzg = RefZg::new(system, refclocks, spread, block_size, table_size, true)?;
    Ok(covreach(&mut refzg, accepting, order, covering))
}
