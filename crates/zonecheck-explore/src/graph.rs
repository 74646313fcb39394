//! Arena-backed exploration graph.
//!
//! Nodes live in a vector and are addressed by stable integer ids, so the
//! graph may contain arbitrary cycles without reference juggling. Edges are
//! either `Actual` (a real transition of the symbolic semantics) or
//! `Subsumed` (the source is covered by the target). A hash-keyed store
//! supports cover-candidate lookup; covered nodes leave the store but keep
//! their arena slot.

use ahash::RandomState;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Write;
use zonecheck_zg::StateId;

pub type NodeId = usize;
pub type EdgeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Actual,
    Subsumed,
}

#[derive(Debug)]
pub struct Node {
    pub state: StateId,
    /// Key under which the node sits in the store.
    pub store_hash: u64,
    /// True once covering removed the node from the store.
    pub covered: bool,
    /// Display attributes captured at creation (vloc, intval, zone).
    pub attributes: Vec<(String, String)>,
}

#[derive(Debug)]
pub struct Edge {
    pub src: NodeId,
    pub tgt: NodeId,
    pub kind: EdgeKind,
    /// Display label (the joint edge).
    pub label: String,
}

#[derive(Default, Debug)]
pub struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    /// Incoming edge ids per node, for predecessor redirection.
    inc: Vec<Vec<EdgeId>>,
    store: HashMap<u64, SmallVec<[NodeId; 4]>, RandomState>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    /// Add a node and index it in the store under `hash`.
    pub fn add_node(
        &mut self,
        state: StateId,
        hash: u64,
        attributes: Vec<(String, String)>,
    ) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            state,
            store_hash: hash,
            covered: false,
            attributes,
        });
        self.inc.push(Vec::new());
        self.store.entry(hash).or_default().push(id);
        id
    }

    /// Nodes currently stored under `hash`.
    pub fn candidates(&self, hash: u64) -> &[NodeId] {
        self.store.get(&hash).map_or(&[], |ids| ids.as_slice())
    }

    /// Remove a node from the store (it keeps its arena slot and edges).
    pub fn remove_from_store(&mut self, node: NodeId) {
        let hash = self.nodes[node].store_hash;
        if let Some(ids) = self.store.get_mut(&hash) {
            ids.retain(|n| *n != node);
            if ids.is_empty() {
                self.store.remove(&hash);
            }
        }
        self.nodes[node].covered = true;
    }

    pub fn add_edge(&mut self, src: NodeId, tgt: NodeId, kind: EdgeKind, label: String) -> EdgeId {
        let id = self.edges.len();
        self.edges.push(Edge {
            src,
            tgt,
            kind,
            label,
        });
        self.inc[tgt].push(id);
        id
    }

    /// Turn every incoming edge of `from` into a subsumption edge to `to`.
    /// Returns how many edges were redirected.
    pub fn redirect_incoming(&mut self, from: NodeId, to: NodeId) -> usize {
        let incoming = std::mem::take(&mut self.inc[from]);
        let count = incoming.len();
        for eid in incoming {
            let edge = &mut self.edges[eid];
            edge.tgt = to;
            edge.kind = EdgeKind::Subsumed;
            self.inc[to].push(eid);
        }
        count
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of nodes still in the store.
    pub fn stored_count(&self) -> usize {
        self.store.values().map(|ids| ids.len()).sum()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    /// Dot dump. Node ids are renamed to their position under `cmp`, the
    /// lexical state order of the transition system that produced them
    /// (`Ts::state_cmp`), so the output is independent of exploration
    /// order. Edges follow their endpoints, tied on the joint-edge label.
    pub fn dot_output(
        &self,
        out: &mut String,
        name: &str,
        mut cmp: impl FnMut(NodeId, NodeId) -> Ordering,
    ) -> std::fmt::Result {
        let mut order: Vec<NodeId> = (0..self.nodes.len()).collect();
        order.sort_by(|&a, &b| cmp(a, b));
        let mut rank = vec![0usize; self.nodes.len()];
        for (pos, &id) in order.iter().enumerate() {
            rank[id] = pos;
        }

        writeln!(out, "digraph {} {{", name)?;
        writeln!(out, "  node [shape=\"box\"];")?;
        for &id in &order {
            let mut label = String::new();
            for (i, (attr, value)) in self.nodes[id].attributes.iter().enumerate() {
                if i > 0 {
                    label.push_str("\\n");
                }
                label.push_str(attr);
                label.push('=');
                label.push_str(value);
            }
            writeln!(out, "  n{} [label=\"{}\"];", rank[id], label)?;
        }
        let mut edges: Vec<&Edge> = self.edges.iter().collect();
        edges.sort_by(|a, b| {
            rank[a.src]
                .cmp(&rank[b.src])
                .then_with(|| rank[a.tgt].cmp(&rank[b.tgt]))
                .then_with(|| a.label.cmp(&b.label))
        });
        for edge in edges {
            let style = match edge.kind {
                EdgeKind::Actual => "",
                EdgeKind::Subsumed => ", style=\"dashed\"",
            };
            writeln!(
                out,
                "  n{} -> n{} [label=\"{}\"{}];",
                rank[edge.src], rank[edge.tgt], edge.label, style
            )?;
        }
        writeln!(out, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_candidates() {
        let mut g = Graph::new();
        let a = g.add_node(0, 17, vec![]);
        let b = g.add_node(1, 17, vec![]);
        let c = g.add_node(2, 99, vec![]);
        assert_eq!(g.candidates(17), &[a, b]);
        assert_eq!(g.candidates(99), &[c]);
        assert!(g.candidates(1).is_empty());

        g.remove_from_store(a);
        assert_eq!(g.candidates(17), &[b]);
        assert!(g.node(a).covered);
        assert_eq!(g.node_count(), 3);
        assert_eq!(g.stored_count(), 2);
    }

    #[test]
    fn test_redirect_incoming() {
        let mut g = Graph::new();
        let a = g.add_node(0, 1, vec![]);
        let b = g.add_node(1, 2, vec![]);
        let c = g.add_node(2, 3, vec![]);
        g.add_edge(a, b, EdgeKind::Actual, "e".to_string());
        assert_eq!(g.redirect_incoming(b, c), 1);
        let edge = g.edges().next().unwrap();
        assert_eq!(edge.tgt, c);
        assert_eq!(edge.kind, EdgeKind::Subsumed);
    }

    #[test]
    fn test_dot_output_orders_nodes_by_comparator() {
        let mut g = Graph::new();
        let a = g.add_node(0, 1, vec![("vloc".into(), "<b>".into())]);
        let b = g.add_node(1, 2, vec![("vloc".into(), "<a>".into())]);
        g.add_edge(a, b, EdgeKind::Actual, "<P@e>".to_string());
        let mut dot = String::new();
        // Stand-in for Ts::state_cmp: order nodes by their attributes.
        g.dot_output(&mut dot, "g", |x, y| {
            g.node(x).attributes.cmp(&g.node(y).attributes)
        })
        .unwrap();
        // The node that compares smaller is renamed n0 and printed first.
        assert!(dot.find("vloc=<a>").unwrap() < dot.find("vloc=<b>").unwrap());
        assert!(dot.contains("n1 -> n0"));
    }
}
