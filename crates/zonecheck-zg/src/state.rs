//! States and transitions of the symbolic semantics.
//!
//! Tuples of locations and tuples of edges are shared through pools; a
//! state holds slot ids for its vloc and its zone plus the (cheaply cloned)
//! integer valuation. Hashes here are structural: equal contents hash
//! equal, which drives both the sharing tables and the node stores of the
//! exploration algorithms.

use crate::pool::SlotId;
use crate::ta::EvalCc;
use ahash::AHasher;
use smallvec::SmallVec;
use std::hash::{Hash, Hasher};
use zonecheck_dbm::{Dbm, RefDbm};
use zonecheck_system::intval::{ClockReset, IntVal};
use zonecheck_system::model::System;

/// Tuple of locations, indexed by process id.
pub type Vloc = SmallVec<[usize; 8]>;

/// Tuple of edges, indexed by process id; `NO_EDGE` for processes that do
/// not move.
pub type Vedge = SmallVec<[usize; 8]>;

/// Sentinel for a process that does not participate in a joint edge.
pub const NO_EDGE: usize = usize::MAX;

/// A symbolic state: locations, integer values and a zone, the latter two
/// behind shared handles.
#[derive(Debug, Clone)]
pub struct StateData {
    pub vloc: SlotId,
    pub intval: IntVal,
    pub zone: SlotId,
}

/// A symbolic transition: the joint edge plus the constraint and reset
/// containers collected by the discrete step.
#[derive(Debug, Clone)]
pub struct TransitionData {
    pub vedge: SlotId,
    pub src_invariant: Vec<EvalCc>,
    pub guard: Vec<EvalCc>,
    pub resets: Vec<ClockReset>,
    pub tgt_invariant: Vec<EvalCc>,
}

pub fn vloc_hash(vloc: &Vloc) -> u64 {
    let mut h = AHasher::default();
    vloc.as_slice().hash(&mut h);
    h.finish()
}

pub fn vedge_hash(vedge: &Vedge) -> u64 {
    let mut h = AHasher::default();
    vedge.as_slice().hash(&mut h);
    h.finish()
}

pub fn zone_hash(zone: &Dbm) -> u64 {
    let mut h = AHasher::default();
    zone.hash(&mut h);
    h.finish()
}

pub fn refzone_hash(zone: &RefDbm) -> u64 {
    let mut h = AHasher::default();
    zone.hash(&mut h);
    h.finish()
}

/// Hash of the discrete part of a state. Cover candidates in the
/// subsumption search collide on this hash, so it must ignore the zone.
pub fn discrete_hash(vloc: &Vloc, intval: &IntVal) -> u64 {
    let mut h = AHasher::default();
    vloc.as_slice().hash(&mut h);
    intval.hash(&mut h);
    h.finish()
}

/// Hash of a whole state, zone included.
pub fn full_hash(vloc: &Vloc, intval: &IntVal, zone: &impl Hash) -> u64 {
    let mut h = AHasher::default();
    vloc.as_slice().hash(&mut h);
    intval.hash(&mut h);
    zone.hash(&mut h);
    h.finish()
}

/// Textual form of a tuple of locations: `<l0,m1>`.
pub fn vloc_text(system: &System, vloc: &Vloc) -> String {
    let mut out = String::from("<");
    for (pid, &loc) in vloc.iter().enumerate() {
        if pid > 0 {
            out.push(',');
        }
        out.push_str(&system.location(loc).name);
    }
    out.push('>');
    out
}

/// Textual form of a tuple of edges: `<P@go,Q@go>`, skipping processes
/// that do not move.
pub fn vedge_text(system: &System, vedge: &Vedge) -> String {
    let mut out = String::from("<");
    let mut first = true;
    for (pid, &e) in vedge.iter().enumerate() {
        if e == NO_EDGE {
            continue;
        }
        if !first {
            out.push(',');
        }
        first = false;
        out.push_str(&system.processes()[pid].name);
        out.push('@');
        out.push_str(system.event_name(system.edge(e).event));
    }
    out.push('>');
    out
}

/// Lexical order on vlocs, for deterministic graph dumps.
pub fn vloc_cmp(a: &Vloc, b: &Vloc) -> std::cmp::Ordering {
    a.as_slice().cmp(b.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn test_discrete_hash_ignores_nothing_discrete() {
        let a: Vloc = smallvec![0, 1];
        let b: Vloc = smallvec![0, 1];
        let v1 = IntVal::from_values(vec![1]);
        let v2 = IntVal::from_values(vec![2]);
        assert_eq!(discrete_hash(&a, &v1), discrete_hash(&b, &v1));
        assert_ne!(discrete_hash(&a, &v1), discrete_hash(&a, &v2));
    }

    #[test]
    fn test_vloc_hash_depends_on_order() {
        let a: Vloc = smallvec![0, 1];
        let b: Vloc = smallvec![1, 0];
        assert_ne!(vloc_hash(&a), vloc_hash(&b));
    }
}
