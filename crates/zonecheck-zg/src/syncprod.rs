//! Synchronized product of the processes of a system.
//!
//! The product enumerates tuples of locations and joint edges. A joint edge
//! is either one asynchronous edge of a single process (its event is not
//! constrained by any synchronization vector) or an instance of a
//! synchronization vector: one offering edge per strong endpoint plus one
//! per member of a subset of the offering weak endpoints. Enumeration is
//! deterministic: asynchronous edges by process id then edge id, vectors in
//! declaration order, endpoint subsets and edge combinations in increasing
//! order.

use crate::state::{Vedge, Vloc, NO_EDGE};
use smallvec::SmallVec;
use zonecheck_system::model::System;

/// All initial tuples of locations: the cartesian product of the initial
/// location sets of every process, in process-major order. Empty iff some
/// process has no initial location.
pub fn initial_vlocs(system: &System) -> Vec<Vloc> {
    let processes = system.processes();
    if processes.iter().any(|p| p.initial_locations.is_empty()) {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut counters = vec![0usize; processes.len()];
    loop {
        out.push(
            processes
                .iter()
                .zip(counters.iter())
                .map(|(p, &c)| p.initial_locations[c])
                .collect::<Vloc>(),
        );
        // Odometer over the per-process initial location lists.
        let mut pid = processes.len();
        loop {
            if pid == 0 {
                return out;
            }
            pid -= 1;
            counters[pid] += 1;
            if counters[pid] < processes[pid].initial_locations.len() {
                break;
            }
            counters[pid] = 0;
        }
    }
}

/// Mask of processes whose current location is committed.
pub fn committed(system: &System, vloc: &Vloc) -> u64 {
    let mut mask = 0u64;
    for (pid, &loc) in vloc.iter().enumerate() {
        if system.location(loc).committed {
            mask |= 1 << pid;
        }
    }
    mask
}

/// Union of the labels of the locations in a vloc.
pub fn labels(system: &System, vloc: &Vloc) -> u64 {
    vloc.iter().fold(0u64, |acc, &loc| acc | system.location(loc).labels)
}

/// Whether every location of the vloc is initial.
pub fn is_initial(system: &System, vloc: &Vloc) -> bool {
    vloc.iter().all(|&loc| system.location(loc).initial)
}

/// Whether delay is allowed in a vloc: no committed and no urgent location.
pub fn delay_allowed(system: &System, vloc: &Vloc) -> bool {
    vloc.iter().all(|&loc| {
        let l = system.location(loc);
        !l.committed && !l.urgent
    })
}

/// Whether a joint edge moves at least one process of `committed_mask`.
fn involves_committed(vedge: &Vedge, committed_mask: u64) -> bool {
    vedge
        .iter()
        .enumerate()
        .any(|(pid, &e)| e != NO_EDGE && committed_mask & (1 << pid) != 0)
}

/// Iterator over the outgoing joint edges of a vloc.
///
/// When some process is committed the iterator advances past joint edges
/// that move no committed process, so only enabled joint edges are yielded.
pub struct OutgoingEdges {
    vedges: Vec<Vedge>,
    committed_mask: u64,
    next: usize,
}

impl Iterator for OutgoingEdges {
    type Item = Vedge;

    fn next(&mut self) -> Option<Vedge> {
        while self.next < self.vedges.len() {
            let vedge = &self.vedges[self.next];
            self.next += 1;
            if self.committed_mask == 0 || involves_committed(vedge, self.committed_mask) {
                return Some(vedge.clone());
            }
        }
        None
    }
}

/// Outgoing joint edges of a vloc, committed filter applied.
pub fn outgoing_edges(system: &System, vloc: &Vloc) -> OutgoingEdges {
    OutgoingEdges {
        vedges: generate_vedges(system, vloc),
        committed_mask: committed(system, vloc),
        next: 0,
    }
}

fn generate_vedges(system: &System, vloc: &Vloc) -> Vec<Vedge> {
    let n = system.process_count();
    let mut out = Vec::new();

    // Asynchronous edges: events not constrained by any sync vector.
    for (pid, &loc) in vloc.iter().enumerate() {
        for &e in system.outgoing_edges(loc) {
            if !system.sync_constrained(pid, system.edge(e).event) {
                let mut vedge: Vedge = SmallVec::from_elem(NO_EDGE, n);
                vedge[pid] = e;
                out.push(vedge);
            }
        }
    }

    // Synchronization vectors.
    for sync in system.syncs() {
        // Offering edges per endpoint, endpoints sorted by process id.
        let mut offers: Vec<(usize, bool, SmallVec<[usize; 4]>)> = Vec::new();
        let mut enabled = true;
        for ep in &sync.endpoints {
            let edges: SmallVec<[usize; 4]> = system
                .outgoing_edges(vloc[ep.process])
                .iter()
                .copied()
                .filter(|&e| system.edge(e).event == ep.event)
                .collect();
            if edges.is_empty() {
                if !ep.weak {
                    enabled = false;
                    break;
                }
                continue;
            }
            offers.push((ep.process, ep.weak, edges));
        }
        if !enabled {
            continue;
        }
        let weak_count = offers.iter().filter(|(_, weak, _)| *weak).count();
        // Every subset of the offering weak endpoints, strong endpoints
        // always included.
        for subset in 0u64..(1 << weak_count) {
            let mut selected: Vec<(usize, &SmallVec<[usize; 4]>)> = Vec::new();
            let mut w = 0;
            for (pid, weak, edges) in &offers {
                if *weak {
                    let include = subset & (1 << w) != 0;
                    w += 1;
                    if !include {
                        continue;
                    }
                }
                selected.push((*pid, edges));
            }
            if selected.is_empty() {
                continue;
            }
            // Cartesian product over the edge choices of the selection.
            let mut counters = vec![0usize; selected.len()];
            loop {
                let mut vedge: Vedge = SmallVec::from_elem(NO_EDGE, n);
                for (k, &(pid, edges)) in selected.iter().enumerate() {
                    vedge[pid] = edges[counters[k]];
                }
                out.push(vedge);
                let mut k = selected.len();
                let mut done = false;
                loop {
                    if k == 0 {
                        done = true;
                        break;
                    }
                    k -= 1;
                    counters[k] += 1;
                    if counters[k] < selected[k].1.len() {
                        break;
                    }
                    counters[k] = 0;
                }
                if done {
                    break;
                }
            }
        }
    }
    out
}

/// Apply a joint edge to a vloc: participating processes move to the target
/// of their edge, the others stay. Returns `None` when some edge does not
/// start in the current location (an incompatible edge).
pub fn next_vloc(system: &System, vloc: &Vloc, vedge: &Vedge) -> Option<Vloc> {
    debug_assert_eq!(vloc.len(), vedge.len());
    let mut next = vloc.clone();
    for (pid, &e) in vedge.iter().enumerate() {
        if e == NO_EDGE {
            continue;
        }
        let edge = system.edge(e);
        debug_assert_eq!(edge.pid, pid);
        if edge.src != vloc[pid] {
            return None;
        }
        next[pid] = edge.tgt;
    }
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;
    use std::collections::HashSet;
    use zonecheck_system::decl;

    fn compile(text: &str) -> System {
        System::new(&decl::parse(text).unwrap()).unwrap()
    }

    fn collect(system: &System, vloc: &Vloc) -> Vec<Vedge> {
        outgoing_edges(system, vloc).collect()
    }

    #[test]
    fn test_initial_vlocs_product() {
        let sys = compile(
            "system:s\n\
             process:P\n\
             process:Q\n\
             location:P:a{initial}\n\
             location:P:b{initial}\n\
             location:Q:m{initial}\n",
        );
        let inits = initial_vlocs(&sys);
        assert_eq!(inits.len(), 2);
        assert_eq!(inits[0].to_vec(), vec![0, 2]);
        assert_eq!(inits[1].to_vec(), vec![1, 2]);
    }

    #[test]
    fn test_no_initial_location_means_no_vloc() {
        let sys = compile(
            "system:s\nprocess:P\nprocess:Q\nlocation:P:a{initial}\nlocation:Q:m\n",
        );
        assert!(initial_vlocs(&sys).is_empty());
    }

    #[test]
    fn test_asynchronous_edges_enumerated_once() {
        let sys = compile(
            "system:s\n\
             process:P\n\
             process:Q\n\
             location:P:a{initial}\n\
             location:Q:m{initial}\n\
             edge:P:a:a:e1\n\
             edge:P:a:a:e2\n\
             edge:Q:m:m:f\n",
        );
        let vloc: Vloc = smallvec![0, 1];
        let vedges = collect(&sys, &vloc);
        assert_eq!(vedges.len(), 3);
        let unique: HashSet<Vec<usize>> =
            vedges.iter().map(|v| v.to_vec()).collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_strong_sync_requires_all_offers() {
        let sys = compile(
            "system:s\n\
             process:P\n\
             process:Q\n\
             location:P:a{initial}\n\
             location:P:b\n\
             location:Q:m{initial}\n\
             location:Q:n\n\
             edge:P:a:b:go\n\
             edge:Q:m:n:go\n\
             sync:P@go:Q@go\n",
        );
        let both: Vloc = smallvec![0, 2];
        let vedges = collect(&sys, &both);
        assert_eq!(vedges.len(), 1);
        assert_eq!(vedges[0].to_vec(), vec![0, 1]);

        // Q cannot offer from n, so the vector is disabled.
        let q_moved: Vloc = smallvec![0, 3];
        assert!(collect(&sys, &q_moved).is_empty());
    }

    #[test]
    fn test_weak_sync_subsets() {
        let sys = compile(
            "system:s\n\
             process:P\n\
             process:Q\n\
             location:P:a{initial}\n\
             location:P:b\n\
             location:Q:m{initial}\n\
             location:Q:n\n\
             edge:P:a:b:go\n\
             edge:Q:m:n:go\n\
             sync:P@go:Q@go?\n",
        );
        let vloc: Vloc = smallvec![0, 2];
        let vedges = collect(&sys, &vloc);
        // Strong P alone, and P together with weak Q.
        assert_eq!(vedges.len(), 2);
        assert_eq!(vedges[0].to_vec(), vec![0, NO_EDGE]);
        assert_eq!(vedges[1].to_vec(), vec![0, 1]);
    }

    #[test]
    fn test_sync_cartesian_product_of_offers() {
        let sys = compile(
            "system:s\n\
             process:P\n\
             process:Q\n\
             location:P:a{initial}\n\
             location:P:b\n\
             location:Q:m{initial}\n\
             location:Q:n\n\
             edge:P:a:b:go\n\
             edge:P:a:a:go\n\
             edge:Q:m:n:go\n\
             sync:P@go:Q@go\n",
        );
        let vloc: Vloc = smallvec![0, 2];
        let vedges = collect(&sys, &vloc);
        assert_eq!(vedges.len(), 2);
        let unique: HashSet<Vec<usize>> =
            vedges.iter().map(|v| v.to_vec()).collect();
        assert!(unique.contains(&vec![0, 2]));
        assert!(unique.contains(&vec![1, 2]));
    }

    #[test]
    fn test_committed_filter() {
        let sys = compile(
            "system:s\n\
             process:P\n\
             process:Q\n\
             location:P:a{initial; committed}\n\
             location:P:b\n\
             location:Q:m{initial}\n\
             location:Q:n\n\
             edge:P:a:b:e\n\
             edge:Q:m:n:f\n",
        );
        let vloc: Vloc = smallvec![0, 2];
        let vedges = collect(&sys, &vloc);
        // Only P's edge moves the committed process.
        assert_eq!(vedges.len(), 1);
        assert_eq!(vedges[0].to_vec(), vec![0, NO_EDGE]);

        // Once P left the committed location the filter is off and Q's edge
        // fires.
        let after: Vloc = smallvec![1, 2];
        let vedges = collect(&sys, &after);
        assert_eq!(vedges.len(), 1);
        assert_eq!(vedges[0].to_vec(), vec![NO_EDGE, 1]);
    }

    #[test]
    fn test_next_vloc() {
        let sys = compile(
            "system:s\n\
             process:P\n\
             location:P:a{initial}\n\
             location:P:b\n\
             edge:P:a:b:e\n",
        );
        let vloc: Vloc = smallvec![0];
        let vedge: Vedge = smallvec![0];
        assert_eq!(next_vloc(&sys, &vloc, &vedge).unwrap().to_vec(), vec![1]);

        // Firing the same edge from b is incompatible.
        let moved: Vloc = smallvec![1];
        assert!(next_vloc(&sys, &moved, &vedge).is_none());
    }

    #[test]
    fn test_labels_union() {
        let sys = compile(
            "system:s\n\
             process:P\n\
             process:Q\n\
             location:P:a{initial; labels: one}\n\
             location:Q:m{initial; labels: two}\n",
        );
        let vloc: Vloc = smallvec![0, 1];
        assert_eq!(labels(&sys, &vloc), 0b11);
    }
}
