//! End-to-end scenarios driven through the declaration reader.
//!
//! Each test builds a small system, runs an exploration algorithm and
//! asserts the expected outcome and the key statistics.

use std::sync::Arc;
use zonecheck_explore::{
    covreach, run_liveness, run_liveness_refzg, run_reach, run_reach_refzg, Covering,
    ExploreError, SearchOrder,
};
use zonecheck_system::{decl, System, SystemDecl};
use zonecheck_zg::{Extrapolation, RefClockKind, RefZg, Semantics, Ts, Zg};

fn parse(text: &str) -> SystemDecl {
    decl::parse(text).unwrap()
}

fn reach(text: &str, labels: &str) -> zonecheck_explore::CovreachStats {
    run_reach(
        &parse(text),
        labels,
        SearchOrder::Bfs,
        Covering::Full,
        1024,
        1024,
    )
    .unwrap()
    .0
}

const MUTEX: &str = "system:mutex\n\
    clock:x\n\
    clock:y\n\
    int:lock:0:1:0\n\
    process:A\n\
    process:B\n\
    location:A:idle{initial}\n\
    location:A:cs{labels: critA}\n\
    location:B:idle{initial}\n\
    location:B:cs{labels: critB}\n\
    edge:A:idle:cs:takeA{provided: x<=2 && lock==0; do: lock=1, x=0}\n\
    edge:A:cs:idle:relA{do: lock=0}\n\
    edge:B:idle:cs:takeB{provided: y<=2 && lock==0; do: lock=1, y=0}\n\
    edge:B:cs:idle:relB{do: lock=0}\n";

#[test]
fn mutex_critical_section_reachable() {
    let stats = reach(MUTEX, "critA");
    assert!(stats.reachable);
    assert!(
        stats.stored <= 6,
        "expected at most 6 stored nodes, got {}",
        stats.stored
    );
}

#[test]
fn mutex_exclusion_holds() {
    let stats = reach(MUTEX, "critA,critB");
    assert!(!stats.reachable);
}

#[test]
fn counter_reaches_bound_in_four_steps() {
    let stats = reach(
        "system:counter\n\
         int:c:0:3:0\n\
         process:P\n\
         location:P:l0{initial}\n\
         location:P:goal{labels: done}\n\
         edge:P:l0:l0:tick{provided: c<3; do: c=c+1}\n\
         edge:P:l0:goal:fin{provided: c==3}\n",
        "done",
    );
    assert!(stats.reachable);
    assert_eq!(stats.transitions, 4);
    assert_eq!(stats.stored, 5);
}

fn fischer_process(i: usize) -> String {
    format!(
        "process:P{i}\n\
         location:P{i}:a{{initial}}\n\
         location:P{i}:req{{invariant: x{i}<=k}}\n\
         location:P{i}:wait\n\
         location:P{i}:cs{{labels: cs{i}}}\n\
         edge:P{i}:a:req:try{i}{{provided: id==0; do: x{i}=0}}\n\
         edge:P{i}:req:wait:set{i}{{do: id={i}, x{i}=0}}\n\
         edge:P{i}:wait:cs:enter{i}{{provided: x{i}>k && id=={i}}}\n\
         edge:P{i}:wait:a:fail{i}{{provided: id!={i}}}\n\
         edge:P{i}:cs:a:exit{i}{{do: id=0}}\n"
    )
}

fn fischer(n: usize) -> String {
    let mut text = String::from("system:fischer\n");
    for i in 1..=n {
        text.push_str(&format!("clock:x{}\n", i));
    }
    text.push_str(&format!("int:id:0:{}:0\n", n));
    text.push_str("param:k:2\n");
    for i in 1..=n {
        text.push_str(&fischer_process(i));
    }
    text
}

#[test]
fn fischer_mutual_exclusion() {
    let stats = reach(&fischer(3), "cs1,cs2");
    assert!(!stats.reachable);
    // The protocol does let single processes in.
    let stats = reach(&fischer(3), "cs1");
    assert!(stats.reachable);
}

#[test]
fn urgent_wait_on_unoffered_event_deadlocks() {
    let stats = reach(
        "system:stuck\n\
         clock:x\n\
         process:A\n\
         process:B\n\
         location:A:l0{initial}\n\
         location:A:l1\n\
         location:A:l2{urgent}\n\
         location:A:l3{labels: goal}\n\
         location:B:m0{initial}\n\
         edge:A:l0:l1:e\n\
         edge:A:l1:l2:f\n\
         edge:A:l2:l3:a\n\
         sync:A@a:B@a\n",
        "goal",
    );
    assert!(!stats.reachable);
    assert_eq!(stats.stored, 3);
}

const COVER: &str = "system:cover\n\
    clock:x\n\
    clock:y\n\
    process:P\n\
    location:P:l0{initial}\n\
    location:P:l1\n\
    location:P:mid\n\
    location:P:l2\n\
    edge:P:l0:l1:a{do: x=0, y=0}\n\
    edge:P:l0:mid:c\n\
    edge:P:mid:l1:d{do: x=0}\n\
    edge:P:l1:l2:e{provided: x<=3 && y>=1}\n";

#[test]
fn full_covering_stores_no_more_than_leaf_covering() {
    let full = run_reach(
        &parse(COVER),
        "",
        SearchOrder::Bfs,
        Covering::Full,
        1024,
        1024,
    )
    .unwrap()
    .0;
    let leaf = run_reach(
        &parse(COVER),
        "",
        SearchOrder::Bfs,
        Covering::LeafNodes,
        1024,
        1024,
    )
    .unwrap()
    .0;
    assert!(full.covered >= 1, "expected an eviction, got {:?}", full);
    assert!(
        full.stored <= leaf.stored,
        "full covering stored {} > leaf covering {}",
        full.stored,
        leaf.stored
    );
}

#[test]
fn stored_zones_are_canonical_and_nonempty() {
    let system = Arc::new(System::new(&parse(MUTEX)).unwrap());
    let accepting = 0;
    let mut zg = Zg::new(
        Arc::clone(&system),
        Semantics::Elapsed,
        Extrapolation::LuLocal,
        256,
        256,
        true,
    );
    let (_, graph) = covreach(&mut zg, accepting, SearchOrder::Bfs, Covering::Full);
    assert!(graph.node_count() > 0);
    for id in 0..graph.node_count() {
        let zone = zg.zone(graph.node(id).state);
        assert!(!zone.is_empty());
        assert!(zone.is_canonical());
    }
}

#[test]
fn dot_output_is_independent_of_exploration_order() {
    let render = |order: SearchOrder| {
        let system = Arc::new(System::new(&parse(MUTEX)).unwrap());
        let mut zg = Zg::new(
            system,
            Semantics::Elapsed,
            Extrapolation::LuLocal,
            256,
            256,
            true,
        );
        let (_, graph) = covreach(&mut zg, 0, order, Covering::Full);
        let mut dot = String::new();
        graph
            .dot_output(&mut dot, "mutex", |a, b| {
                zg.state_cmp(graph.node(a).state, graph.node(b).state)
            })
            .unwrap();
        dot
    };
    let bfs = render(SearchOrder::Bfs);
    let dfs = render(SearchOrder::Dfs);
    assert!(bfs.starts_with("digraph mutex {"));
    assert!(bfs.contains("vloc=<idle,idle>"));
    // Lexical state order makes the dump independent of the waiting policy.
    assert_eq!(bfs, dfs);

    // Leaf covering keeps two nodes with the same discrete part, so the
    // comparator falls through to the zone order.
    let system = Arc::new(System::new(&parse(COVER)).unwrap());
    let mut zg = Zg::new(
        system,
        Semantics::Elapsed,
        Extrapolation::LuLocal,
        256,
        256,
        true,
    );
    let (_, graph) = covreach(&mut zg, 0, SearchOrder::Bfs, Covering::LeafNodes);
    let mut dot = String::new();
    graph
        .dot_output(&mut dot, "cover", |a, b| {
            zg.state_cmp(graph.node(a).state, graph.node(b).state)
        })
        .unwrap();
    assert!(dot.starts_with("digraph cover {"));
}

#[test]
fn accepting_self_loop_found_after_two_root_pops() {
    let (stats, _) = run_liveness(
        &parse(
            "system:loop\n\
             process:P\n\
             location:P:l0{initial}\n\
             location:P:l1{labels: acc}\n\
             edge:P:l0:l1:a\n\
             edge:P:l1:l0:b\n",
        ),
        "acc",
        1024,
        1024,
    )
    .unwrap();
    assert!(stats.accepting_cycle);
    assert_eq!(stats.root_pops, 2);
    assert_eq!(stats.visited, 2);
}

#[test]
fn non_accepting_cycle_is_not_reported() {
    let (stats, _) = run_liveness(
        &parse(
            "system:loop\n\
             process:P\n\
             location:P:l0{initial}\n\
             location:P:l1\n\
             edge:P:l0:l1:a\n\
             edge:P:l1:l0:b\n",
        ),
        "",
        1024,
        1024,
    )
    .unwrap();
    assert!(!stats.accepting_cycle);
    assert_eq!(stats.visited, 2);
    // One merge (two pops, one reinstall) plus the closed SCC root.
    assert_eq!(stats.root_pops, 3);
}

#[test]
fn couvscc_on_zone_graph_with_clocks() {
    // The cycle resets its clock, so the zone graph itself is a lasso.
    let (stats, _) = run_liveness(
        &parse(
            "system:timedloop\n\
             clock:x\n\
             process:P\n\
             location:P:l0{initial}\n\
             location:P:l1{labels: acc; invariant: x<=1}\n\
             edge:P:l0:l1:a{do: x=0}\n\
             edge:P:l1:l0:b{provided: x>=1}\n",
        ),
        "acc",
        1024,
        1024,
    )
    .unwrap();
    assert!(stats.accepting_cycle);
}

const PAIR: &str = "system:pair\n\
    clock:x\n\
    clock:y\n\
    process:P\n\
    process:Q\n\
    location:P:l0{initial}\n\
    location:P:l1{labels: pdone}\n\
    location:Q:m0{initial}\n\
    location:Q:m1{labels: qdone}\n\
    edge:P:l0:l1:a{provided: x>=1; do: x=0}\n\
    edge:Q:m0:m1:b{provided: y>=1; do: y=0}\n";

#[test]
fn refzg_with_zero_spread_accepts_synchronizable_finals() {
    let system = Arc::new(System::new(&parse(PAIR)).unwrap());
    let mut refzg = RefZg::new(
        Arc::clone(&system),
        RefClockKind::PerProcess,
        0,
        256,
        256,
        true,
    )
    .unwrap();
    let accepting = system.labels_mask("pdone,qdone").unwrap();
    let (stats, graph) = covreach(&mut refzg, accepting, SearchOrder::Bfs, Covering::Full);
    assert!(stats.reachable);
    // With spread 0 every reachable zone keeps its reference clocks
    // synchronizable.
    for id in 0..graph.node_count() {
        assert!(refzg.is_valid_final(graph.node(id).state));
    }
}

#[test]
fn refzg_entry_points_run_and_reject_shared_variables() {
    let (stats, _) = run_reach_refzg(
        &parse(PAIR),
        "pdone,qdone",
        SearchOrder::Bfs,
        Covering::Full,
        RefClockKind::PerProcess,
        0,
        256,
        256,
    )
    .unwrap();
    assert!(stats.reachable);

    let (stats, _) = run_liveness_refzg(
        &parse(
            "system:loop\n\
             process:P\n\
             location:P:l0{initial}\n\
             location:P:l1{labels: acc}\n\
             edge:P:l0:l1:a\n\
             edge:P:l1:l0:b\n",
        ),
        "acc",
        RefClockKind::PerProcess,
        0,
        256,
        256,
    )
    .unwrap();
    assert!(stats.accepting_cycle);

    // Reference clocks refuse systems with shared integer variables.
    let shared = "system:s\n\
        int:c:0:1:0\n\
        process:P\n\
        process:Q\n\
        location:P:l0{initial}\n\
        location:Q:m0{initial}\n\
        edge:P:l0:l0:a{do: c=1}\n\
        edge:Q:m0:m0:b{provided: c==1}\n";
    let err = run_reach_refzg(
        &parse(shared),
        "",
        SearchOrder::Bfs,
        Covering::Full,
        RefClockKind::PerProcess,
        0,
        256,
        256,
    )
    .unwrap_err();
    assert!(matches!(err, ExploreError::RefZg(_)));
}
