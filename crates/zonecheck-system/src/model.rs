//! Compiled system model: id-indexed processes, locations, edges and
//! synchronization vectors, with guards and statements resolved to typed
//! trees.

use crate::decl::SystemDecl;
use crate::expr::{
    self, guard_reads, statement_reads, statement_writes, Guard, Statement, Symbols,
};
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

/// Hard cap on masked entities: labels, processes, integer variables and
/// parameters are tracked in `u64` bit sets.
const MASK_CAPACITY: usize = 64;

/// Build-time validation error. Malformed declarations are fatal; nothing
/// here is recoverable during exploration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SystemError {
    #[error("duplicate {kind} '{name}'")]
    Duplicate { kind: &'static str, name: String },

    #[error("unknown location '{name}' in process '{process}'")]
    UnknownLocation { process: String, name: String },

    #[error("unknown process '{name}' in synchronization")]
    UnknownSyncProcess { name: String },

    #[error("process '{name}' appears twice in one synchronization")]
    SyncProcessRepeated { name: String },

    #[error("integer variable '{name}' has empty range [{min}, {max}]")]
    BadRange { name: String, min: i32, max: i32 },

    #[error("initial value {value} of '{name}' outside [{min}, {max}]")]
    InitialOutOfRange {
        name: String,
        value: i32,
        min: i32,
        max: i32,
    },

    #[error("too many {kind}: {count} exceeds the supported {max}")]
    TooMany {
        kind: &'static str,
        count: usize,
        max: usize,
    },

    #[error("unknown label '{name}'")]
    UnknownLabel { name: String },

    #[error("in {context}: {source}")]
    Expr {
        context: String,
        source: expr::ExprError,
    },
}

pub type SystemResult<T> = Result<T, SystemError>;

#[derive(Debug, Clone)]
pub struct ClockInfo {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct IntVarInfo {
    pub name: String,
    pub min: i32,
    pub max: i32,
    pub initial: i32,
}

#[derive(Debug, Clone)]
pub struct ParamInfo {
    pub name: String,
    pub value: i32,
}

/// A location of one process.
#[derive(Debug, Clone)]
pub struct Location {
    pub id: usize,
    pub pid: usize,
    pub name: String,
    pub initial: bool,
    pub committed: bool,
    pub urgent: bool,
    /// Bit mask over system labels.
    pub labels: u64,
    pub invariant: Guard,
}

/// An edge of one process.
#[derive(Debug, Clone)]
pub struct Edge {
    pub id: usize,
    pub pid: usize,
    pub src: usize,
    pub tgt: usize,
    pub event: usize,
    pub guard: Guard,
    pub statement: Statement,
}

#[derive(Debug, Clone)]
pub struct SyncEndpoint {
    pub process: usize,
    pub event: usize,
    pub weak: bool,
}

/// A synchronization vector; endpoints sorted by process id.
#[derive(Debug, Clone)]
pub struct Sync {
    pub endpoints: Vec<SyncEndpoint>,
}

#[derive(Debug, Clone)]
pub struct Process {
    pub id: usize,
    pub name: String,
    /// Location ids of this process, in declaration order.
    pub locations: Vec<usize>,
    /// Initial location ids, in declaration order.
    pub initial_locations: Vec<usize>,
}

/// A compiled system.
#[derive(Debug, Clone)]
pub struct System {
    name: String,
    processes: Vec<Process>,
    locations: Vec<Location>,
    edges: Vec<Edge>,
    events: Vec<String>,
    labels: Vec<String>,
    clocks: Vec<ClockInfo>,
    intvars: Vec<IntVarInfo>,
    params: Vec<ParamInfo>,
    param_values: Vec<i32>,
    syncs: Vec<Sync>,
    /// Edge ids leaving each location, sorted by edge id.
    outgoing: Vec<Vec<usize>>,
    /// `pid * events.len() + event`: whether some sync constrains the pair.
    sync_constrained: Vec<bool>,
    /// Per clock: mask of processes whose guards, invariants or statements
    /// mention it.
    clock_access: Vec<u64>,
    /// Per integer variable: mask of accessing processes.
    intvar_access: Vec<u64>,
}

impl System {
    /// Compile a declaration tree. All name resolution and validation
    /// happens here; the result is immutable.
    pub fn new(decl: &SystemDecl) -> SystemResult<System> {
        let mut events: Vec<String> = Vec::new();
        let mut event_ids: HashMap<String, usize> = HashMap::new();
        for name in &decl.events {
            intern(&mut events, &mut event_ids, name);
        }

        let clocks: Vec<ClockInfo> = decl
            .clocks
            .iter()
            .map(|name| ClockInfo { name: name.clone() })
            .collect();
        let clock_ids = unique_index(
            decl.clocks.iter().map(String::as_str),
            "clock",
        )?;
        if clocks.len() >= MASK_CAPACITY {
            return Err(SystemError::TooMany {
                kind: "clocks",
                count: clocks.len(),
                max: MASK_CAPACITY - 1,
            });
        }

        let mut intvars = Vec::new();
        for v in &decl.intvars {
            if v.min > v.max {
                return Err(SystemError::BadRange {
                    name: v.name.clone(),
                    min: v.min,
                    max: v.max,
                });
            }
            if v.initial < v.min || v.initial > v.max {
                return Err(SystemError::InitialOutOfRange {
                    name: v.name.clone(),
                    value: v.initial,
                    min: v.min,
                    max: v.max,
                });
            }
            intvars.push(IntVarInfo {
                name: v.name.clone(),
                min: v.min,
                max: v.max,
                initial: v.initial,
            });
        }
        let intvar_ids = unique_index(
            decl.intvars.iter().map(|v| v.name.as_str()),
            "integer variable",
        )?;
        if intvars.len() > MASK_CAPACITY {
            return Err(SystemError::TooMany {
                kind: "integer variables",
                count: intvars.len(),
                max: MASK_CAPACITY,
            });
        }

        let params: Vec<ParamInfo> = decl
            .params
            .iter()
            .map(|p| ParamInfo {
                name: p.name.clone(),
                value: p.value,
            })
            .collect();
        let param_ids = unique_index(
            decl.params.iter().map(|p| p.name.as_str()),
            "parameter",
        )?;
        if params.len() > MASK_CAPACITY {
            return Err(SystemError::TooMany {
                kind: "parameters",
                count: params.len(),
                max: MASK_CAPACITY,
            });
        }
        let param_values: Vec<i32> = params.iter().map(|p| p.value).collect();

        if decl.processes.len() > MASK_CAPACITY {
            return Err(SystemError::TooMany {
                kind: "processes",
                count: decl.processes.len(),
                max: MASK_CAPACITY,
            });
        }
        let process_ids = unique_index(
            decl.processes.iter().map(|p| p.name.as_str()),
            "process",
        )?;

        let syms = Symbols {
            clocks: &clock_ids,
            intvars: &intvar_ids,
            params: &param_ids,
        };

        let mut labels: Vec<String> = Vec::new();
        let mut label_ids: HashMap<String, usize> = HashMap::new();
        let mut processes = Vec::new();
        let mut locations: Vec<Location> = Vec::new();
        let mut edges: Vec<Edge> = Vec::new();

        for (pid, pdecl) in decl.processes.iter().enumerate() {
            let mut process = Process {
                id: pid,
                name: pdecl.name.clone(),
                locations: Vec::new(),
                initial_locations: Vec::new(),
            };
            let mut local_ids: HashMap<&str, usize> = HashMap::new();
            for ldecl in &pdecl.locations {
                if local_ids.contains_key(ldecl.name.as_str()) {
                    return Err(SystemError::Duplicate {
                        kind: "location",
                        name: format!("{}.{}", pdecl.name, ldecl.name),
                    });
                }
                let id = locations.len();
                local_ids.insert(&ldecl.name, id);
                let mut label_mask = 0u64;
                for label in &ldecl.labels {
                    let lid = intern(&mut labels, &mut label_ids, label);
                    if lid >= MASK_CAPACITY {
                        return Err(SystemError::TooMany {
                            kind: "labels",
                            count: lid + 1,
                            max: MASK_CAPACITY,
                        });
                    }
                    label_mask |= 1 << lid;
                }
                let invariant = match &ldecl.invariant {
                    Some(text) => expr::parse_guard(text, &syms).map_err(|source| {
                        SystemError::Expr {
                            context: format!("invariant of {}.{}", pdecl.name, ldecl.name),
                            source,
                        }
                    })?,
                    None => Guard::always(),
                };
                locations.push(Location {
                    id,
                    pid,
                    name: ldecl.name.clone(),
                    initial: ldecl.initial,
                    committed: ldecl.committed,
                    urgent: ldecl.urgent,
                    labels: label_mask,
                    invariant,
                });
                process.locations.push(id);
                if ldecl.initial {
                    process.initial_locations.push(id);
                }
            }
            if process.initial_locations.is_empty() {
                warn!(process = %pdecl.name, "process has no initial location; system has no initial state");
            }

            for edecl in &pdecl.edges {
                let src = *local_ids.get(edecl.source.as_str()).ok_or_else(|| {
                    SystemError::UnknownLocation {
                        process: pdecl.name.clone(),
                        name: edecl.source.clone(),
                    }
                })?;
                let tgt = *local_ids.get(edecl.target.as_str()).ok_or_else(|| {
                    SystemError::UnknownLocation {
                        process: pdecl.name.clone(),
                        name: edecl.target.clone(),
                    }
                })?;
                let event = intern(&mut events, &mut event_ids, &edecl.event);
                let guard = match &edecl.guard {
                    Some(text) => expr::parse_guard(text, &syms).map_err(|source| {
                        SystemError::Expr {
                            context: format!(
                                "guard of {}.{} -> {}.{}",
                                pdecl.name, edecl.source, pdecl.name, edecl.target
                            ),
                            source,
                        }
                    })?,
                    None => Guard::always(),
                };
                let statement = match &edecl.statement {
                    Some(text) => expr::parse_statement(text, &syms).map_err(|source| {
                        SystemError::Expr {
                            context: format!(
                                "statement of {}.{} -> {}.{}",
                                pdecl.name, edecl.source, pdecl.name, edecl.target
                            ),
                            source,
                        }
                    })?,
                    None => Statement::nop(),
                };
                edges.push(Edge {
                    id: edges.len(),
                    pid,
                    src,
                    tgt,
                    event,
                    guard,
                    statement,
                });
            }
            processes.push(process);
        }

        let mut syncs = Vec::new();
        for sdecl in &decl.syncs {
            let mut endpoints = Vec::new();
            for ep in &sdecl.endpoints {
                let process = *process_ids.get(&ep.process).ok_or_else(|| {
                    SystemError::UnknownSyncProcess {
                        name: ep.process.clone(),
                    }
                })?;
                let event = intern(&mut events, &mut event_ids, &ep.event);
                endpoints.push(SyncEndpoint {
                    process,
                    event,
                    weak: ep.weak,
                });
            }
            endpoints.sort_by_key(|ep| ep.process);
            if endpoints.windows(2).any(|w| w[0].process == w[1].process) {
                let repeated = endpoints
                    .windows(2)
                    .find(|w| w[0].process == w[1].process)
                    .map(|w| processes[w[0].process].name.clone())
                    .unwrap_or_default();
                return Err(SystemError::SyncProcessRepeated { name: repeated });
            }
            syncs.push(Sync { endpoints });
        }

        let mut outgoing = vec![Vec::new(); locations.len()];
        for edge in &edges {
            outgoing[edge.src].push(edge.id);
        }

        let mut sync_constrained = vec![false; processes.len() * events.len()];
        for sync in &syncs {
            for ep in &sync.endpoints {
                sync_constrained[ep.process * events.len() + ep.event] = true;
            }
        }

        let mut clock_access = vec![0u64; clocks.len()];
        let mut intvar_access = vec![0u64; intvars.len()];
        let mut record = |sets: expr::VarSets, pid: usize| {
            for c in 0..clocks.len() {
                if sets.clocks & (1 << c) != 0 {
                    clock_access[c] |= 1 << pid;
                }
            }
            for v in 0..intvars.len() {
                if sets.intvars & (1 << v) != 0 {
                    intvar_access[v] |= 1 << pid;
                }
            }
        };
        for loc in &locations {
            record(guard_reads(&loc.invariant), loc.pid);
        }
        for edge in &edges {
            record(guard_reads(&edge.guard), edge.pid);
            record(
                statement_reads(&edge.statement).union(statement_writes(&edge.statement)),
                edge.pid,
            );
        }

        Ok(System {
            name: decl.name.clone(),
            processes,
            locations,
            edges,
            events,
            labels,
            clocks,
            intvars,
            params,
            param_values,
            syncs,
            outgoing,
            sync_constrained,
            clock_access,
            intvar_access,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    #[inline]
    pub fn location(&self, id: usize) -> &Location {
        &self.locations[id]
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    #[inline]
    pub fn edge(&self, id: usize) -> &Edge {
        &self.edges[id]
    }

    /// Edge ids leaving a location, in increasing edge id order.
    #[inline]
    pub fn outgoing_edges(&self, location: usize) -> &[usize] {
        &self.outgoing[location]
    }

    pub fn events(&self) -> &[String] {
        &self.events
    }

    pub fn event_name(&self, event: usize) -> &str {
        &self.events[event]
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn clocks(&self) -> &[ClockInfo] {
        &self.clocks
    }

    pub fn clock_count(&self) -> usize {
        self.clocks.len()
    }

    pub fn intvars(&self) -> &[IntVarInfo] {
        &self.intvars
    }

    pub fn params(&self) -> &[ParamInfo] {
        &self.params
    }

    pub fn param_values(&self) -> &[i32] {
        &self.param_values
    }

    pub fn syncs(&self) -> &[Sync] {
        &self.syncs
    }

    /// Whether some synchronization vector constrains `(process, event)`.
    /// Unconstrained events fire asynchronously.
    #[inline]
    pub fn sync_constrained(&self, pid: usize, event: usize) -> bool {
        self.sync_constrained[pid * self.events.len() + event]
    }

    /// Translate a comma-separated label list into a bit mask.
    pub fn labels_mask(&self, csv: &str) -> SystemResult<u64> {
        let mut mask = 0u64;
        for name in csv.split(',') {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            match self.labels.iter().position(|l| l == name) {
                Some(lid) => mask |= 1 << lid,
                None => {
                    return Err(SystemError::UnknownLabel {
                        name: name.to_string(),
                    })
                }
            }
        }
        Ok(mask)
    }

    /// Comma-separated names of the labels in a mask.
    pub fn label_names(&self, mask: u64) -> String {
        let mut out = String::new();
        for (lid, name) in self.labels.iter().enumerate() {
            if mask & (1 << lid) != 0 {
                if !out.is_empty() {
                    out.push(',');
                }
                out.push_str(name);
            }
        }
        out
    }

    /// Mask of processes accessing a clock.
    #[inline]
    pub fn clock_access(&self, clock: usize) -> u64 {
        self.clock_access[clock]
    }

    /// Whether some integer variable is accessed by more than one process.
    pub fn has_shared_intvar(&self) -> bool {
        self.intvar_access
            .iter()
            .any(|mask| mask.count_ones() > 1)
    }

    /// The single process accessing a clock, if it is not shared. Clocks
    /// accessed by no process report `None` as well.
    pub fn clock_owner(&self, clock: usize) -> Option<usize> {
        let mask = self.clock_access[clock];
        if mask.count_ones() == 1 {
            Some(mask.trailing_zeros() as usize)
        } else {
            None
        }
    }
}

fn intern(names: &mut Vec<String>, ids: &mut HashMap<String, usize>, name: &str) -> usize {
    if let Some(&id) = ids.get(name) {
        return id;
    }
    let id = names.len();
    names.push(name.to_string());
    ids.insert(name.to_string(), id);
    id
}

fn unique_index<'a>(
    names: impl Iterator<Item = &'a str>,
    kind: &'static str,
) -> SystemResult<HashMap<String, usize>> {
    let mut out = HashMap::new();
    for (idx, name) in names.enumerate() {
        if out.insert(name.to_string(), idx).is_some() {
            return Err(SystemError::Duplicate {
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl;

    fn demo() -> System {
        let decl = decl::parse(
            "system:demo\n\
             clock:x\n\
             clock:y\n\
             int:c:0:3:0\n\
             process:P\n\
             process:Q\n\
             location:P:l0{initial; labels: crit}\n\
             location:P:l1{invariant: x<=2}\n\
             location:Q:m0{initial}\n\
             edge:P:l0:l1:go{provided: x<2; do: x=0}\n\
             edge:P:l1:l0:back\n\
             edge:Q:m0:m0:tick{do: y=0, c=c+1}\n\
             sync:P@go:Q@tick?\n",
        )
        .unwrap();
        System::new(&decl).unwrap()
    }

    #[test]
    fn test_compile_demo() {
        let sys = demo();
        assert_eq!(sys.process_count(), 2);
        assert_eq!(sys.locations().len(), 3);
        assert_eq!(sys.edges().len(), 3);
        assert_eq!(sys.labels(), &["crit".to_string()]);
        assert_eq!(sys.outgoing_edges(0), &[0]);
        assert_eq!(sys.processes()[0].initial_locations, vec![0]);
    }

    #[test]
    fn test_sync_constrained() {
        let sys = demo();
        let go = sys.events().iter().position(|e| e == "go").unwrap();
        let tick = sys.events().iter().position(|e| e == "tick").unwrap();
        let back = sys.events().iter().position(|e| e == "back").unwrap();
        assert!(sys.sync_constrained(0, go));
        assert!(sys.sync_constrained(1, tick));
        assert!(!sys.sync_constrained(0, back));
        assert!(!sys.sync_constrained(1, go));
    }

    #[test]
    fn test_labels_mask_roundtrip() {
        let sys = demo();
        let mask = sys.labels_mask("crit").unwrap();
        assert_eq!(mask, 0b1);
        assert_eq!(sys.label_names(mask), "crit");
        assert!(sys.labels_mask("nope").is_err());
        assert_eq!(sys.labels_mask("").unwrap(), 0);
    }

    #[test]
    fn test_clock_access_and_ownership() {
        let sys = demo();
        // x is used only by P, y only by Q.
        assert_eq!(sys.clock_access(0), 0b01);
        assert_eq!(sys.clock_access(1), 0b10);
        assert_eq!(sys.clock_owner(0), Some(0));
        assert_eq!(sys.clock_owner(1), Some(1));
        // c is written by Q only.
        assert!(!sys.has_shared_intvar());
    }

    #[test]
    fn test_duplicate_clock_rejected() {
        let decl = decl::parse("system:s\nclock:x\nclock:x\nprocess:P\n").unwrap();
        assert!(matches!(
            System::new(&decl),
            Err(SystemError::Duplicate { kind: "clock", .. })
        ));
    }

    #[test]
    fn test_unknown_edge_location_rejected() {
        let decl = decl::parse(
            "system:s\nprocess:P\nlocation:P:l0{initial}\nedge:P:l0:nowhere:e\n",
        )
        .unwrap();
        assert!(matches!(
            System::new(&decl),
            Err(SystemError::UnknownLocation { .. })
        ));
    }

    #[test]
    fn test_sync_process_repeated_rejected() {
        let decl = decl::parse(
            "system:s\nprocess:P\nprocess:Q\nlocation:P:l0{initial}\nlocation:Q:m0{initial}\nsync:P@a:P@b\n",
        )
        .unwrap();
        assert!(matches!(
            System::new(&decl),
            Err(SystemError::SyncProcessRepeated { .. })
        ));
    }

    #[test]
    fn test_bad_int_range_rejected() {
        let decl = decl::parse("system:s\nint:c:3:0:0\nprocess:P\n").unwrap();
        assert!(matches!(System::new(&decl), Err(SystemError::BadRange { .. })));
    }
}
