//! Discrete step of the timed-automaton semantics.
//!
//! The discrete step checks the integer parts of invariants and guards,
//! executes statements on the integer store and collects the clock
//! constraint and reset containers that the clock step applies to the zone.
//! Clock constraint bounds are evaluated against the integer store as it
//! stands when the constraint is collected.

use crate::state::{Vedge, Vloc, NO_EDGE};
use crate::syncprod;
use crate::ts::Status;
use zonecheck_system::expr::{ClockRel, Guard};
use zonecheck_system::intval::{
    eval_int, eval_int_guards, ClockReset, EvalEnv, IntVal, StepFault,
};
use zonecheck_system::model::System;

/// A clock constraint with its bound evaluated: `left - right < bound` (or
/// `<=`), `None` standing for the constant zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalCc {
    pub left: Option<usize>,
    pub right: Option<usize>,
    pub strict: bool,
    pub bound: i32,
}

/// Result of a successful discrete step.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteStep {
    pub vloc: Vloc,
    pub intval: IntVal,
    pub src_invariant: Vec<EvalCc>,
    pub guard: Vec<EvalCc>,
    pub resets: Vec<ClockReset>,
    pub tgt_invariant: Vec<EvalCc>,
}

fn fault_status(fault: StepFault) -> Status {
    match fault {
        StepFault::OutOfBounds { .. } => Status::IntvarViolated,
        StepFault::DivisionByZero => Status::StatementFailed,
    }
}

fn collect_clock_constraints(
    guard: &Guard,
    env: EvalEnv,
    out: &mut Vec<EvalCc>,
) -> Result<(), Status> {
    for cc in &guard.clock {
        let bound = eval_int(&cc.bound, env).map_err(fault_status)?;
        out.push(EvalCc {
            left: cc.left,
            right: cc.right,
            strict: cc.rel == ClockRel::Lt,
            bound,
        });
    }
    Ok(())
}

/// Evaluate the invariant of every location in a vloc: the integer parts
/// must hold, the clock parts are collected.
pub fn invariant_constraints(
    system: &System,
    vloc: &Vloc,
    intval: &IntVal,
) -> Result<Vec<EvalCc>, Status> {
    let env = EvalEnv {
        vars: intval.values(),
        params: system.param_values(),
    };
    let mut out = Vec::new();
    for &loc in vloc {
        let invariant = &system.location(loc).invariant;
        match eval_int_guards(&invariant.int, env) {
            Ok(true) => {}
            Ok(false) => return Err(Status::InvariantViolated),
            Err(fault) => return Err(fault_status(fault)),
        }
        collect_clock_constraints(invariant, env, &mut out)?;
    }
    Ok(out)
}

/// Discrete part of the initial state at a tuple of initial locations.
pub fn initial_discrete(system: &System, vloc: &Vloc) -> Result<(IntVal, Vec<EvalCc>), Status> {
    let intval = IntVal::initial(system);
    let invariant = invariant_constraints(system, vloc, &intval)?;
    Ok((intval, invariant))
}

/// Discrete part of a step along a joint edge.
///
/// Guards are checked and statements executed in increasing process id
/// order; a later guard sees the writes of earlier statements, matching the
/// sequential reading of a joint step.
pub fn next_discrete(
    system: &System,
    vloc: &Vloc,
    intval: &IntVal,
    vedge: &Vedge,
) -> Result<DiscreteStep, Status> {
    let src_invariant = invariant_constraints(system, vloc, intval)?;

    let params = system.param_values();
    let mut cur = intval.clone();
    let mut guard = Vec::new();
    let mut resets = Vec::new();
    for (pid, &e) in vedge.iter().enumerate() {
        if e == NO_EDGE {
            continue;
        }
        let edge = system.edge(e);
        debug_assert_eq!(edge.pid, pid);
        let env = EvalEnv {
            vars: cur.values(),
            params,
        };
        match eval_int_guards(&edge.guard.int, env) {
            Ok(true) => {}
            Ok(false) => return Err(Status::GuardViolated),
            Err(fault) => return Err(fault_status(fault)),
        }
        collect_clock_constraints(&edge.guard, env, &mut guard)?;
        cur = cur
            .execute(system, &edge.statement, &mut resets)
            .map_err(fault_status)?;
    }

    let next = syncprod::next_vloc(system, vloc, vedge).ok_or(Status::IncompatibleEdge)?;
    let tgt_invariant = invariant_constraints(system, &next, &cur)?;

    Ok(DiscreteStep {
        vloc: next,
        intval: cur,
        src_invariant,
        guard,
        resets,
        tgt_invariant,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;
    use zonecheck_system::decl;

    fn compile(text: &str) -> System {
        System::new(&decl::parse(text).unwrap()).unwrap()
    }

    fn counter() -> System {
        compile(
            "system:counter\n\
             clock:x\n\
             int:c:0:3:0\n\
             process:P\n\
             location:P:l0{initial; invariant: x<=5}\n\
             location:P:l1\n\
             edge:P:l0:l0:tick{provided: c<3; do: c=c+1, x=0}\n\
             edge:P:l0:l1:done{provided: c==3}\n",
        )
    }

    #[test]
    fn test_initial_discrete() {
        let sys = counter();
        let vloc: Vloc = smallvec![0];
        let (intval, inv) = initial_discrete(&sys, &vloc).unwrap();
        assert_eq!(intval.values(), &[0]);
        assert_eq!(
            inv,
            vec![EvalCc {
                left: Some(0),
                right: None,
                strict: false,
                bound: 5
            }]
        );
    }

    #[test]
    fn test_next_discrete_updates_store() {
        let sys = counter();
        let vloc: Vloc = smallvec![0];
        let intval = IntVal::initial(&sys);
        let vedge: Vedge = smallvec![0];
        let step = next_discrete(&sys, &vloc, &intval, &vedge).unwrap();
        assert_eq!(step.intval.values(), &[1]);
        assert_eq!(step.vloc.to_vec(), vec![0]);
        assert_eq!(step.resets.len(), 1);
        assert_eq!(step.resets[0].clock, 0);
        // Source and target invariant both collected from l0.
        assert_eq!(step.src_invariant.len(), 1);
        assert_eq!(step.tgt_invariant.len(), 1);
    }

    #[test]
    fn test_guard_violated() {
        let sys = counter();
        let vloc: Vloc = smallvec![0];
        let intval = IntVal::initial(&sys);
        let vedge: Vedge = smallvec![1];
        assert_eq!(
            next_discrete(&sys, &vloc, &intval, &vedge),
            Err(Status::GuardViolated)
        );
    }

    #[test]
    fn test_intvar_violated_on_out_of_bounds_write() {
        let sys = compile(
            "system:s\n\
             int:c:0:3:2\n\
             process:P\n\
             location:P:l0{initial}\n\
             edge:P:l0:l0:bump{do: c=c+2}\n",
        );
        let vloc: Vloc = smallvec![0];
        let intval = IntVal::initial(&sys);
        let vedge: Vedge = smallvec![0];
        assert_eq!(
            next_discrete(&sys, &vloc, &intval, &vedge),
            Err(Status::IntvarViolated)
        );
    }

    #[test]
    fn test_statement_failed_on_division_by_zero() {
        let sys = compile(
            "system:s\n\
             int:c:0:3:0\n\
             process:P\n\
             location:P:l0{initial}\n\
             edge:P:l0:l0:e{do: c=1/c}\n",
        );
        let vloc: Vloc = smallvec![0];
        let intval = IntVal::initial(&sys);
        let vedge: Vedge = smallvec![0];
        assert_eq!(
            next_discrete(&sys, &vloc, &intval, &vedge),
            Err(Status::StatementFailed)
        );
    }

    #[test]
    fn test_incompatible_edge() {
        let sys = counter();
        let vloc: Vloc = smallvec![1];
        let intval = IntVal::from_values(vec![3]);
        let vedge: Vedge = smallvec![1];
        assert_eq!(
            next_discrete(&sys, &vloc, &intval, &vedge),
            Err(Status::IncompatibleEdge)
        );
    }
}
