//! LU clock-bound analysis feeding extrapolation.
//!
//! For every location and clock the analysis computes `L` (the largest
//! constant the clock is compared against from below) and `U` (from above).
//! Bounds come from invariants and guards and propagate backward across
//! edges for clocks the edge does not reset; a reset `x := y + v` carries
//! the bounds of `x` at the target over to `y` at the source, shifted by
//! `v`. The result is a fixpoint; `NO_BOUND` means the clock is never
//! compared and extrapolation may abstract it completely.
//!
//! Bound expressions may mention integer variables; their contribution is
//! over-approximated by interval evaluation over the declared variable
//! ranges, which only ever makes extrapolation finer, never unsound.

use tracing::warn;
use zonecheck_dbm::db::INF_BOUND;
use zonecheck_dbm::{Bound, NO_BOUND};
use zonecheck_system::expr::{statement_writes, ClockConstraint, IntExpr, IntOp, Update};
use zonecheck_system::model::System;

use crate::state::Vloc;

/// Cap for bound magnitudes; anything larger behaves as "never abstract".
const MAX_BOUND: Bound = INF_BOUND / 2;

const MAX_ITERATIONS: usize = 1000;

/// Per-location LU bound maps, indexed `[location][clock]`.
#[derive(Debug, Clone)]
pub struct ClockBounds {
    clock_count: usize,
    l: Vec<Vec<Bound>>,
    u: Vec<Vec<Bound>>,
}

impl ClockBounds {
    /// Run the backward fixpoint on a compiled system.
    pub fn compute(system: &System) -> ClockBounds {
        let nlocs = system.locations().len();
        let nclocks = system.clock_count();
        let mut l = vec![vec![NO_BOUND; nclocks]; nlocs];
        let mut u = vec![vec![NO_BOUND; nclocks]; nlocs];

        // Seed with invariant and guard constants.
        for loc in system.locations() {
            for cc in &loc.invariant.clock {
                seed(system, cc, &mut l[loc.id], &mut u[loc.id]);
            }
        }
        for edge in system.edges() {
            for cc in &edge.guard.clock {
                seed(system, cc, &mut l[edge.src], &mut u[edge.src]);
            }
        }

        // Backward propagation across edges until stable.
        let mut iterations = 0;
        loop {
            let mut changed = false;
            for edge in system.edges() {
                let written = statement_writes(&edge.statement).clocks;
                for c in 0..nclocks {
                    if written & (1 << c) == 0 {
                        let lb = l[edge.tgt][c];
                        let ub = u[edge.tgt][c];
                        changed |= raise(&mut l, edge.src, c, lb);
                        changed |= raise(&mut u, edge.src, c, ub);
                    }
                }
                for update in &edge.statement.updates {
                    if let Some((clock, from, shift)) = reset_source(system, update) {
                        let lb = shifted(l[edge.tgt][clock], shift);
                        let ub = shifted(u[edge.tgt][clock], shift);
                        changed |= raise(&mut l, edge.src, from, lb);
                        changed |= raise(&mut u, edge.src, from, ub);
                    }
                }
            }
            if !changed {
                break;
            }
            iterations += 1;
            if iterations >= MAX_ITERATIONS {
                warn!(
                    iterations,
                    "clock bound analysis did not converge; saturating all bounds"
                );
                for row in l.iter_mut().chain(u.iter_mut()) {
                    for b in row.iter_mut() {
                        if *b != NO_BOUND {
                            *b = MAX_BOUND;
                        }
                    }
                }
                break;
            }
        }

        ClockBounds {
            clock_count: nclocks,
            l,
            u,
        }
    }

    /// Fill DBM-indexed bound vectors (entry 0 is the zero clock) with the
    /// maximum over the locations of a vloc.
    pub fn vloc_lu(&self, vloc: &Vloc, l: &mut [Bound], u: &mut [Bound]) {
        debug_assert_eq!(l.len(), self.clock_count + 1);
        debug_assert_eq!(u.len(), self.clock_count + 1);
        l[0] = 0;
        u[0] = 0;
        for c in 0..self.clock_count {
            let mut lb = NO_BOUND;
            let mut ub = NO_BOUND;
            for &loc in vloc {
                lb = lb.max(self.l[loc][c]);
                ub = ub.max(self.u[loc][c]);
            }
            l[c + 1] = lb;
            u[c + 1] = ub;
        }
    }

    /// Global (location-independent) LU bound vectors, DBM-indexed.
    pub fn global_lu(&self) -> (Vec<Bound>, Vec<Bound>) {
        let mut l = vec![NO_BOUND; self.clock_count + 1];
        let mut u = vec![NO_BOUND; self.clock_count + 1];
        l[0] = 0;
        u[0] = 0;
        for c in 0..self.clock_count {
            for loc in 0..self.l.len() {
                l[c + 1] = l[c + 1].max(self.l[loc][c]);
                u[c + 1] = u[c + 1].max(self.u[loc][c]);
            }
        }
        (l, u)
    }

    /// Global M bounds (the maximum of L and U per clock), DBM-indexed.
    pub fn global_m(&self) -> Vec<Bound> {
        let (l, u) = self.global_lu();
        l.iter().zip(u.iter()).map(|(&a, &b)| a.max(b)).collect()
    }

    /// L bound of one clock at one location (for tests).
    pub fn l_at(&self, location: usize, clock: usize) -> Bound {
        self.l[location][clock]
    }

    /// U bound of one clock at one location (for tests).
    pub fn u_at(&self, location: usize, clock: usize) -> Bound {
        self.u[location][clock]
    }
}

fn raise(rows: &mut [Vec<Bound>], loc: usize, clock: usize, bound: Bound) -> bool {
    if bound != NO_BOUND && bound > rows[loc][clock] {
        rows[loc][clock] = bound;
        true
    } else {
        false
    }
}

fn shifted(bound: Bound, shift: (i64, i64)) -> Bound {
    if bound == NO_BOUND {
        return NO_BOUND;
    }
    // `x := y + v` with x bounded by b at the target bounds y by b - v at
    // the source; use the smallest v to stay conservative.
    let (lo, _hi) = shift;
    clamp(bound as i64 - lo)
}

fn clamp(v: i64) -> Bound {
    v.clamp(NO_BOUND as i64 + 1, MAX_BOUND as i64) as Bound
}

/// For resets copying another clock, the `(clock, from, value range)`
/// triple; resets to constants propagate nothing.
fn reset_source(system: &System, update: &Update) -> Option<(usize, usize, (i64, i64))> {
    match update {
        Update::ResetToClock { clock, from } => Some((*clock, *from, (0, 0))),
        Update::ResetToSum { clock, from, value } => {
            Some((*clock, *from, expr_range(system, value)))
        }
        _ => None,
    }
}

fn seed(system: &System, cc: &ClockConstraint, l: &mut [Bound], u: &mut [Bound]) {
    let (lo, hi) = expr_range(system, &cc.bound);
    // `left - right <= bound`: an upper bound on `left`, a lower bound on
    // `right` (with the sign flipped).
    if let Some(x) = cc.left {
        let b = clamp(hi);
        if b > u[x] {
            u[x] = b;
        }
    }
    if let Some(y) = cc.right {
        let b = clamp(-lo);
        if b > l[y] {
            l[y] = b;
        }
    }
}

/// Interval over-approximation of an integer expression, with variables
/// ranging over their declared bounds and parameters exact.
fn expr_range(system: &System, e: &IntExpr) -> (i64, i64) {
    const WIDE: (i64, i64) = (-(MAX_BOUND as i64), MAX_BOUND as i64);
    match e {
        IntExpr::Const(n) => (*n as i64, *n as i64),
        IntExpr::Var(v) => {
            let info = &system.intvars()[*v];
            (info.min as i64, info.max as i64)
        }
        IntExpr::Param(p) => {
            let v = system.param_values()[*p] as i64;
            (v, v)
        }
        IntExpr::Neg(inner) => {
            let (lo, hi) = expr_range(system, inner);
            (-hi, -lo)
        }
        IntExpr::Binary { op, left, right } => {
            let (llo, lhi) = expr_range(system, left);
            let (rlo, rhi) = expr_range(system, right);
            match op {
                IntOp::Add => (llo + rlo, lhi + rhi),
                IntOp::Sub => (llo - rhi, lhi - rlo),
                IntOp::Mul => {
                    let candidates = [llo * rlo, llo * rhi, lhi * rlo, lhi * rhi];
                    (
                        *candidates.iter().min().unwrap(),
                        *candidates.iter().max().unwrap(),
                    )
                }
                // Division and modulo are rare in clock bounds; stay coarse.
                IntOp::Div | IntOp::Mod => WIDE,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;
    use zonecheck_system::decl;

    fn compile(text: &str) -> System {
        System::new(&decl::parse(text).unwrap()).unwrap()
    }

    #[test]
    fn test_guard_and_invariant_seed() {
        let sys = compile(
            "system:s\n\
             clock:x\n\
             process:P\n\
             location:P:l0{initial; invariant: x<=7}\n\
             location:P:l1\n\
             edge:P:l0:l1:e{provided: x>2; do: x=0}\n",
        );
        let bounds = ClockBounds::compute(&sys);
        // invariant x<=7 is an upper bound, guard x>2 a lower bound.
        assert_eq!(bounds.u_at(0, 0), 7);
        assert_eq!(bounds.l_at(0, 0), 2);
        assert_eq!(bounds.l_at(1, 0), NO_BOUND);
    }

    #[test]
    fn test_unreset_clock_propagates_backward() {
        let sys = compile(
            "system:s\n\
             clock:x\n\
             process:P\n\
             location:P:l0{initial}\n\
             location:P:l1\n\
             location:P:l2\n\
             edge:P:l0:l1:a\n\
             edge:P:l1:l2:b{provided: x<=9}\n",
        );
        let bounds = ClockBounds::compute(&sys);
        assert_eq!(bounds.u_at(1, 0), 9);
        // x is not reset on l0 -> l1, so the bound reaches l0.
        assert_eq!(bounds.u_at(0, 0), 9);
    }

    #[test]
    fn test_reset_stops_propagation() {
        let sys = compile(
            "system:s\n\
             clock:x\n\
             process:P\n\
             location:P:l0{initial}\n\
             location:P:l1\n\
             edge:P:l0:l1:a{do: x=0}\n\
             edge:P:l1:l1:b{provided: x<=9}\n",
        );
        let bounds = ClockBounds::compute(&sys);
        assert_eq!(bounds.u_at(1, 0), 9);
        assert_eq!(bounds.u_at(0, 0), NO_BOUND);
    }

    #[test]
    fn test_copy_reset_carries_shifted_bound() {
        let sys = compile(
            "system:s\n\
             clock:x\n\
             clock:y\n\
             process:P\n\
             location:P:l0{initial}\n\
             location:P:l1\n\
             edge:P:l0:l1:a{do: x=y+3}\n\
             edge:P:l1:l1:b{provided: x<=9}\n",
        );
        let bounds = ClockBounds::compute(&sys);
        // x <= 9 at l1 bounds y by 6 at l0.
        assert_eq!(bounds.u_at(0, 1), 6);
    }

    #[test]
    fn test_vloc_bounds_take_maximum() {
        let sys = compile(
            "system:s\n\
             clock:x\n\
             process:P\n\
             process:Q\n\
             location:P:l0{initial; invariant: x<=3}\n\
             location:Q:m0{initial; invariant: x<=5}\n",
        );
        let bounds = ClockBounds::compute(&sys);
        let vloc: Vloc = smallvec![0, 1];
        let mut l = vec![0; 2];
        let mut u = vec![0; 2];
        bounds.vloc_lu(&vloc, &mut l, &mut u);
        assert_eq!(u[1], 5);
        assert_eq!(l[1], NO_BOUND);
    }

    #[test]
    fn test_parameter_bound() {
        let sys = compile(
            "system:s\n\
             clock:x\n\
             param:k:4\n\
             process:P\n\
             location:P:l0{initial}\n\
             edge:P:l0:l0:e{provided: x>=k}\n",
        );
        let bounds = ClockBounds::compute(&sys);
        assert_eq!(bounds.l_at(0, 0), 4);
    }
}
