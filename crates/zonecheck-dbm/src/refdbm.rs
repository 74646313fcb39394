//! DBMs over reference clocks.
//!
//! A reference-clock DBM replaces the single zero clock with one reference
//! clock per group of processes (or one global reference clock). Variables
//! `0 .. refcount` are the reference clocks `t_0 .. t_{R-1}`; variable
//! `refcount + c` is the offset variable of clock `c`, holding the absolute
//! time at which `c` was last reset. The value of clock `c` is
//! `t_{ref(c)} - offset(c)`, so a constraint `c <= b` is the difference
//! bound `t_{ref(c)} - offset(c) <= b`, and resetting `c` copies the
//! current reference clock into its offset variable.
//!
//! Difference constraints between clocks of distinct reference groups are
//! interpreted after the participating reference clocks have been
//! synchronized, which is how the reference zone graph applies guards.

use crate::db::{Bound, Db};
use crate::dbm::Dbm;
use std::fmt;
use std::sync::Arc;

/// Spread value meaning "reference clocks may drift apart without bound".
pub const UNBOUNDED_SPREAD: Bound = Bound::MIN;

/// Map from clocks to reference clocks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefClocks {
    refcount: usize,
    refmap: Vec<usize>,
}

impl RefClocks {
    /// One global reference clock shared by every clock.
    pub fn single(clock_count: usize) -> RefClocks {
        RefClocks {
            refcount: 1,
            refmap: vec![0; clock_count],
        }
    }

    /// One reference clock per group; `refmap[c]` is the group of clock `c`.
    pub fn grouped(refcount: usize, refmap: Vec<usize>) -> RefClocks {
        assert!(refcount >= 1, "at least one reference clock required");
        assert!(
            refmap.iter().all(|&r| r < refcount),
            "clock mapped to unknown reference clock"
        );
        RefClocks { refcount, refmap }
    }

    #[inline]
    pub fn refcount(&self) -> usize {
        self.refcount
    }

    #[inline]
    pub fn clock_count(&self) -> usize {
        self.refmap.len()
    }

    /// Matrix dimension: reference clocks plus offset variables.
    #[inline]
    pub fn dim(&self) -> usize {
        self.refcount + self.refmap.len()
    }

    /// Reference clock of clock `c`.
    #[inline]
    pub fn refclock_of(&self, c: usize) -> usize {
        self.refmap[c]
    }

    /// Offset variable index of clock `c`.
    #[inline]
    pub fn offset_of(&self, c: usize) -> usize {
        self.refcount + c
    }
}

/// A zone over reference clocks and offset variables.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RefDbm {
    clocks: Arc<RefClocks>,
    dbm: Dbm,
}

impl RefDbm {
    /// All reference clocks and offsets at zero.
    pub fn zero(clocks: Arc<RefClocks>) -> RefDbm {
        let dim = clocks.dim();
        RefDbm {
            clocks,
            dbm: Dbm::zero(dim),
        }
    }

    /// No constraint except that every offset lies in the past of its
    /// reference clock (equivalently, every clock value is nonnegative).
    pub fn universal_positive(clocks: Arc<RefClocks>) -> RefDbm {
        let dim = clocks.dim();
        let mut dbm = Dbm::universal(dim);
        for c in 0..clocks.clock_count() {
            dbm.set(clocks.offset_of(c), clocks.refclock_of(c), Db::LE_ZERO);
        }
        RefDbm { clocks, dbm }
    }

    #[inline]
    pub fn clocks(&self) -> &Arc<RefClocks> {
        &self.clocks
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dbm.dim()
    }

    #[inline]
    pub fn at(&self, i: usize, j: usize) -> Db {
        self.dbm.at(i, j)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dbm.is_empty()
    }

    pub fn is_le(&self, other: &RefDbm) -> bool {
        debug_assert_eq!(self.clocks, other.clocks);
        self.dbm.is_le(&other.dbm)
    }

    /// Tighten a raw cell. Exposed for spread and synchronization
    /// constraints over reference clocks.
    pub fn tighten(&mut self, i: usize, j: usize, db: Db) -> bool {
        self.dbm.tighten(i, j, db)
    }

    /// Apply the clock constraint `x - y < db` / `x - y <= db`, where `None`
    /// stands for the constant zero. Returns false iff the zone became
    /// empty.
    pub fn constrain(&mut self, x: Option<usize>, y: Option<usize>, db: Db) -> bool {
        let r = &self.clocks;
        match (x, y) {
            (Some(x), None) => {
                let (rx, ox) = (r.refclock_of(x), r.offset_of(x));
                self.dbm.tighten(rx, ox, db)
            }
            (None, Some(y)) => {
                let (ry, oy) = (r.refclock_of(y), r.offset_of(y));
                self.dbm.tighten(oy, ry, db)
            }
            (Some(x), Some(y)) => {
                let (ox, oy) = (r.offset_of(x), r.offset_of(y));
                self.dbm.tighten(oy, ox, db)
            }
            (None, None) => db >= Db::LE_ZERO,
        }
    }

    /// Force the reference clocks selected by `refs` (a bit mask) to agree.
    /// Returns false iff the zone became empty.
    pub fn synchronize(&mut self, refs: u64) -> bool {
        let count = self.clocks.refcount();
        for a in 0..count {
            if refs & (1 << a) == 0 {
                continue;
            }
            for b in (a + 1)..count {
                if refs & (1 << b) == 0 {
                    continue;
                }
                if !self.dbm.tighten(a, b, Db::LE_ZERO)
                    || !self.dbm.tighten(b, a, Db::LE_ZERO)
                {
                    return false;
                }
            }
        }
        true
    }

    /// Whether the zone stays non-empty when all reference clocks are forced
    /// to agree.
    pub fn is_synchronizable(&self) -> bool {
        if self.clocks.refcount() <= 1 {
            return !self.is_empty();
        }
        let mut probe = self.clone();
        probe.synchronize(u64::MAX)
    }

    /// Constrain every pair of reference clocks to stay within `spread` of
    /// each other. `UNBOUNDED_SPREAD` is a no-op. Returns false iff empty.
    pub fn bound_spread(&mut self, spread: Bound) -> bool {
        if spread == UNBOUNDED_SPREAD {
            return !self.is_empty();
        }
        let count = self.clocks.refcount();
        for a in 0..count {
            for b in 0..count {
                if a != b && !self.dbm.tighten(a, b, Db::le(spread)) {
                    return false;
                }
            }
        }
        true
    }

    /// Let the reference clocks selected by `refs` advance independently:
    /// every upper bound on a selected reference clock is dropped. Preserves
    /// canonical form.
    pub fn asynchronous_open_up(&mut self, refs: u64) {
        let dim = self.dim();
        for r in 0..self.clocks.refcount() {
            if refs & (1 << r) == 0 {
                continue;
            }
            for j in 0..dim {
                if j != r {
                    self.dbm.set(r, j, Db::LT_INFINITY);
                }
            }
        }
    }

    /// Reset clock `c` to zero: its offset variable becomes its reference
    /// clock.
    pub fn reset_to_refclock(&mut self, c: usize) {
        let rc = self.clocks.refclock_of(c);
        let oc = self.clocks.offset_of(c);
        self.dbm.reset_to_sum(oc, rc, 0);
    }

    /// Lexical order, for deterministic graph dumps.
    pub fn lexical_cmp(&self, other: &RefDbm) -> std::cmp::Ordering {
        self.dbm.lexical_cmp(&other.dbm)
    }

    /// Render as a conjunction over reference clocks `$0, $1, ...` and the
    /// given clock names (offset variables are shown through the clock they
    /// belong to).
    pub fn to_text(&self, clock_names: &[String]) -> String {
        debug_assert_eq!(clock_names.len(), self.clocks.clock_count());
        let mut names = Vec::with_capacity(self.dim());
        for r in 0..self.clocks.refcount() {
            names.push(format!("${}", r));
        }
        for n in clock_names {
            names.push(format!("~{}", n));
        }
        let mut out = String::new();
        let mut first = true;
        for i in 0..self.dim() {
            for j in 0..self.dim() {
                if i == j {
                    continue;
                }
                let c = self.at(i, j);
                if c.is_infinity() {
                    continue;
                }
                if !first {
                    out.push_str(" & ");
                }
                first = false;
                out.push_str(&format!("{}-{}{}", names[i], names[j], c));
            }
        }
        if first {
            out.push_str("true");
        }
        out
    }
}

impl fmt::Debug for RefDbm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RefDbm(refs={}) ", self.clocks.refcount())?;
        self.dbm.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_proc_clocks() -> Arc<RefClocks> {
        // Two processes, one clock each: refs t0, t1; offsets at 2 and 3.
        Arc::new(RefClocks::grouped(2, vec![0, 1]))
    }

    #[test]
    fn test_zero_is_synchronizable() {
        let z = RefDbm::zero(two_proc_clocks());
        assert!(!z.is_empty());
        assert!(z.is_synchronizable());
    }

    #[test]
    fn test_constrain_translates_to_offsets() {
        let clocks = two_proc_clocks();
        let mut z = RefDbm::universal_positive(Arc::clone(&clocks));
        // x0 <= 5 becomes t0 - offset(x0) <= 5.
        assert!(z.constrain(Some(0), None, Db::le(5)));
        assert_eq!(z.at(0, clocks.offset_of(0)), Db::le(5));
        // x0 >= 2 arrives as 0 - x0 <= -2.
        assert!(z.constrain(None, Some(0), Db::le(-2)));
        assert_eq!(z.at(clocks.offset_of(0), 0), Db::le(-2));
    }

    #[test]
    fn test_desynchronized_zone_is_not_synchronizable() {
        let mut z = RefDbm::universal_positive(two_proc_clocks());
        // t0 strictly behind t1 can never be equalized.
        assert!(z.tighten(0, 1, Db::lt(0)));
        assert!(!z.is_empty());
        assert!(!z.is_synchronizable());
    }

    #[test]
    fn test_spread_zero_forces_agreement() {
        let mut z = RefDbm::universal_positive(two_proc_clocks());
        assert!(z.bound_spread(0));
        assert_eq!(z.at(0, 1), Db::le(0));
        assert_eq!(z.at(1, 0), Db::le(0));
        assert!(z.is_synchronizable());
    }

    #[test]
    fn test_open_up_then_spread() {
        let mut z = RefDbm::zero(two_proc_clocks());
        z.asynchronous_open_up(0b11);
        assert_eq!(z.at(0, 1), Db::LT_INFINITY);
        // Both references advanced from zero, offsets stayed behind.
        assert_eq!(z.at(2, 0), Db::LE_ZERO);
        assert!(z.bound_spread(1));
        assert_eq!(z.at(0, 1), Db::le(1));
        assert!(z.is_synchronizable());
    }

    #[test]
    fn test_reset_tracks_reference() {
        let clocks = two_proc_clocks();
        let mut z = RefDbm::zero(Arc::clone(&clocks));
        z.asynchronous_open_up(0b11);
        z.reset_to_refclock(0);
        let o0 = clocks.offset_of(0);
        assert_eq!(z.at(o0, 0), Db::LE_ZERO);
        assert_eq!(z.at(0, o0), Db::LE_ZERO);
    }

    #[test]
    fn test_inclusion() {
        let clocks = two_proc_clocks();
        let narrow = RefDbm::zero(Arc::clone(&clocks));
        let mut wide = RefDbm::zero(clocks);
        wide.asynchronous_open_up(0b11);
        assert!(narrow.is_le(&wide));
        assert!(!wide.is_le(&narrow));
    }
}
