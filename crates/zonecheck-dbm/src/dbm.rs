//! Difference bound matrices over a set of clocks.
//!
//! A `Dbm` of dimension `dim` constrains clocks `x_1 .. x_{dim-1}` together
//! with the zero clock `x_0`: cell `(i, j)` is the tightest known bound on
//! `x_i - x_j`. Every operation that can change the represented zone keeps
//! the matrix in canonical (Floyd-Warshall closed) form, or reports
//! emptiness. An empty matrix has a negative diagonal cell and must not be
//! used further except through `is_empty`.

use crate::db::{Bound, Db, Relation, NO_BOUND};
use std::fmt;

/// A difference bound matrix. Row/column 0 is the zero clock.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Dbm {
    dim: usize,
    cells: Vec<Db>,
}

impl Dbm {
    /// The zone `{0}`: every clock equal to zero. Canonical.
    pub fn zero(dim: usize) -> Dbm {
        assert!(dim >= 1, "DBM dimension must be at least 1");
        Dbm {
            dim,
            cells: vec![Db::LE_ZERO; dim * dim],
        }
    }

    /// The zone `{x >= 0 for all clocks}` with no other constraint. Canonical.
    pub fn universal_positive(dim: usize) -> Dbm {
        assert!(dim >= 1, "DBM dimension must be at least 1");
        let mut dbm = Dbm {
            dim,
            cells: vec![Db::LT_INFINITY; dim * dim],
        };
        for i in 0..dim {
            dbm.set(i, i, Db::LE_ZERO);
            dbm.set(0, i, Db::LE_ZERO);
        }
        dbm
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn at(&self, i: usize, j: usize) -> Db {
        self.cells[i * self.dim + j]
    }

    #[inline]
    pub(crate) fn set(&mut self, i: usize, j: usize, db: Db) {
        self.cells[i * self.dim + j] = db;
    }

    /// All cells unconstrained, diagonal `(0, <=)`. Canonical. Only the
    /// reference-clock layer builds this directly; a plain zone always keeps
    /// row 0 nonpositive.
    pub(crate) fn universal(dim: usize) -> Dbm {
        let mut dbm = Dbm {
            dim,
            cells: vec![Db::LT_INFINITY; dim * dim],
        };
        for i in 0..dim {
            dbm.set(i, i, Db::LE_ZERO);
        }
        dbm
    }

    /// A zone is empty iff some diagonal cell dropped below `(0, <=)`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        (0..self.dim).any(|i| self.at(i, i) < Db::LE_ZERO)
    }

    /// Floyd-Warshall closure on the (min, +) semiring. Returns false iff the
    /// zone is empty; in that case the matrix is left with a negative
    /// diagonal and no other guarantee.
    pub fn canonicalize(&mut self) -> bool {
        let dim = self.dim;
        for k in 0..dim {
            for i in 0..dim {
                let dik = self.at(i, k);
                if dik.is_infinity() {
                    continue;
                }
                for j in 0..dim {
                    let through = Db::sum(dik, self.at(k, j));
                    if through < self.at(i, j) {
                        self.set(i, j, through);
                    }
                }
            }
            if self.at(k, k) < Db::LE_ZERO {
                return false;
            }
        }
        !self.is_empty()
    }

    /// Whether the matrix is closed with `(0, <=)` diagonals. Used in debug
    /// assertions only.
    pub fn is_canonical(&self) -> bool {
        let dim = self.dim;
        for i in 0..dim {
            if self.at(i, i) != Db::LE_ZERO {
                return false;
            }
        }
        for i in 0..dim {
            for j in 0..dim {
                for k in 0..dim {
                    if Db::sum(self.at(i, k), self.at(k, j)) < self.at(i, j) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Tighten cell `(i, j)` to `min(current, db)`.
    ///
    /// Precondition: canonical. Postcondition: canonical, or false is
    /// returned and the zone is empty. Re-closure after a single tightening
    /// only needs paths through `(i, j)`, which is quadratic instead of the
    /// cubic full closure.
    pub fn tighten(&mut self, i: usize, j: usize, db: Db) -> bool {
        debug_assert!(i < self.dim && j < self.dim);
        if self.at(i, j) <= db {
            return true;
        }
        if Db::sum(db, self.at(j, i)) < Db::LE_ZERO {
            self.set(i, i, Db::sum(db, self.at(j, i)));
            return false;
        }
        self.set(i, j, db);
        let dim = self.dim;
        for a in 0..dim {
            let dai = self.at(a, i);
            if dai.is_infinity() {
                continue;
            }
            let head = Db::sum(dai, db);
            for b in 0..dim {
                let through = Db::sum(head, self.at(j, b));
                if through < self.at(a, b) {
                    self.set(a, b, through);
                }
            }
        }
        debug_assert!(self.is_canonical());
        true
    }

    /// Apply a conjunction of constraints `x_i - x_j < b` / `<= b`,
    /// short-circuiting on emptiness. Returns false iff the zone became
    /// empty.
    pub fn constrain(&mut self, constraints: &[(usize, usize, Db)]) -> bool {
        for &(i, j, db) in constraints {
            if !self.tighten(i, j, db) {
                return false;
            }
        }
        true
    }

    /// Reset clock `i` to the constant `value`. Requires `value >= 0` and a
    /// canonical matrix; preserves canonical form.
    pub fn reset_to_value(&mut self, i: usize, value: Bound) {
        debug_assert!(i > 0 && i < self.dim);
        debug_assert!(value >= 0);
        for j in 0..self.dim {
            self.set(i, j, Db::sum(Db::le(value), self.at(0, j)));
            self.set(j, i, Db::sum(self.at(j, 0), Db::le(-value)));
        }
        self.set(i, i, Db::LE_ZERO);
        debug_assert!(self.is_canonical());
    }

    /// Reset clock `i` to the current value of clock `j`. Preserves
    /// canonical form.
    pub fn reset_to_clock(&mut self, i: usize, j: usize) {
        self.reset_to_sum(i, j, 0);
    }

    /// Reset clock `i` to `x_j + value`. Rows and columns of `i` are copied
    /// from `j` and shifted by `value`. Preserves canonical form.
    pub fn reset_to_sum(&mut self, i: usize, j: usize, value: Bound) {
        debug_assert!(i > 0 && i < self.dim && j < self.dim);
        if i == j && value == 0 {
            return;
        }
        for k in 0..self.dim {
            if k == i {
                continue;
            }
            self.set(i, k, Db::sum(self.at(j, k), Db::le(value)));
            self.set(k, i, Db::sum(self.at(k, j), Db::le(-value)));
        }
        self.set(i, i, Db::LE_ZERO);
        debug_assert!(self.is_canonical());
    }

    /// Time elapse: drop every upper bound on individual clocks. Preserves
    /// canonical form.
    pub fn open_up(&mut self) {
        for i in 1..self.dim {
            self.set(i, 0, Db::LT_INFINITY);
        }
        debug_assert!(self.is_canonical());
    }

    /// Cell-wise minimum with `other`, then re-canonicalization. Returns
    /// false iff the intersection is empty.
    pub fn intersect(&mut self, other: &Dbm) -> bool {
        assert_eq!(self.dim, other.dim, "DBM dimensions differ");
        let mut changed = false;
        for idx in 0..self.cells.len() {
            if other.cells[idx] < self.cells[idx] {
                self.cells[idx] = other.cells[idx];
                changed = true;
            }
        }
        if changed {
            self.canonicalize()
        } else {
            !self.is_empty()
        }
    }

    /// Zone inclusion: `self` included in `other` iff every cell of `self`
    /// is at most the corresponding cell of `other`. Both canonical.
    pub fn is_le(&self, other: &Dbm) -> bool {
        debug_assert_eq!(self.dim, other.dim);
        self.cells
            .iter()
            .zip(other.cells.iter())
            .all(|(a, b)| a <= b)
    }

    /// Classical k-bounds extrapolation with bound vector `m` (indexed by
    /// clock, entry 0 ignored; `NO_BOUND` means the clock is never compared
    /// against a constant). Coincides with LU extrapolation where both
    /// vectors equal `m`.
    pub fn extrapolate_k(&mut self, m: &[Bound]) {
        self.extrapolate_lu(m, m);
    }

    /// LU extrapolation: bounds above `l[i]` become infinity, bounds below
    /// `-u[j]` are relaxed to `< -u[j]`. Coarser than k-bounds extrapolation
    /// while preserving reachability of location-based properties.
    pub fn extrapolate_lu(&mut self, l: &[Bound], u: &[Bound]) {
        debug_assert_eq!(l.len(), self.dim);
        debug_assert_eq!(u.len(), self.dim);
        let dim = self.dim;
        let mut changed = false;
        for i in 0..dim {
            for j in 0..dim {
                if i == j {
                    continue;
                }
                let c = self.at(i, j);
                if i != 0 && (l[i] == NO_BOUND || c > Db::le(l[i])) {
                    if !c.is_infinity() {
                        self.set(i, j, Db::LT_INFINITY);
                        changed = true;
                    }
                } else if j != 0 && (u[j] == NO_BOUND || c < Db::lt(-u[j])) {
                    // Row 0 keeps clock nonnegativity: lower bounds relax to
                    // x_j >= 0 at most.
                    let relaxed = if u[j] == NO_BOUND {
                        if i == 0 {
                            Db::LE_ZERO
                        } else {
                            Db::LT_INFINITY
                        }
                    } else {
                        Db::lt(-u[j])
                    };
                    if c < relaxed {
                        self.set(i, j, relaxed);
                        changed = true;
                    }
                }
            }
        }
        if changed {
            let nonempty = self.canonicalize();
            debug_assert!(nonempty, "extrapolation emptied a non-empty zone");
        }
    }

    /// Diagonal-aware LU extrapolation: additionally drops any bound whose
    /// row or column clock already exceeds its L/U threshold in the zone
    /// (`-D[0][i] > l[i]`, resp. `-D[0][j] > u[j]`). Used with per-location
    /// bound vectors this is the coarsest abstraction offered here.
    pub fn extrapolate_lu_diagonal(&mut self, l: &[Bound], u: &[Bound]) {
        debug_assert_eq!(l.len(), self.dim);
        debug_assert_eq!(u.len(), self.dim);
        let dim = self.dim;
        let mut changed = false;
        for i in 0..dim {
            for j in 0..dim {
                if i == j {
                    continue;
                }
                let c = self.at(i, j);
                let row_unbounded = i != 0
                    && (l[i] == NO_BOUND
                        || c > Db::le(l[i])
                        || self.at(0, i) < Db::lt(-l[i]));
                if row_unbounded {
                    if !c.is_infinity() {
                        self.set(i, j, Db::LT_INFINITY);
                        changed = true;
                    }
                    continue;
                }
                let col_above_u =
                    j != 0 && (u[j] == NO_BOUND || self.at(0, j) < Db::lt(-u[j]));
                if col_above_u {
                    let relaxed = if i != 0 {
                        Db::LT_INFINITY
                    } else if u[j] == NO_BOUND {
                        Db::LE_ZERO
                    } else {
                        Db::lt(-u[j])
                    };
                    if c < relaxed {
                        self.set(i, j, relaxed);
                        changed = true;
                    }
                } else if j != 0 && (u[j] != NO_BOUND && c < Db::lt(-u[j])) {
                    self.set(i, j, Db::lt(-u[j]));
                    changed = true;
                }
            }
        }
        if changed {
            let nonempty = self.canonicalize();
            debug_assert!(nonempty, "extrapolation emptied a non-empty zone");
        }
    }

    /// Lexical order on matrices: dimension first, then cells row-major.
    /// Only used for deterministic graph dumps.
    pub fn lexical_cmp(&self, other: &Dbm) -> std::cmp::Ordering {
        self.dim
            .cmp(&other.dim)
            .then_with(|| self.cells.cmp(&other.cells))
    }

    /// Render the zone as a conjunction of constraints `x<=k`, `x>=k`,
    /// `x-y<k`, using `names[i]` for clock `i` (entry 0 unused). Trivial
    /// constraints (`x >= 0`, infinities, diagonals) are omitted; the
    /// unconstrained zone renders as `true`.
    pub fn write_text(&self, f: &mut impl fmt::Write, names: &[String]) -> fmt::Result {
        debug_assert_eq!(names.len(), self.dim);
        let mut first = true;
        let sep = |f: &mut dyn fmt::Write, first: &mut bool| -> fmt::Result {
            if *first {
                *first = false;
                Ok(())
            } else {
                write!(f, " & ")
            }
        };
        for i in 0..self.dim {
            for j in 0..self.dim {
                if i == j {
                    continue;
                }
                let c = self.at(i, j);
                if c.is_infinity() {
                    continue;
                }
                if i == 0 {
                    // 0 - x_j: a lower bound on x_j; x >= 0 is implicit.
                    if c == Db::LE_ZERO {
                        continue;
                    }
                    sep(f, &mut first)?;
                    let flipped = match c.relation() {
                        Relation::Le => ">=",
                        Relation::Lt => ">",
                    };
                    write!(f, "{}{}{}", names[j], flipped, -c.value())?;
                } else if j == 0 {
                    sep(f, &mut first)?;
                    write!(f, "{}{}{}", names[i], c.relation(), c.value())?;
                } else {
                    sep(f, &mut first)?;
                    write!(f, "{}-{}{}{}", names[i], names[j], c.relation(), c.value())?;
                }
            }
        }
        if first {
            write!(f, "true")?;
        }
        Ok(())
    }

    /// `write_text` into a fresh string.
    pub fn to_text(&self, names: &[String]) -> String {
        let mut s = String::new();
        self.write_text(&mut s, names).expect("write to String");
        s
    }
}

impl fmt::Debug for Dbm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dbm(dim={})", self.dim)?;
        for i in 0..self.dim {
            write!(f, "  ")?;
            for j in 0..self.dim {
                write!(f, "{:>8} ", self.at(i, j).to_string())?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
