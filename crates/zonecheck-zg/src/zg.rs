//! The zone graph: discrete steps composed with zone operations.
//!
//! Each step runs the discrete phase (guards, statements, invariants on the
//! integer store) and then the clock phase on a copy of the source zone:
//! source invariant, guard, resets in statement order, target invariant,
//! time elapse where allowed, extrapolation. The sequence of zone
//! operations depends on the chosen semantics; extrapolation is fixed at
//! construction.

use crate::clockbounds::ClockBounds;
use crate::pool::Pool;
use crate::share::ShareTable;
use crate::state::{self, StateData, TransitionData, Vedge, Vloc, NO_EDGE};
use crate::syncprod;
use crate::ta::{self, EvalCc};
use crate::ts::{Sst, StateId, Status, TransId, Ts};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::trace;
use zonecheck_dbm::{Bound, Db, Dbm};
use zonecheck_system::intval::{ClockReset, IntVal};
use zonecheck_system::model::System;

/// When the zone elapses relative to the discrete step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Semantics {
    /// Delay before the action, on the source zone.
    Standard,
    /// Delay after the action, on the target zone.
    #[default]
    Elapsed,
}

/// Extrapolation policy, fixed at graph construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Extrapolation {
    /// Classical k-bounds extrapolation with global M bounds.
    K,
    /// LU extrapolation with global bounds.
    Lu,
    /// Diagonal-aware LU extrapolation with per-vloc bounds. The default
    /// for reachability.
    #[default]
    LuLocal,
}

/// Zone graph over a compiled system.
pub struct Zg {
    system: Arc<System>,
    semantics: Semantics,
    extrapolation: Extrapolation,
    bounds: ClockBounds,
    global_l: Vec<Bound>,
    global_u: Vec<Bound>,
    global_m: Vec<Bound>,
    sharing: bool,
    vloc_pool: Pool<Vloc>,
    vedge_pool: Pool<Vedge>,
    zone_pool: Pool<Dbm>,
    state_pool: Pool<StateData>,
    trans_pool: Pool<TransitionData>,
    vloc_table: ShareTable,
    vedge_table: ShareTable,
    zone_table: ShareTable,
}

impl Zg {
    /// Build a zone graph. `block_size` sizes the allocator blocks,
    /// `table_size` the sharing tables; `sharing` selects whether state
    /// components are canonicalized after each step.
    pub fn new(
        system: Arc<System>,
        semantics: Semantics,
        extrapolation: Extrapolation,
        block_size: usize,
        table_size: usize,
        sharing: bool,
    ) -> Zg {
        let bounds = ClockBounds::compute(&system);
        let (global_l, global_u) = bounds.global_lu();
        let global_m = bounds.global_m();
        Zg {
            system,
            semantics,
            extrapolation,
            bounds,
            global_l,
            global_u,
            global_m,
            sharing,
            vloc_pool: Pool::new(block_size),
            vedge_pool: Pool::new(block_size),
            zone_pool: Pool::new(block_size),
            state_pool: Pool::new(block_size),
            trans_pool: Pool::new(block_size),
            vloc_table: ShareTable::with_capacity(table_size),
            vedge_table: ShareTable::with_capacity(table_size),
            zone_table: ShareTable::with_capacity(table_size),
        }
    }

    pub fn system(&self) -> &Arc<System> {
        &self.system
    }

    /// DBM dimension: one slot per clock plus the zero clock.
    #[inline]
    fn dim(&self) -> usize {
        self.system.clock_count() + 1
    }

    /// Read access to a state's zone.
    pub fn zone(&self, s: StateId) -> &Dbm {
        self.zone_pool.get(self.state_pool.get(s).zone)
    }

    /// Read access to a state's tuple of locations.
    pub fn vloc(&self, s: StateId) -> &Vloc {
        self.vloc_pool.get(self.state_pool.get(s).vloc)
    }

    fn apply_constraints(zone: &mut Dbm, ccs: &[EvalCc]) -> bool {
        for cc in ccs {
            let i = cc.left.map_or(0, |x| x + 1);
            let j = cc.right.map_or(0, |y| y + 1);
            let db = if cc.strict {
                Db::lt(cc.bound)
            } else {
                Db::le(cc.bound)
            };
            if !zone.tighten(i, j, db) {
                return false;
            }
        }
        true
    }

    fn apply_resets(zone: &mut Dbm, resets: &[ClockReset]) -> bool {
        for r in resets {
            if r.value < 0 {
                return false;
            }
            match r.from {
                None => zone.reset_to_value(r.clock + 1, r.value),
                Some(y) => zone.reset_to_sum(r.clock + 1, y + 1, r.value),
            }
        }
        true
    }

    fn extrapolate(&self, zone: &mut Dbm, vloc: &Vloc) {
        match self.extrapolation {
            Extrapolation::K => zone.extrapolate_k(&self.global_m),
            Extrapolation::Lu => zone.extrapolate_lu(&self.global_l, &self.global_u),
            Extrapolation::LuLocal => {
                let dim = self.dim();
                let mut l = vec![0; dim];
                let mut u = vec![0; dim];
                self.bounds.vloc_lu(vloc, &mut l, &mut u);
                zone.extrapolate_lu_diagonal(&l, &u);
            }
        }
    }

    fn make_state(&mut self, vloc: Vloc, intval: IntVal, zone: Dbm) -> StateId {
        let vloc_hash = state::vloc_hash(&vloc);
        let zone_hash = state::zone_hash(&zone);
        let mut vid = self.vloc_pool.alloc(vloc);
        let mut zid = self.zone_pool.alloc(zone);
        if self.sharing {
            vid = self.vloc_table.share(&mut self.vloc_pool, vid, vloc_hash);
            zid = self.zone_table.share(&mut self.zone_pool, zid, zone_hash);
        }
        self.state_pool.alloc(StateData {
            vloc: vid,
            intval,
            zone: zid,
        })
    }

    fn make_transition(
        &mut self,
        vedge: Vedge,
        src_invariant: Vec<EvalCc>,
        guard: Vec<EvalCc>,
        resets: Vec<ClockReset>,
        tgt_invariant: Vec<EvalCc>,
    ) -> TransId {
        let vedge_hash = state::vedge_hash(&vedge);
        let mut eid = self.vedge_pool.alloc(vedge);
        if self.sharing {
            eid = self.vedge_table.share(&mut self.vedge_pool, eid, vedge_hash);
        }
        self.trans_pool.alloc(TransitionData {
            vedge: eid,
            src_invariant,
            guard,
            resets,
            tgt_invariant,
        })
    }

    /// Clock phase of one step. Consumes a copy of the source zone and
    /// yields the extrapolated target zone or the violation status.
    fn clock_step(
        &self,
        src_vloc: &Vloc,
        step: &ta::DiscreteStep,
        mut zone: Dbm,
    ) -> Result<Dbm, Status> {
        if self.semantics == Semantics::Standard
            && syncprod::delay_allowed(&self.system, src_vloc)
        {
            zone.open_up();
        }
        if !Self::apply_constraints(&mut zone, &step.src_invariant) {
            return Err(Status::ClocksSrcInvariantViolated);
        }
        if !Self::apply_constraints(&mut zone, &step.guard) {
            return Err(Status::ClocksGuardViolated);
        }
        if !Self::apply_resets(&mut zone, &step.resets) {
            return Err(Status::ResetFailed);
        }
        if !Self::apply_constraints(&mut zone, &step.tgt_invariant) {
            return Err(Status::ClocksTgtInvariantViolated);
        }
        if self.semantics == Semantics::Elapsed
            && syncprod::delay_allowed(&self.system, &step.vloc)
        {
            zone.open_up();
            if !Self::apply_constraints(&mut zone, &step.tgt_invariant) {
                return Err(Status::ClocksTgtInvariantViolated);
            }
        }
        self.extrapolate(&mut zone, &step.vloc);
        debug_assert!(!zone.is_empty());
        Ok(zone)
    }

    fn intval_text(&self, intval: &IntVal) -> String {
        let mut out = String::new();
        for (i, info) in self.system.intvars().iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&info.name);
            out.push('=');
            out.push_str(&intval.get(i).to_string());
        }
        out
    }

    fn clock_names(&self) -> Vec<String> {
        let mut names = vec!["0".to_string()];
        names.extend(self.system.clocks().iter().map(|c| c.name.clone()));
        names
    }
}

impl Ts for Zg {
    fn initial(&mut self) -> Vec<Sst> {
        let system = Arc::clone(&self.system);
        let mut out = Vec::new();
        for vloc in syncprod::initial_vlocs(&system) {
            let (intval, invariant) = match ta::initial_discrete(&system, &vloc) {
                Ok(pair) => pair,
                Err(status) => {
                    out.push(Sst::failed(status));
                    continue;
                }
            };
            let mut zone = Dbm::zero(self.dim());
            if !Self::apply_constraints(&mut zone, &invariant) {
                out.push(Sst::failed(Status::ClocksSrcInvariantViolated));
                continue;
            }
            if self.semantics == Semantics::Elapsed && syncprod::delay_allowed(&system, &vloc)
            {
                zone.open_up();
                if !Self::apply_constraints(&mut zone, &invariant) {
                    out.push(Sst::failed(Status::ClocksSrcInvariantViolated));
                    continue;
                }
            }
            self.extrapolate(&mut zone, &vloc);
            let vedge: Vedge = SmallVec::from_elem(NO_EDGE, system.process_count());
            let state = self.make_state(vloc, intval, zone);
            let transition =
                self.make_transition(vedge, Vec::new(), Vec::new(), Vec::new(), invariant);
            out.push(Sst::ok(state, transition));
        }
        out
    }

    fn outgoing(&mut self, s: StateId) -> Vec<Sst> {
        let system = Arc::clone(&self.system);
        let (vloc, intval, zone) = {
            let data = self.state_pool.get(s);
            (
                self.vloc_pool.get(data.vloc).clone(),
                data.intval.clone(),
                self.zone_pool.get(data.zone).clone(),
            )
        };
        let vedges: Vec<Vedge> = syncprod::outgoing_edges(&system, &vloc).collect();
        let mut out = Vec::new();
        for vedge in vedges {
            let step = match ta::next_discrete(&system, &vloc, &intval, &vedge) {
                Ok(step) => step,
                Err(status) => {
                    out.push(Sst::failed(status));
                    continue;
                }
            };
            match self.clock_step(&vloc, &step, zone.clone()) {
                Ok(next_zone) => {
                    trace!(
                        vedge = %state::vedge_text(&system, &vedge),
                        "expanded joint edge"
                    );
                    let state =
                        self.make_state(step.vloc, step.intval, next_zone);
                    let transition = self.make_transition(
                        vedge,
                        step.src_invariant,
                        step.guard,
                        step.resets,
                        step.tgt_invariant,
                    );
                    out.push(Sst::ok(state, transition));
                }
                Err(status) => out.push(Sst::failed(status)),
            }
        }
        out
    }

    fn labels(&self, s: StateId) -> u64 {
        syncprod::labels(&self.system, self.vloc(s))
    }

    fn is_valid_final(&self, _s: StateId) -> bool {
        true
    }

    fn discrete_hash(&self, s: StateId) -> u64 {
        let data = self.state_pool.get(s);
        state::discrete_hash(self.vloc_pool.get(data.vloc), &data.intval)
    }

    fn state_hash(&self, s: StateId) -> u64 {
        let data = self.state_pool.get(s);
        state::full_hash(
            self.vloc_pool.get(data.vloc),
            &data.intval,
            self.zone_pool.get(data.zone),
        )
    }

    fn same_discrete(&self, a: StateId, b: StateId) -> bool {
        let da = self.state_pool.get(a);
        let db = self.state_pool.get(b);
        (da.vloc == db.vloc || self.vloc_pool.get(da.vloc) == self.vloc_pool.get(db.vloc))
            && da.intval == db.intval
    }

    fn state_eq(&self, a: StateId, b: StateId) -> bool {
        let da = self.state_pool.get(a);
        let db = self.state_pool.get(b);
        self.same_discrete(a, b)
            && (da.zone == db.zone
                || self.zone_pool.get(da.zone) == self.zone_pool.get(db.zone))
    }

    fn zone_le(&self, a: StateId, b: StateId) -> bool {
        let da = self.state_pool.get(a);
        let db = self.state_pool.get(b);
        self.zone_pool.get(da.zone).is_le(self.zone_pool.get(db.zone))
    }

    fn release_state(&mut self, s: StateId) {
        let (vid, zid) = {
            let data = self.state_pool.get(s);
            (data.vloc, data.zone)
        };
        if self.state_pool.release(s) {
            self.vloc_table.release(&mut self.vloc_pool, vid);
            self.zone_table.release(&mut self.zone_pool, zid);
        }
    }

    fn release_transition(&mut self, t: TransId) {
        let eid = self.trans_pool.get(t).vedge;
        if self.trans_pool.release(t) {
            self.vedge_table.release(&mut self.vedge_pool, eid);
        }
    }

    fn state_attributes(&self, s: StateId) -> Vec<(String, String)> {
        let data = self.state_pool.get(s);
        let vloc = self.vloc_pool.get(data.vloc);
        let mut attrs = vec![(
            "vloc".to_string(),
            state::vloc_text(&self.system, vloc),
        )];
        if !self.system.intvars().is_empty() {
            attrs.push(("intval".to_string(), self.intval_text(&data.intval)));
        }
        attrs.push((
            "zone".to_string(),
            self.zone_pool.get(data.zone).to_text(&self.clock_names()),
        ));
        attrs
    }

    fn transition_attributes(&self, t: TransId) -> Vec<(String, String)> {
        let data = self.trans_pool.get(t);
        vec![(
            "vedge".to_string(),
            state::vedge_text(&self.system, self.vedge_pool.get(data.vedge)),
        )]
    }

    fn state_cmp(&self, a: StateId, b: StateId) -> Ordering {
        let da = self.state_pool.get(a);
        let db = self.state_pool.get(b);
        state::vloc_cmp(self.vloc_pool.get(da.vloc), self.vloc_pool.get(db.vloc))
            .then_with(|| da.intval.values().cmp(db.intval.values()))
            .then_with(|| {
                self.zone_pool
                    .get(da.zone)
                    .lexical_cmp(self.zone_pool.get(db.zone))
            })
    }
}
