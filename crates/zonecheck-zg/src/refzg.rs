//! Zone graph with reference clocks.
//!
//! Each process (or the whole system) owns a reference clock; zones are
//! [`RefDbm`]s where delay advances reference clocks independently, within
//! a bounded spread. A step synchronizes the reference clocks of the
//! participating processes before applying the guard. There is no
//! extrapolation here; finiteness comes from the spread bound and the
//! subsumption ordering of the exploration layer. A run may only end in a
//! state whose zone is synchronizable.

use crate::pool::Pool;
use crate::share::ShareTable;
use crate::state::{self, StateData, TransitionData, Vedge, Vloc, NO_EDGE};
use crate::syncprod;
use crate::ta::{self, EvalCc};
use crate::ts::{Sst, StateId, Status, TransId, Ts};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::sync::Arc;
use thiserror::Error;
use zonecheck_dbm::{Bound, Db, RefClocks, RefDbm};
use zonecheck_system::intval::{ClockReset, IntVal};
use zonecheck_system::model::System;

pub use zonecheck_dbm::UNBOUNDED_SPREAD;

/// How clocks map to reference clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefClockKind {
    /// One global reference clock; equivalent to the plain zone graph
    /// semantics.
    Single,
    /// One reference clock per process.
    #[default]
    PerProcess,
}

/// Construction error for the reference zone graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RefZgError {
    #[error("reference clocks are unsound for systems with shared integer variables")]
    SharedIntVar,

    #[error("clock '{name}' is accessed by several processes")]
    SharedClock { name: String },
}

/// Zone graph over reference-clock DBMs, with bounded spread. States and
/// transitions reuse the plain graph's records; only the zone pool holds
/// reference DBMs.
#[derive(Debug)]
pub struct RefZg {
    system: Arc<System>,
    refclocks: Arc<RefClocks>,
    spread: Bound,
    sharing: bool,
    vloc_pool: Pool<Vloc>,
    vedge_pool: Pool<Vedge>,
    zone_pool: Pool<RefDbm>,
    state_pool: Pool<StateData>,
    trans_pool: Pool<TransitionData>,
    vloc_table: ShareTable,
    vedge_table: ShareTable,
    zone_table: ShareTable,
}

impl RefZg {
    pub fn new(
        system: Arc<System>,
        kind: RefClockKind,
        spread: Bound,
        block_size: usize,
        table_size: usize,
        sharing: bool,
    ) -> Result<RefZg, RefZgError> {
        let refclocks = Arc::new(Self::reference_clocks(&system, kind)?);
        Ok(RefZg {
            system,
            refclocks,
            spread,
            sharing,
            vloc_pool: Pool::new(block_size),
            vedge_pool: Pool::new(block_size),
            zone_pool: Pool::new(block_size),
            state_pool: Pool::new(block_size),
            trans_pool: Pool::new(block_size),
            vloc_table: ShareTable::with_capacity(table_size),
            vedge_table: ShareTable::with_capacity(table_size),
            zone_table: ShareTable::with_capacity(table_size),
        })
    }

    fn reference_clocks(system: &System, kind: RefClockKind) -> Result<RefClocks, RefZgError> {
        match kind {
            RefClockKind::Single => Ok(RefClocks::single(system.clock_count())),
            RefClockKind::PerProcess => {
                if system.has_shared_intvar() {
                    return Err(RefZgError::SharedIntVar);
                }
                let mut refmap = Vec::with_capacity(system.clock_count());
                for c in 0..system.clock_count() {
                    match system.clock_owner(c) {
                        Some(pid) => refmap.push(pid),
                        None if system.clock_access(c) == 0 => refmap.push(0),
                        None => {
                            return Err(RefZgError::SharedClock {
                                name: system.clocks()[c].name.clone(),
                            })
                        }
                    }
                }
                Ok(RefClocks::grouped(system.process_count().max(1), refmap))
            }
        }
    }

    pub fn system(&self) -> &Arc<System> {
        &self.system
    }

    pub fn spread(&self) -> Bound {
        self.spread
    }

    pub fn refclocks(&self) -> &Arc<RefClocks> {
        &self.refclocks
    }

    /// Read access to a state's zone.
    pub fn zone(&self, s: StateId) -> &RefDbm {
        self.zone_pool.get(self.state_pool.get(s).zone)
    }

    /// Mask of reference clocks whose every process may delay.
    fn delay_allowed_refs(&self, vloc: &Vloc) -> u64 {
        let refcount = self.refclocks.refcount();
        let mut allowed = if refcount >= 64 {
            u64::MAX
        } else {
            (1u64 << refcount) - 1
        };
        for (pid, &loc) in vloc.iter().enumerate() {
            let l = self.system.location(loc);
            if l.committed || l.urgent {
                let r = if refcount == 1 { 0 } else { pid };
                allowed &= !(1 << r);
            }
        }
        allowed
    }

    /// Mask of reference clocks of the processes moved by a joint edge.
    fn sync_refs(&self, vedge: &Vedge) -> u64 {
        let refcount = self.refclocks.refcount();
        let mut mask = 0u64;
        for (pid, &e) in vedge.iter().enumerate() {
            if e != NO_EDGE {
                let r = if refcount == 1 { 0 } else { pid };
                mask |= 1 << r;
            }
        }
        mask
    }

    fn apply_constraints(zone: &mut RefDbm, ccs: &[EvalCc]) -> bool {
        for cc in ccs {
            let db = if cc.strict {
                Db::lt(cc.bound)
            } else {
                Db::le(cc.bound)
            };
            if !zone.constrain(cc.left, cc.right, db) {
                return false;
            }
        }
        true
    }

    /// Resets in the reference semantics only support `x := 0`.
    fn apply_resets(zone: &mut RefDbm, resets: &[ClockReset]) -> bool {
        for r in resets {
            if r.from.is_some() || r.value != 0 {
                return false;
            }
            zone.reset_to_refclock(r.clock);
        }
        true
    }

    fn clock_step(
        &self,
        step: &ta::DiscreteStep,
        vedge: &Vedge,
        mut zone: RefDbm,
    ) -> Result<RefDbm, Status> {
        if !zone.synchronize(self.sync_refs(vedge)) {
            return Err(Status::ClocksEmpty);
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
        zone.asynchronous_open_up(self.delay_allowed_refs(&step.vloc));
        if !zone.bound_spread(self.spread) {
            return Err(Status::ClocksEmpty);
        }
        if !Self::apply_constraints(&mut zone, &step.tgt_invariant) {
            return Err(Status::ClocksTgtInvariantViolated);
        }
        Ok(zone)
    }

    fn make_state(&mut self, vloc: Vloc, intval: IntVal, zone: RefDbm) -> StateId {
        let vloc_hash = state::vloc_hash(&vloc);
        let zone_hash = state::refzone_hash(&zone);
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

    fn make_transition(&mut self, vedge: Vedge, step: Option<ta::DiscreteStep>) -> TransId {
        let vedge_hash = state::vedge_hash(&vedge);
        let mut eid = self.vedge_pool.alloc(vedge);
        if self.sharing {
            eid = self.vedge_table.share(&mut self.vedge_pool, eid, vedge_hash);
        }
        let (src_invariant, guard, resets, tgt_invariant) = match step {
            Some(step) => (step.src_invariant, step.guard, step.resets, step.tgt_invariant),
            None => (Vec::new(), Vec::new(), Vec::new(), Vec::new()),
        };
        self.trans_pool.alloc(TransitionData {
            vedge: eid,
            src_invariant,
            guard,
            resets,
            tgt_invariant,
        })
    }

    fn clock_names(&self) -> Vec<String> {
        self.system.clocks().iter().map(|c| c.name.clone()).collect()
    }
}

impl Ts for RefZg {
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
            let mut zone = RefDbm::zero(Arc::clone(&self.refclocks));
            if !Self::apply_constraints(&mut zone, &invariant) {
                out.push(Sst::failed(Status::ClocksSrcInvariantViolated));
                continue;
            }
            zone.asynchronous_open_up(self.delay_allowed_refs(&vloc));
            if !zone.bound_spread(self.spread) {
                out.push(Sst::failed(Status::ClocksEmpty));
                continue;
            }
            if !Self::apply_constraints(&mut zone, &invariant) {
                out.push(Sst::failed(Status::ClocksSrcInvariantViolated));
                continue;
            }
            let vedge: Vedge = SmallVec::from_elem(NO_EDGE, system.process_count());
            let state = self.make_state(vloc, intval, zone);
            let transition = self.make_transition(vedge, None);
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
            match self.clock_step(&step, &vedge, zone.clone()) {
                Ok(next_zone) => {
                    let state = self.make_state(step.vloc.clone(), step.intval.clone(), next_zone);
                    let transition = self.make_transition(vedge, Some(step));
                    out.push(Sst::ok(state, transition));
                }
                Err(status) => out.push(Sst::failed(status)),
            }
        }
        out
    }

    fn labels(&self, s: StateId) -> u64 {
        let data = self.state_pool.get(s);
        syncprod::labels(&self.system, self.vloc_pool.get(data.vloc))
    }

    /// A valid final state has a non-empty, synchronizable zone.
    fn is_valid_final(&self, s: StateId) -> bool {
        let zone = self.zone(s);
        !zone.is_empty() && zone.is_synchronizable()
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
            let mut text = String::new();
            for (i, info) in self.system.intvars().iter().enumerate() {
                if i > 0 {
                    text.push(',');
                }
                text.push_str(&info.name);
                text.push('=');
                text.push_str(&data.intval.get(i).to_string());
            }
            attrs.push(("intval".to_string(), text));
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

#[cfg(test)]
mod tests {
    use super::*;
    use zonecheck_system::decl;

    fn two_clocks() -> Arc<System> {
        Arc::new(
            System::new(
                &decl::parse(
                    "system:pair\n\
                     clock:x\n\
                     clock:y\n\
                     process:P\n\
                     process:Q\n\
                     location:P:l0{initial}\n\
                     location:P:l1\n\
                     location:Q:m0{initial}\n\
                     edge:P:l0:l1:a{provided: x>=1; do: x=0}\n\
                     edge:Q:m0:m0:b{do: y=0}\n",
                )
                .unwrap(),
            )
            .unwrap(),
        )
    }

    fn make(spread: Bound) -> RefZg {
        RefZg::new(two_clocks(), RefClockKind::PerProcess, spread, 64, 64, false).unwrap()
    }

    #[test]
    fn test_initial_is_valid_final() {
        let mut zg = make(0);
        let init = zg.initial();
        assert_eq!(init.len(), 1);
        let s0 = init[0].state.unwrap();
        assert!(zg.is_valid_final(s0));
    }

    #[test]
    fn test_spread_zero_keeps_references_synchronized() {
        let mut zg = make(0);
        let init = zg.initial();
        let s0 = init[0].state.unwrap();
        let out = zg.outgoing(s0);
        assert!(out.iter().all(|sst| sst.status.is_ok()));
        for sst in &out {
            let s = sst.state.unwrap();
            assert!(zg.is_valid_final(s), "spread 0 keeps zones synchronizable");
        }
    }

    #[test]
    fn test_unbounded_spread_still_synchronizable() {
        let mut zg = make(UNBOUNDED_SPREAD);
        let init = zg.initial();
        let s0 = init[0].state.unwrap();
        let out = zg.outgoing(s0);
        // Independent delays desynchronize the references, but nothing
        // prevents equalizing them again.
        for sst in out.iter().filter(|sst| sst.status.is_ok()) {
            assert!(zg.is_valid_final(sst.state.unwrap()));
        }
    }

    #[test]
    fn test_shared_intvar_rejected() {
        let sys = Arc::new(
            System::new(
                &decl::parse(
                    "system:s\n\
                     int:c:0:1:0\n\
                     process:P\n\
                     process:Q\n\
                     location:P:l0{initial}\n\
                     location:Q:m0{initial}\n\
                     edge:P:l0:l0:a{do: c=1}\n\
                     edge:Q:m0:m0:b{provided: c==1}\n",
                )
                .unwrap(),
            )
            .unwrap(),
        );
        assert_eq!(
            RefZg::new(sys, RefClockKind::PerProcess, 0, 64, 64, false).unwrap_err(),
            RefZgError::SharedIntVar
        );
    }

    #[test]
    fn test_single_reference_allows_shared() {
        let sys = two_clocks();
        let zg = RefZg::new(sys, RefClockKind::Single, UNBOUNDED_SPREAD, 64, 64, false);
        assert!(zg.is_ok());
        assert_eq!(zg.unwrap().refclocks().refcount(), 1);
    }

    #[test]
    fn test_reset_to_value_only() {
        let sys = Arc::new(
            System::new(
                &decl::parse(
                    "system:s\n\
                     clock:x\n\
                     process:P\n\
                     location:P:l0{initial}\n\
                     edge:P:l0:l0:a{do: x=1}\n",
                )
                .unwrap(),
            )
            .unwrap(),
        );
        let mut zg = RefZg::new(sys, RefClockKind::PerProcess, 0, 64, 64, false).unwrap();
        let init = zg.initial();
        let s0 = init[0].state.unwrap();
        let out = zg.outgoing(s0);
        assert_eq!(out[0].status, Status::ResetFailed);
    }
}
