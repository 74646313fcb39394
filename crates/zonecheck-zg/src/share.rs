//! Structural sharing of pool-allocated objects.
//!
//! A share table canonicalizes objects by structural hash: `share` either
//! returns an existing equal instance (bumping its reference count and
//! releasing the argument) or installs the argument as the canonical
//! instance. Canonical objects are immutable. The table holds weak entries:
//! releasing the last reference through [`ShareTable::release`] also drops
//! the table entry.

use crate::pool::{Pool, SlotId};
use ahash::RandomState;
use smallvec::SmallVec;
use std::collections::HashMap;

#[derive(Debug)]
pub struct ShareTable {
    /// Structural hash to the canonical slots carrying it.
    buckets: HashMap<u64, SmallVec<[SlotId; 2]>, RandomState>,
    /// Canonical slot to its hash, for removal on release.
    canonical: HashMap<SlotId, u64, RandomState>,
}

impl ShareTable {
    pub fn with_capacity(capacity: usize) -> ShareTable {
        ShareTable {
            buckets: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            canonical: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
        }
    }

    /// Canonicalize the value in `id`. Returns the canonical slot, which is
    /// `id` itself when no equal instance was shared before.
    pub fn share<T: PartialEq>(&mut self, pool: &mut Pool<T>, id: SlotId, hash: u64) -> SlotId {
        if self.canonical.contains_key(&id) {
            return id;
        }
        if let Some(ids) = self.buckets.get(&hash) {
            for &cand in ids {
                if pool.get(cand) == pool.get(id) {
                    pool.retain(cand);
                    pool.release(id);
                    return cand;
                }
            }
        }
        self.buckets.entry(hash).or_default().push(id);
        self.canonical.insert(id, hash);
        id
    }

    /// Drop one reference to `id`, removing its table entry when the slot
    /// dies. Safe to call on slots that were never shared.
    pub fn release<T>(&mut self, pool: &mut Pool<T>, id: SlotId) {
        if pool.refs(id) == 1 {
            if let Some(hash) = self.canonical.remove(&id) {
                if let Some(ids) = self.buckets.get_mut(&hash) {
                    ids.retain(|x| *x != id);
                    if ids.is_empty() {
                        self.buckets.remove(&hash);
                    }
                }
            }
        }
        pool.release(id);
    }

    /// Number of canonical instances currently shared.
    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_deduplicates() {
        let mut pool: Pool<Vec<u32>> = Pool::new(8);
        let mut table = ShareTable::with_capacity(16);

        let a = pool.alloc(vec![1, 2, 3]);
        let a = table.share(&mut pool, a, 42);
        let b = pool.alloc(vec![1, 2, 3]);
        let b = table.share(&mut pool, b, 42);

        assert_eq!(a, b);
        assert_eq!(pool.refs(a), 2);
        assert_eq!(pool.live(), 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_share_distinct_values_same_hash() {
        let mut pool: Pool<Vec<u32>> = Pool::new(8);
        let mut table = ShareTable::with_capacity(16);

        let a_id = pool.alloc(vec![1]);
        let a = table.share(&mut pool, a_id, 7);
        let b_id = pool.alloc(vec![2]);
        let b = table.share(&mut pool, b_id, 7);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_release_removes_dead_entry() {
        let mut pool: Pool<Vec<u32>> = Pool::new(8);
        let mut table = ShareTable::with_capacity(16);

        let a_id = pool.alloc(vec![1]);
        let a = table.share(&mut pool, a_id, 7);
        table.release(&mut pool, a);
        assert_eq!(table.len(), 0);
        assert_eq!(pool.live(), 0);

        // A new equal value becomes canonical again without aliasing the
        // dead slot.
        let b_id = pool.alloc(vec![1]);
        let b = table.share(&mut pool, b_id, 7);
        assert_eq!(pool.refs(b), 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_release_keeps_live_entry() {
        let mut pool: Pool<Vec<u32>> = Pool::new(8);
        let mut table = ShareTable::with_capacity(16);

        let a_id = pool.alloc(vec![1]);
        let a = table.share(&mut pool, a_id, 7);
        let b_id = pool.alloc(vec![1]);
        let b = table.share(&mut pool, b_id, 7);
        assert_eq!(a, b);
        table.release(&mut pool, a);
        assert_eq!(table.len(), 1);
        assert_eq!(pool.refs(b), 1);
    }

    #[test]
    fn test_release_unshared_slot() {
        let mut pool: Pool<Vec<u32>> = Pool::new(8);
        let mut table = ShareTable::with_capacity(16);
        let a = pool.alloc(vec![9]);
        table.release(&mut pool, a);
        assert_eq!(pool.live(), 0);
    }
}
