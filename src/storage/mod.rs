//! Cache Storage.
//!
//! A configurable set-associative store of [`CacheBlock`]s: lookup, insert
//! with victim selection, invalidate, and an optional per-set fault
//! injection hook applied transparently on read. Carries per-block
//! coherence metadata (state, warmup/prefetch flags, owner, used-bytes
//! bitmap, optional sharer tracking) but not full line contents beyond what
//! the PIC operators need to move or compare.

/// Cache replacement policy implementations (FIFO, LRU, MRU, PLRU, Random).
pub mod policies;

use std::collections::HashSet;

use self::policies::ReplacementPolicy;
use crate::coherence::CState;
use crate::common::{Address, CacheGeometry};

/// Flags tracked per block beyond its coherence state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockFlags {
    /// Block was installed during cache warmup and has not yet been touched.
    pub warmup: bool,
    /// Block was installed by a prefetch and has not yet been demand-referenced.
    pub prefetch: bool,
}

/// A single resident cache line and its coherence metadata.
#[derive(Clone, Debug)]
pub struct CacheBlock {
    /// Tag bits identifying which block occupies this way.
    pub tag: u64,
    /// Current coherence state.
    pub state: CState,
    /// Warmup/prefetch flags.
    pub flags: BlockFlags,
    /// Opaque id of the requester that most recently wrote this block
    /// (core id, or a sharer id in multi-sharer configurations).
    pub owner_id: Option<u32>,
    /// Bitmap with one bit per sub-unit of the block touched since fill.
    pub used_bitmap: u64,
    /// Indices into this controller's previous-level list that are known to
    /// cache this block. Only populated when sharer tracking (the
    /// configuration surface's `atd/enabled`) is on.
    pub cached_locs: Option<HashSet<usize>>,
    /// Line contents. Present so PIC operators have real bytes to move,
    /// compare, or hash; otherwise only coherence state is authoritative.
    pub data: Vec<u8>,
}

impl CacheBlock {
    fn new(tag: u64, state: CState, line_bytes: usize) -> Self {
        Self {
            tag,
            state,
            flags: BlockFlags::default(),
            owner_id: None,
            used_bitmap: 0,
            cached_locs: None,
            data: vec![0u8; line_bytes],
        }
    }
}

/// Hook that may corrupt read data before it reaches the caller, transparent
/// to everything above the storage layer. Used for fault-injection studies.
pub trait FaultInjector: Send + Sync {
    /// Possibly mutates `buf` (read from `addr` at offset `offset`) in place.
    fn maybe_corrupt(&mut self, addr: Address, offset: usize, buf: &mut [u8]);
}

struct Slot {
    valid: bool,
    block: Option<CacheBlock>,
}

/// Result of [`CacheStorage::insert`].
pub struct InsertResult {
    /// The victim block evicted to make room, if any (with its block address).
    pub victim: Option<(Address, CacheBlock)>,
}

/// A configurable set-associative cache of [`CacheBlock`]s.
pub struct CacheStorage {
    geometry: CacheGeometry,
    slots: Vec<Slot>,
    policy: Box<dyn ReplacementPolicy + Send + Sync>,
    fault_injector: Option<Box<dyn FaultInjector + Send + Sync>>,
    /// Block addresses currently protected from eviction (4.6.7's PIC
    /// no-evict hint: co-located operands must not evict one another mid-op).
    no_evict: HashSet<u64>,
}

impl CacheStorage {
    /// Creates storage for the given geometry and replacement policy.
    pub fn new(geometry: CacheGeometry, policy: Box<dyn ReplacementPolicy + Send + Sync>) -> Self {
        let n = geometry.num_sets * geometry.ways;
        Self {
            geometry,
            slots: (0..n).map(|_| Slot { valid: false, block: None }).collect(),
            policy,
            fault_injector: None,
            no_evict: HashSet::new(),
        }
    }

    /// Block address this set/way slot currently resolves to, from its tag.
    fn way_block_addr_val(&self, set: usize, tag: u64) -> u64 {
        tag * (self.geometry.block_size * self.geometry.num_sets) as u64 + (set as u64) * self.geometry.block_size as u64
    }

    /// Protects `addrs` from eviction until [`CacheStorage::clear_no_evict`]
    /// is called. Used to keep PIC operands co-resident while a multi-block
    /// operator is in flight at this level.
    pub fn set_no_evict(&mut self, addrs: impl IntoIterator<Item = Address>) {
        self.no_evict.extend(addrs.into_iter().map(|a| a.val()));
    }

    /// Lifts every eviction protection installed by `set_no_evict`.
    pub fn clear_no_evict(&mut self) {
        self.no_evict.clear();
    }

    /// Picks a victim way for `set`, honoring `no_evict`: if the policy's
    /// chosen way holds a protected address, scans the rest of the set for
    /// an occupied, unprotected way instead. Falls back to the policy's
    /// choice if every occupied way is protected.
    fn select_victim_way(&mut self, set: usize, base: usize) -> usize {
        let candidate = self.policy.get_victim(set);
        if self.no_evict.is_empty() {
            return candidate;
        }
        let block_size = self.geometry.block_size;
        let num_sets = self.geometry.num_sets;
        let no_evict = &self.no_evict;
        let is_protected = |way: usize, slots: &[Slot]| {
            slots[base + way].block.as_ref().is_some_and(|b| {
                let addr_val = b.tag * (block_size * num_sets) as u64 + (set as u64) * block_size as u64;
                no_evict.contains(&addr_val)
            })
        };
        if !is_protected(candidate, &self.slots) {
            return candidate;
        }
        (0..self.geometry.ways)
            .find(|&way| self.slots[base + way].valid && !is_protected(way, &self.slots))
            .unwrap_or(candidate)
    }

    /// Installs a fault injector, replacing any previous one.
    pub fn set_fault_injector(&mut self, injector: Box<dyn FaultInjector + Send + Sync>) {
        self.fault_injector = Some(injector);
    }

    /// Geometry this storage was built with.
    pub fn geometry(&self) -> CacheGeometry {
        self.geometry
    }

    fn base_idx(&self, addr: Address) -> usize {
        self.geometry.set_index(addr) * self.geometry.ways
    }

    fn find_way(&self, addr: Address) -> Option<usize> {
        let tag = self.geometry.tag(addr);
        let base = self.base_idx(addr);
        (0..self.geometry.ways).find(|&i| {
            let slot = &self.slots[base + i];
            slot.valid && slot.block.as_ref().is_some_and(|b| b.tag == tag)
        })
    }

    /// Looks up `addr` without any timing side effect or replacement-policy update.
    pub fn peek(&self, addr: Address) -> Option<&CacheBlock> {
        let way = self.find_way(addr)?;
        self.slots[self.base_idx(addr) + way].block.as_ref()
    }

    /// Mutable lookup, for in-place coherence transitions. No timing side effect.
    pub fn peek_mut(&mut self, addr: Address) -> Option<&mut CacheBlock> {
        let way = self.find_way(addr)?;
        let idx = self.base_idx(addr) + way;
        self.slots[idx].block.as_mut()
    }

    /// True if `addr` is resident.
    pub fn contains(&self, addr: Address) -> bool {
        self.peek(addr).is_some()
    }

    /// Reads `len` bytes at `offset` within the block for `addr` into `buf`,
    /// running the fault injector (if any) before returning. Optionally
    /// updates replacement-policy recency.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not resident, or if `offset + len` exceeds the line size.
    pub fn read(&mut self, addr: Address, offset: usize, buf: &mut [u8], update_replacement: bool) {
        let way = self.find_way(addr).expect("read of absent block");
        let set = self.geometry.set_index(addr);
        let idx = self.base_idx(addr) + way;
        let block = self.slots[idx].block.as_ref().expect("slot valid but empty");
        buf.copy_from_slice(&block.data[offset..offset + buf.len()]);
        if update_replacement {
            self.policy.update(set, way);
        }
        if let Some(inj) = self.fault_injector.as_mut() {
            inj.maybe_corrupt(addr, offset, buf);
        }
    }

    /// Writes `data` at `offset` within the block for `addr`, marking the
    /// touched sub-units in `used_bitmap`. Optionally updates replacement recency.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not resident, or if `offset + data.len()` exceeds the line size.
    pub fn write(&mut self, addr: Address, offset: usize, data: &[u8], update_replacement: bool) {
        let way = self.find_way(addr).expect("write to absent block");
        let set = self.geometry.set_index(addr);
        let idx = self.base_idx(addr) + way;
        let block = self.slots[idx].block.as_mut().expect("slot valid but empty");
        block.data[offset..offset + data.len()].copy_from_slice(data);
        let touched_word = offset / 8;
        block.used_bitmap |= 1u64 << touched_word.min(63);
        if update_replacement {
            self.policy.update(set, way);
        }
    }

    /// Installs a new block for `addr`, selecting a victim with the
    /// replacement policy if the set is full. Updates replacement recency
    /// for the newly installed way.
    pub fn insert(&mut self, addr: Address, state: CState) -> InsertResult {
        let set = self.geometry.set_index(addr);
        let tag = self.geometry.tag(addr);
        let base = set * self.geometry.ways;

        let free_way = (0..self.geometry.ways).find(|&i| !self.slots[base + i].valid);
        let way = free_way.unwrap_or_else(|| self.select_victim_way(set, base));

        let victim = if free_way.is_none() && self.slots[base + way].valid {
            let old_tag = self.slots[base + way].block.as_ref().unwrap().tag;
            let victim_addr = Address::new(self.way_block_addr_val(set, old_tag));
            self.slots[base + way].block.take().map(|b| (victim_addr, b))
        } else {
            None
        };

        self.slots[base + way] = Slot { valid: true, block: Some(CacheBlock::new(tag, state, self.geometry.block_size)) };
        self.policy.update(set, way);

        InsertResult { victim }
    }

    /// Drops the block for `addr`, if resident. No-op if absent.
    pub fn invalidate(&mut self, addr: Address) -> Option<CacheBlock> {
        let way = self.find_way(addr)?;
        let idx = self.base_idx(addr) + way;
        self.slots[idx].valid = false;
        self.slots[idx].block.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::policies::LruPolicy;

    fn storage(sets: usize, ways: usize, line: usize) -> CacheStorage {
        let geom = CacheGeometry { block_size: line, num_sets: sets, ways };
        CacheStorage::new(geom, Box::new(LruPolicy::new(sets, ways)))
    }

    #[test]
    fn insert_then_retrieve_round_trips() {
        let mut s = storage(4, 2, 64);
        let a = Address::new(0x1000).aligned(64);
        s.insert(a, CState::Shared);
        s.write(a, 0, &[1, 2, 3, 4], true);
        let mut buf = [0u8; 4];
        s.read(a, 0, &mut buf, true);
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn invalidate_then_peek_is_none() {
        let mut s = storage(4, 2, 64);
        let a = Address::new(0x1000).aligned(64);
        s.insert(a, CState::Shared);
        s.invalidate(a);
        assert!(s.peek(a).is_none());
    }

    #[test]
    fn invalidate_absent_is_silent() {
        let mut s = storage(4, 2, 64);
        assert!(s.invalidate(Address::new(0x9999)).is_none());
    }

    #[test]
    fn no_evict_protects_resident_addresses_from_eviction() {
        let mut s = storage(1, 2, 64);
        let geom = s.geometry();
        let span = (geom.block_size * geom.num_sets) as u64;
        let a0 = Address::new(0);
        let a1 = Address::new(span);
        let a2 = Address::new(span * 2);
        s.insert(a0, CState::Shared);
        s.insert(a1, CState::Shared);
        s.set_no_evict([a0]);
        let res = s.insert(a2, CState::Shared);
        let (victim_addr, _) = res.victim.expect("set was full");
        assert_eq!(victim_addr.val(), a1.val(), "protected a0 must not be chosen as victim");
        assert!(s.contains(a0));
        s.clear_no_evict();
    }

    #[test]
    fn insert_reports_victim_once_set_is_full() {
        let mut s = storage(1, 2, 64);
        let geom = s.geometry();
        let span = (geom.block_size * geom.num_sets) as u64;
        let a0 = Address::new(0);
        let a1 = Address::new(span);
        let a2 = Address::new(span * 2);
        assert!(s.insert(a0, CState::Shared).victim.is_none());
        assert!(s.insert(a1, CState::Shared).victim.is_none());
        let res = s.insert(a2, CState::Shared);
        assert!(res.victim.is_some());
    }

    proptest::proptest! {
        /// Any bytes written at any in-block offset read back unchanged, for
        /// arbitrary (set-aligned) addresses and payload lengths.
        #[test]
        fn write_then_read_round_trips(
            set in 0u64..4,
            offset in 0usize..56,
            payload in proptest::collection::vec(proptest::prelude::any::<u8>(), 1..8),
        ) {
            let mut s = storage(4, 2, 64);
            let geom = s.geometry();
            let addr = Address::new(set * geom.block_size as u64).aligned(geom.block_size);
            s.insert(addr, CState::Shared);
            s.write(addr, offset, &payload, true);
            let mut buf = vec![0u8; payload.len()];
            s.read(addr, offset, &mut buf, true);
            proptest::prop_assert_eq!(buf, payload);
        }

        /// A freshly inserted block is always found by `peek`/`contains` at
        /// the address it was inserted under.
        #[test]
        fn insert_then_peek_finds_the_same_address(set in 0u64..4) {
            let mut s = storage(4, 2, 64);
            let geom = s.geometry();
            let addr = Address::new(set * geom.block_size as u64).aligned(geom.block_size);
            s.insert(addr, CState::Exclusive);
            proptest::prop_assert!(s.contains(addr));
            proptest::prop_assert_eq!(s.peek(addr).map(|b| b.state), Some(CState::Exclusive));
        }
    }
}
