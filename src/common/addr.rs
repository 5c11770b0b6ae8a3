//! Address Lookup.
//!
//! Pure functions for decomposing a flat 64-bit address into the pieces the
//! rest of the simulator keys on: which set it falls in, its block-aligned
//! form, and which directory home node owns it. None of these carry timing
//! side effects; they're evaluated as often as needed.

use std::fmt;

/// A 64-bit memory address. Distinguished from a raw `u64` so call sites read
/// as address arithmetic rather than generic integer math.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub u64);

impl Address {
    /// Wraps a raw address.
    #[inline(always)]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw 64-bit value.
    #[inline(always)]
    pub const fn val(self) -> u64 {
        self.0
    }

    /// Clears the low `log2(block_size)` bits, producing the block-aligned address.
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is not a power of two.
    #[inline]
    pub fn aligned(self, block_size: usize) -> Address {
        assert!(block_size.is_power_of_two(), "block_size must be a power of two");
        Address(self.0 & !(block_size as u64 - 1))
    }

    /// True if this address is already block-aligned for the given block size.
    #[inline]
    pub fn is_aligned(self, block_size: usize) -> bool {
        self.aligned(block_size) == self
    }

    /// Offset of this address within its containing block.
    #[inline]
    pub fn block_offset(self, block_size: usize) -> usize {
        (self.0 & (block_size as u64 - 1)) as usize
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Geometry shared by every address-indexed structure keyed on a cache's
/// (block_size, num_sets) pair: the set-lock array, the coherence directory,
/// and every cache level's own storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheGeometry {
    /// Bytes per cache line. Must be a power of two.
    pub block_size: usize,
    /// Number of sets. Must be a power of two.
    pub num_sets: usize,
    /// Associativity (ways per set).
    pub ways: usize,
}

impl CacheGeometry {
    /// Builds a geometry from size/line/ways, as supplied by `CacheConfig`.
    pub fn new(size_bytes: usize, line_bytes: usize, ways: usize) -> Self {
        let ways = ways.max(1);
        let line_bytes = if line_bytes.is_power_of_two() { line_bytes } else { 64 };
        let num_lines = (size_bytes / line_bytes).max(ways);
        let num_sets = (num_lines / ways).next_power_of_two().max(1);
        Self { block_size: line_bytes, num_sets, ways }
    }

    /// Index of the set that `addr` maps into.
    #[inline]
    pub fn set_index(&self, addr: Address) -> usize {
        ((addr.0 / self.block_size as u64) as usize) & (self.num_sets - 1)
    }

    /// Tag bits of `addr` relative to this geometry (everything above the set index).
    #[inline]
    pub fn tag(&self, addr: Address) -> u64 {
        addr.0 / (self.block_size * self.num_sets) as u64
    }
}

/// External collaborator: maps an address to the directory node responsible
/// for it. Implemented by the tag-directory subsystem, out of scope here.
pub trait HomeLookup: Send + Sync {
    /// Returns the home node id for `addr`.
    fn home(&self, addr: Address) -> u32;
}

/// A `HomeLookup` that hashes the block address modulo a fixed node count.
/// Stands in for the real tag-directory hash during tests and single-node setups.
pub struct ModuloHome {
    /// Number of home nodes to hash across.
    pub num_nodes: u32,
    /// Block size used to strip the intra-block offset before hashing.
    pub block_size: usize,
}

impl HomeLookup for ModuloHome {
    fn home(&self, addr: Address) -> u32 {
        let block = addr.val() / self.block_size as u64;
        (block % self.num_nodes.max(1) as u64) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_clears_offset_bits() {
        let a = Address::new(0x1234);
        assert_eq!(a.aligned(64), Address::new(0x1200));
        assert_eq!(a.block_offset(64), 0x34);
    }

    #[test]
    fn geometry_set_index_wraps() {
        let geom = CacheGeometry::new(32 * 1024, 64, 8);
        assert_eq!(geom.block_size, 64);
        assert_eq!(geom.ways, 8);
        // two addresses one full geometry span apart hit the same set.
        let span = (geom.block_size * geom.num_sets) as u64;
        let a = Address::new(0x1000);
        let b = Address::new(0x1000 + span);
        assert_eq!(geom.set_index(a), geom.set_index(b));
        assert_ne!(geom.tag(a), geom.tag(b));
    }

    #[test]
    fn modulo_home_is_deterministic() {
        let home = ModuloHome { num_nodes: 4, block_size: 64 };
        let a = Address::new(0x4000);
        assert_eq!(home.home(a), home.home(a));
    }
}
