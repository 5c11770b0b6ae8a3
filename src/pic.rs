//! Processing-In-Cache (PIC) operator pipeline support.
//!
//! Reuses the coherence/storage machinery through a second request channel;
//! this module holds the opcode-independent policy decisions (`do_here`,
//! the LLC-crossing dummy address, and the search-key-miss estimator) that
//! the controller's PIC path (`controller::pic_ops`) drives.

use crate::common::Address;
use crate::network::PicOpcode;

/// Position of a level in the hierarchy, for the `do_here` policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelContext {
    /// 1-based level index (1 = L1, higher = further from the core).
    pub level: u8,
    /// True if this level is private to one core (not shared across cores).
    pub private: bool,
    /// True if this is the last level in the hierarchy.
    pub last_level: bool,
}

/// Decides whether a PIC sub-operation executes at this level or must be
/// forwarded. `Search` always executes at the last level: its key-compare
/// semantics only make sense once all candidate data is co-located.
/// Everywhere else, a private level only runs the op locally when both
/// addresses are present in *this* core's private slice of the hierarchy;
/// a shared (last) level runs it locally when both addresses hash to the
/// same directory home.
pub fn do_here(ctx: LevelContext, opcode: PicOpcode, home_a1: u32, home_a2: u32) -> bool {
    if opcode == PicOpcode::Search {
        return ctx.last_level;
    }
    if ctx.private {
        return true;
    }
    if ctx.last_level {
        return home_a1 == home_a2;
    }
    false
}

/// Fabricates the dummy secondary address used when a PIC `Search` must
/// cross directory slices at the last level: `a2 + (home(a1) - home(a2)) *
/// block_size`. This is a heuristic carried over from the donor simulator,
/// not a principled address — it exists only to give the outbound
/// `VPIC_SEARCH_REQ` a plausible same-home companion address; see
/// DESIGN.md for the open-question writeup.
pub fn llc_search_dummy_address(a1: Address, a2: Address, home_a1: u32, home_a2: u32, block_size: usize) -> Address {
    let diff = home_a1 as i64 - home_a2 as i64;
    let offset = diff * block_size as i64;
    let base = a2.val() as i64;
    let _ = a1;
    Address::new((base + offset) as u64)
}

/// Estimates whether a PIC `Search` key access is a "miss" for the search-
/// key microbenchmark's statistics (`pic_key_{writes,misses}`). The
/// estimator divides cumulative key writes by a fixed stride of 2048,
/// assuming a specific microbenchmark's key layout; the donor simulator
/// asserts this holds rather than validating it, so this port guards the
/// estimator behind `microbench_search_key_enabled` rather than applying it
/// unconditionally (see DESIGN.md).
pub fn search_key_is_miss(enabled: bool, key_writes_so_far: u64) -> bool {
    const KEY_STRIDE: u64 = 2048;
    enabled && key_writes_so_far % KEY_STRIDE == 0
}

/// In-bank co-location accounting policy for PIC statistics
/// (`pic_ops_in_bank_<op>_<policy>`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BankPolicy {
    /// All ways of a bank are considered co-located.
    AllWaysOneBank,
    /// A wider span of sets is considered co-located within one bank.
    MoreSetsOneBank,
}

/// True if `a1` and `a2` fall in the same bank under `policy`, given the
/// cache geometry's set index function.
pub fn same_bank(policy: BankPolicy, set_a1: usize, set_a2: usize, num_sets: usize) -> bool {
    match policy {
        BankPolicy::AllWaysOneBank => set_a1 == set_a2,
        BankPolicy::MoreSetsOneBank => {
            let span = (num_sets / 4).max(1);
            set_a1 / span == set_a2 / span
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_always_runs_at_last_level() {
        let ctx = LevelContext { level: 1, private: true, last_level: false };
        assert!(!do_here(ctx, PicOpcode::Search, 0, 1));
        let llc = LevelContext { level: 3, private: false, last_level: true };
        assert!(do_here(llc, PicOpcode::Search, 0, 1));
    }

    #[test]
    fn private_level_always_runs_non_search_locally() {
        let ctx = LevelContext { level: 1, private: true, last_level: false };
        assert!(do_here(ctx, PicOpcode::Copy, 3, 9));
    }

    #[test]
    fn shared_last_level_requires_matching_home() {
        let llc = LevelContext { level: 3, private: false, last_level: true };
        assert!(do_here(llc, PicOpcode::Copy, 2, 2));
        assert!(!do_here(llc, PicOpcode::Copy, 2, 5));
    }

    #[test]
    fn search_key_estimator_respects_enable_flag() {
        assert!(!search_key_is_miss(false, 2048));
        assert!(search_key_is_miss(true, 2048));
        assert!(!search_key_is_miss(true, 2049));
    }

    #[test]
    fn dummy_address_shifts_by_home_difference() {
        let a1 = Address::new(0x1000);
        let a2 = Address::new(0x2000);
        let dummy = llc_search_dummy_address(a1, a2, 3, 1, 64);
        assert_eq!(dummy, Address::new(0x2000 + 2 * 64));
    }
}
