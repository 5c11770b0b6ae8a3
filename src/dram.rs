//! DRAM controller contract.
//!
//! The DRAM timing model itself is out of scope (external collaborator);
//! this module defines the interface a last-level controller uses to read
//! or write memory directly, for configurations with DRAM attached instead
//! of (or behind) a directory.

use crate::common::Address;
use crate::network::HitWhere;

/// Outcome of a DRAM access: latency charged, and where it was attributed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DramResult {
    /// Cycles charged for this access.
    pub latency: u64,
    /// Attribution bucket (always `HitWhere::Dram` in practice, but passed
    /// through so callers don't special-case the DRAM path).
    pub where_: HitWhere,
}

/// External contract to the DRAM controller.
pub trait DramClient: Send + Sync {
    /// Reads a full block from `addr` into `buf`, issued at `t_issue`.
    fn get_data(&self, addr: Address, core_id: u32, buf: &mut [u8], t_issue: u64, perf_token: u64) -> DramResult;

    /// Writes a full block at `addr` from `buf`, issued at `t_issue`.
    fn put_data(&self, addr: Address, core_id: u32, buf: &[u8], t_issue: u64) -> DramResult;
}
