//! Controller arena and top-level simulator.
//!
//! Builds one private L1 and one private L2 per core plus a single shared
//! last-level cache, wires them into the arena-based controller graph
//! described in the coherence design notes, and exposes the top-level
//! `mem_op`/`pic_op` entry points an embedding driver calls on behalf of
//! each simulated core.

use std::sync::Arc;

use crate::common::{Address, HomeLookup, SimResult};
use crate::coherence::SetLockArray;
use crate::config::Config;
use crate::controller::{Arena, Controller, LevelIndex};
use crate::dram::DramClient;
use crate::network::{DirectoryClient, DirectoryMessage, HitWhere, LockSignal, MemOp, PicOpcode};
use crate::stats::StatRegistry;

/// Owns every controller in one coherence domain and the per-core index of
/// each core's L1.
pub struct Simulator {
    controllers: Vec<Controller>,
    l1_by_core: Vec<LevelIndex>,
}

impl Simulator {
    /// Builds a simulator for `num_cores` cores from `cfg`, sharing one
    /// last-level cache and one set-lock array striped over the LLC's
    /// geometry across the whole stack.
    pub fn new(
        cfg: &Config,
        num_cores: usize,
        home_lookup: Arc<dyn HomeLookup>,
        directory: Option<Arc<dyn DirectoryClient>>,
        dram: Option<Arc<dyn DramClient>>,
    ) -> SimResult<Self> {
        cfg.validate()?;

        let llc_cfg = cfg.perf_model.get("llc").cloned().unwrap_or_default();
        let l2_cfg = cfg.perf_model.get("l2").cloned().unwrap_or_default();
        let l1_cfg = cfg.perf_model.get("l1").cloned().unwrap_or_default();
        let search_key_enabled = cfg.general.microbench_search_key_enabled;

        let mut controllers = Vec::new();

        let llc_idx = LevelIndex(0);
        controllers.push(Controller::new_master(
            llc_idx,
            3,
            0,
            "llc",
            llc_cfg,
            true,
            Arc::new(SetLockArray::new(1)), // replaced below once geometry is known
            Arc::clone(&home_lookup),
            directory,
            dram,
            search_key_enabled,
        )?);

        // The stack lock is striped by the LLC's own geometry; rebuild it
        // now that the LLC controller (and therefore its geometry) exists,
        // and share the same array across every level.
        let set_locks = Arc::new(SetLockArray::new(controllers[0].geometry.num_sets));
        controllers[0].set_locks = Arc::clone(&set_locks);

        let mut l1_by_core = Vec::with_capacity(num_cores);

        for core in 0..num_cores {
            let l2_idx = LevelIndex(controllers.len());
            let mut l2 = Controller::new_master(
                l2_idx,
                2,
                core as u32,
                format!("l2-core{core}"),
                l2_cfg.clone(),
                false,
                Arc::clone(&set_locks),
                Arc::clone(&home_lookup),
                None,
                None,
                search_key_enabled,
            )?;
            l2.next = Some(llc_idx);
            controllers.push(l2);

            let l1_idx = LevelIndex(controllers.len());
            let mut l1 = Controller::new_master(
                l1_idx,
                1,
                core as u32,
                format!("l1-core{core}"),
                l1_cfg.clone(),
                false,
                Arc::clone(&set_locks),
                Arc::clone(&home_lookup),
                None,
                None,
                search_key_enabled,
            )?;
            l1.next = Some(l2_idx);
            controllers.push(l1);

            controllers[l2_idx.0].prev.push(l1_idx);
            controllers[llc_idx.0].prev.push(l2_idx);
            l1_by_core.push(l1_idx);
        }

        Ok(Self { controllers, l1_by_core })
    }

    fn arena(&self) -> &Arena {
        &self.controllers
    }

    /// Logs a fatal coherence error before it propagates out to the caller,
    /// matching the donor's top-level abort-on-invariant-violation behavior
    /// (there is no retry path; every `SimError` is terminal).
    fn trace_err<T>(result: SimResult<T>) -> SimResult<T> {
        if let Err(ref e) = result {
            tracing::error!(error = %e, "fatal coherence error, aborting run");
        }
        result
    }

    /// Entry point from a simulated core's performance model.
    #[allow(clippy::too_many_arguments)]
    pub fn mem_op(
        &self,
        core: usize,
        lock_signal: LockSignal,
        op: MemOp,
        addr: Address,
        offset: usize,
        buf: &mut [u8],
        now: u64,
    ) -> SimResult<(HitWhere, u64)> {
        let idx = self.l1_by_core[core];
        Self::trace_err(self.controllers[idx.0].mem_op(self.arena(), lock_signal, op, addr, offset, buf, now))
    }

    /// Entry point from a simulated core's PIC issue path.
    pub fn pic_op(
        &self,
        core: usize,
        opcode: PicOpcode,
        a1: Address,
        a2: Address,
        a3: Option<Address>,
        count: usize,
        now: u64,
    ) -> SimResult<(HitWhere, u64)> {
        let idx = self.l1_by_core[core];
        Self::trace_err(self.controllers[idx.0].pic_op(self.arena(), opcode, a1, a2, a3, count, now))
    }

    /// Entry point from the network: dispatches a reply or directory
    /// request to the controller it is addressed to.
    pub fn handle_directory_msg(&self, controller: LevelIndex, msg: DirectoryMessage) -> SimResult<()> {
        Self::trace_err(self.controllers[controller.0].handle_directory_msg(self.arena(), msg))
    }

    /// This core's L1 controller index, for callers that need to address
    /// `handle_directory_msg` directly (e.g. test harnesses).
    pub fn l1_of(&self, core: usize) -> LevelIndex {
        self.l1_by_core[core]
    }

    /// Sums every controller's statistics into one registry.
    pub fn stats_total(&self) -> StatRegistry {
        let mut total = StatRegistry::new();
        for c in &self.controllers {
            total.merge(&c.stats_snapshot());
        }
        total
    }
}
