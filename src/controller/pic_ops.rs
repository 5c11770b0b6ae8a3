//! PIC operator pipeline (4.6.7): `pic_op` iterates over `count` blocks,
//! gating each through the PIC MSHR; `pic_single_op` decides, per block,
//! whether the operator runs at this level or must be forwarded.

use std::sync::Arc;

use crate::coherence::{CState, RequesterId, TransitionReason, Waiter};
use crate::common::{Address, SimError, SimResult};
use crate::network::{DirectoryMessage, HitWhere, MemOp, MessageTag, PicOpcode};
use crate::pic::{do_here, llc_search_dummy_address, same_bank, BankPolicy, LevelContext};
use crate::rendezvous::Continuation;

use super::{Arena, Controller};

fn opcode_name(opcode: PicOpcode) -> &'static str {
    match opcode {
        PicOpcode::Copy => "copy",
        PicOpcode::Compare => "compare",
        PicOpcode::Search => "search",
        PicOpcode::Logical => "logical",
        PicOpcode::ClMult => "clmult",
    }
}

impl Controller {
    /// Entry point from the core: iterates `count` blocks of the operator
    /// starting at `a1`/`a2`(/`a3`), each gated through the PIC MSHR.
    pub fn pic_op(
        &self,
        arena: &Arena,
        opcode: PicOpcode,
        a1: Address,
        a2: Address,
        a3: Option<Address>,
        count: usize,
        now: u64,
    ) -> SimResult<(HitWhere, u64)> {
        let master = self.master_ctrl(arena);
        let mut t = now;
        let mut where_ = HitWhere::Level(self.level);

        for i in 0..count.max(1) {
            let step = (self.geometry.block_size * i) as u64;
            let addr1 = Address::new(a1.val() + step);
            let addr2 = Address::new(a2.val() + step);
            let addr3 = a3.map(|a| Address::new(a.val() + step));

            let t_slot = master.state.lock().pic_mshr.start_time(t);
            let continuation = Arc::new(Continuation::new());
            let (w, t_done) = self.pic_single_op(arena, master, opcode, addr1, addr2, addr3, t_slot, &continuation)?;
            master.state.lock().pic_mshr.complete(t_slot, t_done.saturating_sub(t_slot), addr1.val());
            where_ = w;
            t = t_done;
        }

        master.state.lock().stats.record_pic_op(opcode_name(opcode));
        Ok((where_, t))
    }

    #[allow(clippy::too_many_arguments)]
    fn pic_single_op(
        &self,
        arena: &Arena,
        master: &Controller,
        opcode: PicOpcode,
        a1: Address,
        a2: Address,
        a3: Option<Address>,
        now: u64,
        continuation: &Arc<Continuation>,
    ) -> SimResult<(HitWhere, u64)> {
        let home_a1 = master.home_lookup.home(a1);
        let home_a2 = master.home_lookup.home(a2);
        let ctx = LevelContext { level: self.level, private: self.private, last_level: self.last_level };
        let here = do_here(ctx, opcode, home_a1, home_a2);

        let set1 = self.set_index(a1);
        let set2 = self.set_index(a2);
        if same_bank(BankPolicy::AllWaysOneBank, set1, set2, self.geometry.num_sets) {
            master.state.lock().stats.record_pic_in_bank(opcode_name(opcode), "all_ways_one_bank");
        }
        if same_bank(BankPolicy::MoreSetsOneBank, set1, set2, self.geometry.num_sets) {
            master.state.lock().stats.record_pic_in_bank(opcode_name(opcode), "more_sets_one_bank");
        }

        if here {
            return self.pic_execute_here(arena, master, opcode, a1, a2, a3, now);
        }

        // Forwarding to another level or across a directory slice: settle
        // this level's own copies of the operands first, so a Modified a1
        // isn't silently left stale here and a2 reflects the right
        // visibility for the opcode (4.6.7 step 3).
        self.pic_corrective_writeback(arena, opcode, a1, a2)?;

        if let Some(next) = self.next_of(arena) {
            let next_master = next.master_ctrl(arena);
            return next.pic_single_op(arena, next_master, opcode, a1, a2, a3, now, continuation);
        }

        self.pic_cross_slice(master, opcode, a1, a2, home_a1, home_a2, now, continuation)
    }

    /// Writes back a1 if this level holds it Modified, and either invalidates
    /// (`Copy`) or writes back (`Compare`/`Search`) a2, before the operator
    /// forwards past this level (4.6.7 step 3).
    fn pic_corrective_writeback(&self, arena: &Arena, opcode: PicOpcode, a1: Address, a2: Address) -> SimResult<()> {
        self.update_block(arena, a1, CState::Shared, TransitionReason::Pic, None)?;
        let a2_target = if opcode == PicOpcode::Copy { CState::Invalid } else { CState::Shared };
        self.update_block(arena, a2, a2_target, TransitionReason::Pic, None)?;
        Ok(())
    }

    fn pic_execute_here(
        &self,
        arena: &Arena,
        master: &Controller,
        opcode: PicOpcode,
        a1: Address,
        a2: Address,
        a3: Option<Address>,
        now: u64,
    ) -> SimResult<(HitWhere, u64)> {
        // Protect the operator's own operands from evicting one another while
        // co-located here (4.6.7 step 2); always lifted before returning.
        let protect: Vec<Address> = std::iter::once(a1).chain(std::iter::once(a2)).chain(a3).collect();
        master.state.lock().storage.set_no_evict(protect);
        let result = self.pic_execute_here_inner(arena, master, opcode, a1, a2, a3, now);
        master.state.lock().storage.clear_no_evict();
        result
    }

    fn pic_execute_here_inner(
        &self,
        arena: &Arena,
        master: &Controller,
        opcode: PicOpcode,
        a1: Address,
        a2: Address,
        a3: Option<Address>,
        now: u64,
    ) -> SimResult<(HitWhere, u64)> {
        let mut scratch1 = vec![0u8; self.geometry.block_size];
        let (_, t1) = self.pic_mem_op(arena, MemOp::Read, a1, now, &mut scratch1)?;

        let op2 = if opcode == PicOpcode::Copy { MemOp::Write } else { MemOp::Read };
        let mut scratch2 = scratch1.clone();
        let (where2, t2) = self.pic_mem_op(arena, op2, a2, t1, &mut scratch2)?;
        let mut t_final = t1.max(t2);

        if opcode.is_ternary() {
            let a3 = a3.ok_or_else(|| SimError::protocol(a2, "ternary PIC opcode requires a third address"))?;
            let mut scratch3 = scratch2.clone();
            let (_, t3) = self.pic_mem_op(arena, MemOp::Write, a3, t_final, &mut scratch3)?;
            t_final = t3;
        }

        if opcode == PicOpcode::Search {
            let writes = master.state.lock().stats.get("pic_key_writes");
            let is_miss = crate::pic::search_key_is_miss(master.search_key_enabled, writes);
            master.state.lock().stats.record_pic_key(is_miss);
        }

        Ok((where2, t_final))
    }

    /// `mem_op` minus ordinary statistics: used by the PIC pipeline's
    /// sub-operations, which account separately via `pic_ops_*` counters.
    fn pic_mem_op(&self, arena: &Arena, op: MemOp, addr: Address, now: u64, buf: &mut [u8]) -> SimResult<(HitWhere, u64)> {
        let master = self.master_ctrl(arena);
        let set = self.set_index(addr);
        let _guard = self.set_locks.lock_exclusive(set);

        let hit = master.state.lock().storage.peek(addr).map(|b| Self::permissible(op, b.state)).unwrap_or(false);
        if hit {
            let mut state = master.state.lock();
            match op {
                MemOp::Write => state.storage.write(addr, 0, buf, false),
                MemOp::Read | MemOp::ReadExclusive => state.storage.read(addr, 0, buf, false),
            }
            return Ok((HitWhere::Level(self.level), now + self.cfg.tags_access_time + self.cfg.data_access_time));
        }

        drop(_guard);
        self.mem_op_miss(arena, addr, 0, buf, op, now, false)
    }

    #[allow(clippy::too_many_arguments)]
    fn pic_cross_slice(
        &self,
        master: &Controller,
        opcode: PicOpcode,
        a1: Address,
        a2: Address,
        home_a1: u32,
        home_a2: u32,
        now: u64,
        continuation: &Arc<Continuation>,
    ) -> SimResult<(HitWhere, u64)> {
        if opcode != PicOpcode::Search {
            return Err(SimError::protocol(a2, "PIC operator crossing directory slices at a non-search opcode is unsupported"));
        }
        let dummy = llc_search_dummy_address(a1, a2, home_a1, home_a2, self.geometry.block_size);
        let directory = master
            .directory
            .as_ref()
            .ok_or_else(|| SimError::protocol(a2, "PIC cross-slice search requires a directory"))?;

        let waiter = Waiter {
            exclusive: false,
            is_prefetch: false,
            requester: RequesterId(self.id.0),
            t_issue: now,
            continuation: Arc::clone(continuation),
        };
        let is_first = master.state.lock().waiters.enqueue(a2.val(), waiter);
        if is_first {
            directory.send(DirectoryMessage {
                tag: MessageTag::VpicSearchReq,
                sender_id: master.id.0,
                receiver_home_id: home_a2,
                address: a2,
                data: None,
                secondary_address: Some(dummy),
                perf_token: now,
            });
        }
        master.state.lock().stats.record_pic_vop("search");

        let reply = continuation.wait();
        continuation.ack();
        Ok((HitWhere::Remote, reply.t_complete))
    }
}
