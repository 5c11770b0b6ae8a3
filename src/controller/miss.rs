//! First-level hit/miss path and descent through inner levels.

use std::sync::Arc;

use crate::coherence::RequesterId;
use crate::common::{Address, SimError, SimResult};
use crate::network::{DirectoryMessage, HitWhere, MemOp, MessageTag};
use crate::rendezvous::Continuation;

use super::{Arena, Controller};

impl Controller {
    /// First-level miss path (4.6.3): reserve an MSHR slot, drop any stale
    /// local copy, descend through [`Controller::shmem_req`], suspend on a
    /// directory miss, then refill locally and complete the MSHR entry.
    ///
    /// `record_stats` gates the ordinary `load-misses`/`store-misses`,
    /// overlapping-miss, and `mshr-latency` counters: the PIC pipeline's
    /// `pic_mem_op` reuses this path for its sub-operations but accounts
    /// separately via `pic_ops_*` counters, so it passes `false`.
    pub(crate) fn mem_op_miss(
        &self,
        arena: &Arena,
        addr: Address,
        offset: usize,
        buf: &mut [u8],
        op: MemOp,
        now: u64,
        record_stats: bool,
    ) -> SimResult<(HitWhere, u64)> {
        let master = self.master_ctrl(arena);
        let set = self.set_index(addr);

        let t_issue = now + self.cfg.tags_access_time;
        let t_reserved = master.state.lock().mshr.start_time(t_issue);

        if record_stats {
            self.stats_mut(|s| {
                s.record_miss(op == MemOp::Write);
                if t_reserved > t_issue {
                    s.record_overlapping_miss(op == MemOp::Write);
                    s.add_mshr_latency(t_reserved - t_issue);
                }
            });
        }

        // Stack lock is held for the whole miss descent; inner levels assume
        // it is already held rather than re-acquiring it (their `have_lock`
        // contract).
        let guard = self.set_locks.lock_exclusive(set);
        master.state.lock().storage.invalidate(addr);

        let continuation = Arc::new(Continuation::new());
        let requester = RequesterId(self.id.0);

        let next = self
            .next_of(arena)
            .ok_or_else(|| SimError::invariant(addr, "miss path reached with no next-level controller"))?;

        let where_ = {
            let first = next.shmem_req(arena, requester, op, addr, true, t_reserved, &continuation)?;
            if first == HitWhere::Miss {
                drop(guard);
                let reply = continuation.wait();
                continuation.ack();
                let _guard2 = self.set_locks.lock_exclusive(set);
                next.shmem_req(arena, requester, op, addr, false, reply.t_complete, &continuation)?
            } else {
                first
            }
        };

        let t_data = self.copy_from_next_level(arena, master, next, addr, offset, buf, op, t_reserved)?;

        master.state.lock().mshr.complete(t_issue, t_data.saturating_sub(t_issue), addr.val());
        self.train_and_fire_prefetch(arena, master, next, addr, t_data);

        Ok((where_, t_data))
    }

    /// Pulls the now-resident block from `next`'s storage into this level's
    /// storage (installing it if absent, refreshing it if already present),
    /// applies the caller's access to the freshly installed block, and
    /// returns the access's completion time. Models next-level read
    /// bandwidth as the next level's own tags+data access time, already
    /// billed during the `shmem_req` descent.
    fn copy_from_next_level(
        &self,
        arena: &Arena,
        master: &Controller,
        next: &Controller,
        addr: Address,
        offset: usize,
        buf: &mut [u8],
        op: MemOp,
        now: u64,
    ) -> SimResult<u64> {
        let next_master = next.master_ctrl(arena);
        let source = {
            let state = next_master.state.lock();
            state
                .storage
                .peek(addr)
                .cloned()
                .ok_or_else(|| SimError::invariant(addr, "copy_from_next_level: block absent at next level"))?
        };

        {
            let mut state = master.state.lock();
            if state.storage.peek(addr).is_none() {
                let result = state.storage.insert(addr, source.state);
                if let Some((victim_addr, victim_block)) = result.victim {
                    drop(state);
                    self.handle_eviction(arena, master, victim_addr, victim_block, now)?;
                    state = master.state.lock();
                }
            }
            if let Some(block) = state.storage.peek_mut(addr) {
                block.state = source.state;
                block.data.copy_from_slice(&source.data);
            }
        }

        let t = now + self.cfg.tags_access_time + self.cfg.data_access_time;
        {
            let mut state = master.state.lock();
            match op {
                MemOp::Write => state.storage.write(addr, offset, buf, true),
                MemOp::Read | MemOp::ReadExclusive => state.storage.read(addr, offset, buf, true),
            }
        }
        Ok(t)
    }

    fn train_and_fire_prefetch(&self, arena: &Arena, master: &Controller, next: &Controller, addr: Address, now: u64) {
        let candidates = {
            let mut state = master.state.lock();
            match state.prefetcher.as_mut() {
                Some(p) => p.observe(addr.val(), true),
                None => return,
            }
        };
        for line in candidates {
            let line_addr = Address::new(line).aligned(self.geometry.block_size);
            let continuation = Arc::new(Continuation::new());
            // Best-effort: a fired prefetch that misses is not waited on; its
            // eventual directory reply, if any, is simply dropped by letting
            // the continuation go out of scope unacked. Training stays cheap
            // and never blocks the issuing access.
            let _ = next.shmem_req(arena, RequesterId(self.id.0), MemOp::Read, line_addr, true, now, &continuation);
        }
    }

    /// Descent through inner levels (4.6.4): entered by the level *above*
    /// `self` on a miss. Assumes the caller already holds the shared stack
    /// lock for `addr`'s set.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn shmem_req(
        &self,
        arena: &Arena,
        requester: RequesterId,
        op: MemOp,
        addr: Address,
        modeled: bool,
        t_issue: u64,
        continuation: &Arc<Continuation>,
    ) -> SimResult<HitWhere> {
        let master = self.master_ctrl(arena);
        let present_state = master.state.lock().storage.peek(addr).map(|b| b.state);

        if let Some(state) = present_state {
            if Self::permissible(op, state) {
                let sibling_hit = if op.needs_exclusive() {
                    self.snoop_invalidate_peers(arena, master, requester, addr)?
                } else if state.is_writable() {
                    self.snoop_downgrade_peers(arena, master, requester, addr)?
                } else {
                    false
                };
                let t = if modeled {
                    t_issue + self.cfg.tags_access_time + self.cfg.data_access_time
                } else {
                    t_issue
                };
                let where_ = if sibling_hit { HitWhere::Sibling(self.level) } else { HitWhere::Level(self.level) };
                master.state.lock().stats.record_where(op.needs_exclusive(), where_);
                return Ok(where_);
            }
            if op.needs_exclusive() && state == crate::coherence::CState::Shared {
                return self.begin_upgrade(arena, master, addr, t_issue, continuation);
            }
        }

        if self.last_level {
            return self.miss_at_last_level(arena, master, requester, op, addr, t_issue, continuation);
        }

        master.state.lock().storage.invalidate(addr);
        let next = self
            .next_of(arena)
            .ok_or_else(|| SimError::invariant(addr, "non-last-level controller missing its next level"))?;
        let inner = next.shmem_req(arena, requester, op, addr, modeled, t_issue, continuation)?;
        if inner == HitWhere::Miss {
            return Ok(HitWhere::Miss);
        }
        let t = self.copy_from_next_level_bare(arena, master, next, addr, op, t_issue)?;
        let _ = t;
        Ok(inner)
    }

    fn copy_from_next_level_bare(
        &self,
        arena: &Arena,
        master: &Controller,
        next: &Controller,
        addr: Address,
        _op: MemOp,
        now: u64,
    ) -> SimResult<u64> {
        let next_master = next.master_ctrl(arena);
        let source = {
            let state = next_master.state.lock();
            state
                .storage
                .peek(addr)
                .cloned()
                .ok_or_else(|| SimError::invariant(addr, "shmem_req refill: block absent at next level"))?
        };
        let mut state = master.state.lock();
        if state.storage.peek(addr).is_none() {
            let result = state.storage.insert(addr, source.state);
            if let Some((victim_addr, victim_block)) = result.victim {
                drop(state);
                self.handle_eviction(arena, master, victim_addr, victim_block, now)?;
                state = master.state.lock();
            }
        }
        if let Some(block) = state.storage.peek_mut(addr) {
            block.state = source.state;
            block.data.copy_from_slice(&source.data);
        }
        Ok(0)
    }

    /// Invalidates every peer-prev-cache-controller's copy other than the
    /// requester's own. Per 4.6.4, the snoop cost charged to the requester is
    /// the maximum of the peers' returned latencies (the critical path), not
    /// their sum; `sibling_hit` is true if any peer actually held a copy.
    fn snoop_invalidate_peers(&self, arena: &Arena, master: &Controller, requester: RequesterId, addr: Address) -> SimResult<bool> {
        let mut max_latency = 0u64;
        let mut sibling_hit = false;
        for &prev_idx in &master.prev {
            if prev_idx.0 == requester.0 {
                continue;
            }
            let peer = &arena[prev_idx.0];
            let (latency, had_copy) = peer.update_block(arena, addr, crate::coherence::CState::Invalid, crate::coherence::TransitionReason::Coherency, None)?;
            max_latency = max_latency.max(latency);
            sibling_hit |= had_copy;
        }
        if max_latency > 0 {
            master.state.lock().stats.add_snoop_latency(max_latency);
        }
        Ok(sibling_hit)
    }

    /// Downgrades every peer-prev-cache-controller's writable copy to
    /// `Shared`, other than the requester's own. Same max-latency accounting
    /// as [`Controller::snoop_invalidate_peers`].
    fn snoop_downgrade_peers(&self, arena: &Arena, master: &Controller, requester: RequesterId, addr: Address) -> SimResult<bool> {
        let mut max_latency = 0u64;
        let mut sibling_hit = false;
        for &prev_idx in &master.prev {
            if prev_idx.0 == requester.0 {
                continue;
            }
            let peer = &arena[prev_idx.0];
            let (latency, had_copy) = peer.update_block(arena, addr, crate::coherence::CState::Shared, crate::coherence::TransitionReason::Coherency, None)?;
            max_latency = max_latency.max(latency);
            sibling_hit |= had_copy;
        }
        if max_latency > 0 {
            master.state.lock().stats.add_snoop_latency(max_latency);
        }
        Ok(sibling_hit)
    }

    fn miss_at_last_level(
        &self,
        arena: &Arena,
        master: &Controller,
        requester: RequesterId,
        op: MemOp,
        addr: Address,
        t_issue: u64,
        continuation: &Arc<Continuation>,
    ) -> SimResult<HitWhere> {
        if let Some(dram) = master.dram.as_ref() {
            let mut scratch = vec![0u8; self.geometry.block_size];
            let result = dram.get_data(addr, self.core_id, &mut scratch, t_issue, 0);
            let state = if op.needs_exclusive() { crate::coherence::CState::Modified } else { crate::coherence::CState::Shared };
            let mut guard = master.state.lock();
            let insert = guard.storage.insert(addr, state);
            if let Some((victim_addr, victim_block)) = insert.victim {
                drop(guard);
                self.handle_eviction(arena, master, victim_addr, victim_block, t_issue)?;
                guard = master.state.lock();
            }
            if let Some(block) = guard.storage.peek_mut(addr) {
                block.data.copy_from_slice(&scratch);
            }
            guard.stats.record_uncore("dram", result.latency);
            return Ok(HitWhere::Dram);
        }

        let directory = master
            .directory
            .as_ref()
            .ok_or_else(|| SimError::protocol(addr, "last-level controller has neither DRAM nor directory attached"))?;

        let tag = if op.needs_exclusive() { MessageTag::ExReq } else { MessageTag::ShReq };
        let waiter = crate::coherence::Waiter {
            exclusive: op.needs_exclusive(),
            is_prefetch: false,
            requester,
            t_issue,
            continuation: Arc::clone(continuation),
        };
        let is_first = master.state.lock().waiters.enqueue(addr.val(), waiter);
        if is_first {
            directory.send(DirectoryMessage {
                tag,
                sender_id: master.id.0,
                receiver_home_id: master.home_lookup.home(addr),
                address: addr,
                data: None,
                secondary_address: None,
                perf_token: t_issue,
            });
        }
        Ok(HitWhere::Miss)
    }
}
