//! Shared→Modified upgrade path (4.6.6) and block update / back-invalidation (4.6.10).

use std::sync::Arc;

use crate::coherence::{CState, RequesterId, TransitionReason, Waiter};
use crate::common::{Address, SimError, SimResult};
use crate::network::{DirectoryMessage, HitWhere, MessageTag};
use crate::rendezvous::Continuation;

use super::{Arena, Controller};

impl Controller {
    /// Entered when a hit's state (`Shared`) is readable but not writable
    /// for the requested op. Intermediate levels resolve this locally by
    /// invalidating peer copies (no directory involvement — `SharedUpgrading`
    /// is only ever observed at the last level). The last level instead
    /// issues a real `UPGRADE_REQ` and suspends the caller.
    pub(crate) fn begin_upgrade(
        &self,
        arena: &Arena,
        master: &Controller,
        addr: Address,
        t_issue: u64,
        continuation: &Arc<Continuation>,
    ) -> SimResult<HitWhere> {
        if !self.last_level {
            // No single requester to exempt here — every prev-level copy but
            // the one about to become Modified must drop.
            for &prev_idx in &master.prev {
                let peer = &arena[prev_idx.0];
                peer.update_block(arena, addr, CState::Invalid, TransitionReason::Upgrade, None)?;
            }
            let mut state = master.state.lock();
            if let Some(block) = state.storage.peek_mut(addr) {
                block.state = CState::Modified;
            }
            state.stats.record_coherency("upgrades");
            return Ok(HitWhere::Level(self.level));
        }

        {
            let mut state = master.state.lock();
            if let Some(block) = state.storage.peek_mut(addr) {
                block.state = CState::SharedUpgrading;
            }
        }
        tracing::debug!(%addr, level = self.level, "S -> SU, upgrade request issued");

        let directory = master
            .directory
            .as_ref()
            .ok_or_else(|| SimError::protocol(addr, "upgrade at the last level requires a directory"))?;
        let waiter = Waiter {
            exclusive: true,
            is_prefetch: false,
            requester: RequesterId(self.id.0),
            t_issue,
            continuation: Arc::clone(continuation),
        };
        let is_first = master.state.lock().waiters.enqueue(addr.val(), waiter);
        if is_first {
            directory.send(DirectoryMessage {
                tag: MessageTag::UpgradeReq,
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

    /// Completes an outstanding upgrade on `UPGRADE_REP` (4.6.6): if local
    /// state raced to `Invalid` before the reply arrived, the reply is
    /// required to carry data and the block is reinstalled as `Modified`
    /// from it; otherwise the pending `SharedUpgrading` block transitions to
    /// `Modified` directly and peer copies are invalidated.
    pub(crate) fn complete_upgrade(&self, arena: &Arena, master: &Controller, addr: Address, msg: &DirectoryMessage) -> SimResult<()> {
        let current = master.state.lock().storage.peek(addr).map(|b| b.state);
        match current {
            None | Some(CState::Invalid) => {
                let data = msg.upgrade_reply_data().ok_or_else(|| {
                    SimError::protocol(addr, "UPGRADE_REP arrived with local state Invalid but carried no data")
                })?;
                tracing::debug!(%addr, "I -> M on UPGRADE_REP race (reply carried data)");
                let mut state = master.state.lock();
                if state.storage.peek(addr).is_none() {
                    state.storage.insert(addr, CState::Modified);
                }
                if let Some(block) = state.storage.peek_mut(addr) {
                    block.state = CState::Modified;
                    block.data.copy_from_slice(data);
                }
            }
            Some(_) => {
                tracing::debug!(%addr, "SU -> M, invalidating peer copies");
                {
                    let mut state = master.state.lock();
                    if let Some(block) = state.storage.peek_mut(addr) {
                        block.state = CState::Modified;
                    }
                }
                for &prev_idx in &master.prev {
                    let peer = &arena[prev_idx.0];
                    peer.update_block(arena, addr, CState::Invalid, TransitionReason::Upgrade, None)?;
                }
            }
        }
        master.state.lock().stats.record_coherency("upgrades");
        Ok(())
    }

    /// Block update / back-invalidation (4.6.10): recurses into every
    /// previous-level controller first, then applies locally. Returns the
    /// latency charged and whether any level (here or below) actually held
    /// the block.
    pub fn update_block(
        &self,
        arena: &Arena,
        addr: Address,
        new_state: CState,
        reason: TransitionReason,
        mut out_buf: Option<&mut [u8]>,
    ) -> SimResult<(u64, bool)> {
        let master = self.master_ctrl(arena);
        let mut latency = 0u64;
        let mut had_copy = false;

        for &prev_idx in &master.prev {
            let peer = &arena[prev_idx.0];
            let (lat, hit) = peer.update_block(arena, addr, new_state, reason, out_buf.as_deref_mut())?;
            latency += lat;
            had_copy |= hit;
        }

        let block = { master.state.lock().storage.peek(addr).cloned() };
        let Some(block) = block else {
            return Ok((latency, had_copy));
        };
        had_copy = true;

        if block.state == new_state {
            if let Some(buf) = out_buf.as_deref_mut() {
                master.state.lock().storage.read(addr, 0, buf, false);
            }
            return Ok((latency + self.cfg.tags_access_time, had_copy));
        }

        if block.state.is_dirty() {
            if let Some(buf) = out_buf.as_deref_mut() {
                buf[..block.data.len().min(buf.len())].copy_from_slice(&block.data[..block.data.len().min(buf.len())]);
            } else if let Some(next) = self.next_of(arena) {
                let next_master = next.master_ctrl(arena);
                let mut state = next_master.state.lock();
                if state.storage.peek(addr).is_none() {
                    state.storage.insert(addr, CState::Modified);
                }
                if let Some(b) = state.storage.peek_mut(addr) {
                    b.data.copy_from_slice(&block.data);
                    b.state = CState::Modified;
                }
            } else {
                return Err(SimError::DataLoss { addr });
            }
        }

        crate::common::error::require_defined_target(addr, new_state)?;
        let mut state = master.state.lock();
        if new_state == CState::Invalid {
            if self.cfg.coherent {
                state.storage.invalidate(addr);
            }
        } else if let Some(b) = state.storage.peek_mut(addr) {
            b.state = new_state;
        }

        state.stats.record_coherency(match (reason, new_state) {
            (TransitionReason::Upgrade, _) => "upgrades",
            (_, CState::Invalid) => "invalidates",
            _ => "downgrades",
        });

        Ok((latency + self.cfg.tags_access_time, had_copy))
    }
}
