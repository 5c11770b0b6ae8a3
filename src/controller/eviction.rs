//! Eviction handling (4.6.5): run whenever [`crate::storage::CacheStorage::insert`]
//! reports a victim, regardless of which code path triggered the insert.

use crate::common::{Address, SimResult};
use crate::network::{DirectoryMessage, MessageTag};
use crate::storage::CacheBlock;

use super::{Arena, Controller};

impl Controller {
    /// Pulls any dirty copies of `victim_addr` out of previous-level caches,
    /// then writes the (possibly now-dirtier) victim down according to this
    /// level's position: to DRAM or the directory at the last level, or
    /// straight into the next level's storage otherwise. `now` is the
    /// eviction's trigger time, used to gate the last level's dirty-victim
    /// drain through the outstanding-writeback contention model (4.6.5).
    pub(crate) fn handle_eviction(&self, arena: &Arena, master: &Controller, victim_addr: Address, mut victim_block: CacheBlock, now: u64) -> SimResult<()> {
        let mut snoop_latency = 0u64;
        let mut scratch = vec![0u8; self.geometry.block_size];
        for &prev_idx in &master.prev {
            let peer = &arena[prev_idx.0];
            let (latency, had_copy) = peer.update_block(
                arena,
                victim_addr,
                crate::coherence::CState::Invalid,
                crate::coherence::TransitionReason::Eviction,
                Some(&mut scratch),
            )?;
            snoop_latency += latency;
            if had_copy {
                victim_block.data.copy_from_slice(&scratch);
            }
        }
        if snoop_latency > 0 {
            master.state.lock().stats.add_snoop_latency(snoop_latency);
        }

        let dirty = victim_block.state.is_dirty();

        if self.last_level {
            if let Some(dram) = master.dram.as_ref() {
                if dirty {
                    let t_start = master.state.lock().writeback_mshr.start_time(now);
                    dram.put_data(victim_addr, self.core_id, &victim_block.data, t_start);
                    master.state.lock().writeback_mshr.complete(t_start, self.cfg.writeback_time, victim_addr.val());
                }
            } else if let Some(directory) = master.directory.as_ref() {
                let tag = if dirty { MessageTag::FlushRep } else { MessageTag::InvRep };
                directory.send(DirectoryMessage {
                    tag,
                    sender_id: master.id.0,
                    receiver_home_id: master.home_lookup.home(victim_addr),
                    address: victim_addr,
                    data: if dirty { Some(victim_block.data.clone()) } else { None },
                    secondary_address: None,
                    perf_token: 0,
                });
            }
        } else if dirty && !self.cfg.writethrough {
            if let Some(next) = self.next_of(arena) {
                let next_master = next.master_ctrl(arena);
                let mut state = next_master.state.lock();
                if state.storage.peek(victim_addr).is_none() {
                    state.storage.insert(victim_addr, crate::coherence::CState::Modified);
                }
                if let Some(block) = state.storage.peek_mut(victim_addr) {
                    block.data.copy_from_slice(&victim_block.data);
                    block.state = crate::coherence::CState::Modified;
                }
            }
        }

        master.state.lock().stats.record_eviction(dirty, false);
        Ok(())
    }
}
