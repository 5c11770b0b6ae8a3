//! Directory message dispatch (4.6.8) and Inv/Flush/Wb request handling (4.6.9).
//!
//! Entry point from the network: [`Controller::handle_directory_msg`] runs
//! under the stack lock for the message's address, exactly as the donor
//! crate's network-thread handler does.

use crate::coherence::{CState, TransitionReason};
use crate::common::{Address, SimError, SimResult};
use crate::network::{DirectoryMessage, MessageTag};
use crate::rendezvous::Reply;

use super::{Arena, Controller};

enum DirectoryRequestKind {
    Inv,
    Flush,
    Wb,
}

impl Controller {
    /// Dispatches a message arriving from the tag-directory network.
    pub fn handle_directory_msg(&self, arena: &Arena, msg: DirectoryMessage) -> SimResult<()> {
        let master = self.master_ctrl(arena);
        let addr = msg.address;
        tracing::trace!(%addr, tag = ?msg.tag, level = self.level, "directory message dispatched");
        let set = self.set_index(addr);
        let _guard = self.set_locks.lock_exclusive(set);

        match msg.tag {
            MessageTag::ShRep => self.install_from_reply(master, addr, &msg, false)?,
            MessageTag::ExRep => self.install_from_reply(master, addr, &msg, true)?,
            MessageTag::UpgradeRep => self.complete_upgrade(arena, master, addr, &msg)?,
            MessageTag::VpicSearchRep => self.install_from_reply(master, addr, &msg, false)?,
            MessageTag::InvReq => return self.handle_directory_request(arena, master, addr, DirectoryRequestKind::Inv),
            MessageTag::FlushReq => return self.handle_directory_request(arena, master, addr, DirectoryRequestKind::Flush),
            MessageTag::WbReq => return self.handle_directory_request(arena, master, addr, DirectoryRequestKind::Wb),
            other => {
                return Err(SimError::protocol(addr, format!("handle_directory_msg: unexpected request tag {other:?}")));
            }
        }

        self.drain_waiters(arena, master, addr, &msg)
    }

    fn install_from_reply(&self, master: &Controller, addr: Address, msg: &DirectoryMessage, exclusive: bool) -> SimResult<()> {
        let state = if exclusive { CState::Exclusive } else { CState::Shared };
        let mut guard = master.state.lock();
        if guard.storage.peek(addr).is_none() {
            guard.storage.insert(addr, state);
        }
        if let Some(block) = guard.storage.peek_mut(addr) {
            block.state = state;
            if let Some(data) = msg.data.as_ref() {
                block.data[..data.len().min(block.data.len())].copy_from_slice(&data[..data.len().min(block.data.len())]);
            }
        }
        Ok(())
    }

    /// Drains every waiter queued for `addr` in FIFO order (4.6.8). A waiter
    /// wanting exclusive access against a block that only just arrived
    /// Shared is converted into a fresh upgrade request rather than served
    /// from this reply; everyone queued behind it still gets woken from the
    /// data this reply installed.
    fn drain_waiters(&self, arena: &Arena, master: &Controller, addr: Address, msg: &DirectoryMessage) -> SimResult<()> {
        loop {
            let Some(front) = master.state.lock().waiters.front(addr.val()).cloned() else {
                break;
            };

            let block_state = master.state.lock().storage.peek(addr).map(|b| b.state);
            if front.exclusive && block_state == Some(CState::Shared) {
                master.state.lock().waiters.dequeue(addr.val());
                self.begin_upgrade(arena, master, addr, front.t_issue, &front.continuation)?;
                continue;
            }

            master.state.lock().waiters.dequeue(addr.val());
            if front.is_prefetch {
                if let Some(block) = master.state.lock().storage.peek_mut(addr) {
                    block.flags.prefetch = true;
                }
            }

            let t_complete = msg.perf_token.max(front.t_issue);
            master.state.lock().stats.record_uncore(hit_where_tag(msg.tag), t_complete.saturating_sub(front.t_issue));
            front.continuation.fulfill(Reply { t_complete, data: msg.data.clone() });

            master.state.lock().mshr.complete(front.t_issue, t_complete.saturating_sub(front.t_issue), addr.val());
        }
        Ok(())
    }

    fn handle_directory_request(&self, arena: &Arena, master: &Controller, addr: Address, kind: DirectoryRequestKind) -> SimResult<()> {
        let Some(_) = master.state.lock().storage.peek(addr).map(|b| b.state) else {
            // Absent: an eviction reply for this address is presumed already in flight.
            return Ok(());
        };

        let new_state = match kind {
            DirectoryRequestKind::Inv | DirectoryRequestKind::Flush => CState::Invalid,
            DirectoryRequestKind::Wb => CState::Shared,
        };
        let mut scratch = vec![0u8; self.geometry.block_size];
        let wants_data = !matches!(kind, DirectoryRequestKind::Inv);
        let (_, _had_copy) = self.update_block(
            arena,
            addr,
            new_state,
            TransitionReason::Directory,
            if wants_data { Some(&mut scratch) } else { None },
        )?;

        if let Some(directory) = master.directory.as_ref() {
            let tag = match kind {
                DirectoryRequestKind::Inv => MessageTag::InvRep,
                DirectoryRequestKind::Flush => MessageTag::FlushRep,
                DirectoryRequestKind::Wb => MessageTag::WbRep,
            };
            directory.send(DirectoryMessage {
                tag,
                sender_id: master.id.0,
                receiver_home_id: master.home_lookup.home(addr),
                address: addr,
                data: if wants_data { Some(scratch) } else { None },
                secondary_address: None,
                perf_token: 0,
            });
        }
        Ok(())
    }
}

fn hit_where_tag(tag: MessageTag) -> &'static str {
    match tag {
        MessageTag::ShRep | MessageTag::ExRep | MessageTag::UpgradeRep => "directory",
        MessageTag::VpicSearchRep => "pic",
        _ => "directory",
    }
}

