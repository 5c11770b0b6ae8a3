//! Directory-Waiter Queue.
//!
//! A per-address FIFO of requests awaiting a directory reply. Exactly the
//! first enqueuer for a given address issues the outbound directory
//! message; every later enqueuer for the same address piggy-backs on that
//! one reply instead of sending its own.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::rendezvous::Continuation;

/// Opaque identifier for the controller (master or proxy) that is waiting.
/// Indexes into the simulator's controller arena; see `crate::sim`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequesterId(pub usize);

/// A request suspended on an outbound directory message.
#[derive(Clone)]
pub struct Waiter {
    /// True if the original request wanted exclusive (write) permission.
    pub exclusive: bool,
    /// True if this was a prefetch rather than a demand request.
    pub is_prefetch: bool,
    /// The controller that issued the request.
    pub requester: RequesterId,
    /// Simulated time the request was issued.
    pub t_issue: u64,
    /// Rendezvous point the requester is blocked on; fulfilled by the
    /// network-thread side of `handle_directory_msg`.
    pub continuation: Arc<Continuation>,
}

/// FIFO of waiters, keyed by block address.
#[derive(Default)]
pub struct DirectoryWaiterQueue {
    queues: HashMap<u64, VecDeque<Waiter>>,
}

impl DirectoryWaiterQueue {
    /// Creates an empty waiter queue.
    pub fn new() -> Self {
        Self { queues: HashMap::new() }
    }

    /// Enqueues `waiter` for `addr`. Returns `true` if this is the first
    /// waiter for the address — the caller must issue the outbound
    /// directory message exactly when this is `true`.
    pub fn enqueue(&mut self, addr: u64, waiter: Waiter) -> bool {
        let q = self.queues.entry(addr).or_default();
        let is_first = q.is_empty();
        q.push_back(waiter);
        is_first
    }

    /// Peeks the waiter at the front of `addr`'s queue.
    pub fn front(&self, addr: u64) -> Option<&Waiter> {
        self.queues.get(&addr).and_then(|q| q.front())
    }

    /// Removes and returns the waiter at the front of `addr`'s queue.
    /// Drops the queue entirely once it empties, so `size`/`empty` stay cheap.
    pub fn dequeue(&mut self, addr: u64) -> Option<Waiter> {
        let Some(q) = self.queues.get_mut(&addr) else { return None };
        let w = q.pop_front();
        if q.is_empty() {
            self.queues.remove(&addr);
        }
        w
    }

    /// Number of waiters currently queued for `addr`.
    pub fn size(&self, addr: u64) -> usize {
        self.queues.get(&addr).map_or(0, VecDeque::len)
    }

    /// True if no waiters are queued for `addr`.
    pub fn empty(&self, addr: u64) -> bool {
        self.size(addr) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(req: usize) -> Waiter {
        Waiter {
            exclusive: false,
            is_prefetch: false,
            requester: RequesterId(req),
            t_issue: 0,
            continuation: Arc::new(Continuation::new()),
        }
    }

    #[test]
    fn first_enqueue_signals_caller_to_issue_request() {
        let mut q = DirectoryWaiterQueue::new();
        assert!(q.enqueue(0x100, w(1)));
        assert!(!q.enqueue(0x100, w(2)));
        assert_eq!(q.size(0x100), 2);
    }

    #[test]
    fn fifo_order_preserved() {
        let mut q = DirectoryWaiterQueue::new();
        q.enqueue(0x100, w(1));
        q.enqueue(0x100, w(2));
        q.enqueue(0x100, w(3));
        assert_eq!(q.dequeue(0x100).unwrap().requester, RequesterId(1));
        assert_eq!(q.dequeue(0x100).unwrap().requester, RequesterId(2));
        assert_eq!(q.dequeue(0x100).unwrap().requester, RequesterId(3));
        assert!(q.empty(0x100));
    }

    #[test]
    fn distinct_addresses_are_independent() {
        let mut q = DirectoryWaiterQueue::new();
        assert!(q.enqueue(0x100, w(1)));
        assert!(q.enqueue(0x200, w(2)));
    }

    #[test]
    fn dequeue_on_empty_returns_none() {
        let mut q = DirectoryWaiterQueue::new();
        assert_eq!(q.dequeue(0x999), None);
    }
}
