//! Coherence primitives shared by every cache level's controller.
//!
//! 1. **State:** [`state::CState`], the MSI(+SU,O) state machine for a single block.
//! 2. **Set-lock:** [`setlock::SetLockArray`], the stack lock striped by set index.
//! 3. **MSHR:** [`mshr::ContentionModel`], the finite in-flight-operation model.
//! 4. **Waiters:** [`waiter::DirectoryWaiterQueue`], the per-address FIFO bridging
//!    a miss to its eventual directory reply.

/// Coherence state enum and transition-reason tags.
pub mod state;

/// Striped stack lock over cache set indices.
pub mod setlock;

/// Bounded-parallelism contention / MSHR model.
pub mod mshr;

/// Per-address directory-waiter FIFO.
pub mod waiter;

pub use mshr::ContentionModel;
pub use setlock::{SetGuard, SetLockArray};
pub use state::{CState, TransitionReason};
pub use waiter::{DirectoryWaiterQueue, RequesterId, Waiter};
