//! Cycle-accurate multi-level cache-coherence simulator engine.
//!
//! An MSI(+SharedUpgrading,+Owned) directory protocol across a
//! private-then-shared cache hierarchy, with a finite MSHR/contention
//! model, a directory-waiter queue bridging a core's timeline to the
//! directory's, and optional in-cache "processing-in-memory" (PIC) bulk
//! operators that reuse the same coherence machinery.
//!
//! 1. **Coherence:** [`coherence`] — per-block state, the set-lock array,
//!    the MSHR/contention model, and the directory-waiter queue.
//! 2. **Storage:** [`storage`] — associative tag+data store and replacement policies.
//! 3. **Prefetch:** [`prefetch`] — pluggable hardware prefetchers.
//! 4. **Controller:** [`controller`] — the per-level orchestrator: permission
//!    predicate, miss descent, eviction, upgrade, directory dispatch, PIC pipeline.
//! 5. **PIC:** [`pic`] — opcode-independent `do_here` policy and statistics helpers.
//! 6. **Rendezvous:** [`rendezvous`] — the user/network continuation hand-off.
//! 7. **External contracts:** [`network`], [`dram`] — directory and DRAM controller interfaces.
//! 8. **Simulation:** [`sim`] — the controller arena and top-level `mem_op`/`pic_op` dispatch.

/// Address type, cache geometry, and the single fatal-error type.
pub mod common;
/// Coherence state, set-lock array, MSHR/contention model, directory-waiter queue.
pub mod coherence;
/// Associative cache storage and replacement policies.
pub mod storage;
/// Hardware prefetcher implementations.
pub mod prefetch;
/// Tag-directory network message vocabulary and client contract.
pub mod network;
/// DRAM controller contract.
pub mod dram;
/// User/network cross-thread rendezvous.
pub mod rendezvous;
/// PIC operator policy helpers (`do_here`, in-bank accounting, search-key estimator).
pub mod pic;
/// Per-level cache controller: the permission predicate, miss/descent, eviction,
/// upgrade, directory dispatch, and PIC pipeline.
pub mod controller;
/// Configuration surface (`perf_model/<name>/...`, `general/...`).
pub mod config;
/// Named-counter statistics registry.
pub mod stats;
/// Controller arena and top-level simulator driving `mem_op`/`pic_op`.
pub mod sim;

pub use crate::common::{SimError, SimResult};
pub use crate::config::Config;
pub use crate::controller::Controller;
pub use crate::sim::Simulator;
