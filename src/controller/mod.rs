//! Cache Controller — the per-level orchestrator.
//!
//! One [`Controller`] exists per (cache level, core) pair. A level's first
//! controller constructed for it is its *master*: it owns storage, the
//! MSHRs, the directory-waiter queue, and the prefetcher. Every later
//! controller at the same level for a different core is a *proxy*: it
//! shares the master's storage and queues but keeps its own statistics and
//! core identity, matching the donor crate's master/proxy split without the
//! pointer cycle — proxies hold a plain `master` index into the arena
//! instead of a shared pointer.
//!
//! Entry points, by caller:
//! - the core: [`Controller::mem_op`], [`Controller::pic_op`] (this file / `pic_ops.rs`)
//! - the next level up (a downstream controller): [`Controller::shmem_req`] (`miss.rs`)
//! - the network: [`Controller::handle_directory_msg`] (`directory.rs`)

/// First-level hit/miss path and descent through inner levels (`shmem_req`).
pub mod miss;
/// Eviction handling when `insert` reports a victim.
pub mod eviction;
/// Shared-to-Modified upgrade path and `update_block`.
pub mod upgrade;
/// Directory message dispatch (`handle_directory_msg`) and Inv/Flush/Wb handling.
pub mod directory;
/// PIC operator pipeline (`pic_op`, `pic_single_op`).
pub mod pic_ops;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{Address, CacheGeometry, HomeLookup, SimError, SimResult};
use crate::coherence::{CState, ContentionModel, DirectoryWaiterQueue, SetLockArray};
use crate::config::PerfModelConfig;
use crate::dram::DramClient;
use crate::network::{DirectoryClient, HitWhere, LockSignal, MemOp};
use crate::prefetch::Prefetcher;
use crate::stats::StatRegistry;
use crate::storage::policies::{FifoPolicy, LruPolicy, MruPolicy, PlruPolicy, RandomPolicy, ReplacementPolicy};
use crate::storage::CacheStorage;

/// Identifies a controller within the simulator's arena (`sim::Simulator::controllers`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LevelIndex(pub usize);

/// Read-only view of every controller in the arena, as handed to methods
/// that need to reach the next level up or a sibling. Controllers use
/// interior mutability (`parking_lot::Mutex`) so a shared slice suffices.
pub type Arena = [Controller];

/// Mutable state behind each controller's lock: everything that changes as
/// requests flow through it.
pub(crate) struct ControllerState {
    pub(crate) storage: CacheStorage,
    pub(crate) mshr: ContentionModel,
    pub(crate) pic_mshr: ContentionModel,
    /// Gates the last level's outstanding DRAM writebacks, same bounded
    /// in-flight model as `mshr`/`pic_mshr` applied to dirty-victim drains
    /// instead of demand misses (4.6.5).
    pub(crate) writeback_mshr: ContentionModel,
    pub(crate) waiters: DirectoryWaiterQueue,
    pub(crate) prefetcher: Option<Box<dyn Prefetcher>>,
    pub(crate) stats: StatRegistry,
}

/// One cache level's controller for one core.
pub struct Controller {
    /// This controller's own arena index.
    pub id: LevelIndex,
    /// 1-based hierarchy level (1 = closest to the core).
    pub level: u8,
    /// Owning core id.
    pub core_id: u32,
    /// Named level this controller configures from (`perf_model/<name>`).
    pub name: String,
    /// True if this is the last level before DRAM/directory.
    pub last_level: bool,
    /// True if this level is private to one core (`shared_cores == 1`).
    pub private: bool,
    /// This controller's own arena index if it is a master, or the
    /// master's index if this is a proxy sharing that master's storage.
    pub master: LevelIndex,
    /// Arena index of the next (further from core) level's controller, if any.
    pub next: Option<LevelIndex>,
    /// Arena indices of the previous-level (closer to core) controllers that
    /// feed into this one — used for broadcast invalidation/downgrade snoops.
    pub prev: Vec<LevelIndex>,
    /// Cache geometry (shared by the whole stack's set-lock striping at the LLC).
    pub geometry: CacheGeometry,
    /// This level's configuration.
    pub cfg: PerfModelConfig,
    /// Stack lock, striped by LLC set index, shared by every level.
    pub set_locks: Arc<SetLockArray>,
    /// External: maps an address to its directory home node.
    pub home_lookup: Arc<dyn HomeLookup>,
    /// External: directory client, present only at the last level if a
    /// directory (rather than direct DRAM) backs this hierarchy.
    pub directory: Option<Arc<dyn DirectoryClient>>,
    /// External: DRAM client, present only at the last level if DRAM is attached directly.
    pub dram: Option<Arc<dyn DramClient>>,
    /// Mirrors `Config::general::microbench_search_key_enabled`; gates the
    /// PIC search-key-miss estimator in `controller::pic_ops`.
    pub search_key_enabled: bool,
    pub(crate) state: Mutex<ControllerState>,
}

fn build_policy(cfg: &PerfModelConfig, geometry: CacheGeometry) -> Box<dyn ReplacementPolicy + Send + Sync> {
    use crate::config::ReplacementPolicyKind as K;
    match cfg.replacement_policy {
        K::Lru => Box::new(LruPolicy::new(geometry.num_sets, geometry.ways)),
        K::Plru => Box::new(PlruPolicy::new(geometry.num_sets, geometry.ways)),
        K::Fifo => Box::new(FifoPolicy::new(geometry.num_sets, geometry.ways)),
        K::Random => Box::new(RandomPolicy::new(geometry.num_sets, geometry.ways)),
        K::Mru => Box::new(MruPolicy::new(geometry.num_sets, geometry.ways)),
    }
}

fn build_prefetcher(cfg: &PerfModelConfig) -> Option<Box<dyn Prefetcher>> {
    use crate::config::PrefetcherKind as K;
    use crate::prefetch::{NextLinePrefetcher, StreamPrefetcher, StridePrefetcher, TaggedPrefetcher};
    match cfg.prefetcher.kind {
        K::None => None,
        K::NextLine => Some(Box::new(NextLinePrefetcher::new())),
        K::Stride => Some(Box::new(StridePrefetcher::new(cfg.prefetcher.table_size))),
        K::Stream => Some(Box::new(StreamPrefetcher::new(cfg.prefetcher.table_size))),
        K::Tagged => Some(Box::new(TaggedPrefetcher::new())),
    }
}

impl Controller {
    /// Builds a new master controller for `name` at `level`, validating its
    /// configuration up front (`SimError::ConfigInvalid`).
    #[allow(clippy::too_many_arguments)]
    pub fn new_master(
        id: LevelIndex,
        level: u8,
        core_id: u32,
        name: impl Into<String>,
        cfg: PerfModelConfig,
        last_level: bool,
        set_locks: Arc<SetLockArray>,
        home_lookup: Arc<dyn HomeLookup>,
        directory: Option<Arc<dyn DirectoryClient>>,
        dram: Option<Arc<dyn DramClient>>,
        search_key_enabled: bool,
    ) -> SimResult<Self> {
        let name = name.into();
        cfg.validate(&name, last_level)?;
        let geometry = CacheGeometry::new(cfg.size_bytes, cfg.line_bytes, cfg.ways);
        let storage = CacheStorage::new(geometry, build_policy(&cfg, geometry));
        let prefetcher = build_prefetcher(&cfg);
        let private = cfg.shared_cores <= 1;
        tracing::debug!(
            level,
            core_id,
            name = %name,
            last_level,
            private,
            sets = geometry.num_sets,
            ways = geometry.ways,
            "controller constructed"
        );
        Ok(Self {
            id,
            level,
            core_id,
            name,
            last_level,
            private,
            master: id,
            next: None,
            prev: Vec::new(),
            geometry,
            cfg: cfg.clone(),
            set_locks,
            home_lookup,
            directory,
            dram,
            search_key_enabled,
            state: Mutex::new(ControllerState {
                storage,
                mshr: ContentionModel::new(cfg.outstanding_misses),
                pic_mshr: ContentionModel::new(cfg.outstanding_misses),
                // No separate config key names an outstanding-writeback
                // buffer depth; reusing `outstanding_misses` gives it the
                // same finite-in-flight capacity as the level's own MSHRs
                // (see DESIGN.md).
                writeback_mshr: ContentionModel::new(cfg.outstanding_misses),
                waiters: DirectoryWaiterQueue::new(),
                prefetcher,
                stats: StatRegistry::new(),
            }),
        })
    }

    /// Builds a proxy controller: a second core sharing `master`'s storage,
    /// MSHRs, and waiter queue, but with its own statistics and identity.
    /// Proxies redirect every stateful operation to `master` via the arena;
    /// see [`Controller::master_ctrl`].
    #[allow(clippy::too_many_arguments)]
    pub fn new_proxy(
        id: LevelIndex,
        master: LevelIndex,
        level: u8,
        core_id: u32,
        name: impl Into<String>,
        cfg: PerfModelConfig,
        last_level: bool,
        set_locks: Arc<SetLockArray>,
        home_lookup: Arc<dyn HomeLookup>,
        directory: Option<Arc<dyn DirectoryClient>>,
        dram: Option<Arc<dyn DramClient>>,
        search_key_enabled: bool,
    ) -> SimResult<Self> {
        let mut ctrl = Self::new_master(
            id, level, core_id, name, cfg, last_level, set_locks, home_lookup, directory, dram, search_key_enabled,
        )?;
        ctrl.master = master;
        Ok(ctrl)
    }

    /// The controller actually holding this level's storage/MSHRs/waiters:
    /// itself if this is a master, or the arena's master entry if a proxy.
    pub(crate) fn master_ctrl<'a>(&'a self, arena: &'a Arena) -> &'a Controller {
        if self.master == self.id {
            self
        } else {
            &arena[self.master.0]
        }
    }

    /// True if `state` is a permissible hit for `op` (the permission predicate).
    pub fn permissible(op: MemOp, state: CState) -> bool {
        if op.needs_exclusive() {
            state.is_writable()
        } else {
            state.is_readable()
        }
    }

    fn set_index(&self, addr: Address) -> usize {
        self.geometry.set_index(addr)
    }

    fn stats_mut<R>(&self, f: impl FnOnce(&mut StatRegistry) -> R) -> R {
        let mut guard = self.state.lock();
        f(&mut guard.stats)
    }

    /// Snapshot of this controller's own statistics (does not include proxies).
    pub fn stats_snapshot(&self) -> StatRegistry {
        self.state.lock().stats.clone()
    }

    fn next_of<'a>(&self, arena: &'a Arena) -> Option<&'a Controller> {
        self.next.map(|idx| &arena[idx.0])
    }

    /// Entry point from the core: read/write `len` bytes at `offset` within
    /// the block at `addr`. `lock_signal` governs stack-lock retention for
    /// atomic read-modify-write pairs (`Lock` keeps it held past return,
    /// `Unlock` expects the caller already holds it for this call).
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not block-aligned or `offset + len` exceeds the block size.
    #[allow(clippy::too_many_arguments)]
    pub fn mem_op(
        &self,
        arena: &Arena,
        lock_signal: LockSignal,
        op: MemOp,
        addr: Address,
        offset: usize,
        buf: &mut [u8],
        now: u64,
    ) -> SimResult<(HitWhere, u64)> {
        assert!(addr.is_aligned(self.geometry.block_size), "mem_op address must be block-aligned");
        assert!(offset + buf.len() <= self.geometry.block_size, "mem_op access exceeds block size");

        if self.cfg.perfect {
            let state = if op.needs_exclusive() { CState::Modified } else { CState::Shared };
            let master = self.master_ctrl(arena);
            {
                let mut guard = master.state.lock();
                if guard.storage.peek(addr).is_none() {
                    guard.storage.insert(addr, state);
                }
                if let Some(block) = guard.storage.peek_mut(addr) {
                    block.state = state;
                }
                guard.stats.record_op(op == MemOp::Write);
            }
            return Ok((HitWhere::Level(self.level), now + self.cfg.tags_access_time));
        }

        let set = self.set_index(addr);

        // `lock_signal` identifies the two halves of an atomic
        // read-modify-write pair issued as two `mem_op` calls; this port
        // still processes each call to completion synchronously rather than
        // holding the stack lock open across calls, but a nonzero signal
        // still means "treat this access as part of a larger atomic unit"
        // for locking-mode purposes (see `wants_exclusive_hit` below and
        // DESIGN.md's open-question writeup).
        let master = self.master_ctrl(arena);

        // A plain hit only needs the core-scoped shared mode, so other
        // cores can keep hitting against this same set concurrently; a
        // write-through write or an atomic read-modify-write pair (a
        // nonzero `lock_signal`) needs the stack-scoped exclusive mode up
        // front instead, since either can touch more than this one
        // controller's storage. One guard is held across the check and the
        // access that follows it — no window where a peer's snoop can slip
        // in between "this is a hit" and actually reading/writing the line.
        let wants_exclusive_hit = (op.needs_exclusive() && self.cfg.writethrough) || !matches!(lock_signal, LockSignal::None);
        let mut guard = self.set_locks.lock_shared(set);

        let mut hit = master.state.lock().storage.peek(addr).map(|b| b.state).map(|s| Self::permissible(op, s)).unwrap_or(false);

        if hit && wants_exclusive_hit && !guard.is_exclusive() {
            guard = self.set_locks.upgrade(guard, set);
            // The upgrade releases and reacquires the stripe (documented as
            // non-atomic); re-validate rather than trust the pre-upgrade check.
            hit = master.state.lock().storage.peek(addr).map(|b| b.state).map(|s| Self::permissible(op, s)).unwrap_or(false);
        }

        let (where_, t_done) = if hit {
            self.mem_op_hit(master, addr, offset, buf, op, now)?
        } else {
            // `mem_op_miss` manages its own locking internally, since the
            // first-level miss path releases and reacquires the stack lock
            // around the network wait.
            drop(guard);
            self.mem_op_miss(arena, addr, offset, buf, op, now, true)?
        };

        self.stats_mut(|s| {
            s.record_op(op == MemOp::Write);
            s.record_where(op == MemOp::Write, where_);
            s.add_latency(t_done - now);
        });

        Ok((where_, t_done))
    }

    fn mem_op_hit(
        &self,
        master: &Controller,
        addr: Address,
        offset: usize,
        buf: &mut [u8],
        op: MemOp,
        now: u64,
    ) -> SimResult<(HitWhere, u64)> {
        let mut t = now + self.cfg.tags_access_time + self.cfg.data_access_time;
        let mut state = master.state.lock();

        let in_flight_completion = state.mshr.tag_completion(addr.val());
        if in_flight_completion != u64::MAX && in_flight_completion > t {
            t = in_flight_completion;
        }

        let block_state = state.storage.peek(addr).map(|b| b.state).ok_or_else(|| {
            SimError::invariant(addr, "mem_op_hit called with block absent from storage")
        })?;
        debug_assert!(Self::permissible(op, block_state));

        match op {
            MemOp::Write => state.storage.write(addr, offset, buf, true),
            MemOp::Read | MemOp::ReadExclusive => state.storage.read(addr, offset, buf, true),
        }

        if let Some(block) = state.storage.peek_mut(addr) {
            block.flags.warmup = false;
            if !op.needs_exclusive() {
                block.flags.prefetch = false;
            }
        }
        state.stats.record_op_in_state(op == MemOp::Write, block_state);

        Ok((HitWhere::Level(self.level), t))
    }
}
