//! Mock external collaborators, grounded on the donor crate's
//! `tests/common/mocks/bus.rs`: a `mockall::mock!` definition plus a thin
//! `Arc<Mutex<_>>` wrapper, since a `mockall`-generated mock is not `Sync`
//! on its own but every external contract here (`DirectoryClient`,
//! `DramClient`) is called through a shared controller arena.

use std::sync::{Arc, Mutex};

use coherence_sim::common::{Address, HomeLookup};
use coherence_sim::dram::{DramClient, DramResult};
use coherence_sim::network::{DirectoryClient, DirectoryMessage};
use mockall::mock;

mock! {
    pub Home {}
    impl HomeLookup for Home {
        fn home(&self, addr: Address) -> u32;
    }
}

mock! {
    pub DramBackend {}
    impl DramClient for DramBackend {
        fn get_data(&self, addr: Address, core_id: u32, buf: &mut [u8], t_issue: u64, perf_token: u64) -> DramResult;
        fn put_data(&self, addr: Address, core_id: u32, buf: &[u8], t_issue: u64) -> DramResult;
    }
}

/// Thread-safe facade over [`MockDramBackend`].
pub struct SyncDram {
    inner: Mutex<MockDramBackend>,
}

impl SyncDram {
    pub fn new(inner: MockDramBackend) -> Self {
        Self { inner: Mutex::new(inner) }
    }
}

impl DramClient for SyncDram {
    fn get_data(&self, addr: Address, core_id: u32, buf: &mut [u8], t_issue: u64, perf_token: u64) -> DramResult {
        self.inner.lock().unwrap().get_data(addr, core_id, buf, t_issue, perf_token)
    }

    fn put_data(&self, addr: Address, core_id: u32, buf: &[u8], t_issue: u64) -> DramResult {
        self.inner.lock().unwrap().put_data(addr, core_id, buf, t_issue)
    }
}

mock! {
    pub Directory {}
    impl DirectoryClient for Directory {
        fn send(&self, msg: DirectoryMessage) -> u64;
    }
}

/// Thread-safe facade over [`MockDirectory`].
pub struct SyncDirectory {
    inner: Mutex<MockDirectory>,
}

impl SyncDirectory {
    pub fn new(inner: MockDirectory) -> Self {
        Self { inner: Mutex::new(inner) }
    }
}

impl DirectoryClient for SyncDirectory {
    fn send(&self, msg: DirectoryMessage) -> u64 {
        self.inner.lock().unwrap().send(msg)
    }
}

/// Thread-safe facade over [`MockHome`].
pub struct SyncHome {
    inner: Mutex<MockHome>,
}

impl SyncHome {
    pub fn new(inner: MockHome) -> Self {
        Self { inner: Mutex::new(inner) }
    }
}

impl HomeLookup for SyncHome {
    fn home(&self, addr: Address) -> u32 {
        self.inner.lock().unwrap().home(addr)
    }
}

/// A [`HomeLookup`] that always routes to the same fixed home node, for
/// tests that don't care about the home-hashing scheme itself.
pub fn fixed_home(node: u32) -> Arc<SyncHome> {
    let mut mock = MockHome::new();
    mock.expect_home().returning(move |_addr| node);
    Arc::new(SyncHome::new(mock))
}

/// A [`DramClient`] that always returns a fixed latency and fills reads with
/// a deterministic byte pattern. `expected_gets` pins exactly how many
/// `get_data` calls the test expects — mockall panics at drop if the real
/// count differs, which is how the LLC-sharing scenario below proves a
/// second core's hit never reaches DRAM a second time.
pub fn fixed_latency_dram(latency: u64, expected_gets: usize) -> Arc<SyncDram> {
    let mut mock = MockDramBackend::new();
    mock.expect_get_data()
        .times(expected_gets)
        .returning(move |_addr, _core, buf, _t_issue, _perf_token| {
            buf.fill(0xAB);
            DramResult { latency, where_: coherence_sim::network::HitWhere::Dram }
        });
    mock.expect_put_data()
        .returning(move |_addr, _core, _buf, _t_issue| DramResult { latency, where_: coherence_sim::network::HitWhere::Dram });
    Arc::new(SyncDram::new(mock))
}

/// A [`DirectoryClient`] that accepts any number of sends and charges a
/// fixed round-trip latency, for tests driving replies back in manually via
/// `Simulator::handle_directory_msg` rather than asserting on send traffic.
pub fn fixed_latency_directory(latency: u64) -> Arc<SyncDirectory> {
    let mut mock = MockDirectory::new();
    mock.expect_send().returning(move |_msg| latency);
    Arc::new(SyncDirectory::new(mock))
}
