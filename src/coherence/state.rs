//! MSI(+O) coherence state for a single cache block.

use std::fmt;

/// Coherence state of a cache block.
///
/// `SharedUpgrading` is transient: the block reads as Shared but an
/// upgrade-to-Modified request is already outstanding, so it must not be
/// silently downgraded while in this state (an incoming snoop invalidates it
/// outright instead of demoting it further).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CState {
    /// Not present / no valid data.
    Invalid,
    /// Clean, possibly shared with peers.
    Shared,
    /// Shared, with an upgrade-to-Modified request outstanding.
    SharedUpgrading,
    /// Clean, held by exactly one cache.
    Exclusive,
    /// Dirty, held by exactly one cache.
    Modified,
    /// Clean, held by exactly one cache which also owns write-back responsibility.
    Owned,
}

impl CState {
    /// True for states a `Read` may be satisfied from.
    #[inline]
    pub fn is_readable(self) -> bool {
        matches!(
            self,
            CState::Shared
                | CState::SharedUpgrading
                | CState::Exclusive
                | CState::Modified
                | CState::Owned
        )
    }

    /// True for states a `Write`/`ReadExclusive` may be satisfied from.
    #[inline]
    pub fn is_writable(self) -> bool {
        matches!(self, CState::Exclusive | CState::Modified)
    }

    /// True if a cache holding this state has the dirty copy of record.
    #[inline]
    pub fn is_dirty(self) -> bool {
        matches!(self, CState::Modified)
    }

    /// True if this state must not appear anywhere but the last-level cache.
    #[inline]
    pub fn is_llc_only(self) -> bool {
        matches!(self, CState::SharedUpgrading)
    }
}

impl fmt::Display for CState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CState::Invalid => "I",
            CState::Shared => "S",
            CState::SharedUpgrading => "SU",
            CState::Exclusive => "E",
            CState::Modified => "M",
            CState::Owned => "O",
        };
        write!(f, "{s}")
    }
}

/// Reason a coherence transition was driven, carried through for statistics
/// attribution (`coherency-{downgrades,upgrades,writebacks,invalidates}`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionReason {
    /// A peer snoop forced an invalidate or downgrade.
    Coherency,
    /// A Shared->Modified upgrade request.
    Upgrade,
    /// A victim was evicted to make room for a new line.
    Eviction,
    /// A directory-issued invalidate/flush/writeback request.
    Directory,
    /// A PIC operator's corrective writeback/invalidate before forwarding to
    /// another level (4.6.7).
    Pic,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn readable_writable_partitions() {
        for s in [
            CState::Invalid,
            CState::Shared,
            CState::SharedUpgrading,
            CState::Exclusive,
            CState::Modified,
            CState::Owned,
        ] {
            if s.is_writable() {
                assert!(s.is_readable(), "{s:?} writable implies readable");
            }
        }
        assert!(!CState::Invalid.is_readable());
        assert!(CState::SharedUpgrading.is_readable());
        assert!(!CState::SharedUpgrading.is_writable());
    }

    #[rstest]
    #[case(CState::Invalid, false, false)]
    #[case(CState::Shared, true, false)]
    #[case(CState::SharedUpgrading, true, false)]
    #[case(CState::Exclusive, true, true)]
    #[case(CState::Modified, true, true)]
    #[case(CState::Owned, true, false)]
    fn permission_table_matches_protocol(#[case] state: CState, #[case] readable: bool, #[case] writable: bool) {
        assert_eq!(state.is_readable(), readable, "{state:?} readability");
        assert_eq!(state.is_writable(), writable, "{state:?} writability");
    }

    #[rstest]
    #[case(CState::Invalid, false)]
    #[case(CState::Shared, false)]
    #[case(CState::SharedUpgrading, false)]
    #[case(CState::Exclusive, false)]
    #[case(CState::Modified, true)]
    #[case(CState::Owned, false)]
    fn only_modified_is_dirty(#[case] state: CState, #[case] dirty: bool) {
        assert_eq!(state.is_dirty(), dirty);
    }
}
