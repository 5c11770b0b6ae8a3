//! Fatal error kinds for coherence and simulation invariants.
//!
//! Per the error handling design: every kind here is fatal to the
//! simulation. There is no retry path — coherence correctness is a
//! precondition for any timing claim the engine makes. The only
//! *non*-error control-flow branch is a miss followed by a directory
//! wait, which is handled entirely through [`crate::rendezvous`].

use thiserror::Error;

use super::addr::Address;
use crate::coherence::state::CState;

/// A fatal condition detected by the coherence engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    /// A configuration value was out of range or internally inconsistent.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A coherence or inclusion invariant was violated.
    #[error("invariant violated at {addr}: {detail}")]
    InvariantViolated {
        /// Address at which the invariant failed.
        addr: Address,
        /// Human-readable description of the violated invariant.
        detail: String,
    },

    /// A Modified block was transitioned to Invalid with no sink for its data.
    #[error("data loss at {addr}: modified block dropped with no writeback sink")]
    DataLoss {
        /// Address of the dropped block.
        addr: Address,
    },

    /// A directory or controller saw a message or state it was not prepared for.
    #[error("protocol mismatch at {addr}: {detail}")]
    ProtocolMismatch {
        /// Address the mismatched message concerned.
        addr: Address,
        /// Human-readable description of the mismatch.
        detail: String,
    },

    /// An internal consistency check failed (e.g. indexing, arena handle reuse).
    #[error("assertion failed: {0}")]
    AssertionFailed(String),
}

impl SimError {
    /// Builds [`SimError::InvariantViolated`] from an address and a message.
    pub fn invariant(addr: Address, detail: impl Into<String>) -> Self {
        Self::InvariantViolated { addr, detail: detail.into() }
    }

    /// Builds [`SimError::ProtocolMismatch`] from an address and a message.
    pub fn protocol(addr: Address, detail: impl Into<String>) -> Self {
        Self::ProtocolMismatch { addr, detail: detail.into() }
    }
}

/// Result alias used throughout the coherence engine.
pub type SimResult<T> = Result<T, SimError>;

/// Asserts that `state` is one of I/S/M as required by `update_block`'s
/// target-state contract; any other target is a defined-target violation.
pub fn require_defined_target(addr: Address, state: CState) -> SimResult<()> {
    match state {
        CState::Invalid | CState::Shared | CState::Modified => Ok(()),
        other => Err(SimError::protocol(
            addr,
            format!("update_block target state must be I/S/M, got {other:?}"),
        )),
    }
}
