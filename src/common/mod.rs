//! Common types shared across the coherence engine.
//!
//! 1. **Addressing:** [`addr::Address`] and the block/set decomposition in [`addr::CacheGeometry`].
//! 2. **Errors:** [`error::SimError`], the single fatal-error type for every invariant in the engine.

/// Address type and cache geometry (block/set decomposition, home lookup).
pub mod addr;

/// Fatal error kinds shared by every component.
pub mod error;

pub use addr::{Address, CacheGeometry, HomeLookup, ModuloHome};
pub use error::{SimError, SimResult};
