//! Node cache for history trees.
//!
//! This crate provides in-memory caching of sealed nodes with:
//! - Fixed or memory-derived capacity
//! - Clock eviction policy
//! - Shared `Arc` handles so readers outlive eviction
//! - Hit/miss statistics

mod cache;
mod replacer;
mod slot;
mod stats;

pub use cache::NodeCache;
pub use replacer::{ClockReplacer, Replacer};
pub use slot::SlotId;
pub use stats::CacheStats;
