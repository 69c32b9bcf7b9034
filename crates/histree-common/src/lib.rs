//! Shared definitions for the history tree crates.
//!
//! This crate provides the error type, tree configuration, time ranges and
//! the block-level wire constants used by the cache and storage crates.

pub mod block;
pub mod config;
pub mod error;
pub mod range;

pub use block::{NodeHeader, NodeType, OPEN_NODE_END, TREE_HEADER_SIZE};
pub use config::{TreeConfig, IGNORE_PROVIDER_VERSION};
pub use error::{HistreeError, Result};
pub use range::TimeRange;
