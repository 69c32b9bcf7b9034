//! Configuration structures for history trees.

use crate::block::{NodeHeader, DEFAULT_BLOCK_SIZE, DEFAULT_MAX_CHILDREN, TREE_HEADER_SIZE};
use crate::error::{HistreeError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Provider version that disables the provider check when opening a file.
pub const IGNORE_PROVIDER_VERSION: i32 = -42;

/// Default node cache capacity in nodes.
pub const DEFAULT_CACHE_NODES: usize = 256;

/// Size of one child slot in a core node header (seq: 4 + start: 8).
pub const CHILD_SLOT_SIZE: usize = 4 + 8;

/// Configuration of a history tree file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Path to the tree file.
    pub path: PathBuf,
    /// Size of every node block in bytes.
    pub block_size: usize,
    /// Maximum number of children per core node.
    pub max_children: usize,
    /// Version of the producer that fills the tree.
    pub provider_version: i32,
    /// Earliest instant the tree may hold.
    pub tree_start: i64,
    /// Node cache capacity in nodes, 0 to size it from available memory.
    pub cache_nodes: usize,
    /// Enable fsync when the tree is closed.
    pub fsync_enabled: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./history.ht"),
            block_size: DEFAULT_BLOCK_SIZE,
            max_children: DEFAULT_MAX_CHILDREN,
            provider_version: 0,
            tree_start: 0,
            cache_nodes: DEFAULT_CACHE_NODES,
            fsync_enabled: true,
        }
    }
}

impl TreeConfig {
    /// Creates a configuration for the given file with default sizing.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Sets the block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the maximum number of children per core node.
    pub fn with_max_children(mut self, max_children: usize) -> Self {
        self.max_children = max_children;
        self
    }

    /// Sets the provider version.
    pub fn with_provider_version(mut self, provider_version: i32) -> Self {
        self.provider_version = provider_version;
        self
    }

    /// Sets the tree start time.
    pub fn with_tree_start(mut self, tree_start: i64) -> Self {
        self.tree_start = tree_start;
        self
    }

    /// Sets the node cache capacity (0 sizes it from available memory).
    pub fn with_cache_nodes(mut self, cache_nodes: usize) -> Self {
        self.cache_nodes = cache_nodes;
        self
    }

    /// Enables or disables fsync on close.
    pub fn with_fsync(mut self, fsync_enabled: bool) -> Self {
        self.fsync_enabled = fsync_enabled;
        self
    }

    /// Returns the size of the core-specific header for this fan-out.
    pub fn core_header_size(&self) -> usize {
        4 + self.max_children * CHILD_SLOT_SIZE
    }

    /// Checks that the configuration can describe a valid tree file.
    pub fn validate(&self) -> Result<()> {
        if self.block_size < TREE_HEADER_SIZE {
            return Err(HistreeError::InvalidConfig(format!(
                "block size {} is smaller than the tree header ({})",
                self.block_size, TREE_HEADER_SIZE
            )));
        }
        if self.block_size > i32::MAX as usize {
            return Err(HistreeError::InvalidConfig(format!(
                "block size {} does not fit the on-disk format",
                self.block_size
            )));
        }
        if self.max_children < 2 {
            return Err(HistreeError::InvalidConfig(format!(
                "max children must be at least 2, got {}",
                self.max_children
            )));
        }
        if NodeHeader::SIZE + self.core_header_size() >= self.block_size {
            return Err(HistreeError::InvalidConfig(format!(
                "{} children do not fit a {} byte block",
                self.max_children, self.block_size
            )));
        }
        Ok(())
    }
}
