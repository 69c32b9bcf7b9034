//! Block layout constants and the common node header.

use crate::error::{HistreeError, Result};
use serde::{Deserialize, Serialize};

/// Size of the file header region that precedes the first node block.
pub const TREE_HEADER_SIZE: usize = 4096;

/// Default node block size in bytes (64 KB).
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Default maximum number of children per core node.
pub const DEFAULT_MAX_CHILDREN: usize = 50;

/// End time stored for nodes that have not been sealed yet.
pub const OPEN_NODE_END: i64 = i64::MAX;

/// Parent sequence number stored for the root node.
pub const NO_PARENT: i32 = -1;

/// Returns the file offset of the block holding the given node.
#[inline]
pub fn block_offset(seq: u32, block_size: usize) -> u64 {
    TREE_HEADER_SIZE as u64 + seq as u64 * block_size as u64
}

/// Node kinds stored in a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeType {
    /// Internal node with child pointers (and possibly intervals).
    Core = 1,
    /// Leaf node holding only intervals.
    Leaf = 2,
}

impl TryFrom<u8> for NodeType {
    type Error = HistreeError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(NodeType::Core),
            2 => Ok(NodeType::Leaf),
            _ => Err(HistreeError::Decode(format!("invalid node type tag: {}", value))),
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeType::Core => write!(f, "core"),
            NodeType::Leaf => write!(f, "leaf"),
        }
    }
}

/// Header at the beginning of every node block.
///
/// Layout (29 bytes total):
/// - node_type: 1 byte
/// - seq: 4 bytes
/// - parent: 4 bytes (-1 for the root)
/// - start: 8 bytes
/// - end: 8 bytes (OPEN_NODE_END while open)
/// - interval_count: 4 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHeader {
    /// Kind of node.
    pub node_type: NodeType,
    /// Sequence number, also the block index in the file.
    pub seq: u32,
    /// Parent sequence number, None for the root.
    pub parent: Option<u32>,
    /// First instant covered by the node.
    pub start: i64,
    /// Last instant covered by the node.
    pub end: i64,
    /// Number of intervals packed after the headers.
    pub interval_count: u32,
}

impl NodeHeader {
    /// Size of the common header in bytes.
    pub const SIZE: usize = 1 + 4 + 4 + 8 + 8 + 4;

    /// Serializes the header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let parent = self.parent.map(|p| p as i32).unwrap_or(NO_PARENT);
        buf[0] = self.node_type as u8;
        buf[1..5].copy_from_slice(&(self.seq as i32).to_le_bytes());
        buf[5..9].copy_from_slice(&parent.to_le_bytes());
        buf[9..17].copy_from_slice(&self.start.to_le_bytes());
        buf[17..25].copy_from_slice(&self.end.to_le_bytes());
        buf[25..29].copy_from_slice(&(self.interval_count as i32).to_le_bytes());
        buf
    }

    /// Deserializes the header from bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(HistreeError::Decode(format!(
                "node header needs {} bytes, got {}",
                Self::SIZE,
                buf.len()
            )));
        }
        let node_type = NodeType::try_from(buf[0])?;
        let seq = i32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
        let parent = i32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]);
        let start = i64::from_le_bytes([
            buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15], buf[16],
        ]);
        let end = i64::from_le_bytes([
            buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23], buf[24],
        ]);
        let interval_count = i32::from_le_bytes([buf[25], buf[26], buf[27], buf[28]]);

        if seq < 0 || parent < NO_PARENT || interval_count < 0 {
            return Err(HistreeError::Decode(format!(
                "negative field in node header: seq={}, parent={}, count={}",
                seq, parent, interval_count
            )));
        }

        Ok(Self {
            node_type,
            seq: seq as u32,
            parent: if parent == NO_PARENT {
                None
            } else {
                Some(parent as u32)
            },
            start,
            end,
            interval_count: interval_count as u32,
        })
    }
}
