//! Tree file header.

use histree_common::block::TREE_HEADER_SIZE;
use histree_common::config::IGNORE_PROVIDER_VERSION;
use histree_common::{HistreeError, Result};

/// Header stored in the first `TREE_HEADER_SIZE` bytes of a tree file.
///
/// Layout (52 bytes, zero padded to `TREE_HEADER_SIZE`):
/// - magic: 4 bytes
/// - file_version: 4 bytes
/// - provider_version: 4 bytes
/// - block_size: 4 bytes
/// - max_children: 4 bytes
/// - node_count: 4 bytes
/// - root_seq: 4 bytes
/// - tree_start: 8 bytes
/// - tree_end: 8 bytes
/// - branch_depth: 4 bytes
/// - checksum: 4 bytes (CRC32 of the preceding 48 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeHeader {
    /// Magic number of the branch policy.
    pub magic: u32,
    /// File format version.
    pub file_version: u32,
    /// Version of the producer that built the tree.
    pub provider_version: i32,
    /// Size of every node block.
    pub block_size: u32,
    /// Maximum children per core node.
    pub max_children: u32,
    /// Number of nodes in the file.
    pub node_count: u32,
    /// Sequence number of the root node.
    pub root_seq: u32,
    /// Earliest instant of the tree.
    pub tree_start: i64,
    /// Latest instant of the tree.
    pub tree_end: i64,
    /// Depth of the last open chain.
    pub branch_depth: u32,
    /// Header checksum.
    pub checksum: u32,
}

impl TreeHeader {
    /// Number of meaningful bytes, checksum included.
    pub const ENCODED_SIZE: usize = 52;

    /// Serializes the fields preceding the checksum.
    fn body(&self) -> [u8; Self::ENCODED_SIZE - 4] {
        let mut data = [0u8; Self::ENCODED_SIZE - 4];
        data[0..4].copy_from_slice(&self.magic.to_le_bytes());
        data[4..8].copy_from_slice(&self.file_version.to_le_bytes());
        data[8..12].copy_from_slice(&self.provider_version.to_le_bytes());
        data[12..16].copy_from_slice(&self.block_size.to_le_bytes());
        data[16..20].copy_from_slice(&self.max_children.to_le_bytes());
        data[20..24].copy_from_slice(&self.node_count.to_le_bytes());
        data[24..28].copy_from_slice(&self.root_seq.to_le_bytes());
        data[28..36].copy_from_slice(&self.tree_start.to_le_bytes());
        data[36..44].copy_from_slice(&self.tree_end.to_le_bytes());
        data[44..48].copy_from_slice(&self.branch_depth.to_le_bytes());
        data
    }

    /// Computes the checksum for this header.
    pub fn compute_checksum(&self) -> u32 {
        crc32fast::hash(&self.body())
    }

    /// Recomputes and stores the checksum.
    pub fn seal(mut self) -> Self {
        self.checksum = self.compute_checksum();
        self
    }

    /// Serializes the header into a full header region.
    pub fn to_bytes(&self) -> [u8; TREE_HEADER_SIZE] {
        let mut data = [0u8; TREE_HEADER_SIZE];
        data[..Self::ENCODED_SIZE - 4].copy_from_slice(&self.body());
        data[Self::ENCODED_SIZE - 4..Self::ENCODED_SIZE]
            .copy_from_slice(&self.checksum.to_le_bytes());
        data
    }

    /// Deserializes the header from a full header region.
    pub fn from_bytes(data: &[u8; TREE_HEADER_SIZE]) -> Self {
        Self {
            magic: read_u32(data, 0),
            file_version: read_u32(data, 4),
            provider_version: read_u32(data, 8) as i32,
            block_size: read_u32(data, 12),
            max_children: read_u32(data, 16),
            node_count: read_u32(data, 20),
            root_seq: read_u32(data, 24),
            tree_start: read_i64(data, 28),
            tree_end: read_i64(data, 36),
            branch_depth: read_u32(data, 44),
            checksum: read_u32(data, 48),
        }
    }

    /// Validates the header against what the caller expects.
    ///
    /// `IGNORE_PROVIDER_VERSION` skips the provider check.
    pub fn validate(&self, magic: u32, file_version: u32, provider_version: i32) -> Result<()> {
        if self.magic != magic {
            return Err(HistreeError::BadMagic {
                expected: magic,
                actual: self.magic,
            });
        }
        let computed = self.compute_checksum();
        if self.checksum != computed {
            return Err(HistreeError::HeaderChecksumMismatch {
                stored: self.checksum,
                computed,
            });
        }
        if self.file_version != file_version {
            return Err(HistreeError::FileVersionMismatch {
                expected: file_version,
                actual: self.file_version,
            });
        }
        if provider_version != IGNORE_PROVIDER_VERSION && self.provider_version != provider_version
        {
            return Err(HistreeError::ProviderVersionMismatch {
                expected: provider_version,
                actual: self.provider_version,
            });
        }
        Ok(())
    }
}

#[inline]
fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

#[inline]
fn read_i64(data: &[u8], offset: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    i64::from_le_bytes(bytes)
}
