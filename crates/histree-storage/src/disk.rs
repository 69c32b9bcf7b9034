//! Block file for fixed-offset node I/O.

use histree_common::block::{block_offset, TREE_HEADER_SIZE};
use histree_common::{HistreeError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Reads and writes the header region and node blocks of one tree file.
///
/// Block `seq` lives at `TREE_HEADER_SIZE + seq * block_size`.
pub struct BlockFile {
    /// Path to the file.
    path: PathBuf,
    /// Size of every node block.
    block_size: usize,
    /// Sync data to disk on flush.
    fsync_enabled: bool,
    /// The file handle, shared by readers and the writer.
    file: Mutex<File>,
}

impl BlockFile {
    /// Creates a new file, truncating any previous content.
    pub fn create(path: &Path, block_size: usize, fsync_enabled: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            block_size,
            fsync_enabled,
            file: Mutex::new(file),
        })
    }

    /// Opens an existing file for reading.
    pub fn open(path: &Path, block_size: usize) -> Result<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(HistreeError::FileNotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            block_size,
            fsync_enabled: false,
            file: Mutex::new(file),
        })
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the block size.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Sets the block size once it is known from the file header.
    pub fn set_block_size(&mut self, block_size: usize) {
        self.block_size = block_size;
    }

    /// Reads the header region.
    ///
    /// A file shorter than the header yields `EmptyFile` or
    /// `HeaderTruncated` rather than a bare I/O error.
    pub fn read_header(&self) -> Result<[u8; TREE_HEADER_SIZE]> {
        let mut file = self.file.lock();
        let len = file.metadata()?.len() as usize;
        if len == 0 {
            return Err(HistreeError::EmptyFile(self.path.display().to_string()));
        }
        if len < TREE_HEADER_SIZE {
            return Err(HistreeError::HeaderTruncated {
                expected: TREE_HEADER_SIZE,
                actual: len,
            });
        }

        file.seek(SeekFrom::Start(0))?;
        let mut buffer = [0u8; TREE_HEADER_SIZE];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Writes the header region.
    pub fn write_header(&self, data: &[u8; TREE_HEADER_SIZE]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(data)?;
        Ok(())
    }

    /// Reads the block of node `seq`.
    ///
    /// Short reads are fatal and reported as `BlockTruncated`.
    pub fn read_block(&self, seq: u32) -> Result<Vec<u8>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(block_offset(seq, self.block_size)))?;

        let mut buffer = vec![0u8; self.block_size];
        let mut filled = 0;
        while filled < buffer.len() {
            match file.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if filled < self.block_size {
            return Err(HistreeError::BlockTruncated {
                seq,
                expected: self.block_size,
                actual: filled,
            });
        }

        Ok(buffer)
    }

    /// Writes the block of node `seq`.
    pub fn write_block(&self, seq: u32, data: &[u8]) -> Result<()> {
        if data.len() != self.block_size {
            return Err(HistreeError::NodeCorrupted {
                seq,
                reason: format!(
                    "encoded block is {} bytes, expected {}",
                    data.len(),
                    self.block_size
                ),
            });
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(block_offset(seq, self.block_size)))?;
        file.write_all(data)?;
        Ok(())
    }

    /// Returns the number of complete blocks after the header.
    pub fn num_blocks(&self) -> Result<u32> {
        let len = self.file_size()?;
        if len <= TREE_HEADER_SIZE as u64 {
            return Ok(0);
        }
        Ok(((len - TREE_HEADER_SIZE as u64) / self.block_size as u64) as u32)
    }

    /// Returns the current file size in bytes.
    pub fn file_size(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    /// Flushes pending writes, syncing to disk when enabled.
    pub fn flush(&self) -> Result<()> {
        let mut file = self.file.lock();
        file.flush()?;
        if self.fsync_enabled {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Removes the backing file.
    pub fn delete(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const BLOCK: usize = 4096;

    fn create_test_block_file() -> (BlockFile, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree.ht");
        let file = BlockFile::create(&path, BLOCK, false).unwrap();
        (file, dir)
    }

    #[test]
    fn test_block_file_create() {
        let (file, _dir) = create_test_block_file();
        assert!(file.path().exists());
        assert_eq!(file.block_size(), BLOCK);
        assert_eq!(file.num_blocks().unwrap(), 0);
    }

    #[test]
    fn test_block_file_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deeper/tree.ht");
        let file = BlockFile::create(&path, BLOCK, false).unwrap();
        assert!(file.path().exists());
    }

    #[test]
    fn test_block_file_header_roundtrip() {
        let (file, _dir) = create_test_block_file();

        let mut header = [0u8; TREE_HEADER_SIZE];
        header[0] = 0x12;
        header[TREE_HEADER_SIZE - 1] = 0x34;
        file.write_header(&header).unwrap();

        let read = file.read_header().unwrap();
        assert_eq!(read[0], 0x12);
        assert_eq!(read[TREE_HEADER_SIZE - 1], 0x34);
    }

    #[test]
    fn test_block_file_write_read() {
        let (file, _dir) = create_test_block_file();

        let mut data = vec![0u8; BLOCK];
        data[0] = 0xAB;
        data[100] = 0xCD;
        data[BLOCK - 1] = 0xEF;
        file.write_block(0, &data).unwrap();

        let read = file.read_block(0).unwrap();
        assert_eq!(read[0], 0xAB);
        assert_eq!(read[100], 0xCD);
        assert_eq!(read[BLOCK - 1], 0xEF);
    }

    #[test]
    fn test_block_file_blocks_at_fixed_offsets() {
        let (file, _dir) = create_test_block_file();

        // Out of order writes land at their own offsets
        file.write_block(2, &vec![0x22; BLOCK]).unwrap();
        file.write_block(0, &vec![0x00; BLOCK]).unwrap();
        file.write_block(1, &vec![0x11; BLOCK]).unwrap();

        assert_eq!(file.num_blocks().unwrap(), 3);
        assert_eq!(file.read_block(0).unwrap()[10], 0x00);
        assert_eq!(file.read_block(1).unwrap()[10], 0x11);
        assert_eq!(file.read_block(2).unwrap()[10], 0x22);
        assert_eq!(
            file.file_size().unwrap(),
            (TREE_HEADER_SIZE + 3 * BLOCK) as u64
        );
    }

    #[test]
    fn test_block_file_rejects_wrong_size() {
        let (file, _dir) = create_test_block_file();
        let result = file.write_block(0, &[0u8; 10]);
        assert!(matches!(result, Err(HistreeError::NodeCorrupted { seq: 0, .. })));
    }

    #[test]
    fn test_block_file_truncated_read() {
        let (file, _dir) = create_test_block_file();
        file.write_block(0, &vec![1u8; BLOCK]).unwrap();

        let result = file.read_block(5);
        assert!(matches!(
            result,
            Err(HistreeError::BlockTruncated {
                seq: 5,
                actual: 0,
                ..
            })
        ));
    }

    #[test]
    fn test_block_file_partial_block_is_truncated() {
        let (file, dir) = create_test_block_file();
        file.write_block(0, &vec![1u8; BLOCK]).unwrap();
        drop(file);

        let path = dir.path().join("tree.ht");
        let raw = OpenOptions::new().write(true).open(&path).unwrap();
        raw.set_len((TREE_HEADER_SIZE + BLOCK / 2) as u64).unwrap();

        let file = BlockFile::open(&path, BLOCK).unwrap();
        let result = file.read_block(0);
        assert!(matches!(
            result,
            Err(HistreeError::BlockTruncated { actual, .. }) if actual == BLOCK / 2
        ));
    }

    #[test]
    fn test_block_file_open_missing() {
        let dir = tempdir().unwrap();
        let result = BlockFile::open(&dir.path().join("missing.ht"), BLOCK);
        assert!(matches!(result, Err(HistreeError::FileNotFound(_))));
    }

    #[test]
    fn test_block_file_empty_header() {
        let (file, _dir) = create_test_block_file();
        assert!(matches!(file.read_header(), Err(HistreeError::EmptyFile(_))));
    }

    #[test]
    fn test_block_file_short_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.ht");
        std::fs::write(&path, [0u8; 100]).unwrap();

        let file = BlockFile::open(&path, BLOCK).unwrap();
        assert!(matches!(
            file.read_header(),
            Err(HistreeError::HeaderTruncated {
                expected: TREE_HEADER_SIZE,
                actual: 100
            })
        ));
    }

    #[test]
    fn test_block_file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree.ht");

        {
            let file = BlockFile::create(&path, BLOCK, true).unwrap();
            file.write_header(&[7u8; TREE_HEADER_SIZE]).unwrap();
            file.write_block(0, &vec![0xFF; BLOCK]).unwrap();
            file.flush().unwrap();
        }

        {
            let file = BlockFile::open(&path, BLOCK).unwrap();
            assert_eq!(file.read_header().unwrap()[0], 7);
            assert_eq!(file.read_block(0).unwrap()[0], 0xFF);
        }
    }

    #[test]
    fn test_block_file_delete() {
        let (file, _dir) = create_test_block_file();
        let path = file.path().to_path_buf();
        assert!(path.exists());

        file.delete().unwrap();
        assert!(!path.exists());
        // Deleting twice is harmless
        file.delete().unwrap();
    }
}
