//! Sync progress as block hash checkpoints.
//!
//! The node is given the most recent block hashes the wallet has processed along with sparse,
//! long range checkpoints. It serves blocks following the newest hash it recognises, so a short
//! reorg is resolved by the recent hashes and a deep one by the sparse checkpoints.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::primitives::BlockHash;

/// Number of recently processed block hashes sent to the node.
pub const LAST_KNOWN_BLOCK_HASHES_SIZE: usize = 50;

/// Interval, in blocks, between sparse checkpoints.
pub const BLOCK_HASH_CHECKPOINTS_INTERVAL: u64 = 5_000;

/// Encapsulates the progress of sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynchronizationStatus {
    last_known_block_height: u64,
    // most recent first
    last_known_block_hashes: VecDeque<BlockHash>,
    // most recent first
    block_hash_checkpoints: VecDeque<BlockHash>,
}

impl SynchronizationStatus {
    /// Create new SynchronizationStatus with no recorded hashes.
    ///
    /// The next block requested from the node follows `last_known_block_height`.
    pub fn new(last_known_block_height: u64) -> Self {
        Self {
            last_known_block_height,
            last_known_block_hashes: VecDeque::with_capacity(LAST_KNOWN_BLOCK_HASHES_SIZE + 1),
            block_hash_checkpoints: VecDeque::new(),
        }
    }

    /// Height of the last processed block
    pub fn height(&self) -> u64 {
        self.last_known_block_height
    }

    /// Recently processed block hashes, most recent first
    pub fn recent_block_hashes(&self) -> impl Iterator<Item = &BlockHash> {
        self.last_known_block_hashes.iter()
    }

    /// Sparse checkpoints, most recent first
    pub fn block_checkpoints(&self) -> impl Iterator<Item = &BlockHash> {
        self.block_hash_checkpoints.iter()
    }

    /// Records a processed block.
    pub fn store_block_hash(&mut self, block_height: u64, block_hash: BlockHash) {
        if block_height <= self.last_known_block_height && self.last_known_block_height != 0 {
            tracing::debug!(
                "Storing block hash at height {} which does not follow height {}",
                block_height,
                self.last_known_block_height
            );
        }

        self.last_known_block_height = block_height;

        if block_height % BLOCK_HASH_CHECKPOINTS_INTERVAL == 0 {
            self.block_hash_checkpoints.push_front(block_hash);
        }

        self.last_known_block_hashes.push_front(block_hash);
        self.last_known_block_hashes.truncate(LAST_KNOWN_BLOCK_HASHES_SIZE);
    }

    /// Serialized version
    pub fn serialized_version() -> u64 {
        0
    }

    /// Serialize into `writer`
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(Self::serialized_version())?;
        writer.write_u64::<LittleEndian>(self.last_known_block_height)?;
        write_hashes(&mut writer, &self.last_known_block_hashes)?;
        write_hashes(&mut writer, &self.block_hash_checkpoints)?;

        Ok(())
    }

    /// Deserialize from `reader`
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let version = reader.read_u64::<LittleEndian>()?;
        if version > Self::serialized_version() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported synchronization status version {version}"),
            ));
        }

        let last_known_block_height = reader.read_u64::<LittleEndian>()?;
        let mut last_known_block_hashes = read_hashes(&mut reader)?;
        last_known_block_hashes.truncate(LAST_KNOWN_BLOCK_HASHES_SIZE);
        let block_hash_checkpoints = read_hashes(&mut reader)?;

        Ok(Self {
            last_known_block_height,
            last_known_block_hashes,
            block_hash_checkpoints,
        })
    }
}

impl Default for SynchronizationStatus {
    fn default() -> Self {
        Self::new(0)
    }
}

fn write_hashes<W: Write>(mut writer: W, hashes: &VecDeque<BlockHash>) -> io::Result<()> {
    writer.write_u64::<LittleEndian>(hashes.len() as u64)?;
    for hash in hashes {
        writer.write_all(hash.as_bytes())?;
    }

    Ok(())
}

fn read_hashes<R: Read>(mut reader: R) -> io::Result<VecDeque<BlockHash>> {
    let len = reader.read_u64::<LittleEndian>()? as usize;
    let mut hashes = VecDeque::with_capacity(len.min(1_024));
    for _ in 0..len {
        let mut bytes = [0u8; 32];
        reader.read_exact(&mut bytes)?;
        hashes.push_back(BlockHash::from_bytes(bytes));
    }

    Ok(hashes)
}
