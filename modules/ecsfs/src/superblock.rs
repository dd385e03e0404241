use ecsvfs::{FsError, FsResult};

use crate::block::BLOCK_SIZE;
use crate::fat::{FAT_EOC, SLOTS_PER_BLOCK};

pub const SIGNATURE: [u8; 8] = *b"ECS150FS";

const SB_SIGNATURE_OFFSET: usize = 0x00;
const SB_TOTAL_BLOCKS_OFFSET: usize = 0x08;
const SB_ROOT_DIR_OFFSET: usize = 0x0a;
const SB_DATA_START_OFFSET: usize = 0x0c;
const SB_DATA_BLOCKS_OFFSET: usize = 0x0e;
const SB_FAT_BLOCKS_OFFSET: usize = 0x10;
const SB_BLOCKS_USED_OFFSET: usize = 0x11;
const SB_ENTRIES_USED_OFFSET: usize = 0x13;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Superblock {
    pub total_blocks: u16,
    pub root_dir_block: u16,
    pub data_start: u16,
    pub data_blocks: u16,
    pub fat_blocks: u8,
    pub blocks_used: u16,
    pub entries_used: u16,
}

impl Superblock {
    pub fn decode(buf: &[u8]) -> FsResult<Self> {
        if buf.len() < BLOCK_SIZE {
            return Err(FsError::CorruptVolume);
        }
        if buf[SB_SIGNATURE_OFFSET..SB_SIGNATURE_OFFSET + SIGNATURE.len()] != SIGNATURE {
            return Err(FsError::CorruptVolume);
        }
        Ok(Self {
            total_blocks: read_u16(buf, SB_TOTAL_BLOCKS_OFFSET),
            root_dir_block: read_u16(buf, SB_ROOT_DIR_OFFSET),
            data_start: read_u16(buf, SB_DATA_START_OFFSET),
            data_blocks: read_u16(buf, SB_DATA_BLOCKS_OFFSET),
            fat_blocks: buf[SB_FAT_BLOCKS_OFFSET],
            blocks_used: read_u16(buf, SB_BLOCKS_USED_OFFSET),
            entries_used: read_u16(buf, SB_ENTRIES_USED_OFFSET),
        })
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[..BLOCK_SIZE].fill(0);
        buf[SB_SIGNATURE_OFFSET..SB_SIGNATURE_OFFSET + SIGNATURE.len()].copy_from_slice(&SIGNATURE);
        write_u16(buf, SB_TOTAL_BLOCKS_OFFSET, self.total_blocks);
        write_u16(buf, SB_ROOT_DIR_OFFSET, self.root_dir_block);
        write_u16(buf, SB_DATA_START_OFFSET, self.data_start);
        write_u16(buf, SB_DATA_BLOCKS_OFFSET, self.data_blocks);
        buf[SB_FAT_BLOCKS_OFFSET] = self.fat_blocks;
        write_u16(buf, SB_BLOCKS_USED_OFFSET, self.blocks_used);
        write_u16(buf, SB_ENTRIES_USED_OFFSET, self.entries_used);
    }

    /// Checks the geometry against the device the superblock was read from.
    pub fn validate(&self, device_blocks: usize) -> FsResult<()> {
        let total = self.total_blocks as usize;
        if total != device_blocks {
            return Err(FsError::CorruptVolume);
        }
        let data_blocks = self.data_blocks as usize;
        if data_blocks > self.fat_blocks as usize * SLOTS_PER_BLOCK {
            return Err(FsError::CorruptVolume);
        }
        if data_blocks == 0 || self.data_blocks == FAT_EOC {
            return Err(FsError::CorruptVolume);
        }
        let fat_end = 1 + self.fat_blocks as usize;
        let root = self.root_dir_block as usize;
        if root < fat_end || root >= total {
            return Err(FsError::CorruptVolume);
        }
        let data_start = self.data_start as usize;
        let data_end = data_start + data_blocks;
        if data_start < fat_end || data_end > total {
            return Err(FsError::CorruptVolume);
        }
        if (data_start..data_end).contains(&root) {
            return Err(FsError::CorruptVolume);
        }
        Ok(())
    }

    pub fn fat_region(&self) -> core::ops::Range<u64> {
        1..1 + self.fat_blocks as u64
    }
}

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

pub(crate) fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    let bytes = value.to_le_bytes();
    buf[offset..offset + 2].copy_from_slice(&bytes);
}

pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    let bytes = value.to_le_bytes();
    buf[offset..offset + 4].copy_from_slice(&bytes);
}
