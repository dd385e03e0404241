//! Volume formatter.

use alloc::vec;

use ecsvfs::{FsError, FsResult};
use log::info;

use crate::block::{BlockDevice, BLOCK_SIZE};
use crate::fat::{Fat, SLOTS_PER_BLOCK};
use crate::rootdir::RootDir;
use crate::superblock::Superblock;

/// Superblock, one FAT block, root directory and two data slots (one reserved).
pub const MIN_BLOCKS: usize = 5;
pub const MAX_BLOCKS: usize = u16::MAX as usize;

/// Geometry for a device of `total_blocks`: the smallest FAT that covers the
/// remaining data region.
pub fn layout(total_blocks: usize) -> FsResult<Superblock> {
    if !(MIN_BLOCKS..=MAX_BLOCKS).contains(&total_blocks) {
        return Err(FsError::InvalidGeometry);
    }
    let avail = total_blocks - 2;
    let fat_blocks = avail.div_ceil(SLOTS_PER_BLOCK + 1);
    let data_blocks = avail - fat_blocks;
    Ok(Superblock {
        total_blocks: total_blocks as u16,
        root_dir_block: (fat_blocks + 1) as u16,
        data_start: (fat_blocks + 2) as u16,
        data_blocks: data_blocks as u16,
        fat_blocks: fat_blocks as u8,
        blocks_used: 1,
        entries_used: 0,
    })
}

/// Writes an empty volume covering the whole device.
pub fn format<D: BlockDevice + ?Sized>(device: &D) -> FsResult<Superblock> {
    if device.block_size() != BLOCK_SIZE {
        return Err(FsError::DeviceError);
    }
    let sb = layout(device.block_count())?;
    let fat = Fat::new(sb.data_blocks as usize);
    let mut block = vec![0u8; BLOCK_SIZE];

    sb.encode(&mut block);
    device.write_block(0, &block)?;
    for (index, block_id) in sb.fat_region().enumerate() {
        fat.encode_block(index, &mut block);
        device.write_block(block_id, &block)?;
    }
    RootDir::new().encode(&mut block);
    device.write_block(sb.root_dir_block as u64, &block)?;
    device.flush()?;
    info!(
        "ecsfs: formatted {} blocks: fat={} rdir={} data={}x{}",
        sb.total_blocks, sb.fat_blocks, sb.root_dir_block, sb.data_start, sb.data_blocks
    );
    Ok(sb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat::FAT_EOC;
    use crate::testutil::MemDevice;
    use crate::volume::Volume;

    #[test]
    fn classic_geometry() {
        let sb = layout(8198).unwrap();
        assert_eq!(sb.fat_blocks, 4);
        assert_eq!(sb.root_dir_block, 5);
        assert_eq!(sb.data_start, 6);
        assert_eq!(sb.data_blocks, 8192);
        assert_eq!(sb.validate(8198), Ok(()));
    }

    #[test]
    fn fat_grows_at_slot_boundary() {
        let sb = layout(2 + 1 + SLOTS_PER_BLOCK).unwrap();
        assert_eq!(sb.fat_blocks, 1);
        assert_eq!(sb.data_blocks as usize, SLOTS_PER_BLOCK);
        let sb = layout(2 + 1 + SLOTS_PER_BLOCK + 1).unwrap();
        assert_eq!(sb.fat_blocks, 2);
    }

    #[test]
    fn geometry_limits() {
        assert_eq!(layout(MIN_BLOCKS - 1), Err(FsError::InvalidGeometry));
        assert_eq!(layout(MAX_BLOCKS + 1), Err(FsError::InvalidGeometry));
        let sb = layout(MAX_BLOCKS).unwrap();
        assert_eq!(sb.validate(MAX_BLOCKS), Ok(()));
        assert!(sb.data_blocks < FAT_EOC);
        let sb = layout(MIN_BLOCKS).unwrap();
        assert_eq!(sb.data_blocks, 2);
    }

    #[test]
    fn formatted_image_mounts_empty() {
        let dev = MemDevice::new(40);
        let sb = format(&dev).unwrap();
        let block = dev.block(0);
        assert_eq!(&block[..8], b"ECS150FS");
        let fat = dev.block(1);
        assert_eq!(&fat[..4], &[0xff, 0xff, 0, 0]);

        let volume = Volume::mount(dev).unwrap();
        let info = volume.info();
        assert_eq!(info.data_blocks, sb.data_blocks);
        assert_eq!(info.free_data_blocks, sb.data_blocks - 1);
        assert!(volume.list().is_empty());
    }
}
