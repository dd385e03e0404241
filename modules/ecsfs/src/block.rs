use core::cell::Cell;

use ecsvfs::{FsError, FsResult};

pub type BlockId = u64;

pub const BLOCK_SIZE: usize = 4096;

pub trait BlockDevice {
    fn block_size(&self) -> usize;
    fn block_count(&self) -> usize;
    fn read_block(&self, block_id: BlockId, buf: &mut [u8]) -> FsResult<()>;
    fn write_block(&self, block_id: BlockId, buf: &[u8]) -> FsResult<()>;
    fn flush(&self) -> FsResult<()>;
}

/// Opens block devices by name.
pub trait BlockStore {
    type Device: BlockDevice;

    fn open(&self, name: &str) -> FsResult<Self::Device>;
}

pub struct BlockCache<D: BlockDevice> {
    device: D,
    block_count: usize,
    reads: Cell<u64>,
    writes: Cell<u64>,
}

impl<D: BlockDevice> BlockCache<D> {
    pub fn new(device: D) -> FsResult<Self> {
        if device.block_size() != BLOCK_SIZE {
            return Err(FsError::DeviceError);
        }
        let block_count = device.block_count();
        Ok(Self {
            device,
            block_count,
            reads: Cell::new(0),
            writes: Cell::new(0),
        })
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    pub fn reads(&self) -> u64 {
        self.reads.get()
    }

    pub fn writes(&self) -> u64 {
        self.writes.get()
    }

    pub fn read_block(&self, block_id: BlockId, buf: &mut [u8]) -> FsResult<()> {
        if buf.len() < BLOCK_SIZE || block_id as usize >= self.block_count {
            return Err(FsError::DeviceError);
        }
        self.device
            .read_block(block_id, &mut buf[..BLOCK_SIZE])
            .map_err(|_| FsError::DeviceError)?;
        self.reads.set(self.reads.get() + 1);
        Ok(())
    }

    pub fn write_block(&self, block_id: BlockId, buf: &[u8]) -> FsResult<()> {
        if buf.len() < BLOCK_SIZE || block_id as usize >= self.block_count {
            return Err(FsError::DeviceError);
        }
        self.device
            .write_block(block_id, &buf[..BLOCK_SIZE])
            .map_err(|_| FsError::DeviceError)?;
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }

    pub fn flush(&self) -> FsResult<()> {
        self.device.flush().map_err(|_| FsError::DeviceError)
    }
}
