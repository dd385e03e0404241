//! Disk images on the host filesystem.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use ecsfs::{BlockDevice, BlockId, BlockStore, FsError, FsResult, BLOCK_SIZE};
use log::{debug, warn};

pub struct FileDevice {
    file: RefCell<File>,
    blocks: usize,
}

impl FileDevice {
    /// Opens an existing image. Its length must be a whole number of blocks.
    pub fn open(path: &Path) -> FsResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| io_error(path, err))?;
        let len = file
            .metadata()
            .map_err(|err| io_error(path, err))?
            .len();
        if len % BLOCK_SIZE as u64 != 0 {
            warn!("{}: {} bytes is not a whole number of blocks", path.display(), len);
            return Err(FsError::DeviceError);
        }
        debug!("{}: {} blocks", path.display(), len / BLOCK_SIZE as u64);
        Ok(Self {
            file: RefCell::new(file),
            blocks: (len / BLOCK_SIZE as u64) as usize,
        })
    }

    /// Creates or truncates an image of `blocks` zeroed blocks.
    pub fn create(path: &Path, blocks: usize) -> FsResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|err| io_error(path, err))?;
        file.set_len((blocks * BLOCK_SIZE) as u64)
            .map_err(|err| io_error(path, err))?;
        Ok(Self {
            file: RefCell::new(file),
            blocks,
        })
    }

    fn seek_to(file: &mut File, block_id: BlockId) -> FsResult<()> {
        file.seek(SeekFrom::Start(block_id * BLOCK_SIZE as u64))
            .map(|_| ())
            .map_err(device_error)
    }
}

fn io_error(path: &Path, err: io::Error) -> FsError {
    warn!("{}: {}", path.display(), err);
    FsError::DeviceError
}

fn device_error(err: io::Error) -> FsError {
    warn!("disk image: {}", err);
    FsError::DeviceError
}

impl BlockDevice for FileDevice {
    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn block_count(&self) -> usize {
        self.blocks
    }

    fn read_block(&self, block_id: BlockId, buf: &mut [u8]) -> FsResult<()> {
        let mut file = self.file.borrow_mut();
        Self::seek_to(&mut file, block_id)?;
        file.read_exact(&mut buf[..BLOCK_SIZE]).map_err(device_error)
    }

    fn write_block(&self, block_id: BlockId, buf: &[u8]) -> FsResult<()> {
        let mut file = self.file.borrow_mut();
        Self::seek_to(&mut file, block_id)?;
        file.write_all(&buf[..BLOCK_SIZE]).map_err(device_error)
    }

    fn flush(&self) -> FsResult<()> {
        let mut file = self.file.borrow_mut();
        file.flush().map_err(device_error)?;
        file.sync_data().map_err(device_error)
    }
}

/// Resolves volume names as host paths.
pub struct FileStore;

impl BlockStore for FileStore {
    type Device = FileDevice;

    fn open(&self, name: &str) -> FsResult<FileDevice> {
        FileDevice::open(Path::new(name))
    }
}
