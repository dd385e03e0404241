use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use ecsvfs::{FsError, FsResult};

use crate::block::{BlockDevice, BlockId, BlockStore, BLOCK_SIZE};
use crate::mkfs;

/// RAM-backed device. Clones share the same image.
#[derive(Clone)]
pub struct MemDevice {
    data: Rc<RefCell<Vec<u8>>>,
    write_budget: Rc<Cell<Option<usize>>>,
    read_budget: Rc<Cell<Option<usize>>>,
}

impl MemDevice {
    pub fn new(blocks: usize) -> Self {
        Self {
            data: Rc::new(RefCell::new(vec![0u8; blocks * BLOCK_SIZE])),
            write_budget: Rc::new(Cell::new(None)),
            read_budget: Rc::new(Cell::new(None)),
        }
    }

    pub fn formatted(blocks: usize) -> Self {
        let dev = Self::new(blocks);
        mkfs::format(&dev).unwrap();
        dev
    }

    /// Lets `count` more writes succeed, then fails every write.
    pub fn fail_writes_after(&self, count: usize) {
        self.write_budget.set(Some(count));
    }

    pub fn fail_reads_after(&self, count: usize) {
        self.read_budget.set(Some(count));
    }

    pub fn heal(&self) {
        self.write_budget.set(None);
        self.read_budget.set(None);
    }

    pub fn block(&self, block_id: usize) -> Vec<u8> {
        let data = self.data.borrow();
        data[block_id * BLOCK_SIZE..(block_id + 1) * BLOCK_SIZE].to_vec()
    }

    pub fn patch(&self, offset: usize, bytes: &[u8]) {
        let mut data = self.data.borrow_mut();
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

fn take_budget(budget: &Cell<Option<usize>>) -> FsResult<()> {
    match budget.get() {
        Some(0) => Err(FsError::DeviceError),
        Some(left) => {
            budget.set(Some(left - 1));
            Ok(())
        }
        None => Ok(()),
    }
}

impl BlockDevice for MemDevice {
    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn block_count(&self) -> usize {
        self.data.borrow().len() / BLOCK_SIZE
    }

    fn read_block(&self, block_id: BlockId, buf: &mut [u8]) -> FsResult<()> {
        take_budget(&self.read_budget)?;
        let offset = block_id as usize * BLOCK_SIZE;
        let data = self.data.borrow();
        if offset + BLOCK_SIZE > data.len() {
            return Err(FsError::DeviceError);
        }
        buf[..BLOCK_SIZE].copy_from_slice(&data[offset..offset + BLOCK_SIZE]);
        Ok(())
    }

    fn write_block(&self, block_id: BlockId, buf: &[u8]) -> FsResult<()> {
        take_budget(&self.write_budget)?;
        let offset = block_id as usize * BLOCK_SIZE;
        let mut data = self.data.borrow_mut();
        if offset + BLOCK_SIZE > data.len() {
            return Err(FsError::DeviceError);
        }
        data[offset..offset + BLOCK_SIZE].copy_from_slice(&buf[..BLOCK_SIZE]);
        Ok(())
    }

    fn flush(&self) -> FsResult<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemStore {
    devices: RefCell<BTreeMap<String, MemDevice>>,
}

impl MemStore {
    pub fn with(name: &str, device: MemDevice) -> Self {
        let store = Self::default();
        store.devices.borrow_mut().insert(name.to_string(), device);
        store
    }
}

impl BlockStore for MemStore {
    type Device = MemDevice;

    fn open(&self, name: &str) -> FsResult<MemDevice> {
        self.devices
            .borrow()
            .get(name)
            .cloned()
            .ok_or(FsError::DeviceError)
    }
}
