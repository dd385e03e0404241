use alloc::vec::Vec;

use ecsvfs::{DirEntry, Fd, FsError, FsResult, VolumeInfo};
use log::{info, warn};

use crate::block::BlockStore;
use crate::volume::Volume;

/// Holds at most one mounted volume opened from `store`. Every file operation
/// fails with `NotMounted` while nothing is mounted.
pub struct Mount<S: BlockStore> {
    store: S,
    volume: Option<Volume<S::Device>>,
}

impl<S: BlockStore> Mount<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            volume: None,
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.volume.is_some()
    }

    pub fn mount(&mut self, name: &str) -> FsResult<()> {
        if self.volume.is_some() {
            return Err(FsError::AlreadyMounted);
        }
        let device = self.store.open(name).map_err(|err| {
            warn!("ecsfs: cannot open {}: {}", name, err);
            FsError::DeviceError
        })?;
        self.volume = Some(Volume::mount(device)?);
        Ok(())
    }

    /// Writes back metadata and releases the device. On failure the volume
    /// stays mounted.
    pub fn unmount(&mut self) -> FsResult<()> {
        let volume = self.volume.as_mut().ok_or(FsError::NotMounted)?;
        if volume.open_files() > 0 {
            return Err(FsError::FilesStillOpen);
        }
        volume.sync()?;
        self.volume = None;
        info!("ecsfs: unmounted");
        Ok(())
    }

    pub fn info(&self) -> FsResult<VolumeInfo> {
        Ok(self.volume()?.info())
    }

    pub fn create(&mut self, name: &str) -> FsResult<()> {
        self.volume_mut()?.create(name)
    }

    pub fn delete(&mut self, name: &str) -> FsResult<()> {
        self.volume_mut()?.delete(name)
    }

    pub fn list(&self) -> FsResult<Vec<DirEntry>> {
        Ok(self.volume()?.list())
    }

    pub fn open(&mut self, name: &str) -> FsResult<Fd> {
        self.volume_mut()?.open(name)
    }

    pub fn close(&mut self, fd: Fd) -> FsResult<()> {
        self.volume_mut()?.close(fd)
    }

    pub fn stat(&self, fd: Fd) -> FsResult<usize> {
        self.volume()?.stat(fd)
    }

    pub fn seek(&mut self, fd: Fd, offset: usize) -> FsResult<()> {
        self.volume_mut()?.seek(fd, offset)
    }

    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> FsResult<usize> {
        self.volume_mut()?.read(fd, buf)
    }

    pub fn write(&mut self, fd: Fd, data: &[u8]) -> FsResult<usize> {
        self.volume_mut()?.write(fd, data)
    }

    fn volume(&self) -> FsResult<&Volume<S::Device>> {
        self.volume.as_ref().ok_or(FsError::NotMounted)
    }

    fn volume_mut(&mut self) -> FsResult<&mut Volume<S::Device>> {
        self.volume.as_mut().ok_or(FsError::NotMounted)
    }
}
