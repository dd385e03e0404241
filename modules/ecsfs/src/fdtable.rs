use alloc::vec;
use alloc::vec::Vec;

use ecsvfs::{Fd, FsError, FsResult, OPEN_MAX_COUNT};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenFile {
    /// Root directory slot of the file.
    pub slot: usize,
    pub offset: usize,
}

pub struct FdTable {
    files: Vec<Option<OpenFile>>,
    open: usize,
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            files: vec![None; OPEN_MAX_COUNT],
            open: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.open
    }

    pub fn is_empty(&self) -> bool {
        self.open == 0
    }

    /// Takes the lowest free descriptor.
    pub fn open(&mut self, slot: usize) -> FsResult<Fd> {
        let fd = self
            .files
            .iter()
            .position(Option::is_none)
            .ok_or(FsError::TooManyOpenFiles)?;
        self.files[fd] = Some(OpenFile { slot, offset: 0 });
        self.open += 1;
        Ok(fd)
    }

    pub fn close(&mut self, fd: Fd) -> FsResult<OpenFile> {
        let file = self
            .files
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(FsError::InvalidDescriptor)?;
        self.open -= 1;
        Ok(file)
    }

    pub fn get(&self, fd: Fd) -> FsResult<OpenFile> {
        self.files
            .get(fd)
            .copied()
            .flatten()
            .ok_or(FsError::InvalidDescriptor)
    }

    pub fn get_mut(&mut self, fd: Fd) -> FsResult<&mut OpenFile> {
        self.files
            .get_mut(fd)
            .and_then(Option::as_mut)
            .ok_or(FsError::InvalidDescriptor)
    }
}
