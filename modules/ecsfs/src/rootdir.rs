use alloc::vec;
use alloc::vec::Vec;

use ecsvfs::{DirEntry, FileName, FsError, FsResult, FILENAME_LEN, FILE_MAX_COUNT};

use crate::block::BLOCK_SIZE;
use crate::fat::FAT_EOC;
use crate::superblock::{read_u16, read_u32, write_u16, write_u32};

pub const DIR_ENTRY_SIZE: usize = 32;

const ENTRY_SIZE_OFFSET: usize = 0x10;
const ENTRY_FIRST_OFFSET: usize = 0x14;
const ENTRY_LAST_OFFSET: usize = 0x16;
const ENTRY_OPEN_OFFSET: usize = 0x18;
const ENTRY_STATUS_OFFSET: usize = 0x19;
const STATUS_WRITING: u8 = b'w';

const _: () = assert!(FILE_MAX_COUNT * DIR_ENTRY_SIZE <= BLOCK_SIZE);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteState {
    Idle,
    Writing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub name: FileName,
    pub size: u32,
    pub first_block: u16,
    pub last_block: u16,
    pub open_count: u8,
    pub write_state: WriteState,
}

impl FileEntry {
    fn empty(name: FileName) -> Self {
        Self {
            name,
            size: 0,
            first_block: FAT_EOC,
            last_block: FAT_EOC,
            open_count: 0,
            write_state: WriteState::Idle,
        }
    }

    fn decode(raw: &[u8]) -> FsResult<Option<Self>> {
        let mut name = [0u8; FILENAME_LEN];
        name.copy_from_slice(&raw[..FILENAME_LEN]);
        let Some(name) = FileName::from_raw(&name)? else {
            return Ok(None);
        };
        let write_state = if raw[ENTRY_STATUS_OFFSET] == STATUS_WRITING {
            WriteState::Writing
        } else {
            WriteState::Idle
        };
        Ok(Some(Self {
            name,
            size: read_u32(raw, ENTRY_SIZE_OFFSET),
            first_block: read_u16(raw, ENTRY_FIRST_OFFSET),
            last_block: read_u16(raw, ENTRY_LAST_OFFSET),
            open_count: raw[ENTRY_OPEN_OFFSET],
            write_state,
        }))
    }

    fn encode(&self, raw: &mut [u8]) {
        raw.fill(0);
        raw[..FILENAME_LEN].copy_from_slice(&self.name.to_raw());
        write_u32(raw, ENTRY_SIZE_OFFSET, self.size);
        write_u16(raw, ENTRY_FIRST_OFFSET, self.first_block);
        write_u16(raw, ENTRY_LAST_OFFSET, self.last_block);
        raw[ENTRY_OPEN_OFFSET] = self.open_count;
        if self.write_state == WriteState::Writing {
            raw[ENTRY_STATUS_OFFSET] = STATUS_WRITING;
        }
    }
}

pub struct RootDir {
    entries: Vec<Option<FileEntry>>,
}

impl RootDir {
    pub fn new() -> Self {
        Self {
            entries: vec![None; FILE_MAX_COUNT],
        }
    }

    pub fn decode(buf: &[u8]) -> FsResult<Self> {
        if buf.len() < FILE_MAX_COUNT * DIR_ENTRY_SIZE {
            return Err(FsError::CorruptVolume);
        }
        let mut dir = Self::new();
        for (slot, raw) in buf
            .chunks_exact(DIR_ENTRY_SIZE)
            .take(FILE_MAX_COUNT)
            .enumerate()
        {
            let entry = FileEntry::decode(raw)?;
            if let Some(entry) = &entry {
                if dir.find(&entry.name).is_ok() {
                    return Err(FsError::CorruptVolume);
                }
            }
            dir.entries[slot] = entry;
        }
        Ok(dir)
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[..BLOCK_SIZE].fill(0);
        for (slot, entry) in self.entries.iter().enumerate() {
            if let Some(entry) = entry {
                let offset = slot * DIR_ENTRY_SIZE;
                entry.encode(&mut buf[offset..offset + DIR_ENTRY_SIZE]);
            }
        }
    }

    pub fn used(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }

    pub fn find(&self, name: &FileName) -> FsResult<usize> {
        self.entries
            .iter()
            .position(|entry| matches!(entry, Some(entry) if entry.name == *name))
            .ok_or(FsError::NotFound)
    }

    pub fn create(&mut self, name: FileName) -> FsResult<usize> {
        if self.find(&name).is_ok() {
            return Err(FsError::NameExists);
        }
        let slot = self
            .entries
            .iter()
            .position(Option::is_none)
            .ok_or(FsError::DirectoryFull)?;
        self.entries[slot] = Some(FileEntry::empty(name));
        Ok(slot)
    }

    pub fn remove(&mut self, slot: usize) -> Option<FileEntry> {
        self.entries.get_mut(slot).and_then(Option::take)
    }

    pub fn get(&self, slot: usize) -> FsResult<&FileEntry> {
        self.entries
            .get(slot)
            .and_then(Option::as_ref)
            .ok_or(FsError::NotFound)
    }

    pub fn get_mut(&mut self, slot: usize) -> FsResult<&mut FileEntry> {
        self.entries
            .get_mut(slot)
            .and_then(Option::as_mut)
            .ok_or(FsError::NotFound)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FileEntry> {
        self.entries.iter_mut().flatten()
    }

    pub fn list(&self) -> Vec<DirEntry> {
        self.entries
            .iter()
            .flatten()
            .map(|entry| DirEntry {
                name: entry.name,
                size: entry.size,
                first_block: entry.first_block,
            })
            .collect()
    }
}
