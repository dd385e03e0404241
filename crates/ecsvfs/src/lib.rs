#![no_std]

#[cfg(test)]
extern crate std;

// Interface shared by the engine and its drivers: capacities, error type and plain records.

use core::fmt;

use thiserror::Error;

/// Filename capacity in bytes, including the terminating NUL.
pub const FILENAME_LEN: usize = 16;
/// Number of slots in the root directory.
pub const FILE_MAX_COUNT: usize = 128;
/// Number of descriptors that can be open at once.
pub const OPEN_MAX_COUNT: usize = 32;

pub type Fd = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("no volume is mounted")]
    NotMounted,
    #[error("a volume is already mounted")]
    AlreadyMounted,
    #[error("volume metadata is corrupt")]
    CorruptVolume,
    #[error("block device i/o failed")]
    DeviceError,
    #[error("invalid filename")]
    InvalidName,
    #[error("a file with this name already exists")]
    NameExists,
    #[error("root directory is full")]
    DirectoryFull,
    #[error("no such file")]
    NotFound,
    #[error("file is busy")]
    FileBusy,
    #[error("invalid file descriptor")]
    InvalidDescriptor,
    #[error("too many open files")]
    TooManyOpenFiles,
    #[error("offset is beyond the end of the file")]
    OffsetOutOfRange,
    #[error("no free data blocks")]
    NoSpace,
    #[error("files are still open")]
    FilesStillOpen,
    #[error("device size cannot hold a volume")]
    InvalidGeometry,
}

pub type FsResult<T> = core::result::Result<T, FsError>;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileName {
    bytes: [u8; FILENAME_LEN],
    len: u8,
}

impl FileName {
    pub fn new(name: &str) -> FsResult<Self> {
        Self::from_bytes(name.as_bytes())
    }

    pub fn from_bytes(name: &[u8]) -> FsResult<Self> {
        if name.is_empty() || name.len() >= FILENAME_LEN || name.contains(&0) {
            return Err(FsError::InvalidName);
        }
        let mut bytes = [0u8; FILENAME_LEN];
        bytes[..name.len()].copy_from_slice(name);
        Ok(Self {
            bytes,
            len: name.len() as u8,
        })
    }

    /// Parses a NUL-terminated on-disk name. `Ok(None)` marks an empty slot.
    pub fn from_raw(raw: &[u8; FILENAME_LEN]) -> FsResult<Option<Self>> {
        if raw[0] == 0 {
            return Ok(None);
        }
        let len = raw.iter().position(|b| *b == 0).ok_or(FsError::CorruptVolume)?;
        Self::from_bytes(&raw[..len]).map(Some)
    }

    pub fn to_raw(&self) -> [u8; FILENAME_LEN] {
        self.bytes
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.as_bytes() {
            let ch = if byte.is_ascii_graphic() || *byte == b' ' {
                *byte as char
            } else {
                '?'
            };
            fmt::Write::write_char(f, ch)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

/// One line of a directory listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: FileName,
    pub size: u32,
    pub first_block: u16,
}

impl fmt::Display for DirEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "file: {}, size: {}, data_blk: {}",
            self.name, self.size, self.first_block
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeInfo {
    pub total_blocks: u16,
    pub fat_blocks: u8,
    pub root_dir_block: u16,
    pub data_start: u16,
    pub data_blocks: u16,
    pub free_data_blocks: u16,
    pub free_dir_entries: usize,
}

impl fmt::Display for VolumeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "FS Info:")?;
        writeln!(f, "total_blk_count={}", self.total_blocks)?;
        writeln!(f, "fat_blk_count={}", self.fat_blocks)?;
        writeln!(f, "rdir_blk={}", self.root_dir_block)?;
        writeln!(f, "data_blk={}", self.data_start)?;
        writeln!(f, "data_blk_count={}", self.data_blocks)?;
        writeln!(
            f,
            "fat_free_ratio={}/{}",
            self.free_data_blocks, self.data_blocks
        )?;
        write!(
            f,
            "rdir_free_ratio={}/{}",
            self.free_dir_entries, FILE_MAX_COUNT
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::format;

    #[test]
    fn filename_bounds() {
        assert_eq!(FileName::new(""), Err(FsError::InvalidName));
        assert_eq!(FileName::new("0123456789abcdef"), Err(FsError::InvalidName));
        assert_eq!(FileName::new("a\0b"), Err(FsError::InvalidName));
        let name = FileName::new("0123456789abcde").unwrap();
        assert_eq!(name.len(), FILENAME_LEN - 1);
        assert_eq!(name.to_raw()[FILENAME_LEN - 1], 0);
    }

    #[test]
    fn filename_raw_parse() {
        let mut raw = [0u8; FILENAME_LEN];
        assert_eq!(FileName::from_raw(&raw), Ok(None));
        raw[..5].copy_from_slice(b"hello");
        let name = FileName::from_raw(&raw).unwrap().unwrap();
        assert_eq!(name.as_bytes(), b"hello");
        let unterminated = [b'x'; FILENAME_LEN];
        assert_eq!(FileName::from_raw(&unterminated), Err(FsError::CorruptVolume));
    }

    #[test]
    fn listing_format() {
        let entry = DirEntry {
            name: FileName::new("notes.txt").unwrap(),
            size: 42,
            first_block: 3,
        };
        assert_eq!(format!("{}", entry), "file: notes.txt, size: 42, data_blk: 3");
    }

    #[test]
    fn info_report() {
        let info = VolumeInfo {
            total_blocks: 8198,
            fat_blocks: 4,
            root_dir_block: 5,
            data_start: 6,
            data_blocks: 8192,
            free_data_blocks: 8191,
            free_dir_entries: 128,
        };
        let text = format!("{}", info);
        assert!(text.starts_with("FS Info:\ntotal_blk_count=8198\n"));
        assert!(text.contains("fat_free_ratio=8191/8192"));
        assert!(text.ends_with("rdir_free_ratio=128/128"));
    }
}
