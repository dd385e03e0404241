#![no_std]

extern crate alloc;

pub mod block;
pub mod fat;
pub mod fdtable;
pub mod mkfs;
pub mod mount;
pub mod rootdir;
pub mod superblock;
pub mod volume;

#[cfg(test)]
mod testutil;

pub use block::{BlockDevice, BlockId, BlockStore, BLOCK_SIZE};
pub use ecsvfs::{DirEntry, Fd, FileName, FsError, FsResult, VolumeInfo};
pub use mount::Mount;
pub use volume::Volume;

#[cfg(test)]
extern crate std;
