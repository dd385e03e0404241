//! A mounted volume: metadata held in memory, file data on the device.
//!
//! Metadata changes are written back (superblock, root directory, then FAT)
//! at the end of every mutating call, so a crash loses at most the call that
//! was in flight.

use alloc::vec;
use alloc::vec::Vec;
use core::cmp::{max, min};

use ecsvfs::{DirEntry, Fd, FileName, FsError, FsResult, VolumeInfo, FILE_MAX_COUNT};
use log::{debug, info, warn};

use crate::block::{BlockCache, BlockDevice, BlockId, BLOCK_SIZE};
use crate::fat::{Fat, FAT_EOC};
use crate::fdtable::FdTable;
use crate::rootdir::{FileEntry, RootDir, WriteState};
use crate::superblock::Superblock;

pub struct Volume<D: BlockDevice> {
    cache: BlockCache<D>,
    sb: Superblock,
    fat: Fat,
    root: RootDir,
    fds: FdTable,
}

impl<D: BlockDevice> Volume<D> {
    pub fn mount(device: D) -> FsResult<Self> {
        let cache = BlockCache::new(device)?;
        let mut block = vec![0u8; BLOCK_SIZE];
        cache.read_block(0, &mut block)?;
        let sb = Superblock::decode(&block)?;
        if let Err(err) = sb.validate(cache.block_count()) {
            warn!(
                "ecsfs: bad geometry total={} device={} fat={} data={}",
                sb.total_blocks,
                cache.block_count(),
                sb.fat_blocks,
                sb.data_blocks
            );
            return Err(err);
        }

        cache.read_block(sb.root_dir_block as BlockId, &mut block)?;
        let mut root = RootDir::decode(&block)?;

        let mut raw = vec![0u8; sb.fat_blocks as usize * BLOCK_SIZE];
        for (chunk, block_id) in raw.chunks_exact_mut(BLOCK_SIZE).zip(sb.fat_region()) {
            cache.read_block(block_id, chunk)?;
        }
        let mut fat = Fat::decode(&raw, sb.data_blocks as usize)?;

        let mut heads = Vec::with_capacity(FILE_MAX_COUNT);
        for entry in root.iter_mut() {
            repair_entry(&mut fat, entry)?;
            heads.push(entry.first_block);
        }
        let reclaimed = fat.rebuild(&heads)?;
        if reclaimed > 0 {
            warn!("ecsfs: reclaimed {} unreferenced data blocks", reclaimed);
        }
        if sb.blocks_used as usize != fat.used() || sb.entries_used as usize != root.used() {
            debug!(
                "ecsfs: usage counters {}/{} recomputed as {}/{}",
                sb.blocks_used,
                sb.entries_used,
                fat.used(),
                root.used()
            );
        }

        let mut volume = Self {
            cache,
            sb,
            fat,
            root,
            fds: FdTable::new(),
        };
        volume.persist_metadata()?;
        info!(
            "ecsfs: mounted {} blocks, {} data blocks, {} files",
            volume.sb.total_blocks,
            volume.sb.data_blocks,
            volume.root.used()
        );
        Ok(volume)
    }

    /// Writes back metadata and flushes the device.
    pub fn sync(&mut self) -> FsResult<()> {
        self.persist_metadata()?;
        self.cache.flush()?;
        debug!(
            "ecsfs: synced after {} block reads, {} block writes",
            self.cache.reads(),
            self.cache.writes()
        );
        Ok(())
    }

    pub fn open_files(&self) -> usize {
        self.fds.len()
    }

    pub fn info(&self) -> VolumeInfo {
        VolumeInfo {
            total_blocks: self.sb.total_blocks,
            fat_blocks: self.sb.fat_blocks,
            root_dir_block: self.sb.root_dir_block,
            data_start: self.sb.data_start,
            data_blocks: self.sb.data_blocks,
            free_data_blocks: self.fat.free() as u16,
            free_dir_entries: FILE_MAX_COUNT - self.root.used(),
        }
    }

    pub fn create(&mut self, name: &str) -> FsResult<()> {
        let name = FileName::new(name)?;
        let slot = self.root.create(name)?;
        debug!("ecsfs: create {} in slot {}", name, slot);
        self.persist_metadata()
    }

    pub fn delete(&mut self, name: &str) -> FsResult<()> {
        let name = FileName::new(name)?;
        let slot = self.root.find(&name)?;
        let entry = *self.root.get(slot)?;
        if entry.open_count > 0 || entry.write_state == WriteState::Writing {
            return Err(FsError::FileBusy);
        }
        let freed = self.fat.free_chain(entry.first_block)?;
        self.root.remove(slot);
        debug!("ecsfs: delete {}, {} blocks freed", name, freed);
        self.persist_metadata()
    }

    pub fn list(&self) -> Vec<DirEntry> {
        self.root.list()
    }

    pub fn open(&mut self, name: &str) -> FsResult<Fd> {
        let name = FileName::new(name)?;
        let slot = self.root.find(&name)?;
        let fd = self.fds.open(slot)?;
        let entry = self.root.get_mut(slot)?;
        entry.open_count = entry.open_count.saturating_add(1);
        Ok(fd)
    }

    pub fn close(&mut self, fd: Fd) -> FsResult<()> {
        let file = self.fds.close(fd)?;
        let entry = self.root.get_mut(file.slot)?;
        entry.open_count = entry.open_count.saturating_sub(1);
        Ok(())
    }

    pub fn stat(&self, fd: Fd) -> FsResult<usize> {
        let file = self.fds.get(fd)?;
        Ok(self.root.get(file.slot)?.size as usize)
    }

    pub fn seek(&mut self, fd: Fd, offset: usize) -> FsResult<()> {
        let size = self.stat(fd)?;
        if offset > size {
            return Err(FsError::OffsetOutOfRange);
        }
        self.fds.get_mut(fd)?.offset = offset;
        Ok(())
    }

    /// Copies from the cursor into `buf` and advances the cursor. Returns 0 at
    /// end of file.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> FsResult<usize> {
        let file = self.fds.get(fd)?;
        let entry = *self.root.get(file.slot)?;
        let len = min(buf.len(), (entry.size as usize).saturating_sub(file.offset));
        if len == 0 {
            return Ok(0);
        }
        let mut block = self
            .resolve_block(&entry, file.offset / BLOCK_SIZE)?
            .ok_or(FsError::CorruptVolume)?;
        let mut bounce = vec![0u8; BLOCK_SIZE];
        let mut in_block = file.offset % BLOCK_SIZE;
        let mut copied = 0usize;
        loop {
            let chunk = min(len - copied, BLOCK_SIZE - in_block);
            let block_id = self.data_block_id(block);
            if in_block == 0 && chunk == BLOCK_SIZE {
                self.cache.read_block(block_id, &mut buf[copied..copied + BLOCK_SIZE])?;
            } else {
                self.cache.read_block(block_id, &mut bounce)?;
                buf[copied..copied + chunk].copy_from_slice(&bounce[in_block..in_block + chunk]);
            }
            copied += chunk;
            in_block = 0;
            if copied == len {
                break;
            }
            block = self.fat.next(block)?.ok_or(FsError::CorruptVolume)?;
        }
        self.fds.get_mut(fd)?.offset += copied;
        Ok(copied)
    }

    /// Writes `data` at the cursor, extending the file as needed. The cursor
    /// does not move. A short count means the volume ran out of data blocks.
    pub fn write(&mut self, fd: Fd, data: &[u8]) -> FsResult<usize> {
        let file = self.fds.get(fd)?;
        let entry = self.root.get_mut(file.slot)?;
        if entry.write_state == WriteState::Writing {
            return Err(FsError::FileBusy);
        }
        if data.is_empty() {
            return Ok(0);
        }
        if file.offset > entry.size as usize {
            return Err(FsError::OffsetOutOfRange);
        }
        entry.write_state = WriteState::Writing;

        let result = self.write_at(file.slot, file.offset, data);

        if let Ok(entry) = self.root.get_mut(file.slot) {
            entry.write_state = WriteState::Idle;
        }
        let written = result?;
        self.persist_metadata()?;
        Ok(written)
    }

    fn write_at(&mut self, slot: usize, offset: usize, data: &[u8]) -> FsResult<usize> {
        let entry = *self.root.get(slot)?;
        let mut pending = Vec::with_capacity(data.len() / BLOCK_SIZE + 1);
        match self.fill_blocks(&entry, offset, data, &mut pending) {
            Ok(written) => {
                self.commit(slot, offset + written, &pending)?;
                if written < data.len() {
                    debug!(
                        "ecsfs: short write {}/{} on {}, volume full",
                        written,
                        data.len(),
                        entry.name
                    );
                }
                Ok(written)
            }
            Err(err) => {
                for block in pending {
                    if let Err(release_err) = self.fat.release(block) {
                        warn!("ecsfs: cannot release block {}: {}", block, release_err);
                    }
                }
                warn!("ecsfs: write to {} failed: {}", entry.name, err);
                Err(err)
            }
        }
    }

    /// Copies `data` into existing blocks of the file and then into freshly
    /// reserved ones, which are collected in `pending` but not yet linked.
    fn fill_blocks(
        &mut self,
        entry: &FileEntry,
        offset: usize,
        data: &[u8],
        pending: &mut Vec<u16>,
    ) -> FsResult<usize> {
        let mut current = self.resolve_block(entry, offset / BLOCK_SIZE)?;
        let mut bounce = vec![0u8; BLOCK_SIZE];
        let mut in_block = offset % BLOCK_SIZE;
        let mut written = 0usize;
        while written < data.len() {
            let (block, fresh) = match current {
                Some(block) => (block, false),
                None => {
                    let Ok(block) = self.fat.allocate_one() else {
                        break;
                    };
                    pending.push(block);
                    (block, true)
                }
            };
            let chunk = min(data.len() - written, BLOCK_SIZE - in_block);
            self.write_chunk(
                block,
                fresh,
                in_block,
                &data[written..written + chunk],
                &mut bounce,
            )?;
            written += chunk;
            in_block = 0;
            current = if fresh { None } else { self.fat.next(block)? };
        }
        Ok(written)
    }

    fn write_chunk(
        &self,
        block: u16,
        fresh: bool,
        in_block: usize,
        chunk: &[u8],
        bounce: &mut [u8],
    ) -> FsResult<()> {
        let block_id = self.data_block_id(block);
        if in_block == 0 && chunk.len() == BLOCK_SIZE {
            return self.cache.write_block(block_id, chunk);
        }
        if fresh {
            bounce.fill(0);
        } else {
            self.cache.read_block(block_id, bounce)?;
        }
        bounce[in_block..in_block + chunk.len()].copy_from_slice(chunk);
        self.cache.write_block(block_id, bounce)
    }

    /// Links pending blocks onto the chain and grows the recorded size.
    fn commit(&mut self, slot: usize, end: usize, pending: &[u16]) -> FsResult<()> {
        let entry = self.root.get_mut(slot)?;
        if let (Some(&head), Some(&tail)) = (pending.first(), pending.last()) {
            if entry.first_block == FAT_EOC {
                entry.first_block = head;
            } else {
                self.fat.link(entry.last_block, head)?;
            }
            for pair in pending.windows(2) {
                self.fat.link(pair[0], pair[1])?;
            }
            self.fat.terminate(tail)?;
            entry.last_block = tail;
        }
        entry.size = max(entry.size as usize, end) as u32;
        Ok(())
    }

    /// Data block holding byte `ordinal * BLOCK_SIZE` of the file, `None` past
    /// the blocks the file owns.
    fn resolve_block(&self, entry: &FileEntry, ordinal: usize) -> FsResult<Option<u16>> {
        let blocks = (entry.size as usize).div_ceil(BLOCK_SIZE);
        if ordinal >= blocks {
            return Ok(None);
        }
        if ordinal + 1 == blocks {
            return Ok(Some(entry.last_block));
        }
        self.fat
            .nth(entry.first_block, ordinal)?
            .map(Some)
            .ok_or(FsError::CorruptVolume)
    }

    fn data_block_id(&self, block: u16) -> BlockId {
        self.sb.data_start as BlockId + block as BlockId
    }

    fn persist_metadata(&mut self) -> FsResult<()> {
        self.sb.blocks_used = self.fat.used() as u16;
        self.sb.entries_used = self.root.used() as u16;
        let mut block = vec![0u8; BLOCK_SIZE];
        self.sb.encode(&mut block);
        self.cache.write_block(0, &block)?;
        self.root.encode(&mut block);
        self.cache.write_block(self.sb.root_dir_block as BlockId, &block)?;
        for (index, block_id) in self.sb.fat_region().enumerate() {
            self.fat.encode_block(index, &mut block);
            self.cache.write_block(block_id, &block)?;
        }
        Ok(())
    }
}

/// Brings a directory entry loaded from disk back to a consistent state: no
/// holders, no write in flight, exactly as many blocks as its size needs, and
/// a tail pointer that matches the chain.
fn repair_entry(fat: &mut Fat, entry: &mut FileEntry) -> FsResult<()> {
    if entry.open_count != 0 || entry.write_state != WriteState::Idle {
        warn!("ecsfs: {} was left open, clearing", entry.name);
        entry.open_count = 0;
        entry.write_state = WriteState::Idle;
    }
    let needed = (entry.size as usize).div_ceil(BLOCK_SIZE);
    let (len, tail) = fat.walk(entry.first_block)?;
    if len < needed {
        warn!(
            "ecsfs: {} has {} bytes but only {} blocks",
            entry.name, entry.size, len
        );
        return Err(FsError::CorruptVolume);
    }
    if len > needed {
        warn!(
            "ecsfs: trimming {} from {} to {} blocks",
            entry.name, len, needed
        );
        if needed == 0 {
            entry.first_block = FAT_EOC;
            entry.last_block = FAT_EOC;
        } else {
            let new_tail = fat
                .nth(entry.first_block, needed - 1)?
                .ok_or(FsError::CorruptVolume)?;
            fat.terminate(new_tail)?;
            entry.last_block = new_tail;
        }
        return Ok(());
    }
    if entry.last_block != tail {
        warn!("ecsfs: {} tail pointer repaired", entry.name);
        entry.last_block = tail;
    }
    Ok(())
}
