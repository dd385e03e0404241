//! File allocation table.
//!
//! One `u16` slot per data block. A slot holds the index of the next block in
//! its chain, `FAT_EOC` on the last block, or `FAT_FREE`. Slot 0 is reserved
//! and never handed out, so a link to 0 inside a chain is corruption.

use alloc::vec;
use alloc::vec::Vec;

use ecsvfs::{FsError, FsResult};

use crate::block::BLOCK_SIZE;

pub const FAT_EOC: u16 = 0xffff;
pub const FAT_FREE: u16 = 0;
pub const FAT_ENTRY_SIZE: usize = 2;
pub const SLOTS_PER_BLOCK: usize = BLOCK_SIZE / FAT_ENTRY_SIZE;

pub struct Fat {
    slots: Vec<u16>,
    used: usize,
}

impl Fat {
    /// Fresh table with only the reserved slot in use.
    pub fn new(data_blocks: usize) -> Self {
        let mut slots = vec![FAT_FREE; data_blocks];
        if let Some(first) = slots.first_mut() {
            *first = FAT_EOC;
        }
        Self {
            slots,
            used: data_blocks.min(1),
        }
    }

    /// Loads slots from the raw FAT region. The used count is only valid after
    /// `rebuild`.
    pub fn decode(raw: &[u8], data_blocks: usize) -> FsResult<Self> {
        if raw.len() < data_blocks * FAT_ENTRY_SIZE {
            return Err(FsError::CorruptVolume);
        }
        let slots = raw
            .chunks_exact(FAT_ENTRY_SIZE)
            .take(data_blocks)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self {
            slots,
            used: data_blocks.min(1),
        })
    }

    /// Serializes FAT block `index` of the region into `buf`.
    pub fn encode_block(&self, index: usize, buf: &mut [u8]) {
        buf[..BLOCK_SIZE].fill(0);
        let start = index * SLOTS_PER_BLOCK;
        if start >= self.slots.len() {
            return;
        }
        let end = core::cmp::min(self.slots.len(), start + SLOTS_PER_BLOCK);
        for (pos, value) in self.slots[start..end].iter().enumerate() {
            let offset = pos * FAT_ENTRY_SIZE;
            buf[offset..offset + FAT_ENTRY_SIZE].copy_from_slice(&value.to_le_bytes());
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn free(&self) -> usize {
        self.capacity().saturating_sub(self.used)
    }

    pub fn get(&self, slot: u16) -> FsResult<u16> {
        self.slots
            .get(slot as usize)
            .copied()
            .ok_or(FsError::CorruptVolume)
    }

    fn check_link(&self, slot: u16) -> FsResult<usize> {
        let index = slot as usize;
        if index == 0 || index >= self.slots.len() {
            return Err(FsError::CorruptVolume);
        }
        Ok(index)
    }

    /// Successor of `slot`, `None` at end of chain.
    pub fn next(&self, slot: u16) -> FsResult<Option<u16>> {
        self.check_link(slot)?;
        match self.get(slot)? {
            FAT_EOC => Ok(None),
            FAT_FREE => Err(FsError::CorruptVolume),
            next => {
                self.check_link(next)?;
                Ok(Some(next))
            }
        }
    }

    /// Block `n` links past `head`, `None` if the chain is shorter.
    pub fn nth(&self, head: u16, n: usize) -> FsResult<Option<u16>> {
        if head == FAT_EOC {
            return Ok(None);
        }
        self.check_link(head)?;
        if n >= self.slots.len() {
            return Ok(None);
        }
        let mut current = head;
        for _ in 0..n {
            match self.next(current)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Walks the chain and returns `(length, tail)`. Bounded by capacity.
    pub fn walk(&self, head: u16) -> FsResult<(usize, u16)> {
        if head == FAT_EOC {
            return Ok((0, FAT_EOC));
        }
        self.check_link(head)?;
        let mut current = head;
        let mut len = 1usize;
        while let Some(next) = self.next(current)? {
            len += 1;
            if len >= self.slots.len() {
                return Err(FsError::CorruptVolume);
            }
            current = next;
        }
        Ok((len, current))
    }

    pub fn chain_len(&self, head: u16) -> FsResult<usize> {
        self.walk(head).map(|(len, _)| len)
    }

    /// Recomputes the used count from the chains that files own. Slots that no
    /// chain reaches are returned to the free pool; the count of such slots is
    /// returned. Cycles and cross-linked chains are corruption.
    pub fn rebuild(&mut self, heads: &[u16]) -> FsResult<usize> {
        let mut owned = vec![false; self.slots.len()];
        if let Some(reserved) = owned.first_mut() {
            *reserved = true;
        }
        for &head in heads {
            if head == FAT_EOC {
                continue;
            }
            let mut current = Some(head);
            while let Some(slot) = current {
                let index = self.check_link(slot)?;
                if owned[index] {
                    return Err(FsError::CorruptVolume);
                }
                owned[index] = true;
                current = self.next(slot)?;
            }
        }
        let mut reclaimed = 0usize;
        for (slot, is_owned) in self.slots.iter_mut().zip(owned.iter()).skip(1) {
            if !is_owned && *slot != FAT_FREE {
                *slot = FAT_FREE;
                reclaimed += 1;
            }
        }
        self.used = owned.iter().filter(|is_owned| **is_owned).count();
        Ok(reclaimed)
    }

    /// First-fit search from slot 1. The slot is reserved as a one-block chain.
    pub fn allocate_one(&mut self) -> FsResult<u16> {
        if self.used >= self.slots.len() {
            return Err(FsError::NoSpace);
        }
        let index = self
            .slots
            .iter()
            .skip(1)
            .position(|slot| *slot == FAT_FREE)
            .map(|pos| pos + 1)
            .ok_or(FsError::NoSpace)?;
        self.slots[index] = FAT_EOC;
        self.used += 1;
        Ok(index as u16)
    }

    /// Returns a reserved slot to the free pool.
    pub fn release(&mut self, slot: u16) -> FsResult<()> {
        let index = self.check_link(slot)?;
        if self.slots[index] != FAT_FREE {
            self.slots[index] = FAT_FREE;
            self.used -= 1;
        }
        Ok(())
    }

    pub fn link(&mut self, prev: u16, next: u16) -> FsResult<()> {
        let index = self.check_link(prev)?;
        self.check_link(next)?;
        self.slots[index] = next;
        Ok(())
    }

    pub fn terminate(&mut self, slot: u16) -> FsResult<()> {
        let index = self.check_link(slot)?;
        self.slots[index] = FAT_EOC;
        Ok(())
    }

    /// Frees every block from `head` to the end of its chain.
    pub fn free_chain(&mut self, head: u16) -> FsResult<usize> {
        if head == FAT_EOC {
            return Ok(0);
        }
        // Nothing is released unless the whole chain is sound.
        self.walk(head)?;
        let mut current = self.check_link(head)?;
        let mut freed = 0usize;
        loop {
            let next = self.slots[current];
            self.slots[current] = FAT_FREE;
            self.used = self.used.saturating_sub(1);
            freed += 1;
            if next == FAT_EOC {
                return Ok(freed);
            }
            current = self.check_link(next)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_skips_reserved_slot() {
        let mut fat = Fat::new(4);
        assert_eq!(fat.used(), 1);
        assert_eq!(fat.allocate_one(), Ok(1));
        assert_eq!(fat.allocate_one(), Ok(2));
        assert_eq!(fat.allocate_one(), Ok(3));
        assert_eq!(fat.allocate_one(), Err(FsError::NoSpace));
        assert_eq!(fat.free(), 0);
    }

    #[test]
    fn first_fit_reuses_freed_slot() {
        let mut fat = Fat::new(8);
        let a = fat.allocate_one().unwrap();
        let b = fat.allocate_one().unwrap();
        fat.link(a, b).unwrap();
        let c = fat.allocate_one().unwrap();
        assert_eq!(fat.free_chain(a), Ok(2));
        assert_eq!(fat.get(c), Ok(FAT_EOC));
        assert_eq!(fat.allocate_one(), Ok(a));
        assert_eq!(fat.used(), 3);
    }

    #[test]
    fn chain_walks() {
        let mut fat = Fat::new(8);
        let blocks: Vec<u16> = (0..3).map(|_| fat.allocate_one().unwrap()).collect();
        fat.link(blocks[0], blocks[1]).unwrap();
        fat.link(blocks[1], blocks[2]).unwrap();
        assert_eq!(fat.walk(blocks[0]), Ok((3, blocks[2])));
        assert_eq!(fat.nth(blocks[0], 2), Ok(Some(blocks[2])));
        assert_eq!(fat.nth(blocks[0], 3), Ok(None));
        assert_eq!(fat.nth(FAT_EOC, 0), Ok(None));
        assert_eq!(fat.chain_len(FAT_EOC), Ok(0));
    }

    #[test]
    fn free_empty_chain_is_noop() {
        let mut fat = Fat::new(4);
        assert_eq!(fat.free_chain(FAT_EOC), Ok(0));
        assert_eq!(fat.used(), 1);
    }

    #[test]
    fn cyclic_chain_is_corrupt() {
        let mut fat = Fat::new(4);
        let a = fat.allocate_one().unwrap();
        let b = fat.allocate_one().unwrap();
        fat.link(a, b).unwrap();
        fat.link(b, a).unwrap();
        assert_eq!(fat.walk(a), Err(FsError::CorruptVolume));
        assert_eq!(fat.free_chain(a), Err(FsError::CorruptVolume));
    }

    #[test]
    fn broken_chain_frees_nothing() {
        let mut fat = Fat::new(8);
        let a = fat.allocate_one().unwrap();
        let b = fat.allocate_one().unwrap();
        let c = fat.allocate_one().unwrap();
        fat.link(a, b).unwrap();
        fat.link(b, c).unwrap();
        fat.release(c).unwrap();
        let used = fat.used();
        assert_eq!(fat.free_chain(a), Err(FsError::CorruptVolume));
        assert_eq!(fat.used(), used);
        assert_eq!(fat.get(a), Ok(b));
        assert_eq!(fat.get(b), Ok(c));
    }

    #[test]
    fn links_to_reserved_or_out_of_range_are_corrupt() {
        let mut raw = [0u8; BLOCK_SIZE];
        raw[2..4].copy_from_slice(&0u16.to_le_bytes());
        raw[4..6].copy_from_slice(&9u16.to_le_bytes());
        let fat = Fat::decode(&raw, 4).unwrap();
        assert_eq!(fat.next(1), Err(FsError::CorruptVolume));
        assert_eq!(fat.next(2), Err(FsError::CorruptVolume));
        assert_eq!(fat.get(7), Err(FsError::CorruptVolume));
    }

    #[test]
    fn rebuild_counts_owned_chains_and_reclaims_leaks() {
        let mut fat = Fat::new(8);
        let a = fat.allocate_one().unwrap();
        let b = fat.allocate_one().unwrap();
        fat.link(a, b).unwrap();
        let leaked = fat.allocate_one().unwrap();
        let c = fat.allocate_one().unwrap();
        assert_eq!(fat.rebuild(&[a, FAT_EOC, c]), Ok(1));
        assert_eq!(fat.used(), 4);
        assert_eq!(fat.get(leaked), Ok(FAT_FREE));
        assert_eq!(fat.allocate_one(), Ok(leaked));
    }

    #[test]
    fn rebuild_rejects_cross_links() {
        let mut fat = Fat::new(8);
        let a = fat.allocate_one().unwrap();
        let b = fat.allocate_one().unwrap();
        let c = fat.allocate_one().unwrap();
        fat.link(a, c).unwrap();
        fat.link(b, c).unwrap();
        assert_eq!(fat.rebuild(&[a, b]), Err(FsError::CorruptVolume));
    }

    #[test]
    fn encode_decode_region() {
        let mut fat = Fat::new(SLOTS_PER_BLOCK + 3);
        let a = fat.allocate_one().unwrap();
        fat.link(a, (SLOTS_PER_BLOCK + 1) as u16).unwrap();
        let mut raw = vec![0u8; 2 * BLOCK_SIZE];
        fat.encode_block(0, &mut raw[..BLOCK_SIZE]);
        fat.encode_block(1, &mut raw[BLOCK_SIZE..]);
        let loaded = Fat::decode(&raw, SLOTS_PER_BLOCK + 3).unwrap();
        assert_eq!(loaded.get(0), Ok(FAT_EOC));
        assert_eq!(loaded.get(a), Ok((SLOTS_PER_BLOCK + 1) as u16));
        assert_eq!(loaded.capacity(), SLOTS_PER_BLOCK + 3);
    }
}
