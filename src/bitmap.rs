//! Block allocation bitmap.
//!
//! Bit `i` of the bitmap region is set exactly when block `i` is allocated.
//! The allocator never zeroes a freshly allocated block — callers that need
//! zeroed data (a new inode, a directory growing into a new block) do so
//! themselves, matching the layered responsibility split in [`crate::inode`]
//! and [`crate::directory`].
use std::sync::Arc;

use crate::{
    block::{BLOCK_SIZE, BlockDevice},
    error::{EfsError, Result},
};

const BITS_PER_BLOCK: u64 = BLOCK_SIZE as u64 * 8;

/// Number of whole bitmap blocks needed to track `total_blocks` blocks.
pub fn bitmap_blocks_for(total_blocks: u64) -> u64 {
    total_blocks.div_ceil(BITS_PER_BLOCK)
}

/// The block allocation bitmap, backed by `first_bitmap_block ..
/// first_bitmap_block + bitmap_blocks` on `device`.
pub struct Bitmap {
    device: Arc<dyn BlockDevice>,
    first_bitmap_block: u64,
    bitmap_blocks: u64,
    total_blocks: u64,
}

impl Bitmap {
    pub fn new(
        device: Arc<dyn BlockDevice>,
        first_bitmap_block: u64,
        bitmap_blocks: u64,
        total_blocks: u64,
    ) -> Self {
        Self {
            device,
            first_bitmap_block,
            bitmap_blocks,
            total_blocks,
        }
    }

    fn block_and_bit(&self, blkno: u64) -> (u64, usize) {
        (blkno / BITS_PER_BLOCK, (blkno % BITS_PER_BLOCK) as usize)
    }

    fn is_set(bitmap_block: &[u8], bit: usize) -> bool {
        bitmap_block[bit / 8] & (1 << (bit % 8)) != 0
    }

    fn set_bit(bitmap_block: &mut [u8], bit: usize) {
        bitmap_block[bit / 8] |= 1 << (bit % 8);
    }

    fn clear_bit(bitmap_block: &mut [u8], bit: usize) {
        bitmap_block[bit / 8] &= !(1 << (bit % 8));
    }

    /// Marks `blkno` allocated. Used at mkfs time to pre-set the bits
    /// covering the superblock, bitmap, and root inode.
    pub fn mark_allocated(&self, blkno: u64) -> Result<()> {
        let (bb, bit) = self.block_and_bit(blkno);
        let mut block = self.device.get(self.first_bitmap_block + bb)?;
        Self::set_bit(&mut block, bit);
        self.device.put(self.first_bitmap_block + bb, &block)
    }

    /// Scans for the first free block, starting the search from block 0,
    /// sets its bit, and returns it. Freshly allocated blocks are not
    /// zeroed.
    pub fn allocate(&self) -> Result<u64> {
        for bb in 0..self.bitmap_blocks {
            let mut block = self.device.get(self.first_bitmap_block + bb)?;
            let base = bb * BITS_PER_BLOCK;
            for bit in 0..BITS_PER_BLOCK as usize {
                let blkno = base + bit as u64;
                if blkno >= self.total_blocks {
                    break;
                }
                if !Self::is_set(&block, bit) {
                    Self::set_bit(&mut block, bit);
                    self.device.put(self.first_bitmap_block + bb, &block)?;
                    log::trace!("bitmap: allocated block {blkno}");
                    return Ok(blkno);
                }
            }
        }
        Err(EfsError::NoSpace)
    }

    /// Clears `blkno`'s bit, making it available for reuse.
    pub fn free(&self, blkno: u64) -> Result<()> {
        let (bb, bit) = self.block_and_bit(blkno);
        let mut block = self.device.get(self.first_bitmap_block + bb)?;
        Self::clear_bit(&mut block, bit);
        self.device.put(self.first_bitmap_block + bb, &block)?;
        log::trace!("bitmap: freed block {blkno}");
        Ok(())
    }

    /// Total number of blocks this bitmap tracks, allocated or not.
    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    /// Reports whether `blkno`'s bit is currently set.
    pub fn is_allocated(&self, blkno: u64) -> Result<bool> {
        let (bb, bit) = self.block_and_bit(blkno);
        let block = self.device.get(self.first_bitmap_block + bb)?;
        Ok(Self::is_set(&block, bit))
    }

    /// Counts set bits across the whole bitmap region, used by tests to
    /// assert that allocation/free pairs leave no leaks.
    pub fn popcount(&self) -> Result<u64> {
        let mut count = 0u64;
        for bb in 0..self.bitmap_blocks {
            let block = self.device.get(self.first_bitmap_block + bb)?;
            count += block.iter().map(|b| b.count_ones() as u64).sum::<u64>();
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::raw::RamDevice;

    fn setup(total_blocks: u64) -> Bitmap {
        let bb = bitmap_blocks_for(total_blocks);
        let device = Arc::new(RamDevice::new(bb + 4, BLOCK_SIZE));
        Bitmap::new(device, 0, bb, total_blocks)
    }

    #[test]
    fn allocates_ascending_first_fit() {
        let bmp = setup(4096);
        assert_eq!(bmp.allocate().unwrap(), 0);
        assert_eq!(bmp.allocate().unwrap(), 1);
        bmp.free(0).unwrap();
        assert_eq!(bmp.allocate().unwrap(), 0);
    }

    #[test]
    fn exhaustion_yields_no_space() {
        let bmp = setup(4);
        for _ in 0..4 {
            bmp.allocate().unwrap();
        }
        assert!(matches!(bmp.allocate(), Err(EfsError::NoSpace)));
    }

    #[test]
    fn popcount_tracks_allocations() {
        let bmp = setup(4096);
        assert_eq!(bmp.popcount().unwrap(), 0);
        let a = bmp.allocate().unwrap();
        let b = bmp.allocate().unwrap();
        assert_eq!(bmp.popcount().unwrap(), 2);
        bmp.free(a).unwrap();
        bmp.free(b).unwrap();
        assert_eq!(bmp.popcount().unwrap(), 0);
    }

    #[test]
    fn bitmap_blocks_for_rounds_up() {
        assert_eq!(bitmap_blocks_for(1), 1);
        assert_eq!(bitmap_blocks_for(BLOCK_SIZE as u64 * 8), 1);
        assert_eq!(bitmap_blocks_for(BLOCK_SIZE as u64 * 8 + 1), 2);
    }
}
