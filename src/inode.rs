//! Inode indexing: mapping a file-relative block number to a block on the
//! underlying device.
//!
//! An inode's first `DIRECT_BLOCKS` data blocks are addressed directly from
//! its own `direct_blocks` array. A file that outgrows those does not use
//! indirect blocks; instead the inode's `next_inode` field points at another
//! on-disk [`RawInode`] — an "extension inode" — whose own `direct_blocks`
//! array continues the same flat index space, and whose own `next_inode` may
//! chain to a further extension. Growth only ever appends a new extension at
//! the end of the chain; nothing is ever inserted in the middle.
//!
//! Inode numbers and data block numbers are drawn from the same bitmap-
//! allocated pool: an inode *is* a block, distinguished only by the magic
//! stamped in [`RawInode::zeroed_with_magic`].
use std::sync::Arc;

use bytemuck::{bytes_of, from_bytes};

use crate::{
    bitmap::Bitmap,
    block::BlockDevice,
    disk_layout::{DIRECT_BLOCKS, INODE_MAGIC, RawInode},
    error::{EfsError, Result},
};

/// Identifies an inode by the block number it occupies.
pub type InodeNumber = u32;

/// Reads, writes, grows, and frees inodes over a block device and the
/// bitmap that owns it.
pub struct InodeLayer {
    device: Arc<dyn BlockDevice>,
    bitmap: Arc<Bitmap>,
}

impl InodeLayer {
    pub fn new(device: Arc<dyn BlockDevice>, bitmap: Arc<Bitmap>) -> Self {
        Self { device, bitmap }
    }

    /// The bitmap this layer allocates inode and data blocks from.
    pub fn bitmap(&self) -> &Arc<Bitmap> {
        &self.bitmap
    }

    /// Reads the inode (head or extension) at `inum`, failing if its magic
    /// does not identify it as a live inode block.
    pub fn read(&self, inum: InodeNumber) -> Result<RawInode> {
        let block = self.device.get(inum as u64)?;
        let inode: &RawInode = from_bytes(&block);
        if inode.magic != INODE_MAGIC {
            return Err(EfsError::Corrupt("inode block has bad magic"));
        }
        Ok(*inode)
    }

    pub fn write(&self, inum: InodeNumber, inode: &RawInode) -> Result<()> {
        self.device.put(inum as u64, bytes_of(inode))
    }

    /// Allocates a fresh, zeroed inode block and returns its number.
    pub fn allocate(&self) -> Result<InodeNumber> {
        let blkno = self.bitmap.allocate()?;
        let inode = RawInode::zeroed_with_magic();
        self.write(blkno as u32, &inode)?;
        Ok(blkno as u32)
    }

    /// Resolves file-relative block `fbn` to a device block number, or
    /// `None` if that slot has never been assigned.
    pub fn get_block(&self, inode: &RawInode, fbn: u64) -> Result<Option<u64>> {
        if (fbn as usize) < DIRECT_BLOCKS {
            let b = inode.direct_blocks[fbn as usize];
            return Ok((b != 0).then_some(b as u64));
        }
        let mut remaining = fbn - DIRECT_BLOCKS as u64;
        let mut cur = inode.next_inode;
        while cur != 0 {
            let ext = self.read(cur)?;
            if (remaining as usize) < DIRECT_BLOCKS {
                let b = ext.direct_blocks[remaining as usize];
                return Ok((b != 0).then_some(b as u64));
            }
            remaining -= DIRECT_BLOCKS as u64;
            cur = ext.next_inode;
        }
        Ok(None)
    }

    /// Ensures file-relative block `fbn` is backed by a data block,
    /// allocating one (and, if needed, appending extension inodes to reach
    /// it) and returns its number. A no-op that returns the existing block
    /// if `fbn` is already assigned. Persists `inode` and any extension
    /// inodes it touches; the caller is not responsible for writing `inode`
    /// back afterwards.
    pub fn assign_block(
        &self,
        head_inum: InodeNumber,
        inode: &mut RawInode,
        fbn: u64,
    ) -> Result<u64> {
        if let Some(existing) = self.get_block(inode, fbn)? {
            return Ok(existing);
        }
        let new_block = self.bitmap.allocate()?;

        if (fbn as usize) < DIRECT_BLOCKS {
            inode.direct_blocks[fbn as usize] = new_block as u32;
            self.write(head_inum, inode)?;
            return Ok(new_block);
        }

        let mut remaining = fbn - DIRECT_BLOCKS as u64;
        if inode.next_inode == 0 {
            inode.next_inode = self.allocate()?;
            self.write(head_inum, inode)?;
        }
        let mut owner = inode.next_inode;
        loop {
            let mut ext = self.read(owner)?;
            if (remaining as usize) < DIRECT_BLOCKS {
                ext.direct_blocks[remaining as usize] = new_block as u32;
                self.write(owner, &ext)?;
                return Ok(new_block);
            }
            remaining -= DIRECT_BLOCKS as u64;
            if ext.next_inode == 0 {
                ext.next_inode = self.allocate()?;
                self.write(owner, &ext)?;
            }
            owner = ext.next_inode;
        }
    }

    /// Frees every block reachable from `inum` (inclusive): its data
    /// blocks and the rest of the extension chain.
    fn free_chain(&self, mut cur: InodeNumber) -> Result<()> {
        while cur != 0 {
            let ext = self.read(cur)?;
            for &b in ext.direct_blocks.iter() {
                if b != 0 {
                    self.bitmap.free(b as u64)?;
                }
            }
            let next = ext.next_inode;
            self.bitmap.free(cur as u64)?;
            cur = next;
        }
        Ok(())
    }

    /// Shrinks `inode` to exactly `keep_blocks` file-relative blocks,
    /// freeing everything beyond that boundary, including now-empty
    /// extension inodes.
    pub fn truncate_blocks(
        &self,
        head_inum: InodeNumber,
        inode: &mut RawInode,
        keep_blocks: u64,
    ) -> Result<()> {
        for i in (keep_blocks.min(DIRECT_BLOCKS as u64) as usize)..DIRECT_BLOCKS {
            let b = inode.direct_blocks[i];
            if b != 0 {
                self.bitmap.free(b as u64)?;
                inode.direct_blocks[i] = 0;
            }
        }

        if keep_blocks <= DIRECT_BLOCKS as u64 {
            let head_ext = inode.next_inode;
            inode.next_inode = 0;
            self.free_chain(head_ext)?;
        } else {
            let mut remaining_keep = keep_blocks - DIRECT_BLOCKS as u64;
            let mut cur = inode.next_inode;
            while cur != 0 {
                let mut ext = self.read(cur)?;
                if remaining_keep >= DIRECT_BLOCKS as u64 {
                    remaining_keep -= DIRECT_BLOCKS as u64;
                    cur = ext.next_inode;
                    continue;
                }
                for i in (remaining_keep as usize)..DIRECT_BLOCKS {
                    let b = ext.direct_blocks[i];
                    if b != 0 {
                        self.bitmap.free(b as u64)?;
                        ext.direct_blocks[i] = 0;
                    }
                }
                let tail = ext.next_inode;
                ext.next_inode = 0;
                self.write(cur, &ext)?;
                self.free_chain(tail)?;
                break;
            }
        }
        self.write(head_inum, inode)
    }

    /// Frees every block owned by `inode` — its data blocks, its extension
    /// chain, and the head inode block itself.
    pub fn release_inode(&self, head_inum: InodeNumber, inode: &RawInode) -> Result<()> {
        for &b in inode.direct_blocks.iter() {
            if b != 0 {
                self.bitmap.free(b as u64)?;
            }
        }
        self.free_chain(inode.next_inode)?;
        self.bitmap.free(head_inum as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::raw::RamDevice;

    fn setup(total_blocks: u64) -> (InodeLayer, Arc<Bitmap>) {
        let bitmap_blocks = crate::bitmap::bitmap_blocks_for(total_blocks);
        let device: Arc<dyn BlockDevice> = Arc::new(RamDevice::new(total_blocks, 512));
        let bitmap = Arc::new(Bitmap::new(device.clone(), 0, bitmap_blocks, total_blocks));
        for b in 0..bitmap_blocks {
            bitmap.mark_allocated(b).unwrap();
        }
        (InodeLayer::new(device, bitmap.clone()), bitmap)
    }

    #[test]
    fn direct_blocks_round_trip() {
        let (layer, _bitmap) = setup(256);
        let head = layer.allocate().unwrap();
        let mut inode = layer.read(head).unwrap();
        let b0 = layer.assign_block(head, &mut inode, 0).unwrap();
        let b5 = layer.assign_block(head, &mut inode, 5).unwrap();
        assert_ne!(b0, b5);
        assert_eq!(layer.get_block(&inode, 0).unwrap(), Some(b0));
        assert_eq!(layer.get_block(&inode, 5).unwrap(), Some(b5));
        assert_eq!(layer.get_block(&inode, 1).unwrap(), None);
    }

    #[test]
    fn growth_past_direct_blocks_chains_extension_inodes() {
        let (layer, _bitmap) = setup(4096);
        let head = layer.allocate().unwrap();
        let mut inode = layer.read(head).unwrap();
        let target = DIRECT_BLOCKS as u64 + 10;
        let assigned = layer.assign_block(head, &mut inode, target).unwrap();
        assert_eq!(layer.get_block(&inode, target).unwrap(), Some(assigned));
        assert_ne!(inode.next_inode, 0);
    }

    #[test]
    fn truncate_frees_blocks_beyond_boundary() {
        let (layer, bitmap) = setup(4096);
        let head = layer.allocate().unwrap();
        let mut inode = layer.read(head).unwrap();
        for fbn in 0..(DIRECT_BLOCKS as u64 + 20) {
            layer.assign_block(head, &mut inode, fbn).unwrap();
        }
        let before = bitmap.popcount().unwrap();
        layer.truncate_blocks(head, &mut inode, 3).unwrap();
        let after = bitmap.popcount().unwrap();
        assert!(after < before);
        assert_eq!(layer.get_block(&inode, 3).unwrap(), None);
        assert_eq!(inode.next_inode, 0);
        assert!(layer.get_block(&inode, 0).unwrap().is_some());
    }

    #[test]
    fn release_inode_frees_everything() {
        let (layer, bitmap) = setup(4096);
        let baseline = bitmap.popcount().unwrap();
        let head = layer.allocate().unwrap();
        let mut inode = layer.read(head).unwrap();
        for fbn in 0..(DIRECT_BLOCKS as u64 + 5) {
            layer.assign_block(head, &mut inode, fbn).unwrap();
        }
        assert!(bitmap.popcount().unwrap() > baseline);
        layer.release_inode(head, &inode).unwrap();
        assert_eq!(bitmap.popcount().unwrap(), baseline);
    }
}
