//! Directory contents: a directory's data blocks hold a flat array of
//! fixed-width [`DirEntry`] slots with holes.
//!
//! Removing an entry zeroes its slot in place; nothing is compacted, and a
//! later [`DirectoryLayer::add_entry`] reuses the first empty slot it finds
//! before appending a new block. Every directory is created with exactly two
//! live entries, `.` and `..`; [`DirectoryLayer::is_empty`] is true only when
//! those are the only entries left, which is what `rmdir` requires.
use std::sync::Arc;

use bytemuck::{cast_slice, cast_slice_mut};

use crate::{
    block::{BLOCK_SIZE, BlockDevice},
    disk_layout::{DirEntry, DIRENT_SIZE, FileType},
    error::{EfsError, Result},
    inode::{InodeLayer, InodeNumber},
};

const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / DIRENT_SIZE;

/// Operations over a directory's data blocks, built on top of [`InodeLayer`]
/// for block allocation and [`BlockDevice`] for the raw reads/writes.
pub struct DirectoryLayer {
    device: Arc<dyn BlockDevice>,
    inodes: Arc<InodeLayer>,
}

impl DirectoryLayer {
    pub fn new(device: Arc<dyn BlockDevice>, inodes: Arc<InodeLayer>) -> Self {
        Self { device, inodes }
    }

    fn block_count(inode: &crate::disk_layout::RawInode) -> u64 {
        inode.size.div_ceil(BLOCK_SIZE as u64)
    }

    fn read_data_block(
        &self,
        inode: &crate::disk_layout::RawInode,
        fbn: u64,
    ) -> Result<[DirEntry; ENTRIES_PER_BLOCK]> {
        let blkno = self
            .inodes
            .get_block(inode, fbn)?
            .ok_or(EfsError::Corrupt("directory block not allocated"))?;
        let raw = self.device.get(blkno)?;
        let mut entries = [DirEntry::empty(); ENTRIES_PER_BLOCK];
        entries.copy_from_slice(cast_slice(&raw));
        Ok(entries)
    }

    fn write_data_block(
        &self,
        dir_inum: InodeNumber,
        inode: &mut crate::disk_layout::RawInode,
        fbn: u64,
        entries: &[DirEntry; ENTRIES_PER_BLOCK],
    ) -> Result<()> {
        let blkno = self.inodes.assign_block(dir_inum, inode, fbn)?;
        let mut raw = vec![0u8; BLOCK_SIZE];
        cast_slice_mut(&mut raw).copy_from_slice(entries);
        self.device.put(blkno, &raw)
    }

    /// Initializes a freshly allocated inode as an empty directory whose
    /// `.` and `..` both resolve as given, growing `inode`'s size to one
    /// block.
    pub fn init_empty(
        &self,
        dir_inum: InodeNumber,
        inode: &mut crate::disk_layout::RawInode,
        parent_inum: InodeNumber,
    ) -> Result<()> {
        let mut entries = [DirEntry::empty(); ENTRIES_PER_BLOCK];
        entries[0] = DirEntry::new(dir_inum, ".", FileType::Directory)?;
        entries[1] = DirEntry::new(parent_inum, "..", FileType::Directory)?;
        self.write_data_block(dir_inum, inode, 0, &entries)?;
        inode.size = BLOCK_SIZE as u64;
        self.inodes.write(dir_inum, inode)
    }

    /// Looks up `name` among `inode`'s entries, returning its inode number
    /// and type if present.
    pub fn lookup(
        &self,
        inode: &crate::disk_layout::RawInode,
        name: &str,
    ) -> Result<Option<(InodeNumber, FileType)>> {
        for fbn in 0..Self::block_count(inode) {
            let entries = self.read_data_block(inode, fbn)?;
            for entry in entries.iter() {
                if !entry.is_empty() && entry.name_str() == name {
                    return Ok(Some((entry.inode_number, entry.file_type()?)));
                }
            }
        }
        Ok(None)
    }

    /// Lists every live (non-hole) entry, including `.` and `..`.
    pub fn readdir(
        &self,
        inode: &crate::disk_layout::RawInode,
    ) -> Result<Vec<(String, InodeNumber, FileType)>> {
        let mut out = Vec::new();
        for fbn in 0..Self::block_count(inode) {
            let entries = self.read_data_block(inode, fbn)?;
            for entry in entries.iter() {
                if entry.is_empty() {
                    continue;
                }
                out.push((
                    entry.name_str().to_string(),
                    entry.inode_number,
                    entry.file_type()?,
                ));
            }
        }
        Ok(out)
    }

    /// Adds `name -> child_inum` to the directory, reusing the first empty
    /// slot before growing the directory by one block. Fails with
    /// [`EfsError::Exists`] if `name` is already present.
    pub fn add_entry(
        &self,
        dir_inum: InodeNumber,
        inode: &mut crate::disk_layout::RawInode,
        name: &str,
        child_inum: InodeNumber,
        file_type: FileType,
    ) -> Result<()> {
        if self.lookup(inode, name)?.is_some() {
            return Err(EfsError::Exists);
        }
        let new_entry = DirEntry::new(child_inum, name, file_type)?;

        let block_count = Self::block_count(inode);
        for fbn in 0..block_count {
            let mut entries = self.read_data_block(inode, fbn)?;
            if let Some(slot) = entries.iter_mut().find(|e| e.is_empty()) {
                *slot = new_entry;
                return self.write_data_block(dir_inum, inode, fbn, &entries);
            }
        }

        let mut entries = [DirEntry::empty(); ENTRIES_PER_BLOCK];
        entries[0] = new_entry;
        self.write_data_block(dir_inum, inode, block_count, &entries)?;
        inode.size += BLOCK_SIZE as u64;
        self.inodes.write(dir_inum, inode)
    }

    /// Zeroes the slot holding `name`. The slot is left as a hole; no other
    /// entry moves. Fails with [`EfsError::NotFound`] if `name` is absent.
    pub fn remove_entry(
        &self,
        dir_inum: InodeNumber,
        inode: &mut crate::disk_layout::RawInode,
        name: &str,
    ) -> Result<()> {
        for fbn in 0..Self::block_count(inode) {
            let mut entries = self.read_data_block(inode, fbn)?;
            if let Some(slot) = entries
                .iter_mut()
                .find(|e| !e.is_empty() && e.name_str() == name)
            {
                *slot = DirEntry::empty();
                return self.write_data_block(dir_inum, inode, fbn, &entries);
            }
        }
        Err(EfsError::NotFound)
    }

    /// True if `.` and `..` are the only live entries.
    pub fn is_empty(&self, inode: &crate::disk_layout::RawInode) -> Result<bool> {
        let mut live = 0usize;
        for fbn in 0..Self::block_count(inode) {
            let entries = self.read_data_block(inode, fbn)?;
            live += entries.iter().filter(|e| !e.is_empty()).count();
        }
        Ok(live <= 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bitmap::Bitmap, block::raw::RamDevice, disk_layout::RawInode};

    fn setup() -> (DirectoryLayer, Arc<InodeLayer>, InodeNumber, RawInode) {
        let total_blocks = 4096u64;
        let bitmap_blocks = crate::bitmap::bitmap_blocks_for(total_blocks);
        let device: Arc<dyn BlockDevice> = Arc::new(RamDevice::new(total_blocks, BLOCK_SIZE));
        let bitmap = Arc::new(Bitmap::new(device.clone(), 0, bitmap_blocks, total_blocks));
        for b in 0..bitmap_blocks {
            bitmap.mark_allocated(b).unwrap();
        }
        let inodes = Arc::new(InodeLayer::new(device.clone(), bitmap));
        let dir_inum = inodes.allocate().unwrap();
        let mut inode = inodes.read(dir_inum).unwrap();
        let dirs = DirectoryLayer::new(device, inodes.clone());
        dirs.init_empty(dir_inum, &mut inode, dir_inum).unwrap();
        (dirs, inodes, dir_inum, inode)
    }

    #[test]
    fn fresh_directory_has_dot_and_dotdot_only() {
        let (dirs, _inodes, _dir_inum, inode) = setup();
        assert!(dirs.is_empty(&inode).unwrap());
        let mut names: Vec<_> = dirs
            .readdir(&inode)
            .unwrap()
            .into_iter()
            .map(|(n, ..)| n)
            .collect();
        names.sort();
        assert_eq!(names, vec![".".to_string(), "..".to_string()]);
    }

    #[test]
    fn add_lookup_remove_round_trip() {
        let (dirs, _inodes, dir_inum, mut inode) = setup();
        dirs.add_entry(dir_inum, &mut inode, "a.txt", 42, FileType::RegularFile)
            .unwrap();
        assert_eq!(
            dirs.lookup(&inode, "a.txt").unwrap(),
            Some((42, FileType::RegularFile))
        );
        assert!(!dirs.is_empty(&inode).unwrap());
        dirs.remove_entry(dir_inum, &mut inode, "a.txt").unwrap();
        assert_eq!(dirs.lookup(&inode, "a.txt").unwrap(), None);
        assert!(dirs.is_empty(&inode).unwrap());
    }

    #[test]
    fn add_rejects_duplicate_name() {
        let (dirs, _inodes, dir_inum, mut inode) = setup();
        dirs.add_entry(dir_inum, &mut inode, "dup", 7, FileType::RegularFile)
            .unwrap();
        assert!(matches!(
            dirs.add_entry(dir_inum, &mut inode, "dup", 8, FileType::RegularFile),
            Err(EfsError::Exists)
        ));
    }

    #[test]
    fn add_reuses_holes_before_growing() {
        let (dirs, _inodes, dir_inum, mut inode) = setup();
        // Fill the remaining two slots of the first block (beyond . and ..).
        dirs.add_entry(dir_inum, &mut inode, "one", 10, FileType::RegularFile)
            .unwrap();
        dirs.add_entry(dir_inum, &mut inode, "two", 11, FileType::RegularFile)
            .unwrap();
        assert_eq!(inode.size, BLOCK_SIZE as u64);
        dirs.remove_entry(dir_inum, &mut inode, "one").unwrap();
        dirs.add_entry(dir_inum, &mut inode, "three", 12, FileType::RegularFile)
            .unwrap();
        assert_eq!(inode.size, BLOCK_SIZE as u64, "hole reused, no growth");
    }

    #[test]
    fn add_grows_directory_past_one_block() {
        let (dirs, _inodes, dir_inum, mut inode) = setup();
        for i in 0..ENTRIES_PER_BLOCK {
            let name = format!("f{i}");
            dirs.add_entry(dir_inum, &mut inode, &name, 100 + i as u32, FileType::RegularFile)
                .unwrap();
        }
        assert!(inode.size > BLOCK_SIZE as u64);
    }
}
