//! Path resolution and file I/O: turning a `/`-separated path into an
//! inode, and reading, writing, and truncating the bytes an inode addresses.
//!
//! Writes that land in a block the inode has never addressed before start
//! from a zeroed buffer rather than whatever the bitmap-allocated block
//! happened to contain — the allocator itself never zeroes on allocate, so
//! this is the one place that has to, to keep the "unwritten region reads as
//! zero" guarantee true for bytes a write only partially covers.
use std::sync::Arc;

use bitflags::bitflags;

use crate::{
    block::{BLOCK_SIZE, BlockDevice},
    directory::DirectoryLayer,
    disk_layout::{FileType, RawInode},
    error::{EfsError, Result},
    inode::{InodeLayer, InodeNumber},
};

bitflags! {
    /// Flags accepted by [`FileLayer`]'s callers (the mount) when opening a
    /// path.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const CREATE = 0b0001;
        const EXCL   = 0b0010;
        const TRUNC  = 0b0100;
        const APPEND = 0b1000;
    }
}

/// `lseek`'s reference point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// Metadata returned by `stat`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stat {
    pub inode_number: InodeNumber,
    pub file_type: FileType,
    pub size: u64,
    pub nlinks: u32,
    /// Preferred I/O block size; always [`BLOCK_SIZE`].
    pub blksize: u64,
    /// Number of `blksize` blocks `size` occupies, rounded up.
    pub blocks: u64,
}

fn split_path(path: &str) -> Result<Vec<&str>> {
    let comps: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    if comps.is_empty() {
        return Err(EfsError::InvalidArg);
    }
    for comp in &comps {
        if comp.len() >= crate::disk_layout::FILENAME_MAX || *comp == "." || *comp == ".." {
            return Err(EfsError::InvalidArg);
        }
    }
    Ok(comps)
}

/// Resolves paths and performs byte-level I/O against inode contents.
pub struct FileLayer {
    device: Arc<dyn BlockDevice>,
    inodes: Arc<InodeLayer>,
    dirs: Arc<DirectoryLayer>,
}

impl FileLayer {
    pub fn new(device: Arc<dyn BlockDevice>, inodes: Arc<InodeLayer>, dirs: Arc<DirectoryLayer>) -> Self {
        Self {
            device,
            inodes,
            dirs,
        }
    }

    /// Resolves `path` (absolute, `/`-separated) to an existing inode and
    /// its type, starting from `root`.
    pub fn resolve(&self, root: InodeNumber, path: &str) -> Result<(InodeNumber, FileType)> {
        if path == "/" {
            return Ok((root, FileType::Directory));
        }
        let comps = split_path(path)?;
        let mut cur = root;
        let mut cur_type = FileType::Directory;
        for comp in comps {
            if cur_type != FileType::Directory {
                return Err(EfsError::NotDirectory);
            }
            let inode = self.inodes.read(cur)?;
            match self.dirs.lookup(&inode, comp)? {
                Some((next, ft)) => {
                    cur = next;
                    cur_type = ft;
                }
                None => return Err(EfsError::NotFound),
            }
        }
        Ok((cur, cur_type))
    }

    /// Resolves every component of `path` but the last, returning the
    /// containing directory's inode and the final component's name. The
    /// final component need not exist.
    pub fn resolve_parent(&self, root: InodeNumber, path: &str) -> Result<(InodeNumber, String)> {
        let mut comps = split_path(path)?;
        let last = comps.pop().expect("split_path never returns empty").to_string();
        let mut cur = root;
        for comp in &comps {
            let inode = self.inodes.read(cur)?;
            match self.dirs.lookup(&inode, comp)? {
                Some((next, FileType::Directory)) => cur = next,
                Some(_) => return Err(EfsError::NotDirectory),
                None => return Err(EfsError::NotFound),
            }
        }
        Ok((cur, last))
    }

    /// Reads up to `buf.len()` bytes starting at `pos`, zero-filling any
    /// portion that falls in a block the inode has never addressed.
    /// Returns the number of bytes read, truncated at end-of-file.
    pub fn read(&self, inode: &RawInode, pos: u64, buf: &mut [u8]) -> Result<usize> {
        if pos >= inode.size {
            return Ok(0);
        }
        let remaining = buf.len().min((inode.size - pos) as usize);
        let mut written = 0usize;
        while written < remaining {
            let abs = pos + written as u64;
            let fbn = abs / BLOCK_SIZE as u64;
            let off = (abs % BLOCK_SIZE as u64) as usize;
            let chunk_len = (BLOCK_SIZE - off).min(remaining - written);

            match self.inodes.get_block(inode, fbn)? {
                Some(blkno) => {
                    let block = self.device.get(blkno)?;
                    buf[written..written + chunk_len].copy_from_slice(&block[off..off + chunk_len]);
                }
                None => buf[written..written + chunk_len].fill(0),
            }
            written += chunk_len;
        }
        Ok(written)
    }

    /// Writes `buf` at `pos`, growing the inode (and allocating blocks) as
    /// needed. Partial-block writes read-modify-write an existing block, or
    /// start from a zeroed buffer for a block the inode has never addressed.
    pub fn write(
        &self,
        inum: InodeNumber,
        inode: &mut RawInode,
        pos: u64,
        buf: &[u8],
    ) -> Result<usize> {
        let mut written = 0usize;
        while written < buf.len() {
            let abs = pos + written as u64;
            let fbn = abs / BLOCK_SIZE as u64;
            let off = (abs % BLOCK_SIZE as u64) as usize;
            let chunk_len = (BLOCK_SIZE - off).min(buf.len() - written);

            let already_assigned = self.inodes.get_block(inode, fbn)?.is_some();
            let blkno = self.inodes.assign_block(inum, inode, fbn)?;
            let mut block = if already_assigned {
                self.device.get(blkno)?
            } else {
                vec![0u8; BLOCK_SIZE]
            };
            block[off..off + chunk_len].copy_from_slice(&buf[written..written + chunk_len]);
            self.device.put(blkno, &block)?;

            written += chunk_len;
        }
        let new_size = pos + written as u64;
        if new_size > inode.size {
            inode.size = new_size;
        }
        self.inodes.write(inum, inode)?;
        Ok(written)
    }

    /// Shrinks or extends the inode to exactly `new_len` bytes. Shrinking
    /// frees blocks beyond the new boundary; extending past the current
    /// size never allocates — the new range reads as zero until written.
    pub fn truncate(&self, inum: InodeNumber, inode: &mut RawInode, new_len: u64) -> Result<()> {
        let keep_blocks = new_len.div_ceil(BLOCK_SIZE as u64);
        self.inodes.truncate_blocks(inum, inode, keep_blocks)?;
        inode.size = new_len;
        self.inodes.write(inum, inode)
    }

    /// Computes the absolute position `lseek(whence, offset)` would produce
    /// from `current`/`size`, rejecting a negative result.
    pub fn seek(whence: Whence, offset: i64, current: u64, size: u64) -> Result<u64> {
        let base = match whence {
            Whence::Set => 0i64,
            Whence::Cur => current as i64,
            Whence::End => size as i64,
        };
        let target = base.checked_add(offset).ok_or(EfsError::InvalidArg)?;
        if target < 0 {
            return Err(EfsError::InvalidArg);
        }
        Ok(target as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bitmap::Bitmap, block::raw::RamDevice};

    fn setup() -> (FileLayer, Arc<InodeLayer>, InodeNumber, RawInode) {
        let total_blocks = 4096u64;
        let bitmap_blocks = crate::bitmap::bitmap_blocks_for(total_blocks);
        let device: Arc<dyn BlockDevice> = Arc::new(RamDevice::new(total_blocks, BLOCK_SIZE));
        let bitmap = Arc::new(Bitmap::new(device.clone(), 0, bitmap_blocks, total_blocks));
        for b in 0..bitmap_blocks {
            bitmap.mark_allocated(b).unwrap();
        }
        let inodes = Arc::new(InodeLayer::new(device.clone(), bitmap));
        let dirs = Arc::new(DirectoryLayer::new(device.clone(), inodes.clone()));
        let inum = inodes.allocate().unwrap();
        let inode = inodes.read(inum).unwrap();
        let files = FileLayer::new(device, inodes.clone(), dirs);
        (files, inodes, inum, inode)
    }

    #[test]
    fn write_then_read_round_trips() {
        let (files, _inodes, inum, mut inode) = setup();
        files.write(inum, &mut inode, 0, b"hello world").unwrap();
        let mut buf = [0u8; 11];
        assert_eq!(files.read(&inode, 0, &mut buf).unwrap(), 11);
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn read_past_eof_returns_zero_bytes() {
        let (files, _inodes, inum, mut inode) = setup();
        files.write(inum, &mut inode, 0, b"abc").unwrap();
        let mut buf = [0xFFu8; 4];
        assert_eq!(files.read(&inode, 3, &mut buf).unwrap(), 0);
    }

    #[test]
    fn sparse_gap_reads_as_zero() {
        let (files, _inodes, inum, mut inode) = setup();
        files.write(inum, &mut inode, 0, b"a").unwrap();
        files
            .write(inum, &mut inode, BLOCK_SIZE as u64 * 3, b"z")
            .unwrap();
        let mut buf = [0xAAu8; 8];
        let read = files
            .read(&inode, BLOCK_SIZE as u64, &mut buf)
            .unwrap();
        assert_eq!(read, 8);
        assert_eq!(buf, [0u8; 8]);
    }

    #[test]
    fn partial_block_write_preserves_rest_of_block() {
        let (files, _inodes, inum, mut inode) = setup();
        files.write(inum, &mut inode, 0, &[1u8; BLOCK_SIZE]).unwrap();
        files.write(inum, &mut inode, 10, &[9u8; 4]).unwrap();
        let mut buf = [0u8; BLOCK_SIZE];
        files.read(&inode, 0, &mut buf).unwrap();
        assert_eq!(buf[9], 1);
        assert_eq!(&buf[10..14], &[9u8; 4]);
        assert_eq!(buf[14], 1);
    }

    #[test]
    fn truncate_shrinks_size_and_frees_blocks() {
        let (files, inodes, inum, mut inode) = setup();
        files.write(inum, &mut inode, 0, &[1u8; BLOCK_SIZE * 2]).unwrap();
        files.truncate(inum, &mut inode, 5).unwrap();
        assert_eq!(inode.size, 5);
        assert!(inodes.get_block(&inode, 1).unwrap().is_none());
    }

    #[test]
    fn seek_variants() {
        assert_eq!(FileLayer::seek(Whence::Set, 5, 10, 100).unwrap(), 5);
        assert_eq!(FileLayer::seek(Whence::Cur, 5, 10, 100).unwrap(), 15);
        assert_eq!(FileLayer::seek(Whence::End, -10, 10, 100).unwrap(), 90);
        assert!(FileLayer::seek(Whence::Set, -1, 0, 0).is_err());
    }
}
