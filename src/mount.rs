//! The mount object: formats or opens a volume over a [`BlockDevice`] stack
//! and dispatches the filesystem's POSIX-like operations against it.
//!
//! A mount owns exactly one instance each of the bitmap, inode, directory,
//! and file layers, all sharing the same underlying device. It is not safe
//! to share across threads that might run concurrent mutating calls — see
//! the crate-level docs.
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use bytemuck::{bytes_of, from_bytes};

use crate::{
    bitmap::{Bitmap, bitmap_blocks_for},
    block::BlockDevice,
    directory::DirectoryLayer,
    disk_layout::{
        DEFAULT_DIR_PERM, DEFAULT_FILE_PERM, FileType, MODE_DIR, MODE_REG, SUPERBLOCK_MAGIC,
        SuperBlock,
    },
    error::{EfsError, Result},
    file::{FileLayer, OpenFlags, Stat, Whence},
    inode::{InodeLayer, InodeNumber},
};

/// A file or directory handle returned by `open`/`opendir`.
pub type Fd = u64;

struct OpenHandle {
    inum: InodeNumber,
    position: u64,
    flags: OpenFlags,
}

/// A formatted or freshly-initialized volume, ready to serve filesystem
/// operations.
pub struct Mount {
    device: Arc<dyn BlockDevice>,
    inodes: Arc<InodeLayer>,
    dirs: Arc<DirectoryLayer>,
    files: Arc<FileLayer>,
    root_inum: InodeNumber,
    handles: Mutex<HashMap<Fd, OpenHandle>>,
    next_fd: AtomicU64,
    open_refs: Mutex<HashMap<InodeNumber, u32>>,
}

impl Mount {
    /// Formats `device` as a fresh, empty volume and mounts it: writes the
    /// superblock, marks the superblock and bitmap blocks allocated, and
    /// creates the root directory.
    pub fn mkfs(device: Arc<dyn BlockDevice>) -> Result<Self> {
        let total_blocks = device.block_count();
        let bitmap_blocks = bitmap_blocks_for(total_blocks);
        let first_bitmap_block = 1u64;
        if total_blocks < first_bitmap_block + bitmap_blocks + 1 {
            return Err(EfsError::NoSpace);
        }

        // Every block gets a zeroed plaintext write before anything does a
        // read-modify-write against it. A raw or RAM device already reads
        // zeroed content back, but a crypto layer underneath has no valid
        // ciphertext for a block that was never `put`, so mkfs can't rely on
        // `get` succeeding on an unformatted volume without this pass.
        let zero = vec![0u8; device.block_size()];
        for b in 0..total_blocks {
            device.put(b, &zero)?;
        }

        let bitmap = Arc::new(Bitmap::new(
            device.clone(),
            first_bitmap_block,
            bitmap_blocks,
            total_blocks,
        ));
        bitmap.mark_allocated(0)?;
        for b in first_bitmap_block..first_bitmap_block + bitmap_blocks {
            bitmap.mark_allocated(b)?;
        }

        let inodes = Arc::new(InodeLayer::new(device.clone(), bitmap));
        let dirs = Arc::new(DirectoryLayer::new(device.clone(), inodes.clone()));
        let files = Arc::new(FileLayer::new(device.clone(), inodes.clone(), dirs.clone()));

        let root_inum = inodes.allocate()?;
        let mut root_inode = inodes.read(root_inum)?;
        root_inode.mode = MODE_DIR | DEFAULT_DIR_PERM;
        root_inode.nlinks = 1;
        dirs.init_empty(root_inum, &mut root_inode, root_inum)?;

        let superblock = SuperBlock::new(
            total_blocks as u32,
            first_bitmap_block as u32,
            bitmap_blocks as u32,
            0,
            root_inum,
        );
        device.put(0, bytes_of(&superblock))?;
        log::info!(
            "mkfs: formatted {total_blocks} blocks, root inode {root_inum}"
        );

        Ok(Self {
            device,
            inodes,
            dirs,
            files,
            root_inum,
            handles: Mutex::new(HashMap::new()),
            next_fd: AtomicU64::new(1),
            open_refs: Mutex::new(HashMap::new()),
        })
    }

    /// Mounts a previously formatted `device` by reading its superblock.
    pub fn initialize(device: Arc<dyn BlockDevice>) -> Result<Self> {
        let raw = device.get(0)?;
        let sb: &SuperBlock = from_bytes(&raw);
        if sb.magic != SUPERBLOCK_MAGIC {
            return Err(EfsError::Corrupt("bad superblock magic"));
        }
        let bitmap = Arc::new(Bitmap::new(
            device.clone(),
            sb.first_bitmap_block as u64,
            sb.bitmap_blocks as u64,
            sb.total_blocks as u64,
        ));
        let inodes = Arc::new(InodeLayer::new(device.clone(), bitmap));
        let dirs = Arc::new(DirectoryLayer::new(device.clone(), inodes.clone()));
        let files = Arc::new(FileLayer::new(device.clone(), inodes.clone(), dirs.clone()));
        log::info!("initialize: mounted volume, root inode {}", sb.root_inode);

        Ok(Self {
            device,
            inodes,
            dirs,
            files,
            root_inum: sb.root_inode,
            handles: Mutex::new(HashMap::new()),
            next_fd: AtomicU64::new(1),
            open_refs: Mutex::new(HashMap::new()),
        })
    }

    /// Releases the mount's reference on its underlying device.
    pub fn release(&self) -> Result<()> {
        self.device.release()
    }

    fn bump_open_ref(&self, inum: InodeNumber) {
        *self.open_refs.lock().unwrap().entry(inum).or_insert(0) += 1;
    }

    /// Drops one open reference on `inum`; if it was the last one and the
    /// inode has already been unlinked to zero links, frees it now.
    fn drop_open_ref(&self, inum: InodeNumber) -> Result<()> {
        let remaining = {
            let mut refs = self.open_refs.lock().unwrap();
            let slot = refs.entry(inum).or_insert(0);
            *slot = slot.saturating_sub(1);
            let remaining = *slot;
            if remaining == 0 {
                refs.remove(&inum);
            }
            remaining
        };
        if remaining == 0 {
            let inode = self.inodes.read(inum)?;
            if inode.nlinks == 0 {
                self.inodes.release_inode(inum, &inode)?;
            }
        }
        Ok(())
    }

    fn require_dir(&self, inum: InodeNumber) -> Result<crate::disk_layout::RawInode> {
        let inode = self.inodes.read(inum)?;
        if inode.mode & MODE_DIR == 0 {
            return Err(EfsError::NotDirectory);
        }
        Ok(inode)
    }

    /// Creates a new, empty regular file at `path`. Fails with
    /// [`EfsError::Exists`] if something is already there.
    pub fn create(&self, path: &str) -> Result<InodeNumber> {
        let (parent_inum, name) = self.files.resolve_parent(self.root_inum, path)?;
        let mut parent_inode = self.require_dir(parent_inum)?;
        if self.dirs.lookup(&parent_inode, &name)?.is_some() {
            return Err(EfsError::Exists);
        }
        let inum = self.inodes.allocate()?;
        let mut inode = self.inodes.read(inum)?;
        inode.mode = MODE_REG | DEFAULT_FILE_PERM;
        inode.nlinks = 1;
        self.inodes.write(inum, &inode)?;
        self.dirs
            .add_entry(parent_inum, &mut parent_inode, &name, inum, FileType::RegularFile)?;
        Ok(inum)
    }

    /// Opens `path`, optionally creating, truncating, or positioning for
    /// append as directed by `flags`.
    pub fn open(&self, path: &str, flags: OpenFlags) -> Result<Fd> {
        let inum = match self.files.resolve(self.root_inum, path) {
            Ok((_, FileType::Directory)) => return Err(EfsError::IsDirectory),
            Ok((inum, FileType::RegularFile)) => {
                if flags.contains(OpenFlags::CREATE) && flags.contains(OpenFlags::EXCL) {
                    return Err(EfsError::Exists);
                }
                inum
            }
            Err(EfsError::NotFound) if flags.contains(OpenFlags::CREATE) => self.create(path)?,
            Err(e) => return Err(e),
        };

        if flags.contains(OpenFlags::TRUNC) {
            let mut inode = self.inodes.read(inum)?;
            self.files.truncate(inum, &mut inode, 0)?;
        }
        let position = if flags.contains(OpenFlags::APPEND) {
            self.inodes.read(inum)?.size
        } else {
            0
        };

        let fd = self.next_fd.fetch_add(1, Ordering::SeqCst);
        self.handles.lock().unwrap().insert(
            fd,
            OpenHandle {
                inum,
                position,
                flags,
            },
        );
        self.bump_open_ref(inum);
        Ok(fd)
    }

    /// Closes `fd`. If it was the last open handle on an inode already
    /// unlinked to zero links, the inode's blocks are freed now.
    pub fn close(&self, fd: Fd) -> Result<()> {
        let handle = self
            .handles
            .lock()
            .unwrap()
            .remove(&fd)
            .ok_or(EfsError::InvalidArg)?;
        self.drop_open_ref(handle.inum)
    }

    pub fn read(&self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let (inum, pos) = {
            let handles = self.handles.lock().unwrap();
            let h = handles.get(&fd).ok_or(EfsError::InvalidArg)?;
            (h.inum, h.position)
        };
        let inode = self.inodes.read(inum)?;
        let n = self.files.read(&inode, pos, buf)?;
        self.handles.lock().unwrap().get_mut(&fd).unwrap().position += n as u64;
        Ok(n)
    }

    pub fn write(&self, fd: Fd, buf: &[u8]) -> Result<usize> {
        let (inum, flags, mut pos) = {
            let handles = self.handles.lock().unwrap();
            let h = handles.get(&fd).ok_or(EfsError::InvalidArg)?;
            (h.inum, h.flags, h.position)
        };
        let mut inode = self.inodes.read(inum)?;
        if flags.contains(OpenFlags::APPEND) {
            pos = inode.size;
        }
        let n = self.files.write(inum, &mut inode, pos, buf)?;
        self.handles.lock().unwrap().get_mut(&fd).unwrap().position = pos + n as u64;
        Ok(n)
    }

    pub fn lseek(&self, fd: Fd, whence: Whence, offset: i64) -> Result<u64> {
        let (inum, current) = {
            let handles = self.handles.lock().unwrap();
            let h = handles.get(&fd).ok_or(EfsError::InvalidArg)?;
            (h.inum, h.position)
        };
        let size = self.inodes.read(inum)?.size;
        let new_pos = FileLayer::seek(whence, offset, current, size)?;
        self.handles.lock().unwrap().get_mut(&fd).unwrap().position = new_pos;
        Ok(new_pos)
    }

    pub fn truncate(&self, path: &str, new_len: u64) -> Result<()> {
        let (inum, ft) = self.files.resolve(self.root_inum, path)?;
        if ft == FileType::Directory {
            return Err(EfsError::IsDirectory);
        }
        let mut inode = self.inodes.read(inum)?;
        self.files.truncate(inum, &mut inode, new_len)
    }

    pub fn stat(&self, path: &str) -> Result<Stat> {
        let (inum, ft) = self.files.resolve(self.root_inum, path)?;
        let inode = self.inodes.read(inum)?;
        // A directory's logical size is its live entry count, not the
        // whole-block extent `inode.size` tracks for indexing purposes.
        let size = if ft == FileType::Directory {
            self.dirs.readdir(&inode)?.len() as u64 * crate::disk_layout::DIRENT_SIZE as u64
        } else {
            inode.size
        };
        Ok(Stat {
            inode_number: inum,
            file_type: ft,
            size,
            nlinks: inode.nlinks,
            blksize: crate::block::BLOCK_SIZE as u64,
            blocks: inode.size.div_ceil(crate::block::BLOCK_SIZE as u64),
        })
    }

    /// Unlinks `path`. The inode's blocks are freed immediately unless a
    /// handle is still open on it, in which case the release is deferred to
    /// that handle's `close`.
    pub fn unlink(&self, path: &str) -> Result<()> {
        let (inum, ft) = self.files.resolve(self.root_inum, path)?;
        if ft == FileType::Directory {
            return Err(EfsError::IsDirectory);
        }
        let (parent_inum, name) = self.files.resolve_parent(self.root_inum, path)?;
        let mut parent_inode = self.inodes.read(parent_inum)?;
        self.dirs.remove_entry(parent_inum, &mut parent_inode, &name)?;

        let mut inode = self.inodes.read(inum)?;
        inode.nlinks -= 1;
        self.inodes.write(inum, &inode)?;
        if inode.nlinks == 0 {
            let still_open = self.open_refs.lock().unwrap().contains_key(&inum);
            if !still_open {
                self.inodes.release_inode(inum, &inode)?;
            }
        }
        Ok(())
    }

    /// Creates hard link `new_path` pointing at the inode `existing_path`
    /// resolves to. Directories cannot be hard-linked.
    pub fn link(&self, existing_path: &str, new_path: &str) -> Result<()> {
        let (inum, ft) = self.files.resolve(self.root_inum, existing_path)?;
        if ft == FileType::Directory {
            return Err(EfsError::IsDirectory);
        }
        let (parent_inum, name) = self.files.resolve_parent(self.root_inum, new_path)?;
        let mut parent_inode = self.require_dir(parent_inum)?;
        self.dirs
            .add_entry(parent_inum, &mut parent_inode, &name, inum, ft)?;
        let mut inode = self.inodes.read(inum)?;
        inode.nlinks += 1;
        self.inodes.write(inum, &inode)
    }

    pub fn mkdir(&self, path: &str) -> Result<InodeNumber> {
        let (parent_inum, name) = self.files.resolve_parent(self.root_inum, path)?;
        let mut parent_inode = self.require_dir(parent_inum)?;
        if self.dirs.lookup(&parent_inode, &name)?.is_some() {
            return Err(EfsError::Exists);
        }
        let inum = self.inodes.allocate()?;
        let mut inode = self.inodes.read(inum)?;
        inode.mode = MODE_DIR | DEFAULT_DIR_PERM;
        inode.nlinks = 1;
        self.dirs.init_empty(inum, &mut inode, parent_inum)?;
        self.dirs
            .add_entry(parent_inum, &mut parent_inode, &name, inum, FileType::Directory)?;
        self.inodes.write(parent_inum, &parent_inode)?;
        Ok(inum)
    }

    /// Removes the empty directory at `path`. Fails with
    /// [`EfsError::NotEmpty`] unless only `.`/`..` remain.
    pub fn rmdir(&self, path: &str) -> Result<()> {
        let (inum, ft) = self.files.resolve(self.root_inum, path)?;
        if ft != FileType::Directory {
            return Err(EfsError::NotDirectory);
        }
        if inum == self.root_inum {
            return Err(EfsError::InvalidArg);
        }
        let inode = self.inodes.read(inum)?;
        if !self.dirs.is_empty(&inode)? {
            return Err(EfsError::NotEmpty);
        }
        let (parent_inum, name) = self.files.resolve_parent(self.root_inum, path)?;
        let mut parent_inode = self.inodes.read(parent_inum)?;
        self.dirs.remove_entry(parent_inum, &mut parent_inode, &name)?;
        self.inodes.write(parent_inum, &parent_inode)?;
        self.inodes.release_inode(inum, &inode)?;
        Ok(())
    }

    pub fn opendir(&self, path: &str) -> Result<Fd> {
        let (inum, ft) = self.files.resolve(self.root_inum, path)?;
        if ft != FileType::Directory {
            return Err(EfsError::NotDirectory);
        }
        let fd = self.next_fd.fetch_add(1, Ordering::SeqCst);
        self.handles.lock().unwrap().insert(
            fd,
            OpenHandle {
                inum,
                position: 0,
                flags: OpenFlags::empty(),
            },
        );
        self.bump_open_ref(inum);
        Ok(fd)
    }

    pub fn readdir(&self, fd: Fd) -> Result<Vec<(String, InodeNumber, FileType)>> {
        let inum = self
            .handles
            .lock()
            .unwrap()
            .get(&fd)
            .ok_or(EfsError::InvalidArg)?
            .inum;
        let inode = self.inodes.read(inum)?;
        self.dirs.readdir(&inode)
    }

    pub fn closedir(&self, fd: Fd) -> Result<()> {
        self.close(fd)
    }

    /// Renames `old_path` to `new_path`, atomically replacing whatever was
    /// at `new_path` (a file replaces a file, an empty directory replaces
    /// an empty directory).
    pub fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let (inum, ft) = self.files.resolve(self.root_inum, old_path)?;
        let (old_parent, old_name) = self.files.resolve_parent(self.root_inum, old_path)?;
        let (new_parent, new_name) = self.files.resolve_parent(self.root_inum, new_path)?;
        let mut new_parent_inode = self.require_dir(new_parent)?;

        if let Some((target_inum, target_ft)) = self.dirs.lookup(&new_parent_inode, &new_name)? {
            if target_inum == inum {
                return Ok(());
            }
            if target_ft == FileType::Directory {
                let target_inode = self.inodes.read(target_inum)?;
                if !self.dirs.is_empty(&target_inode)? {
                    return Err(EfsError::NotEmpty);
                }
            }
            self.dirs
                .remove_entry(new_parent, &mut new_parent_inode, &new_name)?;
            let mut target_inode = self.inodes.read(target_inum)?;
            target_inode.nlinks -= 1;
            self.inodes.write(target_inum, &target_inode)?;
            if target_inode.nlinks == 0 {
                let still_open = self.open_refs.lock().unwrap().contains_key(&target_inum);
                if !still_open {
                    self.inodes.release_inode(target_inum, &target_inode)?;
                }
            }
        }

        self.dirs
            .add_entry(new_parent, &mut new_parent_inode, &new_name, inum, ft)?;
        let mut old_parent_inode = self.inodes.read(old_parent)?;
        self.dirs
            .remove_entry(old_parent, &mut old_parent_inode, &old_name)?;

        if ft == FileType::Directory && old_parent != new_parent {
            let mut moved_inode = self.inodes.read(inum)?;
            self.dirs.remove_entry(inum, &mut moved_inode, "..")?;
            self.dirs
                .add_entry(inum, &mut moved_inode, "..", new_parent, FileType::Directory)?;
            self.inodes.write(new_parent, &new_parent_inode)?;
        }
        self.inodes.write(old_parent, &old_parent_inode)
    }

    /// The root directory's inode number, for callers that want to walk the
    /// tree themselves (e.g. `fsck`).
    pub fn root_inode_number(&self) -> InodeNumber {
        self.root_inum
    }

    /// Walks the bitmap and the inode graph reachable from root and reports
    /// every inconsistency found: a reachable block whose bitmap bit is
    /// clear, or an allocated bit with no reachable owner. Mutates nothing;
    /// a caller with a damaged volume gets a report, not a repair.
    pub fn fsck(&self) -> Result<Vec<String>> {
        let bitmap = self.inodes.bitmap();
        let mut reachable = vec![false; bitmap.total_blocks() as usize];
        let mark = |reachable: &mut Vec<bool>, blkno: u64| {
            if let Some(slot) = reachable.get_mut(blkno as usize) {
                *slot = true;
            }
        };

        let superblock_block = self.device.get(0)?;
        let superblock: &SuperBlock = from_bytes(&superblock_block);
        mark(&mut reachable, 0);
        for b in superblock.first_bitmap_block as u64
            ..superblock.first_bitmap_block as u64 + superblock.bitmap_blocks as u64
        {
            mark(&mut reachable, b);
        }

        mark(&mut reachable, self.root_inum as u64);
        let mut dir_stack = vec![self.root_inum];
        let mut visited = std::collections::HashSet::new();
        while let Some(dir_inum) = dir_stack.pop() {
            if !visited.insert(dir_inum) {
                continue;
            }
            let dir_inode = self.inodes.read(dir_inum)?;
            let mut cur = Some(dir_inode);
            while let Some(inode) = cur {
                for &b in inode.direct_blocks.iter() {
                    if b != 0 {
                        mark(&mut reachable, b as u64);
                    }
                }
                cur = if inode.next_inode != 0 {
                    mark(&mut reachable, inode.next_inode as u64);
                    Some(self.inodes.read(inode.next_inode)?)
                } else {
                    None
                };
            }
            for (name, child_inum, file_type) in self.dirs.readdir(&dir_inode)? {
                if name == "." || name == ".." {
                    continue;
                }
                mark(&mut reachable, child_inum as u64);
                let child_inode = self.inodes.read(child_inum)?;
                let mut cur = Some(child_inode);
                while let Some(inode) = cur {
                    for &b in inode.direct_blocks.iter() {
                        if b != 0 {
                            mark(&mut reachable, b as u64);
                        }
                    }
                    cur = if inode.next_inode != 0 {
                        mark(&mut reachable, inode.next_inode as u64);
                        Some(self.inodes.read(inode.next_inode)?)
                    } else {
                        None
                    };
                }
                if file_type == FileType::Directory {
                    dir_stack.push(child_inum);
                }
            }
        }

        let mut report = Vec::new();
        for blkno in 0..bitmap.total_blocks() {
            let allocated = bitmap.is_allocated(blkno)?;
            let is_reachable = reachable[blkno as usize];
            if is_reachable && !allocated {
                let msg = format!("block {blkno} is reachable but its bitmap bit is clear");
                log::warn!("fsck: {msg}");
                report.push(msg);
            } else if allocated && !is_reachable {
                let msg = format!("block {blkno} is allocated but has no reachable owner");
                log::warn!("fsck: {msg}");
                report.push(msg);
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::raw::RamDevice;

    fn mounted(total_blocks: u64) -> Mount {
        let device: Arc<dyn BlockDevice> = Arc::new(RamDevice::new(total_blocks, 512));
        Mount::mkfs(device).unwrap()
    }

    #[test]
    fn mkfs_creates_root_with_dot_entries() {
        let mount = mounted(1024);
        let stat = mount.stat("/").unwrap();
        assert_eq!(stat.file_type, FileType::Directory);
        let dir = mount.opendir("/").unwrap();
        let mut names: Vec<_> = mount.readdir(dir).unwrap().into_iter().map(|(n, ..)| n).collect();
        mount.closedir(dir).unwrap();
        names.sort();
        assert_eq!(names, vec![".".to_string(), "..".to_string()]);
    }

    #[test]
    fn create_write_read_close_round_trip() {
        let mount = mounted(1024);
        let fd = mount.open("/a.txt", OpenFlags::CREATE).unwrap();
        assert_eq!(mount.write(fd, b"hi").unwrap(), 2);
        mount.close(fd).unwrap();

        let fd = mount.open("/a.txt", OpenFlags::empty()).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(mount.read(fd, &mut buf).unwrap(), 2);
        assert_eq!(&buf, b"hi");
        mount.close(fd).unwrap();
    }

    #[test]
    fn open_create_excl_rejects_existing() {
        let mount = mounted(1024);
        mount.create("/a.txt").unwrap();
        assert!(matches!(
            mount.open("/a.txt", OpenFlags::CREATE | OpenFlags::EXCL),
            Err(EfsError::Exists)
        ));
    }

    #[test]
    fn mkdir_nested_and_stat() {
        let mount = mounted(4096);
        mount.mkdir("/dir").unwrap();
        mount.create("/dir/file").unwrap();
        let stat = mount.stat("/dir/file").unwrap();
        assert_eq!(stat.file_type, FileType::RegularFile);
        let dir = mount.opendir("/dir").unwrap();
        let entries = mount.readdir(dir).unwrap();
        mount.closedir(dir).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().any(|(name, ..)| name == "file"));
    }

    #[test]
    fn rmdir_requires_empty() {
        let mount = mounted(4096);
        mount.mkdir("/dir").unwrap();
        mount.create("/dir/file").unwrap();
        assert!(matches!(mount.rmdir("/dir"), Err(EfsError::NotEmpty)));
        mount.unlink("/dir/file").unwrap();
        mount.rmdir("/dir").unwrap();
        assert!(matches!(mount.stat("/dir"), Err(EfsError::NotFound)));
    }

    #[test]
    fn unlink_defers_release_while_open() {
        let mount = mounted(1024);
        let fd = mount.open("/f", OpenFlags::CREATE).unwrap();
        mount.write(fd, b"data").unwrap();
        mount.unlink("/f").unwrap();
        // Still readable through the open handle after unlink.
        mount.lseek(fd, Whence::Set, 0).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(mount.read(fd, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"data");
        mount.close(fd).unwrap();
        assert!(matches!(mount.stat("/f"), Err(EfsError::NotFound)));
    }

    #[test]
    fn link_creates_second_name_for_same_inode() {
        let mount = mounted(1024);
        mount.create("/a").unwrap();
        mount.link("/a", "/b").unwrap();
        let a = mount.stat("/a").unwrap();
        let b = mount.stat("/b").unwrap();
        assert_eq!(a.inode_number, b.inode_number);
        assert_eq!(a.nlinks, 2);
        mount.unlink("/a").unwrap();
        let b2 = mount.stat("/b").unwrap();
        assert_eq!(b2.nlinks, 1);
    }

    #[test]
    fn rename_replaces_target_atomically() {
        let mount = mounted(1024);
        let fd = mount.open("/src", OpenFlags::CREATE).unwrap();
        mount.write(fd, b"new").unwrap();
        mount.close(fd).unwrap();
        mount.create("/dst").unwrap();
        mount.rename("/src", "/dst").unwrap();
        assert!(matches!(mount.stat("/src"), Err(EfsError::NotFound)));
        let fd = mount.open("/dst", OpenFlags::empty()).unwrap();
        let mut buf = [0u8; 3];
        mount.read(fd, &mut buf).unwrap();
        assert_eq!(&buf, b"new");
        mount.close(fd).unwrap();
    }

    #[test]
    fn truncate_extends_with_zero_fill() {
        let mount = mounted(1024);
        mount.create("/f").unwrap();
        mount.truncate("/f", 10).unwrap();
        let fd = mount.open("/f", OpenFlags::empty()).unwrap();
        let mut buf = [0xFFu8; 10];
        assert_eq!(mount.read(fd, &mut buf).unwrap(), 10);
        assert_eq!(buf, [0u8; 10]);
        mount.close(fd).unwrap();
    }

    #[test]
    fn fsck_reports_clean_on_an_untouched_tree() {
        let mount = mounted(4096);
        mount.mkdir("/a").unwrap();
        let fd = mount.open("/a/f", OpenFlags::CREATE).unwrap();
        mount.write(fd, &vec![7u8; 2000]).unwrap();
        mount.close(fd).unwrap();
        assert_eq!(mount.fsck().unwrap(), Vec::<String>::new());
    }

    #[test]
    fn fsck_flags_a_block_freed_out_from_under_a_live_file() {
        let mount = mounted(4096);
        let fd = mount.open("/f", OpenFlags::CREATE).unwrap();
        mount.write(fd, b"hello").unwrap();
        mount.close(fd).unwrap();
        let inum = mount.stat("/f").unwrap().inode_number;
        let inode = mount.inodes.read(inum).unwrap();
        let data_block = inode.direct_blocks[0] as u64;
        mount.inodes.bitmap().free(data_block).unwrap();

        let report = mount.fsck().unwrap();
        assert!(report.iter().any(|l| l.contains(&data_block.to_string())));
    }
}
