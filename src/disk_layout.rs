//! On-disk layout of the filesystem's metadata structures.
//!
//! Every type in this module is `#[repr(C)]` and `Pod` (plain-old-data): it
//! can be cast directly to and from the raw bytes of a block with
//! [`bytemuck`], with a binary layout fixed at little-endian field order by
//! construction (every multi-byte field here is declared with the
//! platform's native, little-endian integer types and the host toolchain we
//! build for is little-endian; no field is ever written through anything
//! but these casts, so there is exactly one place the layout is defined).
use bytemuck::{Pod, Zeroable};

use crate::block::BLOCK_SIZE;

/// Magic identifying a formatted volume.
pub const SUPERBLOCK_MAGIC: u32 = 0x45_46_53_31; // "EFS1"
/// Magic stamped into every live inode block (head or extension).
pub const INODE_MAGIC: u32 = 0x494E_4F44; // "INOD"

/// On-disk file type tag stored in a directory entry and an inode's `mode`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum FileType {
    RegularFile = 1,
    Directory = 2,
}

impl TryFrom<u8> for FileType {
    type Error = crate::error::EfsError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FileType::RegularFile),
            2 => Ok(FileType::Directory),
            _ => Err(crate::error::EfsError::Corrupt("invalid file type tag")),
        }
    }
}

/// Mode bit marking an inode as a directory (mirrors `S_IFDIR`'s role).
pub const MODE_DIR: u32 = 0o040_000;
/// Mode bit marking an inode as a regular file (mirrors `S_IFREG`'s role).
pub const MODE_REG: u32 = 0o100_000;
/// Default permission bits recorded (but never enforced) for a new file.
pub const DEFAULT_FILE_PERM: u32 = 0o644;
/// Default permission bits recorded (but never enforced) for a new directory.
pub const DEFAULT_DIR_PERM: u32 = 0o755;

/// Number of direct block slots that fit in one inode block alongside its
/// fixed header fields.
pub const DIRECT_BLOCKS: usize = 112;

/// Block 0 of every formatted volume.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct SuperBlock {
    pub magic: u32,
    pub version: u32,
    pub total_blocks: u32,
    pub first_bitmap_block: u32,
    pub bitmap_blocks: u32,
    pub first_inode_block: u32,
    pub root_inode: u32,
    _reserved: [u8; BLOCK_SIZE - 4 * 7],
}

const _: () = assert!(std::mem::size_of::<SuperBlock>() == BLOCK_SIZE);

impl SuperBlock {
    pub fn new(
        total_blocks: u32,
        first_bitmap_block: u32,
        bitmap_blocks: u32,
        first_inode_block: u32,
        root_inode: u32,
    ) -> Self {
        Self {
            magic: SUPERBLOCK_MAGIC,
            version: 1,
            total_blocks,
            first_bitmap_block,
            bitmap_blocks,
            first_inode_block,
            root_inode,
            _reserved: [0; BLOCK_SIZE - 4 * 7],
        }
    }
}

/// One inode, occupying exactly one block.
///
/// A head inode and an "extension" inode share this layout. An extension
/// inode only ever uses `direct_blocks` and `next_inode`; its `mode`,
/// `uid`, `gid`, `size`, and `nlinks` are left zeroed and ignored (see
/// [`crate::inode`] for how the chain is walked).
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct RawInode {
    pub magic: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub nlinks: u32,
    pub next_inode: u32,
    pub direct_blocks: [u32; DIRECT_BLOCKS],
    _reserved: [u8; BLOCK_SIZE - (4 * 6 + 8 + 4 * DIRECT_BLOCKS)],
}

const _: () = assert!(std::mem::size_of::<RawInode>() == BLOCK_SIZE);

impl RawInode {
    pub fn zeroed_with_magic() -> Self {
        Self {
            magic: INODE_MAGIC,
            ..Zeroable::zeroed()
        }
    }
}

impl std::fmt::Debug for RawInode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawInode")
            .field("magic", &self.magic)
            .field("mode", &self.mode)
            .field("size", &self.size)
            .field("nlinks", &self.nlinks)
            .field("next_inode", &self.next_inode)
            .finish_non_exhaustive()
    }
}

/// Maximum length, including the NUL terminator, of a directory entry name.
pub const FILENAME_MAX: usize = 64;

/// One fixed-width directory entry. `DIRENT_SIZE` divides `BLOCK_SIZE`, so a
/// directory's data blocks hold a whole number of entries each.
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct DirEntry {
    pub inode_number: u32,
    pub file_type: u32,
    pub name: [u8; FILENAME_MAX],
    _reserved: [u8; 56],
}

pub const DIRENT_SIZE: usize = std::mem::size_of::<DirEntry>();
const _: () = assert!(BLOCK_SIZE.is_multiple_of(DIRENT_SIZE));

impl DirEntry {
    /// An empty slot: `inode_number == 0` marks it reusable.
    pub fn empty() -> Self {
        Zeroable::zeroed()
    }

    pub fn is_empty(&self) -> bool {
        self.inode_number == 0
    }

    /// Builds a live entry. Returns [`crate::error::EfsError::InvalidArg`] if
    /// `name` does not fit (including its NUL terminator) in
    /// [`FILENAME_MAX`] bytes.
    pub fn new(
        inode_number: u32,
        name: &str,
        file_type: FileType,
    ) -> crate::error::Result<Self> {
        let bytes = name.as_bytes();
        if bytes.len() >= FILENAME_MAX {
            return Err(crate::error::EfsError::InvalidArg);
        }
        let mut buf = [0u8; FILENAME_MAX];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            inode_number,
            file_type: file_type as u32,
            name: buf,
            _reserved: [0; 56],
        })
    }

    pub fn name_str(&self) -> &str {
        let nul = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..nul]).unwrap_or("")
    }

    pub fn file_type(&self) -> crate::error::Result<FileType> {
        FileType::try_from(self.file_type as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirent_size_divides_block_size() {
        assert_eq!(BLOCK_SIZE % DIRENT_SIZE, 0);
    }

    #[test]
    fn dirent_name_round_trips() {
        let entry = DirEntry::new(7, "hello.txt", FileType::RegularFile).unwrap();
        assert_eq!(entry.name_str(), "hello.txt");
        assert!(!entry.is_empty());
        assert_eq!(entry.file_type().unwrap(), FileType::RegularFile);
    }

    #[test]
    fn dirent_rejects_overlong_name() {
        let name = "x".repeat(FILENAME_MAX);
        assert!(DirEntry::new(1, &name, FileType::RegularFile).is_err());
    }

    #[test]
    fn inode_and_superblock_are_one_block() {
        assert_eq!(std::mem::size_of::<RawInode>(), BLOCK_SIZE);
        assert_eq!(std::mem::size_of::<SuperBlock>(), BLOCK_SIZE);
    }
}
