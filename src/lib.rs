//! An enclave-oriented filesystem engine: POSIX-like files and directories
//! laid out over a stackable fixed-size-block device.
//!
//! The stack, bottom to top, is [`block::raw`] (or any other
//! [`block::BlockDevice`]) optionally wrapped in [`block::crypto`] for
//! authenticated encryption and [`block::cache`] for a write-through LRU,
//! with [`bitmap`] allocating blocks, [`inode`] and [`directory`] building
//! the metadata structures on top, [`file`] resolving paths and performing
//! I/O, and [`mount`] tying the whole stack together behind `mkfs` /
//! `initialize` / `release`.
pub mod bitmap;
pub mod block;
pub mod directory;
pub mod disk_layout;
pub mod error;
pub mod file;
pub mod inode;
pub mod lru;
pub mod mount;

pub use error::{EfsError, Result};
