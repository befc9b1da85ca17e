//! Unified error taxonomy surfaced to callers of the filesystem engine.
//!
//! Every layer — block device, allocator, inode, directory, path resolver,
//! mount — returns [`Result<T, EfsError>`]. No layer retries or masks a
//! lower-layer failure; a caller always sees the abstract kind closest to
//! what actually went wrong.

use std::io;

/// The abstract error kinds a caller of the filesystem may observe.
#[derive(thiserror::Error, Debug)]
pub enum EfsError {
    /// No file or directory exists at the given path or name.
    #[error("no such file or directory")]
    NotFound,
    /// The target of a create-like operation already exists.
    #[error("file or directory already exists")]
    Exists,
    /// A path component that should be a directory is not one.
    #[error("not a directory")]
    NotDirectory,
    /// An operation that requires a regular file was given a directory.
    #[error("is a directory")]
    IsDirectory,
    /// `rmdir` was attempted on a directory with entries other than `.`/`..`.
    #[error("directory not empty")]
    NotEmpty,
    /// The bitmap allocator has no free block or inode left.
    #[error("no space left on device")]
    NoSpace,
    /// A caller-supplied argument violates a precondition (e.g. a path
    /// component longer than `FILENAME_MAX - 1`, or a malformed open mode).
    #[error("invalid argument")]
    InvalidArg,
    /// A read or write against the underlying block device failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// On-disk structure failed a sanity check (bad magic, authentication
    /// failure in the crypto layer, inconsistent directory size, ...).
    #[error("filesystem corrupted: {0}")]
    Corrupt(&'static str),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EfsError>;
