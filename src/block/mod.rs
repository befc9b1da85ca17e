//! Stackable block-device abstraction.
//!
//! A block device exposes a uniform, synchronous `get`/`put` interface over
//! fixed-size blocks, plus an explicit reference-counted lifecycle. Layers
//! wrap one another — a caching device over a crypto device over a raw
//! device — each preserving the interface of the one below while changing
//! what happens to the bytes in between.
//!
//! ```text
//! ┌────────────────────┐
//! │ CachingDevice       │  write-through LRU, block_size() == BLOCK_SIZE
//! └─────────┬───────────┘
//! ┌─────────▼───────────┐
//! │ CryptoDevice         │  AES-256-GCM per block, block_size() == BLOCK_SIZE
//! └─────────┬───────────┘
//! ┌─────────▼───────────┐
//! │ RawDevice / RamDevice │ block_size() == BLOCK_SIZE + AEAD overhead
//! └──────────────────────┘
//! ```
//!
//! The mount only ever talks to the top of the stack, and only ever with
//! `BLOCK_SIZE`-byte buffers; a device that needs more room from the layer
//! beneath it (the crypto layer, to fit a nonce-derived tag) asks its lower
//! device for a correspondingly larger block instead of shrinking the
//! payload it advertises upward. See [`crypto`] for the rationale.
pub mod cache;
pub mod crypto;
pub mod raw;

use crate::error::Result;

/// Size, in bytes, of a filesystem-level block. Fixed by the on-disk format.
pub const BLOCK_SIZE: usize = 512;

/// A stackable, reference-counted block device.
///
/// Implementations are synchronous: every `get`/`put` call either completes
/// or fails before returning, matching the single-threaded, non-suspending
/// execution model of the mount built on top of it.
pub trait BlockDevice: Send + Sync {
    /// Size in bytes of one block at this layer. Layers below an encrypting
    /// device may advertise a larger block than the one the filesystem
    /// sees, to make room for authentication overhead.
    fn block_size(&self) -> usize;

    /// Total number of addressable blocks.
    fn block_count(&self) -> u64;

    /// Reads block `blkno` into a freshly allocated buffer of
    /// `block_size()` bytes. An out-of-range `blkno` is an [`EfsError::Io`].
    fn get(&self, blkno: u64) -> Result<Vec<u8>>;

    /// Writes `block` (exactly `block_size()` bytes) to `blkno`.
    fn put(&self, blkno: u64, block: &[u8]) -> Result<()>;

    /// Registers an additional owner of this device. Each `add_ref` must be
    /// matched by a `release`; the backing resource is torn down on the
    /// release that drops the count to zero.
    fn add_ref(&self);

    /// Releases one reference. On the last release, flushes any pending
    /// writes (for wrapping layers) and tears down the backing resource.
    fn release(&self) -> Result<()>;
}

/// Builds the out-of-range I/O error shared by every [`BlockDevice`]
/// implementation's `get`/`put`.
pub(crate) fn out_of_range(blkno: u64, block_count: u64) -> crate::error::EfsError {
    crate::error::EfsError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("block {blkno} out of range (have {block_count})"),
    ))
}
