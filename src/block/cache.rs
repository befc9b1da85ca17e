//! Write-through LRU cache over a lower block device.
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use super::BlockDevice;
use crate::{error::Result, lru::LruCache};

/// Default number of blocks held by a [`CachingDevice`] when none is given.
pub const DEFAULT_CAPACITY: usize = 64;

/// A block device that caches reads and writes of `lower` through an LRU of
/// bounded capacity.
///
/// Writes are write-through: `put` updates the cached copy and immediately
/// forwards the write to `lower`, so the cache is always in sync with
/// `lower` and eviction never needs to write anything back — it just drops
/// the LRU entry. This trades the read-amortisation a write-back cache
/// would give for the simpler durability story the mount's bitmap/inode
/// flush ordering depends on: a crash can never lose a write the caller was
/// told succeeded.
pub struct CachingDevice {
    lower: Arc<dyn BlockDevice>,
    entries: Mutex<LruCache<Vec<u8>>>,
    refs: AtomicUsize,
}

impl CachingDevice {
    /// Wraps `lower` with an LRU cache of `capacity` blocks, taking a
    /// reference on `lower`.
    pub fn new(lower: Arc<dyn BlockDevice>, capacity: usize) -> Self {
        lower.add_ref();
        Self {
            lower,
            entries: Mutex::new(LruCache::new(capacity)),
            refs: AtomicUsize::new(1),
        }
    }
}

impl BlockDevice for CachingDevice {
    fn block_size(&self) -> usize {
        self.lower.block_size()
    }

    fn block_count(&self) -> u64 {
        self.lower.block_count()
    }

    fn get(&self, blkno: u64) -> Result<Vec<u8>> {
        let mut guard = self.entries.lock().unwrap();
        if let Some(data) = guard.get(blkno) {
            return Ok(data.clone());
        }
        drop(guard);

        let data = self.lower.get(blkno)?;

        let mut guard = self.entries.lock().unwrap();
        guard.put(blkno, data.clone());
        Ok(data)
    }

    fn put(&self, blkno: u64, block: &[u8]) -> Result<()> {
        self.lower.put(blkno, block)?;
        self.entries.lock().unwrap().put(blkno, block.to_vec());
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::raw::RamDevice;

    #[test]
    fn hits_are_served_from_cache() {
        let lower = Arc::new(RamDevice::new(8, 512));
        let cache = CachingDevice::new(lower.clone(), 2);
        let block = vec![5u8; 512];
        cache.put(0, &block).unwrap();
        assert_eq!(cache.get(0).unwrap(), block);
        assert_eq!(lower.get(0).unwrap(), block);
    }

    #[test]
    fn writes_are_visible_on_lower_immediately() {
        let lower = Arc::new(RamDevice::new(8, 512));
        let cache = CachingDevice::new(lower.clone(), 1);
        cache.put(0, &vec![1u8; 512]).unwrap();
        cache.put(1, &vec![2u8; 512]).unwrap();
        assert_eq!(lower.get(0).unwrap(), vec![1u8; 512]);
        assert_eq!(lower.get(1).unwrap(), vec![2u8; 512]);
    }

    #[test]
    fn release_cascades_to_lower() {
        // `new` hands CachingDevice co-ownership via add_ref; the test's own
        // handle still needs its own release for the device to fully close.
        let lower = Arc::new(RamDevice::new(4, 512));
        let cache = CachingDevice::new(lower.clone(), 4);
        cache.put(0, &vec![9u8; 512]).unwrap();
        cache.release().unwrap();
        lower.release().unwrap();
        assert!(lower.get(0).is_err());
    }
}
