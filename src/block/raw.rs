//! Raw backends: a host-file-backed device and a RAM-backed device.
//!
//! Both are the bottom of the stack — there is no lower device to delegate
//! to, so `release` on the last reference is where the backing resource
//! actually goes away.
use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::Path,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use super::BlockDevice;
use crate::error::{EfsError, Result};

/// Returns the exact number of bytes a backing store must provide to host
/// `block_count` blocks of `block_size` bytes each.
pub fn size_in_bytes(block_count: u64, block_size: usize) -> u64 {
    block_count * block_size as u64
}

/// A block device backed by a regular host file, sized to exactly
/// `block_count * block_size` bytes.
pub struct FileDevice {
    file: Mutex<Option<File>>,
    block_size: usize,
    block_count: u64,
    refs: AtomicUsize,
}

impl FileDevice {
    /// Opens (creating if absent) a host file sized for `block_count` blocks
    /// of `block_size` bytes, returning a device with one outstanding
    /// reference.
    pub fn open(path: impl AsRef<Path>, block_count: u64, block_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len(size_in_bytes(block_count, block_size))?;
        Ok(Self {
            file: Mutex::new(Some(file)),
            block_size,
            block_count,
            refs: AtomicUsize::new(1),
        })
    }
}

impl BlockDevice for FileDevice {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn get(&self, blkno: u64) -> Result<Vec<u8>> {
        if blkno >= self.block_count {
            return Err(super::out_of_range(blkno, self.block_count));
        }
        let mut guard = self.file.lock().unwrap();
        let file = guard.as_mut().ok_or_else(closed)?;
        let mut buf = vec![0u8; self.block_size];
        file.seek(SeekFrom::Start(blkno * self.block_size as u64))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn put(&self, blkno: u64, block: &[u8]) -> Result<()> {
        if blkno >= self.block_count {
            return Err(super::out_of_range(blkno, self.block_count));
        }
        if block.len() != self.block_size {
            return Err(EfsError::InvalidArg);
        }
        let mut guard = self.file.lock().unwrap();
        let file = guard.as_mut().ok_or_else(closed)?;
        file.seek(SeekFrom::Start(blkno * self.block_size as u64))?;
        file.write_all(block)?;
        Ok(())
    }

    fn add_ref(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) -> Result<()> {
        if self.refs.fetch_sub(1, Ordering::SeqCst) == 1 {
            let mut guard = self.file.lock().unwrap();
            if let Some(file) = guard.as_mut() {
                file.sync_all()?;
            }
            *guard = None;
        }
        Ok(())
    }
}

/// A block device backed by a zero-initialised in-memory buffer.
pub struct RamDevice {
    data: Mutex<Option<Vec<u8>>>,
    block_size: usize,
    block_count: u64,
    refs: AtomicUsize,
}

impl RamDevice {
    /// Allocates a zeroed buffer for `block_count` blocks of `block_size`
    /// bytes, returning a device with one outstanding reference.
    pub fn new(block_count: u64, block_size: usize) -> Self {
        let len = size_in_bytes(block_count, block_size) as usize;
        Self {
            data: Mutex::new(Some(vec![0u8; len])),
            block_size,
            block_count,
            refs: AtomicUsize::new(1),
        }
    }
}

impl BlockDevice for RamDevice {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn get(&self, blkno: u64) -> Result<Vec<u8>> {
        if blkno >= self.block_count {
            return Err(super::out_of_range(blkno, self.block_count));
        }
        let guard = self.data.lock().unwrap();
        let data = guard.as_ref().ok_or_else(closed)?;
        let start = blkno as usize * self.block_size;
        Ok(data[start..start + self.block_size].to_vec())
    }

    fn put(&self, blkno: u64, block: &[u8]) -> Result<()> {
        if blkno >= self.block_count {
            return Err(super::out_of_range(blkno, self.block_count));
        }
        if block.len() != self.block_size {
            return Err(EfsError::InvalidArg);
        }
        let mut guard = self.data.lock().unwrap();
        let data = guard.as_mut().ok_or_else(closed)?;
        let start = blkno as usize * self.block_size;
        data[start..start + self.block_size].copy_from_slice(block);
        Ok(())
    }

    fn add_ref(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) -> Result<()> {
        if self.refs.fetch_sub(1, Ordering::SeqCst) == 1 {
            *self.data.lock().unwrap() = None;
        }
        Ok(())
    }
}

fn closed() -> EfsError {
    EfsError::Io(io::Error::new(
        io::ErrorKind::NotConnected,
        "block device released",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_device_round_trips_and_zero_inits() {
        let dev = RamDevice::new(4, 512);
        assert_eq!(dev.get(0).unwrap(), vec![0u8; 512]);
        let mut block = vec![7u8; 512];
        dev.put(2, &block).unwrap();
        assert_eq!(dev.get(2).unwrap(), block);
        block[0] = 9;
        assert_ne!(dev.get(2).unwrap(), block);
    }

    #[test]
    fn ram_device_rejects_out_of_range() {
        let dev = RamDevice::new(2, 512);
        assert!(matches!(dev.get(2), Err(EfsError::Io(_))));
    }

    #[test]
    fn ram_device_frees_on_last_release() {
        let dev = RamDevice::new(1, 512);
        dev.add_ref();
        dev.release().unwrap();
        assert!(dev.get(0).is_ok());
        dev.release().unwrap();
        assert!(dev.get(0).is_err());
    }

    #[test]
    fn file_device_round_trips() {
        let dir = std::env::temp_dir().join(format!("efs-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("disk.img");
        let dev = FileDevice::open(&path, 4, 512).unwrap();
        let block = vec![42u8; 512];
        dev.put(1, &block).unwrap();
        assert_eq!(dev.get(1).unwrap(), block);
        dev.release().unwrap();
        let _ = std::fs::remove_file(&path);
    }
}
