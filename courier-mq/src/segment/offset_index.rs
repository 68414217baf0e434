use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
};

use bytes::{BufMut, Bytes, BytesMut};
use memmap::MmapMut;

use courier_core::common::error::{Error, Result};

pub const ENTRY_SIZE: usize = 16;
const OFFSET_SIZE: usize = 8;

/// entry = offset(8) + position(8)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    offset: u64,
    position: u64,
}

impl IndexEntry {
    pub fn new(offset: u64, position: u64) -> Self {
        IndexEntry { offset, position }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn position(&self) -> u64 {
        self.position
    }
}

impl From<IndexEntry> for Bytes {
    fn from(entry: IndexEntry) -> Self {
        let mut rst = BytesMut::with_capacity(ENTRY_SIZE);
        rst.put_u64(entry.offset);
        rst.put_u64(entry.position);

        rst.into()
    }
}

impl TryFrom<&[u8]> for IndexEntry {
    type Error = Error;

    fn try_from(data: &[u8]) -> Result<Self> {
        if data.len() < ENTRY_SIZE {
            Err(Error::new_decode(&format!(
                "data is too short to decode an index entry: {}",
                data.len()
            )))?;
        }

        let offset = u64::from_be_bytes(data[0..OFFSET_SIZE].try_into().expect("data[0..8] is not satisfy"));
        let position =
            u64::from_be_bytes(data[OFFSET_SIZE..ENTRY_SIZE].try_into().expect("data[8..16] is not satisfy"));

        Ok(IndexEntry::new(offset, position))
    }
}

/// Memory-mapped table of fixed-width entries mapping a logical offset
/// to a byte position in the matching message file.
///
/// The file is padded up to the cap while open (the whole mapped range
/// must be backed) and truncated back to the data size on close, so a
/// cleanly closed index is exactly `entries * 16` bytes on disk.
#[derive(Debug)]
pub struct OffsetIndex {
    file: File,
    mmap: MmapMut,
    current_size: usize,
    max_size: usize,
}

impl OffsetIndex {
    pub fn open(path: &Path, max_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|error| {
                Error::new_file(Some(error.into()), Some(format!("open index file {:?} failed", path)))
            })?;

        let actual_size = file
            .metadata()
            .map_err(|error| Error::new_file(Some(error.into()), None))?
            .len() as usize;

        file.set_len(max_size as u64)
            .map_err(|error| Error::new_file(Some(error.into()), Some("pad index file to cap failed".to_owned())))?;

        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|error| {
                Error::new_memory(Some(error.into()), Some("mapping index file failed".to_owned()))
            })?
        };

        let current_size = recover_data_size(&mmap, actual_size.min(max_size), max_size);

        Ok(OffsetIndex {
            file,
            mmap,
            current_size,
            max_size,
        })
    }

    /// Appends one entry and synchronously flushes the mapping.
    pub fn append(&mut self, offset: u64, position: u64) -> Result<()> {
        if self.current_size + ENTRY_SIZE > self.max_size {
            return Err(Error::new_capacity("offset index is out of space"));
        }

        let entry: Bytes = IndexEntry::new(offset, position).into();
        (&mut self.mmap[self.current_size..])
            .write_all(&entry)
            .map_err(|error| {
                Error::new_memory(Some(error.into()), Some("writing index entry failed".to_owned()))
            })?;
        self.current_size += ENTRY_SIZE;

        self.mmap
            .flush()
            .map_err(|error| Error::new_memory(Some(error.into()), Some("index msync failed".to_owned())))?;

        Ok(())
    }

    /// Byte position held by the segment-relative entry `index`.
    pub fn read(&self, index: usize) -> Result<u64> {
        if (index + 1) * ENTRY_SIZE > self.current_size {
            return Err(Error::new_out_of_range(&format!(
                "index entry {} is past the {} stored entries",
                index,
                self.count()
            )));
        }

        let start = index * ENTRY_SIZE;
        let entry = IndexEntry::try_from(&self.mmap[start..start + ENTRY_SIZE])?;

        Ok(entry.position())
    }

    pub fn last_entry(&self) -> Option<IndexEntry> {
        if self.current_size < ENTRY_SIZE {
            return None;
        }

        let start = self.current_size - ENTRY_SIZE;
        IndexEntry::try_from(&self.mmap[start..start + ENTRY_SIZE]).ok()
    }

    pub fn count(&self) -> usize {
        self.current_size / ENTRY_SIZE
    }

    pub fn is_full(&self) -> bool {
        self.current_size + ENTRY_SIZE > self.max_size
    }

    pub fn current_size(&self) -> usize {
        self.current_size
    }

    /// Flushes, unmaps and truncates the padding away, leaving the file
    /// at its exact data size for the next recovery.
    pub fn close(self) -> Result<()> {
        self.mmap
            .flush()
            .map_err(|error| Error::new_memory(Some(error.into()), Some("index msync failed".to_owned())))?;

        let OffsetIndex {
            file,
            mmap,
            current_size,
            ..
        } = self;

        // the mapping must be gone before the file shrinks under it
        drop(mmap);

        file.set_len(current_size as u64)
            .map_err(|error| Error::new_file(Some(error.into()), Some("truncate index file failed".to_owned())))?;

        Ok(())
    }
}

/// A clean close truncates the file to an exact multiple of the entry
/// size below the cap, so such a size is authoritative as-is. That keeps
/// a lone `(0, 0)` entry (the first message of a base-0 segment, 16 zero
/// bytes) recoverable. Anything else means a crash left the file padded
/// to the cap; walk back over trailing all-zero entries to find the last
/// real one.
fn recover_data_size(mmap: &MmapMut, actual_size: usize, max_size: usize) -> usize {
    if actual_size < max_size && actual_size % ENTRY_SIZE == 0 {
        return actual_size;
    }

    let mut size = actual_size - actual_size % ENTRY_SIZE;

    while size >= ENTRY_SIZE && mmap[size - ENTRY_SIZE..size].iter().all(|b| *b == 0) {
        size -= ENTRY_SIZE;
    }

    size
}
