use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
};

use memmap::MmapMut;

use courier_core::common::error::{Error, Result};

pub const ID_SIZE: usize = 35;
pub const TOPIC_SIZE: usize = 35;
const READ_OFFSET_SIZE: usize = 8;

/// record = id(35, zero padded) + topic(35, zero padded) + read_offset(8)
pub const RECORD_SIZE: usize = ID_SIZE + TOPIC_SIZE + READ_OFFSET_SIZE;

/// Memory-mapped file of fixed-width consumer records covering the slot
/// range `[base_slot, next_slot)`.
///
/// The file grows one record at a time (flush, truncate up, remap) and
/// is truncated down to its data size on close, which also removes the
/// one-record stub mapped for files that never received an append.
pub struct ConsumerSegment {
    file: File,
    mmap: MmapMut,
    current_size: usize,
    max_size: usize,
    base_slot: u64,
    next_slot: u64,
}

impl ConsumerSegment {
    pub fn open(path: &Path, max_size: usize, base_slot: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|error| {
                Error::new_file(Some(error.into()), Some(format!("open consumer segment {:?} failed", path)))
            })?;

        let current_size = file
            .metadata()
            .map_err(|error| Error::new_file(Some(error.into()), None))?
            .len() as usize;

        if current_size > max_size {
            return Err(Error::new_file(
                None,
                Some(format!(
                    "consumer segment {:?} size {} exceeds the {} cap",
                    path, current_size, max_size
                )),
            ));
        }

        let next_slot = base_slot + (current_size / RECORD_SIZE) as u64;

        // an empty file cannot be mapped; give it one record of backing
        if current_size == 0 {
            file.set_len(RECORD_SIZE as u64)
                .map_err(|error| Error::new_file(Some(error.into()), None))?;
        }

        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|error| {
                Error::new_memory(Some(error.into()), Some("mapping consumer segment failed".to_owned()))
            })?
        };

        Ok(ConsumerSegment {
            file,
            mmap,
            current_size,
            max_size,
            base_slot,
            next_slot,
        })
    }

    /// Writes a record into the next free slot and returns its slot number.
    pub fn append(&mut self, id: &str, topic: &str, read_offset: u64) -> Result<u64> {
        validate(id, topic)?;

        if self.current_size + RECORD_SIZE > self.max_size {
            return Err(Error::new_capacity("consumer segment is out of space"));
        }

        // settle live records before the map is torn down for the grow
        self.mmap
            .flush()
            .map_err(|error| Error::new_memory(Some(error.into()), None))?;

        self.file
            .set_len((self.current_size + RECORD_SIZE) as u64)
            .map_err(|error| Error::new_file(Some(error.into()), Some("grow consumer segment failed".to_owned())))?;

        self.mmap = unsafe {
            MmapMut::map_mut(&self.file).map_err(|error| {
                Error::new_memory(Some(error.into()), Some("remapping consumer segment failed".to_owned()))
            })?
        };

        let record = encode_record(id, topic, read_offset);
        (&mut self.mmap[self.current_size..])
            .write_all(&record)
            .map_err(|error| Error::new_memory(Some(error.into()), None))?;

        self.mmap
            .flush()
            .map_err(|error| Error::new_memory(Some(error.into()), None))?;

        self.current_size += RECORD_SIZE;

        let slot = self.next_slot;
        self.next_slot += 1;

        Ok(slot)
    }

    /// Overwrites the record at `slot` in place. Logical deletion passes
    /// empty id and topic.
    pub fn write_at(&mut self, slot: u64, id: &str, topic: &str, read_offset: u64) -> Result<()> {
        validate(id, topic)?;

        let pos = self.slot_position(slot)?;

        let record = encode_record(id, topic, read_offset);
        (&mut self.mmap[pos..])
            .write_all(&record)
            .map_err(|error| Error::new_memory(Some(error.into()), None))?;

        self.mmap
            .flush_async()
            .map_err(|error| Error::new_memory(Some(error.into()), None))?;

        Ok(())
    }

    /// Returns (id, topic, read_offset), trimmed of zero padding. With
    /// `increment_offset` the stored offset is bumped by one in place.
    pub fn read(&mut self, slot: u64, increment_offset: bool) -> Result<(String, String, u64)> {
        if slot >= self.next_slot {
            return Err(Error::new_end_of_stream(&format!(
                "slot {} is past the last written slot",
                slot
            )));
        }

        let pos = self.slot_position(slot)?;

        let id = decode_field(&self.mmap[pos..pos + ID_SIZE]);
        let topic = decode_field(&self.mmap[pos + ID_SIZE..pos + ID_SIZE + TOPIC_SIZE]);

        let offset_pos = pos + ID_SIZE + TOPIC_SIZE;
        let read_offset = u64::from_be_bytes(
            self.mmap[offset_pos..offset_pos + READ_OFFSET_SIZE]
                .try_into()
                .expect("read_offset field is not satisfy"),
        );

        if increment_offset {
            self.mmap[offset_pos..offset_pos + READ_OFFSET_SIZE]
                .copy_from_slice(&(read_offset + 1).to_be_bytes());
        }

        Ok((id, topic, read_offset))
    }

    /// Refreshes only the offset field, without flushing; the change is
    /// persisted at the latest on close.
    pub fn write_read_offset(&mut self, slot: u64, read_offset: u64) -> Result<()> {
        let pos = self.slot_position(slot)? + ID_SIZE + TOPIC_SIZE;

        self.mmap[pos..pos + READ_OFFSET_SIZE].copy_from_slice(&read_offset.to_be_bytes());

        Ok(())
    }

    pub fn latest_committed_slot(&self) -> u64 {
        self.next_slot - 1
    }

    pub fn base_slot(&self) -> u64 {
        self.base_slot
    }

    pub fn next_slot(&self) -> u64 {
        self.next_slot
    }

    pub fn current_size(&self) -> usize {
        self.current_size
    }

    /// Flushes, unmaps and truncates tail padding away.
    pub fn close(self) -> Result<()> {
        self.mmap
            .flush()
            .map_err(|error| Error::new_memory(Some(error.into()), None))?;

        let ConsumerSegment {
            file,
            mmap,
            current_size,
            ..
        } = self;

        // the mapping must be gone before the file shrinks under it
        drop(mmap);

        file.set_len(current_size as u64)
            .map_err(|error| Error::new_file(Some(error.into()), Some("truncate consumer segment failed".to_owned())))?;

        Ok(())
    }

    fn slot_position(&self, slot: u64) -> Result<usize> {
        if slot < self.base_slot || slot >= self.next_slot {
            return Err(Error::new_out_of_range(&format!(
                "slot {} is outside [{}, {})",
                slot, self.base_slot, self.next_slot
            )));
        }

        Ok((slot - self.base_slot) as usize * RECORD_SIZE)
    }
}

pub(crate) fn validate(id: &str, topic: &str) -> Result<()> {
    if id.len() > ID_SIZE {
        return Err(Error::new_validation(&format!(
            "consumer id exceeds {} bytes: {}",
            ID_SIZE,
            id.len()
        )));
    }

    if topic.len() > TOPIC_SIZE {
        return Err(Error::new_validation(&format!(
            "topic exceeds {} bytes: {}",
            TOPIC_SIZE,
            topic.len()
        )));
    }

    Ok(())
}

fn encode_record(id: &str, topic: &str, read_offset: u64) -> [u8; RECORD_SIZE] {
    let mut record = [0u8; RECORD_SIZE];

    record[..id.len()].copy_from_slice(id.as_bytes());
    record[ID_SIZE..ID_SIZE + topic.len()].copy_from_slice(topic.as_bytes());
    record[ID_SIZE + TOPIC_SIZE..].copy_from_slice(&read_offset.to_be_bytes());

    record
}

fn decode_field(data: &[u8]) -> String {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());

    String::from_utf8_lossy(&data[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.consumer");

        let mut segment = ConsumerSegment::open(&path, 1024, 0).unwrap();

        assert_eq!(0, segment.append("analytics", "events", 3).unwrap());
        assert_eq!(1, segment.append("billing", "events", 7).unwrap());
        assert_eq!(2, segment.next_slot());
        assert_eq!(1, segment.latest_committed_slot());

        let (id, topic, read_offset) = segment.read(0, false).unwrap();
        assert_eq!(("analytics".to_owned(), "events".to_owned(), 3), (id, topic, read_offset));

        let rst = segment.read(2, false);
        assert!(rst.unwrap_err().is_end_of_stream());

        segment.close().unwrap();
    }

    #[test]
    fn test_read_increments_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.consumer");

        let mut segment = ConsumerSegment::open(&path, 1024, 0).unwrap();
        segment.append("analytics", "events", 5).unwrap();

        let (_, _, read_offset) = segment.read(0, true).unwrap();
        assert_eq!(5, read_offset);

        let (_, _, read_offset) = segment.read(0, false).unwrap();
        assert_eq!(6, read_offset);

        segment.close().unwrap();
    }

    #[test]
    fn test_write_at_tombstone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.consumer");

        let mut segment = ConsumerSegment::open(&path, 1024, 0).unwrap();
        segment.append("analytics", "events", 5).unwrap();

        segment.write_at(0, "", "", 5).unwrap();

        let (id, topic, read_offset) = segment.read(0, false).unwrap();
        assert_eq!("", id);
        assert_eq!("", topic);
        assert_eq!(5, read_offset);

        let rst = segment.write_at(1, "", "", 0);
        assert!(rst.is_err());

        segment.close().unwrap();
    }

    #[test]
    fn test_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.consumer");

        let mut segment = ConsumerSegment::open(&path, 1024, 0).unwrap();

        let long_id = "i".repeat(36);
        assert!(segment.append(&long_id, "events", 0).unwrap_err().is_validation());

        let long_topic = "t".repeat(36);
        assert!(segment.append("analytics", &long_topic, 0).unwrap_err().is_validation());

        segment.close().unwrap();
    }

    #[test]
    fn test_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.consumer");

        let mut segment = ConsumerSegment::open(&path, RECORD_SIZE * 2, 0).unwrap();

        segment.append("a", "events", 0).unwrap();
        segment.append("b", "events", 0).unwrap();

        let rst = segment.append("c", "events", 0);
        assert!(rst.unwrap_err().is_capacity());

        segment.close().unwrap();
    }

    #[test]
    fn test_close_truncates_to_data_size() {
        let dir = tempfile::tempdir().unwrap();

        // a never-appended segment loses its one-record stub on close
        let path = dir.path().join("0.consumer");
        let segment = ConsumerSegment::open(&path, 1024, 0).unwrap();
        assert_eq!(RECORD_SIZE as u64, std::fs::metadata(&path).unwrap().len());
        segment.close().unwrap();
        assert_eq!(0, std::fs::metadata(&path).unwrap().len());

        let mut segment = ConsumerSegment::open(&path, 1024, 0).unwrap();
        segment.append("a", "events", 0).unwrap();
        segment.append("b", "events", 0).unwrap();
        segment.close().unwrap();
        assert_eq!((RECORD_SIZE * 2) as u64, std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn test_reopen_with_base_slot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("918.consumer");

        let mut segment = ConsumerSegment::open(&path, 1024, 918).unwrap();
        assert_eq!(918, segment.next_slot());

        assert_eq!(918, segment.append("analytics", "events", 12).unwrap());
        assert_eq!(919, segment.append("billing", "events", 12).unwrap());
        segment.close().unwrap();

        let mut segment = ConsumerSegment::open(&path, 1024, 918).unwrap();
        assert_eq!(920, segment.next_slot());

        let (id, _, read_offset) = segment.read(919, false).unwrap();
        assert_eq!("billing", id);
        assert_eq!(12, read_offset);

        let rst = segment.read(917, false);
        assert!(rst.is_err());

        segment.close().unwrap();
    }
}
