pub mod message_file;
pub mod offset_index;

use std::path::Path;

use bytes::Bytes;

use courier_core::common::error::{Error, Result};

use crate::config::SegmentConfig;

use self::{message_file::MessageFile, offset_index::OffsetIndex};

pub const INDEX_FILE_EXTENSION: &str = "index";
pub const MESSAGE_FILE_EXTENSION: &str = "message";

pub fn segment_file_name(base_offset: u64, extension: &str) -> String {
    format!("{}.{}", base_offset, extension)
}

/// One slice of a topic log: the offset index plus the message file that
/// share a base offset. Holds exactly the offsets `[base, next_offset)`.
#[derive(Debug)]
pub struct Segment {
    base_offset: u64,
    next_offset: u64,
    index: OffsetIndex,
    message_file: MessageFile,
}

impl Segment {
    pub fn open(dir: &Path, base_offset: u64, config: SegmentConfig) -> Result<Self> {
        let index = OffsetIndex::open(
            &dir.join(segment_file_name(base_offset, INDEX_FILE_EXTENSION)),
            config.max_index_size,
        )?;
        let message_file = MessageFile::open(
            &dir.join(segment_file_name(base_offset, MESSAGE_FILE_EXTENSION)),
            config.max_message_size as u64,
        )?;

        // an empty index means a fresh segment; otherwise resume one past
        // the highest stored offset
        let next_offset = match index.last_entry() {
            Some(entry) => entry.offset() + 1,
            None => base_offset,
        };

        Ok(Segment {
            base_offset,
            next_offset,
            index,
            message_file,
        })
    }

    /// Appends a payload and returns its logical offset.
    ///
    /// A capacity error from either file surfaces untouched; the owning
    /// partition treats it as the rollover signal. When the message file
    /// took the payload but the index refused the entry, the orphan tail
    /// is unreachable by offset lookup and stays dead space.
    pub fn append(&mut self, payload: &[u8]) -> Result<u64> {
        let position = self.message_file.append(payload)?;
        self.index.append(self.next_offset, position)?;
        self.next_offset += 1;

        Ok(self.next_offset - 1)
    }

    pub fn read(&mut self, offset: u64) -> Result<Bytes> {
        if offset >= self.next_offset {
            return Err(Error::new_end_of_stream(&format!("offset {} is not yet stored", offset)));
        }

        let position = self.index.read((offset - self.base_offset) as usize)?;
        self.message_file.read(position)
    }

    pub fn is_full(&self) -> bool {
        self.index.is_full() || self.message_file.is_full()
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Message file first, then the index: the index truncation must be
    /// the last write so recovery sees a consistent entry count.
    pub fn close(self) -> Result<()> {
        let Segment {
            index, message_file, ..
        } = self;

        message_file.close()?;
        index.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment_config() -> SegmentConfig {
        SegmentConfig {
            max_index_size: 1024,
            max_message_size: 1024 * 3,
        }
    }

    #[test]
    fn test_append_read() {
        let dir = tempfile::tempdir().unwrap();

        let mut segment = Segment::open(dir.path(), 0, segment_config()).unwrap();

        assert_eq!(0, segment.append(b"hello").unwrap());
        assert_eq!(1, segment.append(b"bye").unwrap());
        assert_eq!(2, segment.next_offset());

        assert_eq!(Bytes::from_static(b"hello"), segment.read(0).unwrap());
        assert_eq!(Bytes::from_static(b"bye"), segment.read(1).unwrap());

        let rst = segment.read(2);
        assert!(rst.unwrap_err().is_end_of_stream());

        segment.close().unwrap();
    }

    #[test]
    fn test_reopen_resumes_offsets() {
        let dir = tempfile::tempdir().unwrap();

        let mut segment = Segment::open(dir.path(), 0, segment_config()).unwrap();
        segment.append(b"one").unwrap();
        segment.append(b"two").unwrap();
        segment.close().unwrap();

        let mut segment = Segment::open(dir.path(), 0, segment_config()).unwrap();
        assert_eq!(2, segment.next_offset());
        assert_eq!(Bytes::from_static(b"one"), segment.read(0).unwrap());
        assert_eq!(2, segment.append(b"three").unwrap());

        segment.close().unwrap();
    }

    #[test]
    fn test_single_message_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let mut segment = Segment::open(dir.path(), 0, segment_config()).unwrap();
        assert_eq!(0, segment.append(b"only").unwrap());
        segment.close().unwrap();

        let mut segment = Segment::open(dir.path(), 0, segment_config()).unwrap();
        assert_eq!(1, segment.next_offset());
        assert_eq!(Bytes::from_static(b"only"), segment.read(0).unwrap());
        assert_eq!(1, segment.append(b"next").unwrap());

        segment.close().unwrap();
    }

    #[test]
    fn test_nonzero_base() {
        let dir = tempfile::tempdir().unwrap();

        let mut segment = Segment::open(dir.path(), 6, segment_config()).unwrap();
        assert_eq!(6, segment.next_offset());

        assert_eq!(6, segment.append(b"six").unwrap());
        assert_eq!(7, segment.append(b"seven").unwrap());
        assert_eq!(Bytes::from_static(b"seven"), segment.read(7).unwrap());

        segment.close().unwrap();
    }

    #[test]
    fn test_capacity_surfaces() {
        let dir = tempfile::tempdir().unwrap();

        let config = SegmentConfig {
            max_index_size: 1024,
            max_message_size: 300,
        };

        let mut segment = Segment::open(dir.path(), 0, config).unwrap();
        let payload = [b'm'; 39]; // 47 bytes per entry with the prefix

        for i in 0..6 {
            assert_eq!(i, segment.append(&payload).unwrap());
        }

        let rst = segment.append(&payload);
        assert!(rst.unwrap_err().is_capacity());
        assert_eq!(6, segment.next_offset());

        segment.close().unwrap();
    }
}
