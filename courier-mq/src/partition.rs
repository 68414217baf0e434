use std::{
    fs,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use log::debug;

use courier_core::common::{
    error::{Error, Result},
    util::{atoi, binary_insert},
};

use crate::{
    config::SegmentConfig,
    segment::{Segment, INDEX_FILE_EXTENSION},
};

pub const PARTITION_DIR_PREFIX: &str = "part_";

/// The complete segmented log of one topic.
///
/// Segments are kept sorted ascending by base offset and are contiguous:
/// each base equals the previous segment's next offset. The last segment
/// is the only writable one.
#[derive(Debug)]
pub struct Partition {
    topic: String,
    dir: PathBuf,
    config: SegmentConfig,
    segments: Vec<Segment>,
}

impl Partition {
    pub fn open(topic: &str, partitions_dir: &Path, config: SegmentConfig) -> Result<Self> {
        let dir = partitions_dir.join(format!("{}{}", PARTITION_DIR_PREFIX, topic));
        fs::create_dir_all(&dir)
            .map_err(|error| Error::new_file(Some(error.into()), Some(format!("create {:?} failed", dir))))?;

        // one base offset per index/message file pair; numeric order, not
        // lexicographic
        let mut base_offsets: Vec<u64> = vec![];
        let entries =
            fs::read_dir(&dir).map_err(|error| Error::new_file(Some(error.into()), None))?;
        for entry in entries {
            let entry = entry.map_err(|error| Error::new_file(Some(error.into()), None))?;
            let path = entry.path();

            if !path.is_file() {
                continue;
            }

            let stem = path.file_stem().and_then(|v| v.to_str());
            let extension = path.extension().and_then(|v| v.to_str());

            if let (Some(stem), Some(INDEX_FILE_EXTENSION)) = (stem, extension) {
                let base_offset: u64 = atoi(stem.as_bytes())?;
                binary_insert(&mut base_offsets, base_offset, false);
            }
        }

        if base_offsets.is_empty() {
            base_offsets.push(0);
        }

        let mut segments = Vec::with_capacity(base_offsets.len());
        for base_offset in base_offsets {
            segments.push(Segment::open(&dir, base_offset, config)?);
        }

        debug!("partition {} opened with {} segment(s)", topic, segments.len());

        Ok(Partition {
            topic: topic.to_owned(),
            dir,
            config,
            segments,
        })
    }

    /// Appends to the writable segment, rolling over to a fresh segment
    /// at most once when it reports itself full.
    pub fn append(&mut self, payload: &[u8]) -> Result<u64> {
        let writable = self.segments.last_mut().expect("partition has no segments");

        match writable.append(payload) {
            Err(error) if error.is_capacity() => {
                let base_offset = writable.next_offset();
                debug!(
                    "partition {}: segment {} is full, rolling over to {}",
                    self.topic,
                    writable.base_offset(),
                    base_offset
                );

                let mut segment = Segment::open(&self.dir, base_offset, self.config)?;
                // a fresh segment refusing the first entry is a
                // configuration error and surfaces
                let offset = segment.append(payload)?;
                self.segments.push(segment);

                Ok(offset)
            }
            rst => rst,
        }
    }

    pub fn read(&mut self, offset: u64) -> Result<Bytes> {
        let index = floor_segment(&self.segments, offset).ok_or_else(|| {
            Error::new_end_of_stream(&format!("offset {} is not stored in partition {}", offset, self.topic))
        })?;

        self.segments[index].read(offset)
    }

    /// `None` until the first message is stored.
    pub fn latest_committed_offset(&self) -> Option<u64> {
        self.segments
            .last()
            .and_then(|writable| writable.next_offset().checked_sub(1))
    }

    pub fn next_offset(&self) -> u64 {
        self.segments
            .last()
            .expect("partition has no segments")
            .next_offset()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn close(self) -> Result<()> {
        for segment in self.segments {
            segment.close()?;
        }

        Ok(())
    }
}

/// Index of the last segment whose base offset is <= `offset`.
fn floor_segment(segments: &[Segment], offset: u64) -> Option<usize> {
    let index = segments.partition_point(|segment| segment.base_offset() <= offset);

    index.checked_sub(1)
}
