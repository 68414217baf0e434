use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use log::debug;

use courier_core::common::{
    error::{Error, Result},
    util::{atoi, binary_insert},
};

use super::{
    segment::{validate, ConsumerSegment},
    Consumer, CONSUMER_FILE_EXTENSION,
};

const MIN_SEGMENT_SIZE: usize = 70 * 1024;
const DEFAULT_SEGMENT_SIZE: usize = 2 * 1024 * 1024;

/// A live subscription. The read offset advances in memory on ack and is
/// written back to the mapped record on the next offset lookup.
#[derive(Debug)]
struct ConsumerEntry {
    id: String,
    topic: String,
    slot: u64,
    read_offset: AtomicU64,
}

/// All consumer segments plus the in-memory topic index over their live
/// records. Mutations serialize on one registry lock; an ack is a single
/// atomic increment on the shared entry, so acks for different consumers
/// never contend.
pub struct ConsumerRegistry {
    dir: PathBuf,
    max_size: usize,
    inner: Mutex<RegistryInner>,
}

struct RegistryInner {
    /// Ascending by base slot; the last one is active.
    segments: Vec<ConsumerSegment>,
    topics: HashMap<String, Vec<Arc<ConsumerEntry>>>,
}

impl ConsumerRegistry {
    pub fn open(dir: &Path, max_size: usize) -> Result<Self> {
        let max_size = sanitize_max_size(max_size);

        fs::create_dir_all(dir)
            .map_err(|error| Error::new_file(Some(error.into()), Some(format!("create {:?} failed", dir))))?;

        let mut base_slots: Vec<u64> = vec![];
        let entries = fs::read_dir(dir).map_err(|error| Error::new_file(Some(error.into()), None))?;
        for entry in entries {
            let entry = entry.map_err(|error| Error::new_file(Some(error.into()), None))?;
            let path = entry.path();

            if !path.is_file() {
                continue;
            }

            let stem = path.file_stem().and_then(|v| v.to_str());
            let extension = path.extension().and_then(|v| v.to_str());

            if let (Some(stem), Some(CONSUMER_FILE_EXTENSION)) = (stem, extension) {
                let base_slot: u64 = atoi(stem.as_bytes())?;
                binary_insert(&mut base_slots, base_slot, false);
            }
        }

        let mut segments = Vec::with_capacity(base_slots.len());
        let mut topics: HashMap<String, Vec<Arc<ConsumerEntry>>> = HashMap::new();

        for base_slot in base_slots {
            let mut segment =
                ConsumerSegment::open(&dir.join(consumer_file_name(base_slot)), max_size, base_slot)?;

            for slot in segment.base_slot()..segment.next_slot() {
                let (id, topic, read_offset) = segment.read(slot, false)?;

                // unsubscribed slots stay on disk but are not loaded
                if id.is_empty() && topic.is_empty() {
                    continue;
                }

                let entry = Arc::new(ConsumerEntry {
                    id,
                    topic: topic.clone(),
                    slot,
                    read_offset: AtomicU64::new(read_offset),
                });
                topics.entry(topic).or_default().push(entry);
            }

            segments.push(segment);
        }

        if segments.is_empty() {
            segments.push(ConsumerSegment::open(&dir.join(consumer_file_name(0)), max_size, 0)?);
        }

        debug!(
            "consumer registry opened with {} segment(s), {} topic(s)",
            segments.len(),
            topics.len()
        );

        Ok(ConsumerRegistry {
            dir: dir.to_owned(),
            max_size,
            inner: Mutex::new(RegistryInner { segments, topics }),
        })
    }

    /// Persists a subscription. Adding an already-live (id, topic) pair
    /// changes nothing. Rolls to a fresh segment at most once when the
    /// active one is full.
    pub fn add(&self, consumer: &Consumer) -> Result<()> {
        validate(&consumer.id, &consumer.topic)?;

        let mut inner = self.inner.lock().expect("lock consumer registry");

        if let Some(entries) = inner.topics.get(&consumer.topic) {
            if entries.iter().any(|entry| entry.id == consumer.id) {
                return Ok(());
            }
        }

        let rst = inner
            .segments
            .last_mut()
            .expect("registry has no segments")
            .append(&consumer.id, &consumer.topic, consumer.read_offset);

        let slot = match rst {
            Err(error) if error.is_capacity() => {
                let base_slot = inner
                    .segments
                    .last()
                    .expect("registry has no segments")
                    .latest_committed_slot()
                    + 1;
                debug!("consumer registry rolling over to segment {}", base_slot);

                let mut segment =
                    ConsumerSegment::open(&self.dir.join(consumer_file_name(base_slot)), self.max_size, base_slot)?;
                // a fresh segment refusing the first record is a
                // configuration error and surfaces
                let slot = segment.append(&consumer.id, &consumer.topic, consumer.read_offset)?;
                inner.segments.push(segment);

                slot
            }
            rst => rst?,
        };

        let entry = Arc::new(ConsumerEntry {
            id: consumer.id.clone(),
            topic: consumer.topic.clone(),
            slot,
            read_offset: AtomicU64::new(consumer.read_offset),
        });
        inner.topics.entry(consumer.topic.clone()).or_default().push(entry);

        Ok(())
    }

    /// Current read offset of a consumer. The mapped record is refreshed
    /// to the in-memory value on the way, persisting any acks since the
    /// previous lookup.
    pub fn read_offset(&self, id: &str, topic: &str) -> Result<u64> {
        let mut inner = self.inner.lock().expect("lock consumer registry");

        let entry = find_entry(&inner.topics, id, topic)?.clone();
        let read_offset = entry.read_offset.load(Ordering::SeqCst);

        let RegistryInner { segments, .. } = &mut *inner;
        let index = floor_segment(segments, entry.slot).ok_or_else(|| {
            Error::new_not_found(&format!("no consumer segment owns slot {}", entry.slot))
        })?;
        segments[index].write_read_offset(entry.slot, read_offset)?;

        Ok(read_offset)
    }

    /// Advances the in-memory read offset by one. The disk record catches
    /// up on the consumer's next read, not here.
    pub fn ack(&self, id: &str, topic: &str) -> Result<()> {
        let entry = {
            let inner = self.inner.lock().expect("lock consumer registry");
            find_entry(&inner.topics, id, topic)?.clone()
        };

        entry.read_offset.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    /// Tombstones the record on disk and drops the entry from the topic
    /// index. The slot is not reclaimed.
    pub fn remove(&self, id: &str, topic: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("lock consumer registry");
        let RegistryInner { segments, topics } = &mut *inner;

        let entries = topics
            .get_mut(topic)
            .ok_or_else(|| Error::new_not_found(&format!("topic {} not found", topic)))?;
        let position = entries
            .iter()
            .position(|entry| entry.id == id)
            .ok_or_else(|| Error::new_not_found(&format!("consumer {} not found for topic {}", id, topic)))?;

        let entry = &entries[position];
        let read_offset = entry.read_offset.load(Ordering::SeqCst);

        let index = floor_segment(segments, entry.slot).ok_or_else(|| {
            Error::new_not_found(&format!("no consumer segment owns slot {}", entry.slot))
        })?;
        segments[index].write_at(entry.slot, "", "", read_offset)?;

        entries.remove(position);
        if entries.is_empty() {
            topics.remove(topic);
        }

        Ok(())
    }

    /// Snapshot of a topic's live consumers.
    pub fn consumers_for_topic(&self, topic: &str) -> Result<Vec<Consumer>> {
        let inner = self.inner.lock().expect("lock consumer registry");

        let entries = inner
            .topics
            .get(topic)
            .ok_or_else(|| Error::new_not_found(&format!("topic {} not found", topic)))?;

        Ok(entries
            .iter()
            .map(|entry| Consumer {
                id: entry.id.clone(),
                topic: entry.topic.clone(),
                read_offset: entry.read_offset.load(Ordering::SeqCst),
                slot: entry.slot,
                auto_commit: false,
            })
            .collect())
    }

    pub fn topic_count(&self) -> usize {
        self.inner.lock().expect("lock consumer registry").topics.len()
    }

    pub fn close(self) -> Result<()> {
        let inner = self.inner.into_inner().expect("lock consumer registry");

        for segment in inner.segments {
            segment.close()?;
        }

        Ok(())
    }
}

fn find_entry<'a>(
    topics: &'a HashMap<String, Vec<Arc<ConsumerEntry>>>,
    id: &str,
    topic: &str,
) -> Result<&'a Arc<ConsumerEntry>> {
    let entries = topics
        .get(topic)
        .ok_or_else(|| Error::new_not_found(&format!("topic {} not found", topic)))?;

    entries
        .iter()
        .find(|entry| entry.id == id)
        .ok_or_else(|| Error::new_not_found(&format!("consumer {} not found for topic {}", id, topic)))
}

/// Index of the last segment whose base slot is <= `slot`.
fn floor_segment(segments: &[ConsumerSegment], slot: u64) -> Option<usize> {
    let index = segments.partition_point(|segment| segment.base_slot() <= slot);

    index.checked_sub(1)
}

fn consumer_file_name(base_slot: u64) -> String {
    format!("{}.{}", base_slot, CONSUMER_FILE_EXTENSION)
}

/// Below 70 KiB the per-file overhead dominates and capacity checks stop
/// meaning anything, so unusable caps fall back to 2 MiB.
fn sanitize_max_size(max_size: usize) -> usize {
    if max_size == 0 || max_size < MIN_SEGMENT_SIZE {
        DEFAULT_SEGMENT_SIZE
    } else {
        max_size
    }
}

#[cfg(test)]
mod tests {
    use super::{super::segment::RECORD_SIZE, *};
    use crate::config::ConsumerConfig;

    fn consumer(id: &str, topic: &str) -> Consumer {
        Consumer::new(id, topic, ConsumerConfig::default())
    }

    #[test]
    fn test_add_read_ack_remove() {
        let dir = tempfile::tempdir().unwrap();

        let registry = ConsumerRegistry::open(dir.path(), 0).unwrap();

        let consumer = consumer("analytics", "events");
        registry.add(&consumer).unwrap();

        assert_eq!(0, registry.read_offset("analytics", "events").unwrap());

        registry.ack("analytics", "events").unwrap();
        registry.ack("analytics", "events").unwrap();
        assert_eq!(2, registry.read_offset("analytics", "events").unwrap());

        registry.remove("analytics", "events").unwrap();
        assert!(registry.read_offset("analytics", "events").unwrap_err().is_not_found());
        assert!(registry.ack("analytics", "events").unwrap_err().is_not_found());
        assert!(registry.remove("analytics", "events").unwrap_err().is_not_found());

        registry.close().unwrap();
    }

    #[test]
    fn test_add_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();

        let registry = ConsumerRegistry::open(dir.path(), 0).unwrap();

        let mut consumer = consumer("analytics", "events");
        consumer.read_offset = 5;
        registry.add(&consumer).unwrap();

        registry.ack("analytics", "events").unwrap();

        // a second add of the live pair changes nothing
        registry.add(&consumer).unwrap();
        assert_eq!(6, registry.read_offset("analytics", "events").unwrap());
        assert_eq!(1, registry.consumers_for_topic("events").unwrap().len());

        registry.close().unwrap();
    }

    #[test]
    fn test_recovery_skips_tombstones() {
        let dir = tempfile::tempdir().unwrap();

        {
            let registry = ConsumerRegistry::open(dir.path(), 0).unwrap();
            registry.add(&consumer("a", "events")).unwrap();
            registry.add(&consumer("b", "events")).unwrap();
            registry.add(&consumer("c", "orders")).unwrap();
            registry.remove("b", "events").unwrap();
            registry.close().unwrap();
        }

        // the tombstoned slot stays on disk
        let consumer_file = dir.path().join("0.consumer");
        assert_eq!((RECORD_SIZE * 3) as u64, fs::metadata(&consumer_file).unwrap().len());

        let registry = ConsumerRegistry::open(dir.path(), 0).unwrap();
        assert_eq!(2, registry.topic_count());
        assert_eq!(1, registry.consumers_for_topic("events").unwrap().len());
        assert!(registry.read_offset("b", "events").unwrap_err().is_not_found());

        // a re-subscribe takes a fresh slot
        registry.add(&consumer("b", "events")).unwrap();
        let consumers = registry.consumers_for_topic("events").unwrap();
        let entry = consumers.iter().find(|c| c.id == "b").unwrap();
        assert_eq!(3, entry.slot);

        registry.close().unwrap();
    }

    #[test]
    fn test_ack_survives_reopen_after_lookup() {
        let dir = tempfile::tempdir().unwrap();

        {
            let registry = ConsumerRegistry::open(dir.path(), 0).unwrap();
            registry.add(&consumer("analytics", "events")).unwrap();
            registry.ack("analytics", "events").unwrap();
            // the lookup writes the acked offset back into the record
            assert_eq!(1, registry.read_offset("analytics", "events").unwrap());
            registry.close().unwrap();
        }

        let registry = ConsumerRegistry::open(dir.path(), 0).unwrap();
        assert_eq!(1, registry.read_offset("analytics", "events").unwrap());

        registry.close().unwrap();
    }

    #[test]
    fn test_rollover_at_min_cap() {
        let dir = tempfile::tempdir().unwrap();

        // 70 KiB holds 918 records; the 919th subscribe must roll over
        let registry = ConsumerRegistry::open(dir.path(), MIN_SEGMENT_SIZE).unwrap();

        for i in 0..920 {
            registry.add(&consumer(&format!("c{}", i), "events")).unwrap();
        }

        assert!(dir.path().join("918.consumer").is_file());

        let consumers = registry.consumers_for_topic("events").unwrap();
        assert_eq!(920, consumers.len());
        assert_eq!(919, consumers.iter().map(|c| c.slot).max().unwrap());

        registry.close().unwrap();

        assert_eq!(
            (RECORD_SIZE * 918) as u64,
            fs::metadata(dir.path().join("0.consumer")).unwrap().len()
        );
        assert_eq!(
            (RECORD_SIZE * 2) as u64,
            fs::metadata(dir.path().join("918.consumer")).unwrap().len()
        );
    }
}
