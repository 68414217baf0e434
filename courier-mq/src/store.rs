use std::{
    collections::HashMap,
    fs,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use bytes::Bytes;
use log::debug;

use courier_core::common::error::{Error, Result};

use crate::{
    config::{SegmentConfig, StoreConfig},
    consumer::{registry::ConsumerRegistry, segment::TOPIC_SIZE, Consumer},
    partition::Partition,
};

/// Binds the topic logs and the consumer registry behind the public
/// publish / subscribe / read / ack / unsubscribe surface.
///
/// Partitions open lazily on first use and stay open until `close`. All
/// storage calls block; async callers should run them on a blocking
/// executor.
pub struct Store {
    partitions_dir: PathBuf,
    segment_config: SegmentConfig,
    partitions: Mutex<HashMap<String, Arc<Mutex<Partition>>>>,
    registry: ConsumerRegistry,
}

impl Store {
    pub fn open(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.partitions_dir).map_err(|error| {
            Error::new_file(
                Some(error.into()),
                Some(format!("create {:?} failed", config.partitions_dir)),
            )
        })?;

        let registry = ConsumerRegistry::open(&config.consumers_dir, config.consumer.max_size)?;

        debug!("store opened over {:?}", config.partitions_dir);

        Ok(Store {
            partitions_dir: config.partitions_dir,
            segment_config: config.segment,
            partitions: Mutex::new(HashMap::new()),
            registry,
        })
    }

    /// Publishes a payload and returns its logical offset within the topic.
    pub fn append(&self, topic: &str, payload: &[u8]) -> Result<u64> {
        validate_topic(topic)?;

        let partition = self.partition(topic)?;
        let mut partition = partition.lock().expect("lock partition");

        partition.append(payload)
    }

    /// Reads the message at the consumer's current offset. `EndOfStream`
    /// means the consumer has caught up. With `auto_commit` set the
    /// offset advances right after a successful read.
    pub fn read(&self, consumer: &Consumer) -> Result<Bytes> {
        let read_offset = self.registry.read_offset(&consumer.id, &consumer.topic)?;

        let partition = self.partition(&consumer.topic)?;
        let payload = {
            let mut partition = partition.lock().expect("lock partition");
            partition.read(read_offset)?
        };

        if consumer.auto_commit {
            self.registry.ack(&consumer.id, &consumer.topic)?;
        }

        Ok(payload)
    }

    /// Subscribes a consumer to its topic, starting at the offset after
    /// the latest committed one so only future messages are seen.
    /// Subscribing an already-live (id, topic) pair changes nothing.
    pub fn add_consumer(&self, consumer: Consumer) -> Result<()> {
        let partition = self.partition(&consumer.topic)?;
        let read_offset = {
            let partition = partition.lock().expect("lock partition");
            partition.latest_committed_offset().map(|o| o + 1).unwrap_or(0)
        };

        let mut consumer = consumer;
        consumer.read_offset = read_offset;

        self.registry.add(&consumer)
    }

    /// Acknowledges one message: the consumer's next read moves one
    /// offset forward.
    pub fn ack(&self, id: &str, topic: &str) -> Result<()> {
        self.registry.ack(id, topic)
    }

    pub fn remove_consumer(&self, consumer: &Consumer) -> Result<()> {
        self.registry.remove(&consumer.id, &consumer.topic)
    }

    pub fn consumers_for_topic(&self, topic: &str) -> Result<Vec<Consumer>> {
        self.registry.consumers_for_topic(topic)
    }

    pub fn close(self) -> Result<()> {
        self.registry.close()?;

        let partitions = self.partitions.into_inner().expect("lock partitions");
        for (_, partition) in partitions {
            match Arc::try_unwrap(partition) {
                Ok(partition) => partition.into_inner().expect("lock partition").close()?,
                Err(_) => return Err(Error::new_general("partition is still in use at close")),
            }
        }

        Ok(())
    }

    fn partition(&self, topic: &str) -> Result<Arc<Mutex<Partition>>> {
        let mut partitions = self.partitions.lock().expect("lock partitions");

        if let Some(partition) = partitions.get(topic) {
            return Ok(partition.clone());
        }

        let partition = Arc::new(Mutex::new(Partition::open(
            topic,
            &self.partitions_dir,
            self.segment_config,
        )?));
        partitions.insert(topic.to_owned(), partition.clone());

        Ok(partition)
    }
}

fn validate_topic(topic: &str) -> Result<()> {
    if topic.len() > TOPIC_SIZE {
        return Err(Error::new_validation(&format!(
            "topic exceeds {} bytes: {}",
            TOPIC_SIZE,
            topic.len()
        )));
    }

    Ok(())
}
