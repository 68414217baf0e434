pub mod registry;
pub mod segment;

use crate::config::ConsumerConfig;

pub const CONSUMER_FILE_EXTENSION: &str = "consumer";

/// A consumer's identity and progress within one topic.
///
/// `read_offset` is the next logical offset this consumer will read;
/// `slot` is where its record lives in the registry. Both are assigned
/// by the store on subscribe.
#[derive(Debug, Clone)]
pub struct Consumer {
    pub id: String,
    pub topic: String,
    pub read_offset: u64,
    pub slot: u64,
    /// Acknowledge automatically after each successful read. Seeded from
    /// the config on construction; overridable per read.
    pub auto_commit: bool,
}

impl Consumer {
    pub fn new(id: &str, topic: &str, config: ConsumerConfig) -> Self {
        Consumer {
            id: id.to_owned(),
            topic: topic.to_owned(),
            read_offset: 0,
            slot: 0,
            auto_commit: config.auto_commit,
        }
    }
}
