use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};

use courier_core::common::error::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "courier.yml";

const DEFAULT_MAX_INDEX_SIZE: usize = 1024 * 1024;
const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;
const DEFAULT_MAX_CONSUMER_SIZE: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_partitions_dir")]
    pub partitions_dir: PathBuf,

    #[serde(default = "default_consumers_dir")]
    pub consumers_dir: PathBuf,

    #[serde(default)]
    pub segment: SegmentConfig,

    #[serde(default)]
    pub consumer: ConsumerConfig,
}

impl StoreConfig {
    /// Roots both data directories under `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();

        StoreConfig {
            partitions_dir: base_dir.join("partitions"),
            consumers_dir: base_dir.join("consumers"),
            segment: SegmentConfig::default(),
            consumer: ConsumerConfig::default(),
        }
    }

    pub fn from_file(cfg_file: &str) -> Result<Self> {
        let cfg = fs::read_to_string(cfg_file)
            .map_err(|error| Error::new_file(Some(error.into()), Some(format!("read {} error", cfg_file))))?;

        serde_yaml::from_str(&cfg)
            .map_err(|error| Error::new_file(Some(error.into()), Some(format!("parse {} error", cfg_file))))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            partitions_dir: default_partitions_dir(),
            consumers_dir: default_consumers_dir(),
            segment: SegmentConfig::default(),
            consumer: ConsumerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct SegmentConfig {
    /// Cap on any `.index` file; reaching it triggers segment rollover.
    #[serde(default = "default_max_index_size")]
    pub max_index_size: usize,

    /// Cap on any `.message` file; reaching it triggers segment rollover.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        SegmentConfig {
            max_index_size: DEFAULT_MAX_INDEX_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ConsumerConfig {
    /// Cap on a consumer segment file. The registry substitutes 2 MiB
    /// when this is zero or below 70 KiB.
    #[serde(default = "default_max_consumer_size")]
    pub max_size: usize,

    /// Default acknowledge-on-read behavior for consumers built with
    /// [`Consumer::new`](crate::consumer::Consumer::new); each consumer
    /// value can still override it per read.
    #[serde(default)]
    pub auto_commit: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            max_size: DEFAULT_MAX_CONSUMER_SIZE,
            auto_commit: false,
        }
    }
}

fn data_root() -> PathBuf {
    home::home_dir()
        .map(|home| home.join(".courier"))
        .unwrap_or_else(|| PathBuf::from(".courier"))
}

fn default_partitions_dir() -> PathBuf {
    data_root().join("partitions")
}

fn default_consumers_dir() -> PathBuf {
    data_root().join("consumers")
}

fn default_max_index_size() -> usize {
    DEFAULT_MAX_INDEX_SIZE
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_max_consumer_size() -> usize {
    DEFAULT_MAX_CONSUMER_SIZE
}
