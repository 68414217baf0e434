//! Persistent storage core of a single-node publish/subscribe broker.
//!
//! Each topic is an append-only, offset-addressable log kept as a chain
//! of segments (a memory-mapped offset index plus a length-prefixed
//! message file). Consumers are fixed-width records in memory-mapped
//! registry segments; their read offsets advance on acknowledgement and
//! survive restarts.

pub mod config;
pub mod consumer;
pub mod partition;
pub mod segment;
pub mod store;
