//! # gabbro-shard: The per-shard store facade
//!
//! One replica of a sharded memcached-style key-value service runs this
//! core for each shard it owns. It ties the lower layers together:
//!
//! - **FIFO ordering gate** ([`FifoSource`]/[`FifoSink`]): operations
//!   become visible in the order their tickets were issued
//! - **Region metadata** ([`Metainfo`]): the region→version-blob map the
//!   replication layer keeps in the superblock
//! - **Store facade** ([`Store`]): read, write, metainfo get/set,
//!   backfill source and sink, and region reset
//! - **Cancellation** ([`Interruptor`]): honored while an operation
//!   waits for its turn, never once its transaction has begun
//!
//! # Operation pipeline
//!
//! ```text
//! caller ──ticket──▶ FIFO gate ──▶ B-tree transaction ──▶ metainfo
//!                      │               (gate released)      check
//!                      └─interruptor──▶ Interrupted              │
//!                                                                ▼
//!                                                           data access
//! ```
//!
//! A shard is single-worker: the store asserts thread affinity on entry
//! and relies on the gate, not locks, for ordering. Scale-out comes from
//! running many stores on many workers.

mod error;
mod fifo;
mod interrupt;
mod metainfo;
mod store;

#[cfg(test)]
mod tests;

pub use error::ShardError;
pub use fifo::{FifoSink, FifoSource, ReadStamp, ReadTicket, WriteStamp, WriteTicket};
pub use interrupt::{InterruptSource, Interruptor};
pub use metainfo::Metainfo;
pub use store::Store;
