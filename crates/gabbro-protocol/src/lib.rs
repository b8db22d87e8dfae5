//! # gabbro-protocol: Query model and sharding router
//!
//! The tagged read/write request unions of the memcached-style query
//! surface, their responses, and the routing algebra a cluster router
//! uses to split a query across shards and recombine the results:
//!
//! - [`Read`] / [`ReadResponse`]: `get` and `rget` (range scan)
//! - [`Write`] / [`WriteResponse`]: the mutation family
//! - `get_region` / `shard` / `unshard` on both unions
//! - [`MergeIterator`]: lazy k-way recombination of range-scan results
//! - [`BackfillChunk`]: the unit of catch-up replication
//!
//! Router preconditions (a shard must be a subset of the query's region,
//! response counts must match the split) are the trusted caller's
//! responsibility; they are checked with `debug_assert!`, not errors.

mod backfill;
mod merge;
mod query;
mod write;

#[cfg(test)]
mod tests;

pub use backfill::{BackfillAtom, BackfillChunk};
pub use merge::MergeIterator;
pub use query::{GetQuery, GetResult, GetValue, Read, ReadResponse, RgetAtom, RgetQuery, RgetResult};
pub use write::{
    AppendPrependResult, DeleteResult, IncrDecrResult, Mutation, MutationResult, SetResult, Write,
    WriteResponse,
};
