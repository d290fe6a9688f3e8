//! Rollup storage layer primitives.
//!
//! Everything below the engine: the packed aggregate record, timestep
//! calendar arithmetic, bucket key layout and the store traits that carry
//! the atomic merge protocol.
#![deny(missing_docs)]

pub mod codec;
pub mod key;
pub mod memory;
pub mod optimistic;
pub mod store;
pub mod timestep;

pub use codec::{AggregateRecord, DecodeError, RECORD_LEN};
pub use key::{build_key, field_name, parse_field, BucketKey, SEP};
pub use memory::MemoryStore;
pub use optimistic::{OptimisticMerge, DEFAULT_MAX_ATTEMPTS};
pub use store::{
    AtomicMerge, BucketFields, BucketReader, BucketStore, CompareAndSwap, MergeRequest, Result,
    Snapshot, StorageError,
};
pub use timestep::{Granularity, TimestepDefinition, UnixTime};
