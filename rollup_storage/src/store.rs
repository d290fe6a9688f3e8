//! Store traits implementing the bucket merge protocol, and their error type.

use std::collections::HashMap;

use crate::codec::DecodeError;
use crate::timestep::UnixTime;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// All fields of one bucket hash: sub-step index (decimal) to packed record.
pub type BucketFields = HashMap<String, Vec<u8>>;

/// Store layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Connection, IO or timeout failure talking to the store.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store rejected or failed the merge operation.
    #[error("merge into {key} failed: {reason}")]
    Merge {
        /// Bucket key of the failed merge.
        key: String,
        /// Store-provided reason.
        reason: String,
    },
    /// The store failed a bucket read.
    #[error("reading {key} failed: {reason}")]
    Read {
        /// Bucket key that was being read.
        key: String,
        /// Store-provided reason.
        reason: String,
    },
    /// Optimistic merge lost every race it attempted.
    #[error("merge into {key} gave up after {attempts} conflicting attempts")]
    Conflict {
        /// Bucket key of the contended merge.
        key: String,
        /// Attempts made.
        attempts: u32,
    },
    /// A stored payload could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Arguments of one atomic merge call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeRequest<'a> {
    /// Bucket hash key.
    pub key: &'a str,
    /// Field (sub-step index) inside the bucket.
    pub sub_step: u32,
    /// Expiry applied when this call creates the bucket.
    pub expire_at: UnixTime,
    /// Measurement to fold in.
    pub value: f64,
}

/// Indivisible read-modify-write of one bucket field.
///
/// Implementations must behave exactly like this, as one unit relative to any
/// other call on the same bucket:
///
/// 1. bucket absent: create it holding `{1, v, v, v}` at `sub_step` and expire
///    it at `expire_at`;
/// 2. bucket present, field absent: set the field to `{1, v, v, v}`, leaving
///    the expiry alone;
/// 3. field present: fold `v` into the stored record.
#[async_trait::async_trait]
pub trait AtomicMerge: Send + Sync {
    /// Apply one merge.
    async fn merge(&self, req: MergeRequest<'_>) -> Result<()>;
}

/// Bulk read of bucket hashes.
#[async_trait::async_trait]
pub trait BucketReader: Send + Sync {
    /// Fetch every field of a bucket. A missing bucket is an empty map.
    async fn fetch_bucket(&self, key: &str) -> Result<BucketFields>;
}

/// Everything the engine needs from a store.
pub trait BucketStore: AtomicMerge + BucketReader {}

impl<T: AtomicMerge + BucketReader + ?Sized> BucketStore for T {}

/// What a compare-and-swap load observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Whether the bucket hash existed.
    pub bucket_exists: bool,
    /// Current payload of the requested field.
    pub field: Option<Vec<u8>>,
}

/// Conditional-write primitive for stores without server-side scripting.
///
/// `commit` must fail (return `Ok(false)`) if the bucket changed in any way
/// since the `load` that produced `ticket`, including being created.
#[async_trait::async_trait]
pub trait CompareAndSwap: Send + Sync {
    /// Proof of what `load` observed, consumed by `commit`.
    type Ticket: Send;

    /// Read the bucket state relevant to one field.
    async fn load(&self, key: &str, field: &str) -> Result<(Snapshot, Self::Ticket)>;

    /// Write `payload` into `field`, and set the bucket expiry when
    /// `expire_at` is given, only if nothing changed since `ticket`.
    async fn commit(
        &self,
        ticket: Self::Ticket,
        key: &str,
        field: &str,
        payload: &[u8],
        expire_at: Option<UnixTime>,
    ) -> Result<bool>;
}
