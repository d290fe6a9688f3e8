//! In-process bucket store used by tests and local tooling.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::codec::merge_payload;
use crate::key::field_name;
use crate::store::{
    AtomicMerge, BucketFields, BucketReader, CompareAndSwap, MergeRequest, Result, Snapshot,
};
use crate::timestep::UnixTime;

#[derive(Debug)]
struct Bucket {
    fields: BucketFields,
    expire_at: UnixTime,
    version: u64,
}

#[derive(Debug, Default)]
struct State {
    buckets: HashMap<String, Bucket>,
    /// Last version handed out; never reused, even across purges.
    clock: u64,
}

impl State {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Hash-of-hashes store with per-bucket expiry bookkeeping.
///
/// Expired buckets stay readable until [`MemoryStore::purge_expired`] runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    /// Expiry recorded for `key`, if the bucket exists.
    pub async fn expiry(&self, key: &str) -> Option<UnixTime> {
        self.state.lock().await.buckets.get(key).map(|b| b.expire_at)
    }

    /// Overwrite one raw field, creating the bucket without expiry if needed.
    pub async fn put_raw(&self, key: &str, field: &str, payload: Vec<u8>) {
        let mut state = self.state.lock().await;
        let version = state.tick();
        let bucket = state.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            fields: BucketFields::new(),
            expire_at: UnixTime::MAX,
            version,
        });
        bucket.fields.insert(field.to_string(), payload);
        bucket.version = version;
    }

    /// Drop every bucket whose expiry is at or before `now`.
    pub async fn purge_expired(&self, now: UnixTime) -> usize {
        let mut state = self.state.lock().await;
        let before = state.buckets.len();
        state.buckets.retain(|_, b| b.expire_at > now);
        before - state.buckets.len()
    }

    /// Number of live buckets.
    pub async fn len(&self) -> usize {
        self.state.lock().await.buckets.len()
    }

    /// Whether no bucket exists.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait::async_trait]
impl AtomicMerge for MemoryStore {
    async fn merge(&self, req: MergeRequest<'_>) -> Result<()> {
        let field = field_name(req.sub_step);
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let version = state.tick();
        match state.buckets.get_mut(req.key) {
            Some(bucket) => {
                let payload = merge_payload(bucket.fields.get(&field).map(Vec::as_slice), req.value)?;
                bucket.fields.insert(field, payload.to_vec());
                bucket.version = version;
            }
            None => {
                let payload = merge_payload(None, req.value)?;
                let mut fields = BucketFields::new();
                fields.insert(field, payload.to_vec());
                state.buckets.insert(
                    req.key.to_string(),
                    Bucket {
                        fields,
                        expire_at: req.expire_at,
                        version,
                    },
                );
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl BucketReader for MemoryStore {
    async fn fetch_bucket(&self, key: &str) -> Result<BucketFields> {
        let state = self.state.lock().await;
        Ok(state
            .buckets
            .get(key)
            .map(|b| b.fields.clone())
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl CompareAndSwap for MemoryStore {
    /// Bucket version seen by `load`; 0 when the bucket was absent.
    type Ticket = u64;

    async fn load(&self, key: &str, field: &str) -> Result<(Snapshot, u64)> {
        let state = self.state.lock().await;
        Ok(match state.buckets.get(key) {
            Some(bucket) => (
                Snapshot {
                    bucket_exists: true,
                    field: bucket.fields.get(field).cloned(),
                },
                bucket.version,
            ),
            None => (Snapshot::default(), 0),
        })
    }

    async fn commit(
        &self,
        ticket: u64,
        key: &str,
        field: &str,
        payload: &[u8],
        expire_at: Option<UnixTime>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let current = state.buckets.get(key).map_or(0, |b| b.version);
        if current != ticket {
            return Ok(false);
        }
        let version = state.tick();
        let bucket = state.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            fields: BucketFields::new(),
            expire_at: UnixTime::MAX,
            version,
        });
        bucket.fields.insert(field.to_string(), payload.to_vec());
        bucket.version = version;
        if let Some(at) = expire_at {
            bucket.expire_at = at;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AggregateRecord, DecodeError};
    use crate::store::StorageError;

    #[tokio::test]
    async fn expiry_is_only_set_on_creation() {
        let store = MemoryStore::default();
        let first = MergeRequest { key: "b", sub_step: 0, expire_at: 100, value: 1.0 };
        store.merge(first).await.unwrap();
        store.merge(MergeRequest { expire_at: 500, sub_step: 1, ..first }).await.unwrap();
        store.merge(MergeRequest { expire_at: 900, ..first }).await.unwrap();
        assert_eq!(store.expiry("b").await, Some(100));

        let fields = store.fetch_bucket("b").await.unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(AggregateRecord::decode(&fields["0"]).unwrap().count, 2);
        assert_eq!(AggregateRecord::decode(&fields["1"]).unwrap().count, 1);
    }

    #[tokio::test]
    async fn missing_bucket_reads_empty() {
        let store = MemoryStore::default();
        assert!(store.fetch_bucket("nope").await.unwrap().is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn purge_drops_expired_buckets() {
        let store = MemoryStore::default();
        for (key, at) in [("a", 10), ("b", 20)] {
            store
                .merge(MergeRequest { key, sub_step: 0, expire_at: at, value: 1.0 })
                .await
                .unwrap();
        }
        assert_eq!(store.purge_expired(10).await, 1);
        assert_eq!(store.len().await, 1);
        assert!(store.fetch_bucket("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_field_fails_merge() {
        let store = MemoryStore::default();
        store.put_raw("b", "3", vec![1, 2, 3]).await;
        let err = store
            .merge(MergeRequest { key: "b", sub_step: 3, expire_at: 0, value: 1.0 })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Decode(DecodeError::Length(3))));
    }

    #[tokio::test]
    async fn stale_ticket_is_rejected() {
        let store = MemoryStore::default();
        let (snap, ticket) = store.load("b", "0").await.unwrap();
        assert!(!snap.bucket_exists);
        store
            .merge(MergeRequest { key: "b", sub_step: 9, expire_at: 50, value: 1.0 })
            .await
            .unwrap();
        assert!(!store.commit(ticket, "b", "0", &[0; 28], Some(70)).await.unwrap());

        let (snap, ticket) = store.load("b", "0").await.unwrap();
        assert!(snap.bucket_exists);
        assert!(snap.field.is_none());
        assert!(store.commit(ticket, "b", "0", &[0; 28], None).await.unwrap());
        assert_eq!(store.expiry("b").await, Some(50));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_merges_are_serialised() {
        let store = MemoryStore::default();
        let mut tasks = Vec::new();
        for i in 0..100 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let req = MergeRequest { key: "hot", sub_step: 1, expire_at: 0, value: i as f64 };
                store.merge(req).await.unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        let fields = store.fetch_bucket("hot").await.unwrap();
        let rec = AggregateRecord::decode(&fields["1"]).unwrap();
        assert_eq!(rec.count, 100);
        assert_eq!(rec.sum, 4950.0);
        assert_eq!((rec.min, rec.max), (0.0, 99.0));
    }
}
