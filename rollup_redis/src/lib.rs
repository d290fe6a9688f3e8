//! Redis-backed bucket store. Thin wrapper around the `redis` crate.
//!
//! Merges run as a server-side Lua script ([`script::MergeScript`]). The
//! store also implements [`CompareAndSwap`] with WATCH/MULTI/EXEC so the
//! optimistic strategy can be used against servers with scripting disabled.

pub mod script;

use std::sync::{Arc, Mutex};

use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncCommands, RedisError};
use tracing::debug;

use rollup_storage::{
    AtomicMerge, BucketFields, BucketReader, CompareAndSwap, MergeRequest, Result,
    Snapshot, StorageError, UnixTime,
};

pub use script::{MergeScript, MERGE_LUA};

fn is_transport(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout()
}

fn unavailable(err: RedisError) -> StorageError {
    StorageError::Unavailable(err.to_string())
}

fn merge_error(key: &str, err: RedisError) -> StorageError {
    if is_transport(&err) {
        unavailable(err)
    } else {
        StorageError::Merge {
            key: key.to_string(),
            reason: err.to_string(),
        }
    }
}

fn read_error(key: &str, err: RedisError) -> StorageError {
    if is_transport(&err) {
        unavailable(err)
    } else {
        StorageError::Read {
            key: key.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Idle WATCH connections kept for reuse by the optimistic merge.
const IDLE_WATCH_CONNECTIONS: usize = 8;

/// Async Redis client holding a self-reconnecting multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
    script: MergeScript,
    idle: Arc<Mutex<Vec<MultiplexedConnection>>>,
}

impl RedisStore {
    /// Connect using a URL such as `redis://127.0.0.1:6379`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = client.get_connection_manager().await.map_err(unavailable)?;
        debug!("connected to redis");
        Ok(Self {
            client,
            conn,
            script: MergeScript::default(),
            idle: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Upload the merge script so the first `EVALSHA` does not miss.
    pub async fn load_script(&self) -> Result<String> {
        let mut conn = self.conn.clone();
        redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(self.script.source())
            .query_async(&mut conn)
            .await
            .map_err(unavailable)
    }

    /// Seconds until `key` expires; `-1` without expiry, `-2` when absent.
    pub async fn ttl(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        conn.ttl(key).await.map_err(|e| read_error(key, e))
    }

    /// Connection used by one WATCH at a time: an idle one when available,
    /// otherwise a new one.
    async fn dedicated(&self) -> Result<MultiplexedConnection> {
        let reused = match self.idle.lock() {
            Ok(mut idle) => idle.pop(),
            Err(_) => None,
        };
        match reused {
            Some(conn) => Ok(conn),
            None => self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(unavailable),
        }
    }

    /// Return a connection whose WATCH ended with EXEC.
    fn release(&self, conn: MultiplexedConnection) {
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < IDLE_WATCH_CONNECTIONS {
                idle.push(conn);
            }
        }
    }

    #[cfg(test)]
    fn idle_connections(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl AtomicMerge for RedisStore {
    async fn merge(&self, req: MergeRequest<'_>) -> Result<()> {
        let mut conn = self.conn.clone();
        self.script
            .invoke(&mut conn, &req)
            .await
            .map_err(|e| merge_error(req.key, e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl BucketReader for RedisStore {
    async fn fetch_bucket(&self, key: &str) -> Result<BucketFields> {
        let mut conn = self.conn.clone();
        conn.hgetall(key).await.map_err(|e| read_error(key, e))
    }
}

#[async_trait::async_trait]
impl CompareAndSwap for RedisStore {
    /// Connection with a WATCH on the bucket key.
    type Ticket = MultiplexedConnection;

    async fn load(&self, key: &str, field: &str) -> Result<(Snapshot, MultiplexedConnection)> {
        let mut conn = self.dedicated().await?;
        redis::cmd("WATCH")
            .arg(key)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| merge_error(key, e))?;
        let (bucket_exists, field): (bool, Option<Vec<u8>>) = redis::pipe()
            .exists(key)
            .hget(key, field)
            .query_async(&mut conn)
            .await
            .map_err(|e| merge_error(key, e))?;
        Ok((Snapshot { bucket_exists, field }, conn))
    }

    async fn commit(
        &self,
        mut conn: MultiplexedConnection,
        key: &str,
        field: &str,
        payload: &[u8],
        expire_at: Option<UnixTime>,
    ) -> Result<bool> {
        let mut pipe = redis::pipe();
        pipe.atomic().hset(key, field, payload).ignore();
        if let Some(at) = expire_at {
            pipe.cmd("EXPIREAT").arg(key).arg(at).ignore();
        }
        // EXEC answers nil when the watched key changed. Either way the
        // WATCH is cleared, so the connection can serve another load.
        let applied: Option<()> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| merge_error(key, e))?;
        self.release(conn);
        Ok(applied.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollup_storage::{field_name, AggregateRecord, OptimisticMerge};

    /// These tests need a live server; they return early unless
    /// `ROLLUP_REDIS_URL` is set.
    async fn live() -> Option<RedisStore> {
        let url = std::env::var("ROLLUP_REDIS_URL").ok()?;
        RedisStore::connect(&url).await.ok()
    }

    async fn reset(store: &RedisStore, key: &str) {
        let mut conn = store.conn.clone();
        let _: () = conn.del(key).await.unwrap();
    }

    #[tokio::test]
    async fn scripted_merge_follows_contract() {
        let Some(store) = live().await else { return };
        let key = "rollup:test:scripted:0:h";
        reset(&store, key).await;
        let far = 4_102_444_800;

        store.merge(MergeRequest { key, sub_step: 3, expire_at: far, value: 2.2 }).await.unwrap();
        store.merge(MergeRequest { key, sub_step: 3, expire_at: far + 999, value: 2.2 }).await.unwrap();
        store.merge(MergeRequest { key, sub_step: 4, expire_at: far + 999, value: -1.0 }).await.unwrap();

        let fields = store.fetch_bucket(key).await.unwrap();
        let three = AggregateRecord::decode(&fields[&field_name(3)]).unwrap();
        assert_eq!(three.count, 2);
        assert!((three.sum - 4.4).abs() < 1e-9);
        assert_eq!(AggregateRecord::decode(&fields["4"]).unwrap(), AggregateRecord::new(-1.0));

        let ttl = store.ttl(key).await.unwrap();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        assert!((ttl - (far - now)).abs() <= 2);
        reset(&store, key).await;
    }

    #[tokio::test]
    async fn evalsha_falls_back_after_script_flush() {
        let Some(store) = live().await else { return };
        let key = "rollup:test:flush:0:h";
        reset(&store, key).await;
        let mut conn = store.conn.clone();
        let _: () = redis::cmd("SCRIPT").arg("FLUSH").query_async(&mut conn).await.unwrap();
        store.merge(MergeRequest { key, sub_step: 0, expire_at: 4_102_444_800, value: 1.0 }).await.unwrap();
        assert_eq!(store.fetch_bucket(key).await.unwrap().len(), 1);
        assert_eq!(store.load_script().await.unwrap(), store.script.hash());
        reset(&store, key).await;
    }

    #[tokio::test]
    async fn optimistic_merge_over_watch() {
        let Some(store) = live().await else { return };
        let key = "rollup:test:cas:0:h";
        reset(&store, key).await;
        let cas = OptimisticMerge::new(store.clone(), 16);
        for v in [3.0, 1.0, 2.0] {
            cas.merge(MergeRequest { key, sub_step: 9, expire_at: 4_102_444_800, value: v }).await.unwrap();
        }
        let fields = cas.fetch_bucket(key).await.unwrap();
        assert_eq!(
            AggregateRecord::decode(&fields["9"]).unwrap(),
            AggregateRecord { count: 3, sum: 6.0, min: 1.0, max: 3.0 }
        );
        assert!(store.ttl(key).await.unwrap() > 0);
        // one connection served all three merges
        assert_eq!(store.idle_connections(), 1);
        reset(&store, key).await;
    }

    #[tokio::test]
    async fn missing_bucket_is_empty() {
        let Some(store) = live().await else { return };
        assert!(store.fetch_bucket("rollup:test:absent:0:h").await.unwrap().is_empty());
    }
}
