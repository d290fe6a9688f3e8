//! Merge protocol built from a load / conditional-commit retry loop.

use tracing::debug;

use crate::codec::merge_payload;
use crate::key::field_name;
use crate::store::{
    AtomicMerge, BucketFields, BucketReader, CompareAndSwap, MergeRequest, Result, StorageError,
};

/// Attempts made before a contended merge is reported as failed.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 16;

/// [`AtomicMerge`] over any [`CompareAndSwap`] store.
#[derive(Debug, Clone)]
pub struct OptimisticMerge<C> {
    inner: C,
    max_attempts: u32,
}

impl<C> OptimisticMerge<C> {
    /// Wrap `inner`, retrying conflicting commits up to `max_attempts` times.
    pub fn new(inner: C, max_attempts: u32) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Underlying store.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait::async_trait]
impl<C: CompareAndSwap> AtomicMerge for OptimisticMerge<C> {
    async fn merge(&self, req: MergeRequest<'_>) -> Result<()> {
        let field = field_name(req.sub_step);
        for attempt in 1..=self.max_attempts {
            let (snapshot, ticket) = self.inner.load(req.key, &field).await?;
            let payload = merge_payload(snapshot.field.as_deref(), req.value)?;
            let expire_at = (!snapshot.bucket_exists).then_some(req.expire_at);
            if self
                .inner
                .commit(ticket, req.key, &field, &payload, expire_at)
                .await?
            {
                return Ok(());
            }
            rollup_metrics::CAS_CONFLICTS_TOTAL.inc();
            debug!(key = req.key, field = %field, attempt, "merge commit conflicted");
        }
        Err(StorageError::Conflict {
            key: req.key.to_string(),
            attempts: self.max_attempts,
        })
    }
}

#[async_trait::async_trait]
impl<C: BucketReader> BucketReader for OptimisticMerge<C> {
    async fn fetch_bucket(&self, key: &str) -> Result<BucketFields> {
        self.inner.fetch_bucket(key).await
    }
}
