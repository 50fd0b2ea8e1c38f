//! Local block storage
//!
//! [`Blockstore`] is the contract for the local tier: CID-indexed, async,
//! cancellable. Batch operations are lazy streams so callers can pipe
//! arbitrarily large inputs through without buffering them.

use async_trait::async_trait;
use bytes::Bytes;
use cid::Cid;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use crate::options::RequestOptions;

/// A CID together with its block
pub type Pair = (Cid, Bytes);

#[derive(Debug, thiserror::Error)]
pub enum BlockstoreError {
    #[error("Block not found: {0}")]
    NotFound(Cid),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] rocksdb::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fail fast when the caller has already given up
pub(crate) fn ensure_active(opts: &RequestOptions) -> Result<(), BlockstoreError> {
    if opts.signal.is_aborted() {
        return Err(BlockstoreError::Cancelled);
    }
    Ok(())
}

/// CID-indexed block storage.
///
/// Implementations must be safe for concurrent use; the facade does no
/// locking of its own. A cancelled call must not leave partial writes behind.
#[async_trait]
pub trait Blockstore: Send + Sync {
    async fn has(&self, cid: &Cid, opts: &RequestOptions) -> Result<bool, BlockstoreError>;

    /// Fails with [`BlockstoreError::NotFound`] on a miss
    async fn get(&self, cid: &Cid, opts: &RequestOptions) -> Result<Bytes, BlockstoreError>;

    /// Storing a CID that is already present is a no-op
    async fn put(&self, cid: &Cid, block: Bytes, opts: &RequestOptions)
        -> Result<(), BlockstoreError>;

    /// Deleting a CID that is not present is a no-op
    async fn delete(&self, cid: &Cid, opts: &RequestOptions) -> Result<(), BlockstoreError>;

    fn get_all<'a>(&'a self, opts: &'a RequestOptions)
        -> BoxStream<'a, Result<Pair, BlockstoreError>>;

    fn put_many<'a>(
        &'a self,
        mut blocks: BoxStream<'a, Pair>,
        opts: &'a RequestOptions,
    ) -> BoxStream<'a, Result<Cid, BlockstoreError>> {
        Box::pin(async_stream::stream! {
            while let Some((cid, block)) = blocks.next().await {
                yield self.put(&cid, block, opts).await.map(|()| cid);
            }
        })
    }

    fn get_many<'a>(
        &'a self,
        mut cids: BoxStream<'a, Cid>,
        opts: &'a RequestOptions,
    ) -> BoxStream<'a, Result<Pair, BlockstoreError>> {
        Box::pin(async_stream::stream! {
            while let Some(cid) = cids.next().await {
                yield self.get(&cid, opts).await.map(|block| (cid, block));
            }
        })
    }

    fn delete_many<'a>(
        &'a self,
        mut cids: BoxStream<'a, Cid>,
        opts: &'a RequestOptions,
    ) -> BoxStream<'a, Result<Cid, BlockstoreError>> {
        Box::pin(async_stream::stream! {
            while let Some(cid) = cids.next().await {
                yield self.delete(&cid, opts).await.map(|()| cid);
            }
        })
    }
}

/// In-memory block store backed by a `RwLock<HashMap>`.
///
/// Useful for tests and for ephemeral nodes.
#[derive(Debug, Default)]
pub struct MemoryBlockstore {
    blocks: RwLock<HashMap<Cid, Bytes>>,
}

impl MemoryBlockstore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Blockstore for MemoryBlockstore {
    async fn has(&self, cid: &Cid, opts: &RequestOptions) -> Result<bool, BlockstoreError> {
        ensure_active(opts)?;
        let map = self.blocks.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.contains_key(cid))
    }

    async fn get(&self, cid: &Cid, opts: &RequestOptions) -> Result<Bytes, BlockstoreError> {
        ensure_active(opts)?;
        let map = self.blocks.read().unwrap_or_else(PoisonError::into_inner);
        map.get(cid).cloned().ok_or(BlockstoreError::NotFound(*cid))
    }

    async fn put(
        &self,
        cid: &Cid,
        block: Bytes,
        opts: &RequestOptions,
    ) -> Result<(), BlockstoreError> {
        ensure_active(opts)?;
        let mut map = self.blocks.write().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(cid) {
            debug!(%cid, "block already stored in memory");
            return Ok(());
        }
        debug!(%cid, size = block.len(), "storing block in memory");
        map.insert(*cid, block);
        Ok(())
    }

    async fn delete(&self, cid: &Cid, opts: &RequestOptions) -> Result<(), BlockstoreError> {
        ensure_active(opts)?;
        let mut map = self.blocks.write().unwrap_or_else(PoisonError::into_inner);
        if map.remove(cid).is_some() {
            debug!(%cid, "deleted block from memory");
        }
        Ok(())
    }

    fn get_all<'a>(
        &'a self,
        opts: &'a RequestOptions,
    ) -> BoxStream<'a, Result<Pair, BlockstoreError>> {
        let pairs: Vec<Result<Pair, BlockstoreError>> = match ensure_active(opts) {
            Ok(()) => self
                .blocks
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .map(|(cid, block)| Ok((*cid, block.clone())))
                .collect(),
            Err(e) => vec![Err(e)],
        };
        Box::pin(stream::iter(pairs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::sha256_cid;
    use crate::signal::AbortController;
    use futures::TryStreamExt;

    fn block(data: &'static [u8]) -> Pair {
        (sha256_cid(data).unwrap(), Bytes::from_static(data))
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryBlockstore::new();
        let opts = RequestOptions::default();
        let (cid, data) = block(b"hello world");

        store.put(&cid, data.clone(), &opts).await.unwrap();
        assert_eq!(store.get(&cid, &opts).await.unwrap(), data);
        assert!(store.has(&cid, &opts).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryBlockstore::new();
        let (cid, _) = block(b"missing");

        let result = store.get(&cid, &RequestOptions::default()).await;
        assert!(matches!(result, Err(BlockstoreError::NotFound(c)) if c == cid));
    }

    #[tokio::test]
    async fn test_idempotent_put_and_delete() {
        let store = MemoryBlockstore::new();
        let opts = RequestOptions::default();
        let (cid, data) = block(b"hello world");

        store.put(&cid, data.clone(), &opts).await.unwrap();
        store.put(&cid, data, &opts).await.unwrap();
        assert_eq!(store.len(), 1);

        store.delete(&cid, &opts).await.unwrap();
        store.delete(&cid, &opts).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_put_does_not_mutate() {
        let store = MemoryBlockstore::new();
        let controller = AbortController::new();
        let opts = RequestOptions::default().with_signal(controller.signal());
        let (cid, data) = block(b"hello world");

        controller.abort();
        let result = store.put(&cid, data, &opts).await;
        assert!(matches!(result, Err(BlockstoreError::Cancelled)));
        assert!(store.is_empty());

        let result: Result<Vec<_>, _> = store.get_all(&opts).try_collect().await;
        assert!(matches!(result, Err(BlockstoreError::Cancelled)));
    }

    #[tokio::test]
    async fn test_batch_operations() {
        let store = MemoryBlockstore::new();
        let opts = RequestOptions::default();
        let pairs = vec![block(b"block 1"), block(b"block 2"), block(b"block 3")];
        let cids: Vec<Cid> = pairs.iter().map(|(cid, _)| *cid).collect();

        let stored: Vec<Cid> = store
            .put_many(stream::iter(pairs.clone()).boxed(), &opts)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(stored, cids);

        let fetched: Vec<Pair> = store
            .get_many(stream::iter(cids.clone()).boxed(), &opts)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(fetched, pairs);

        let mut all: Vec<Cid> = store
            .get_all(&opts)
            .map_ok(|(cid, _)| cid)
            .try_collect()
            .await
            .unwrap();
        all.sort();
        let mut expected = cids.clone();
        expected.sort();
        assert_eq!(all, expected);

        let deleted: Vec<Cid> = store
            .delete_many(stream::iter(cids[..2].to_vec()).boxed(), &opts)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(deleted.len(), 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_get_many_reports_misses_per_item() {
        let store = MemoryBlockstore::new();
        let opts = RequestOptions::default();
        let (present, data) = block(b"present");
        let (absent, _) = block(b"absent");
        store.put(&present, data, &opts).await.unwrap();

        let results: Vec<_> = store
            .get_many(stream::iter(vec![absent, present]).boxed(), &opts)
            .collect()
            .await;

        assert!(matches!(results[0], Err(BlockstoreError::NotFound(_))));
        assert!(results[1].is_ok());
    }
}
