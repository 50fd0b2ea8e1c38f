//! RocksDB-backed persistent block storage
//!
//! Blocks are keyed by binary CID. RocksDB calls are blocking, so every
//! operation runs on the blocking pool. Options are tuned for point lookups
//! of content-addressed blocks (1KB - 10MB+).

use async_trait::async_trait;
use bytes::Bytes;
use cid::Cid;
use futures::stream::BoxStream;
use rocksdb::{IteratorMode, Options, DB};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::options::RequestOptions;
use crate::storage::{ensure_active, Blockstore, BlockstoreError, Pair};

/// Pairs buffered between the database scan and the stream reader
const SCAN_BUFFER: usize = 16;

/// RocksDB-backed persistent block storage with CID-based indexing
pub struct RocksBlockstore {
    /// RocksDB database handle
    db: Arc<DB>,
}

impl RocksBlockstore {
    /// Open a throwaway store under the system temp directory (for testing)
    pub fn new() -> Result<Self, BlockstoreError> {
        let temp_dir =
            std::env::temp_dir().join(format!("tessera-test-{}", rand::random::<u64>()));
        Self::new_with_path(&temp_dir)
    }

    /// Open (or create) a persistent store at `path`
    pub fn new_with_path<P: AsRef<Path>>(path: P) -> Result<Self, BlockstoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        // Optimize for point lookups (CID -> block)
        opts.optimize_for_point_lookup(256); // 256MB block cache

        opts.set_enable_pipelined_write(true);

        // Block payloads are usually already compressed
        opts.set_compression_type(rocksdb::DBCompressionType::None);

        opts.increase_parallelism(num_cpus::get() as i32);
        opts.set_max_background_jobs(4);

        opts.set_write_buffer_size(64 * 1024 * 1024); // 64MB write buffer
        opts.set_target_file_size_base(128 * 1024 * 1024); // 128MB SST files

        let db = DB::open(&opts, path.as_ref())?;

        info!("Opened RocksDB block store at {:?}", path.as_ref());
        Ok(Self { db: Arc::new(db) })
    }

    /// Block count and total payload size
    pub async fn stats(&self) -> Result<BlockStoreStats, BlockstoreError> {
        let db = Arc::clone(&self.db);

        let stats = tokio::task::spawn_blocking(move || {
            let mut stats = BlockStoreStats::default();
            for (_, value) in db.iterator(IteratorMode::Start).flatten() {
                stats.block_count += 1;
                stats.total_size += value.len();
            }
            stats
        })
        .await?;

        Ok(stats)
    }
}

#[async_trait]
impl Blockstore for RocksBlockstore {
    async fn has(&self, cid: &Cid, opts: &RequestOptions) -> Result<bool, BlockstoreError> {
        ensure_active(opts)?;
        let db = Arc::clone(&self.db);
        let key = cid.to_bytes();

        let found = tokio::task::spawn_blocking(move || {
            db.get_pinned(&key).map(|value| value.is_some())
        })
        .await??;

        Ok(found)
    }

    async fn get(&self, cid: &Cid, opts: &RequestOptions) -> Result<Bytes, BlockstoreError> {
        ensure_active(opts)?;
        let db = Arc::clone(&self.db);
        let key = cid.to_bytes();

        let data = tokio::task::spawn_blocking(move || db.get(&key))
            .await??
            .ok_or(BlockstoreError::NotFound(*cid))?;

        Ok(Bytes::from(data))
    }

    async fn put(
        &self,
        cid: &Cid,
        block: Bytes,
        opts: &RequestOptions,
    ) -> Result<(), BlockstoreError> {
        ensure_active(opts)?;
        let db = Arc::clone(&self.db);
        let key = cid.to_bytes();
        let size = block.len();

        let stored = tokio::task::spawn_blocking(move || {
            // Idempotent: an existing block is left untouched
            if db.get_pinned(&key)?.is_some() {
                return Ok::<bool, BlockstoreError>(false);
            }
            db.put(&key, &block)?;
            Ok(true)
        })
        .await??;

        if stored {
            debug!(%cid, size, "Stored block");
        } else {
            debug!(%cid, "Block already exists");
        }
        Ok(())
    }

    async fn delete(&self, cid: &Cid, opts: &RequestOptions) -> Result<(), BlockstoreError> {
        ensure_active(opts)?;
        let db = Arc::clone(&self.db);
        let key = cid.to_bytes();

        tokio::task::spawn_blocking(move || db.delete(&key)).await??;

        debug!(%cid, "Deleted block");
        Ok(())
    }

    fn get_all<'a>(
        &'a self,
        opts: &'a RequestOptions,
    ) -> BoxStream<'a, Result<Pair, BlockstoreError>> {
        Box::pin(async_stream::stream! {
            if let Err(e) = ensure_active(opts) {
                yield Err(e);
                return;
            }

            let db = Arc::clone(&self.db);
            let (tx, mut rx) = mpsc::channel(SCAN_BUFFER);
            let scan = tokio::task::spawn_blocking(move || {
                for item in db.iterator(IteratorMode::Start) {
                    let pair = match item {
                        Ok((key, value)) => match Cid::try_from(key.as_ref()) {
                            Ok(cid) => Ok((cid, Bytes::from(value.into_vec()))),
                            Err(e) => {
                                warn!("Skipping entry with undecodable CID key: {}", e);
                                continue;
                            }
                        },
                        Err(e) => Err(BlockstoreError::from(e)),
                    };
                    let failed = pair.is_err();
                    // Send fails once the reader drops the stream
                    if tx.blocking_send(pair).is_err() || failed {
                        break;
                    }
                }
            });

            while let Some(item) = rx.recv().await {
                yield item;
            }
            if let Err(e) = scan.await {
                yield Err(e.into());
            }
        })
    }
}

/// Statistics about the block store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockStoreStats {
    pub block_count: usize,
    pub total_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::sha256_cid;
    use crate::signal::AbortController;
    use futures::{StreamExt, TryStreamExt};

    fn block(data: &[u8]) -> Pair {
        (sha256_cid(data).unwrap(), Bytes::copy_from_slice(data))
    }

    #[tokio::test]
    async fn test_store_put_get() {
        let store = RocksBlockstore::new().unwrap();
        let opts = RequestOptions::default();
        let (cid, data) = block(b"hello world");

        store.put(&cid, data.clone(), &opts).await.unwrap();

        let retrieved = store.get(&cid, &opts).await.unwrap();
        assert_eq!(retrieved, data);
    }

    #[tokio::test]
    async fn test_store_has_and_delete() {
        let store = RocksBlockstore::new().unwrap();
        let opts = RequestOptions::default();
        let (cid, data) = block(b"hello world");

        assert!(!store.has(&cid, &opts).await.unwrap());

        store.put(&cid, data, &opts).await.unwrap();
        assert!(store.has(&cid, &opts).await.unwrap());

        store.delete(&cid, &opts).await.unwrap();
        assert!(!store.has(&cid, &opts).await.unwrap());

        let result = store.get(&cid, &opts).await;
        assert!(matches!(result, Err(BlockstoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_store_idempotent_put() {
        let store = RocksBlockstore::new().unwrap();
        let opts = RequestOptions::default();
        let (cid, data) = block(b"hello world");

        store.put(&cid, data.clone(), &opts).await.unwrap();
        store.put(&cid, data, &opts).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.block_count, 1);
    }

    #[tokio::test]
    async fn test_store_get_all_and_stats() {
        let store = RocksBlockstore::new().unwrap();
        let opts = RequestOptions::default();

        let blocks = vec![block(&[1u8; 100]), block(&[2u8; 200])];
        for (cid, data) in &blocks {
            store.put(cid, data.clone(), &opts).await.unwrap();
        }

        let mut all: Vec<Pair> = store.get_all(&opts).try_collect().await.unwrap();
        all.sort_by_key(|(cid, _)| *cid);
        let mut expected = blocks.clone();
        expected.sort_by_key(|(cid, _)| *cid);
        assert_eq!(all, expected);

        let stats = store.stats().await.unwrap();
        assert_eq!(
            stats,
            BlockStoreStats {
                block_count: 2,
                total_size: 300
            }
        );
    }

    #[tokio::test]
    async fn test_get_all_streams_past_buffer() {
        let store = RocksBlockstore::new().unwrap();
        let opts = RequestOptions::default();
        let count = SCAN_BUFFER * 4;

        for i in 0..count {
            let (cid, data) = block(format!("block {}", i).as_bytes());
            store.put(&cid, data, &opts).await.unwrap();
        }

        let all: Vec<Pair> = store.get_all(&opts).try_collect().await.unwrap();
        assert_eq!(all.len(), count);

        // Reader stops early; the scan must not block on a full channel
        let first: Vec<Pair> = store
            .get_all(&opts)
            .take(3)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(first.len(), 3);

        assert!(store.has(&all[0].0, &opts).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_all_cancelled() {
        let store = RocksBlockstore::new().unwrap();
        let (cid, data) = block(b"hello world");
        store
            .put(&cid, data, &RequestOptions::default())
            .await
            .unwrap();

        let controller = AbortController::new();
        controller.abort();
        let opts = RequestOptions::default().with_signal(controller.signal());
        let result: Result<Vec<Pair>, _> = store.get_all(&opts).try_collect().await;
        assert!(matches!(result, Err(BlockstoreError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_operations() {
        let store = RocksBlockstore::new().unwrap();
        let controller = AbortController::new();
        let opts = RequestOptions::default().with_signal(controller.signal());
        let (cid, data) = block(b"hello world");
        controller.abort();

        let result = store.put(&cid, data, &opts).await;
        assert!(matches!(result, Err(BlockstoreError::Cancelled)));

        let live = RequestOptions::default();
        assert!(!store.has(&cid, &live).await.unwrap());
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let opts = RequestOptions::default();
        let (cid, data) = block(b"persistent");

        {
            let store = RocksBlockstore::new_with_path(dir.path()).unwrap();
            store.put(&cid, data.clone(), &opts).await.unwrap();
        }

        let store = RocksBlockstore::new_with_path(dir.path()).unwrap();
        assert_eq!(store.get(&cid, &opts).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_large_blocks() {
        let store = RocksBlockstore::new().unwrap();
        let opts = RequestOptions::default();

        // Store a large block (1MB)
        let (cid, data) = block(&vec![0x42u8; 1024 * 1024]);
        store.put(&cid, data.clone(), &opts).await.unwrap();

        let retrieved = store.get(&cid, &opts).await.unwrap();
        assert_eq!(retrieved.len(), 1024 * 1024);
        assert_eq!(retrieved, data);
    }
}
