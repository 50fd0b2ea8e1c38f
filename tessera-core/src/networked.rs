//! Block facade
//!
//! [`NetworkedBlockstore`] is the public surface over the local tier. Reads
//! that miss locally race the registered brokers, then write the verified
//! block back and announce it. Writes announce first and commit locally after.
//! Existence checks and deletes never leave the node.

use bytes::Bytes;
use cid::Cid;
use futures::future::join_all;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::broker::Brokers;
use crate::error::BlockError;
use crate::hashing::Hashers;
use crate::metrics::Metrics;
use crate::options::RequestOptions;
use crate::progress::{BlockEvent, Operation, Stage};
use crate::retrieval;
use crate::storage::{Blockstore, Pair};

#[derive(Clone)]
pub struct NetworkedBlockstore {
    pub(crate) local: Arc<dyn Blockstore>,
    pub(crate) brokers: Brokers,
    pub(crate) hashers: Arc<Hashers>,
    pub(crate) metrics: Metrics,
    /// Set on sessions; only used to tag logs
    pub(crate) root: Option<Cid>,
}

impl NetworkedBlockstore {
    pub fn new(local: Arc<dyn Blockstore>, brokers: Brokers, hashers: Arc<Hashers>) -> Self {
        Self {
            local,
            brokers,
            hashers,
            metrics: Metrics::new(),
            root: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn local(&self) -> &Arc<dyn Blockstore> {
        &self.local
    }

    pub fn brokers(&self) -> &Brokers {
        &self.brokers
    }

    pub fn hashers(&self) -> &Hashers {
        &self.hashers
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Content root of a session, `None` for the top-level facade
    pub fn root(&self) -> Option<&Cid> {
        self.root.as_ref()
    }

    /// Store a block locally and announce it, unless already present
    pub async fn put(
        &self,
        cid: &Cid,
        block: Bytes,
        opts: &RequestOptions,
    ) -> Result<Cid, BlockError> {
        self.put_one(Operation::Put, cid, block, opts).await
    }

    /// Store a stream of blocks; each item is handled independently
    pub fn put_many<'a>(
        &'a self,
        mut blocks: BoxStream<'a, Pair>,
        opts: &'a RequestOptions,
    ) -> BoxStream<'a, Result<Cid, BlockError>> {
        Box::pin(async_stream::stream! {
            opts.emit(BlockEvent::new(Operation::PutMany, Stage::Store, None));
            while let Some((cid, block)) = blocks.next().await {
                yield self.put_one(Operation::PutMany, &cid, block, opts).await;
            }
        })
    }

    /// Fetch a block, racing brokers if it is not held locally
    pub async fn get(&self, cid: &Cid, opts: &RequestOptions) -> Result<Bytes, BlockError> {
        self.get_one(Operation::Get, cid, opts).await
    }

    /// Fetch a stream of blocks, yielding each in input order as it resolves
    pub fn get_many<'a>(
        &'a self,
        mut cids: BoxStream<'a, Cid>,
        opts: &'a RequestOptions,
    ) -> BoxStream<'a, Result<Pair, BlockError>> {
        Box::pin(async_stream::stream! {
            opts.emit(BlockEvent::new(Operation::GetMany, Stage::Store, None));
            while let Some(cid) = cids.next().await {
                yield self
                    .get_one(Operation::GetMany, &cid, opts)
                    .await
                    .map(|block| (cid, block));
            }
        })
    }

    /// Local existence check; never touches brokers
    pub async fn has(&self, cid: &Cid, opts: &RequestOptions) -> Result<bool, BlockError> {
        Ok(self.local.has(cid, opts).await?)
    }

    /// Local-only delete; nothing is withdrawn from the network
    pub async fn delete(&self, cid: &Cid, opts: &RequestOptions) -> Result<(), BlockError> {
        opts.emit(BlockEvent::new(Operation::Delete, Stage::Store, Some(*cid)));
        Ok(self.local.delete(cid, opts).await?)
    }

    pub fn delete_many<'a>(
        &'a self,
        cids: BoxStream<'a, Cid>,
        opts: &'a RequestOptions,
    ) -> BoxStream<'a, Result<Cid, BlockError>> {
        Box::pin(async_stream::stream! {
            opts.emit(BlockEvent::new(Operation::DeleteMany, Stage::Store, None));
            let mut deleted = self.local.delete_many(cids, opts);
            while let Some(result) = deleted.next().await {
                yield result.map_err(BlockError::from);
            }
        })
    }

    /// Every locally stored block
    pub fn get_all<'a>(
        &'a self,
        opts: &'a RequestOptions,
    ) -> BoxStream<'a, Result<Pair, BlockError>> {
        Box::pin(async_stream::stream! {
            opts.emit(BlockEvent::new(Operation::GetAll, Stage::Store, None));
            let mut stored = self.local.get_all(opts);
            while let Some(result) = stored.next().await {
                yield result.map_err(BlockError::from);
            }
        })
    }

    async fn put_one(
        &self,
        op: Operation,
        cid: &Cid,
        block: Bytes,
        opts: &RequestOptions,
    ) -> Result<Cid, BlockError> {
        if self.local.has(cid, opts).await? {
            self.metrics.duplicate_put();
            opts.emit(BlockEvent::new(op, Stage::Duplicate, Some(*cid)));
            debug!(%cid, root = ?self.root, "Block already stored");
            return Ok(*cid);
        }

        // Never let a block that does not match its CID into the local tier
        self.hashers.validator(cid)?.validate(&block)?;

        opts.emit(BlockEvent::new(op, Stage::ProvidersNotify, Some(*cid)));
        self.announce(cid, &block, opts).await;

        opts.emit(BlockEvent::new(op, Stage::Store, Some(*cid)));
        self.local.put(cid, block, opts).await?;

        Ok(*cid)
    }

    async fn get_one(
        &self,
        op: Operation,
        cid: &Cid,
        opts: &RequestOptions,
    ) -> Result<Bytes, BlockError> {
        if opts.offline {
            opts.emit(BlockEvent::new(op, Stage::Store, Some(*cid)));
            return Ok(self.local.get(cid, opts).await?);
        }

        if self.local.has(cid, opts).await? {
            self.metrics.local_hit();
            opts.emit(BlockEvent::new(op, Stage::LocalHit, Some(*cid)));
            opts.emit(BlockEvent::new(op, Stage::Store, Some(*cid)));
            return Ok(self.local.get(cid, opts).await?);
        }

        self.metrics.local_miss();
        opts.emit(BlockEvent::new(op, Stage::ProvidersGet, Some(*cid)));
        debug!(%cid, root = ?self.root, "Block missing locally, racing brokers");

        let started = Instant::now();
        let block = match retrieval::retrieve(cid, &self.hashers, &self.brokers, opts).await {
            Ok(block) => block,
            Err(e) => {
                if matches!(e, BlockError::Retrieval(_)) {
                    self.metrics.race_failed();
                }
                return Err(e);
            }
        };
        self.metrics.race_won(block.len(), started.elapsed());

        opts.emit(BlockEvent::new(op, Stage::Store, Some(*cid)));
        self.local.put(cid, block.clone(), opts).await?;

        opts.emit(BlockEvent::new(op, Stage::ProvidersNotify, Some(*cid)));
        self.announce(cid, &block, opts).await;

        Ok(block)
    }

    /// Announce to every announcing broker concurrently. Failures are logged
    /// and counted, never returned.
    async fn announce(&self, cid: &Cid, block: &Bytes, opts: &RequestOptions) {
        let announcements = self.brokers.announcers().map(|entry| async move {
            (entry.name(), entry.broker().announce(cid, block, opts).await)
        });

        for (broker, result) in join_all(announcements).await {
            match result {
                Ok(()) => self.metrics.announce_sent(),
                Err(e) => {
                    self.metrics.announce_failed();
                    warn!(%cid, broker, error = %e, "Failed to announce block");
                }
            }
        }
    }
}

impl std::fmt::Debug for NetworkedBlockstore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkedBlockstore")
            .field("brokers", &self.brokers)
            .field("hashers", &self.hashers)
            .field("root", &self.root)
            .finish()
    }
}
