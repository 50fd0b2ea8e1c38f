//! Identity tier
//!
//! CIDs using the identity multihash carry their block inline, so they are
//! answered without touching storage. Everything else falls through to the
//! backing store.

use async_trait::async_trait;
use bytes::Bytes;
use cid::Cid;
use futures::stream::BoxStream;
use tracing::trace;

use crate::hashing::IDENTITY_CODE;
use crate::options::RequestOptions;
use crate::storage::{ensure_active, Blockstore, BlockstoreError, Pair};

/// Block bytes embedded in an identity CID, if it is one
pub fn identity_block(cid: &Cid) -> Option<Bytes> {
    let mh = cid.hash();
    (mh.code() == IDENTITY_CODE).then(|| Bytes::copy_from_slice(mh.digest()))
}

/// Local tier: identity blocks first, then the backing store
pub struct IdentityBlockstore<S> {
    child: S,
}

impl<S> IdentityBlockstore<S> {
    pub fn new(child: S) -> Self {
        Self { child }
    }

    /// The backing store
    pub fn child(&self) -> &S {
        &self.child
    }
}

#[async_trait]
impl<S: Blockstore> Blockstore for IdentityBlockstore<S> {
    async fn has(&self, cid: &Cid, opts: &RequestOptions) -> Result<bool, BlockstoreError> {
        if identity_block(cid).is_some() {
            ensure_active(opts)?;
            return Ok(true);
        }
        self.child.has(cid, opts).await
    }

    async fn get(&self, cid: &Cid, opts: &RequestOptions) -> Result<Bytes, BlockstoreError> {
        if let Some(block) = identity_block(cid) {
            ensure_active(opts)?;
            trace!(%cid, "serving identity block");
            return Ok(block);
        }
        self.child.get(cid, opts).await
    }

    async fn put(
        &self,
        cid: &Cid,
        block: Bytes,
        opts: &RequestOptions,
    ) -> Result<(), BlockstoreError> {
        if identity_block(cid).is_some() {
            return ensure_active(opts);
        }
        self.child.put(cid, block, opts).await
    }

    async fn delete(&self, cid: &Cid, opts: &RequestOptions) -> Result<(), BlockstoreError> {
        if identity_block(cid).is_some() {
            return ensure_active(opts);
        }
        self.child.delete(cid, opts).await
    }

    fn get_all<'a>(
        &'a self,
        opts: &'a RequestOptions,
    ) -> BoxStream<'a, Result<Pair, BlockstoreError>> {
        self.child.get_all(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::{identity_cid, sha256_cid, RAW_CODEC};
    use crate::signal::AbortController;
    use crate::storage::MemoryBlockstore;

    #[tokio::test]
    async fn test_identity_block_needs_no_storage() {
        let store = IdentityBlockstore::new(MemoryBlockstore::new());
        let opts = RequestOptions::default();
        let cid = identity_cid(RAW_CODEC, b"inline").unwrap();

        assert!(store.has(&cid, &opts).await.unwrap());
        assert_eq!(store.get(&cid, &opts).await.unwrap(), Bytes::from_static(b"inline"));

        // Writes and deletes are no-ops
        store.put(&cid, Bytes::from_static(b"inline"), &opts).await.unwrap();
        assert!(store.child().is_empty());
        store.delete(&cid, &opts).await.unwrap();
        assert!(store.has(&cid, &opts).await.unwrap());
    }

    #[tokio::test]
    async fn test_other_cids_fall_through() {
        let store = IdentityBlockstore::new(MemoryBlockstore::new());
        let opts = RequestOptions::default();
        let data = Bytes::from_static(b"stored");
        let cid = sha256_cid(&data).unwrap();

        assert!(identity_block(&cid).is_none());
        assert!(!store.has(&cid, &opts).await.unwrap());

        store.put(&cid, data.clone(), &opts).await.unwrap();
        assert_eq!(store.child().len(), 1);
        assert_eq!(store.get(&cid, &opts).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_identity_respects_cancellation() {
        let store = IdentityBlockstore::new(MemoryBlockstore::new());
        let controller = AbortController::new();
        let opts = RequestOptions::default().with_signal(controller.signal());
        let cid = identity_cid(RAW_CODEC, b"inline").unwrap();
        controller.abort();

        assert!(matches!(
            store.get(&cid, &opts).await,
            Err(BlockstoreError::Cancelled)
        ));
    }
}
