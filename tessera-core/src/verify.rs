//! Block verification against CIDs

use bytes::Bytes;
use cid::Cid;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::error::BlockError;
use crate::hashing::Hasher;

/// Block bytes do not hash to the expected CID
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("block does not match {cid} ({algorithm} digest mismatch)")]
pub struct IntegrityError {
    pub cid: Cid,
    pub algorithm: &'static str,
}

/// Checks candidate bytes against one CID
#[derive(Clone)]
pub struct BlockValidator {
    cid: Cid,
    hasher: Arc<dyn Hasher>,
}

impl BlockValidator {
    /// Fails with [`BlockError::Configuration`] unless `hasher` implements the
    /// CID's multihash algorithm.
    pub fn new(cid: Cid, hasher: Option<Arc<dyn Hasher>>) -> Result<Self, BlockError> {
        let code = cid.hash().code();
        match hasher {
            Some(hasher) if hasher.code() == code => Ok(Self { cid, hasher }),
            _ => Err(BlockError::Configuration { code }),
        }
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn validate(&self, block: &[u8]) -> Result<(), IntegrityError> {
        let digest = self.hasher.digest(block);
        if digest.as_slice() != self.cid.hash().digest() {
            return Err(IntegrityError {
                cid: self.cid,
                algorithm: self.hasher.name(),
            });
        }
        Ok(())
    }

    /// A validator that remembers what it accepted, handed to one broker attempt
    pub fn track(&self) -> TrackedValidator {
        TrackedValidator {
            inner: self.clone(),
            invoked: Arc::new(AtomicBool::new(false)),
            accepted: Arc::new(Mutex::new(None)),
        }
    }
}

impl fmt::Debug for BlockValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockValidator")
            .field("cid", &self.cid)
            .field("algorithm", &self.hasher.name())
            .finish()
    }
}

/// Validation callback for brokers.
///
/// Records whether the broker invoked it and which bytes passed, so the race
/// engine only re-hashes blocks the broker did not verify itself.
#[derive(Debug, Clone)]
pub struct TrackedValidator {
    inner: BlockValidator,
    invoked: Arc<AtomicBool>,
    accepted: Arc<Mutex<Option<Bytes>>>,
}

impl TrackedValidator {
    pub fn cid(&self) -> &Cid {
        self.inner.cid()
    }

    pub fn validate(&self, block: &Bytes) -> Result<(), IntegrityError> {
        self.invoked.store(true, Ordering::Release);
        self.inner.validate(block)?;
        *self.accepted.lock().unwrap_or_else(PoisonError::into_inner) = Some(block.clone());
        Ok(())
    }

    pub fn was_invoked(&self) -> bool {
        self.invoked.load(Ordering::Acquire)
    }

    /// Whether exactly `block` already passed validation
    pub fn accepted(&self, block: &Bytes) -> bool {
        self.accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|accepted| accepted == block)
    }
}
