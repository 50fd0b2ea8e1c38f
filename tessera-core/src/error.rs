//! Errors surfaced by the block facade

use crate::broker::BrokerError;
use crate::retrieval::AggregateRetrievalError;
use crate::storage::BlockstoreError;
use crate::verify::IntegrityError;

#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    /// No hasher registered for the CID's multihash algorithm
    #[error("no hasher registered for multihash code 0x{code:x}")]
    Configuration { code: u64 },

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("operation cancelled")]
    Cancelled,

    /// Every broker attempt failed, or no broker could retrieve
    #[error(transparent)]
    Retrieval(#[from] AggregateRetrievalError),

    #[error("failed to create session with broker {broker}: {error}")]
    Session { broker: String, error: BrokerError },

    #[error("blockstore error: {0}")]
    Store(BlockstoreError),
}

impl BlockError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlockError::Store(BlockstoreError::NotFound(_)))
    }
}

impl From<BlockstoreError> for BlockError {
    fn from(err: BlockstoreError) -> Self {
        match err {
            BlockstoreError::Cancelled => BlockError::Cancelled,
            other => BlockError::Store(other),
        }
    }
}
