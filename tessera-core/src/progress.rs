//! Progress notifications
//!
//! Observers are side-channel only: they run synchronously at well-defined
//! phases and a panicking observer is contained and logged.

use cid::Cid;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Cloneable progress callback
pub struct OnProgress<E> {
    callback: Arc<dyn Fn(&E) + Send + Sync>,
}

impl<E> OnProgress<E> {
    pub fn new(callback: impl Fn(&E) + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }
}

impl<E: fmt::Display> OnProgress<E> {
    /// Invoke the observer. Never panics.
    pub fn emit(&self, event: &E) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| (self.callback)(event)));
        if result.is_err() {
            warn!(event = %event, "progress observer panicked");
        }
    }
}

impl<E> Clone for OnProgress<E> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<E> fmt::Debug for OnProgress<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OnProgress(..)")
    }
}

/// Facade operation an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Put,
    PutMany,
    Get,
    GetMany,
    Delete,
    DeleteMany,
    GetAll,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Put => "put",
            Operation::PutMany => "put-many",
            Operation::Get => "get",
            Operation::GetMany => "get-many",
            Operation::Delete => "delete",
            Operation::DeleteMany => "delete-many",
            Operation::GetAll => "get-all",
        }
    }
}

/// Phase within an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Block already present locally, nothing to do
    Duplicate,
    /// Announcing a block to brokers
    ProvidersNotify,
    /// Racing brokers for a missing block
    ProvidersGet,
    /// Touching the local tier
    Store,
    /// Block served from the local tier
    LocalHit,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Duplicate => "duplicate",
            Stage::ProvidersNotify => "providers:notify",
            Stage::ProvidersGet => "providers:get",
            Stage::Store => "store",
            Stage::LocalHit => "local-hit",
        }
    }
}

/// Progress event emitted by the block facade.
///
/// `cid` is `None` for batch-level events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEvent {
    pub operation: Operation,
    pub stage: Stage,
    pub cid: Option<Cid>,
}

impl BlockEvent {
    pub fn new(operation: Operation, stage: Stage, cid: Option<Cid>) -> Self {
        Self {
            operation,
            stage,
            cid,
        }
    }

    /// Phase name, e.g. `put-many:providers:notify`
    pub fn name(&self) -> String {
        format!("{}:{}", self.operation.as_str(), self.stage.as_str())
    }
}

impl fmt::Display for BlockEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.operation.as_str(), self.stage.as_str())?;
        if let Some(cid) = &self.cid {
            write!(f, " {}", cid)?;
        }
        Ok(())
    }
}
