//! Pluggable block brokers
//!
//! A broker moves blocks over some transport. Its three capabilities are
//! independently optional and declared up front through [`Capabilities`];
//! [`Brokers`] records them once at registration so the hot path never probes
//! a broker for support.

use async_trait::async_trait;
use bytes::Bytes;
use cid::Cid;
use std::fmt;
use std::sync::Arc;

use crate::options::{RequestOptions, SessionOptions};
use crate::signal::AbortSignal;
use crate::verify::{IntegrityError, TrackedValidator};

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Capability not supported by this broker")]
    Unsupported,

    #[error("Cancelled")]
    Cancelled,

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("Block not available: {0}")]
    NotAvailable(Cid),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// What a broker can do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub retrieve: bool,
    pub announce: bool,
    pub session: bool,
}

impl Capabilities {
    pub const NONE: Self = Self {
        retrieve: false,
        announce: false,
        session: false,
    };

    pub const RETRIEVE: Self = Self {
        retrieve: true,
        ..Self::NONE
    };

    pub const ANNOUNCE: Self = Self {
        announce: true,
        ..Self::NONE
    };

    pub const fn with_retrieve(mut self) -> Self {
        self.retrieve = true;
        self
    }

    pub const fn with_announce(mut self) -> Self {
        self.announce = true;
        self
    }

    pub const fn with_session(mut self) -> Self {
        self.session = true;
        self
    }
}

/// Handed to [`Broker::retrieve`]
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    /// Fires when the caller gives up or another broker already won
    pub signal: AbortSignal,
    /// Brokers may verify bytes themselves (e.g. before committing to a
    /// transfer); blocks they did not verify are verified after they return
    pub validator: TrackedValidator,
}

impl RetrieveOptions {
    pub fn validate(&self, block: &Bytes) -> Result<(), IntegrityError> {
        self.validator.validate(block)
    }
}

/// A retrieval, announce and/or session provider.
///
/// Every capability defaults to [`BrokerError::Unsupported`]; override the
/// ones listed in [`Broker::capabilities`].
#[async_trait]
pub trait Broker: Send + Sync {
    /// Used in logs and aggregated errors
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Fetch the block for `cid`. Should stop promptly once `opts.signal` fires.
    async fn retrieve(&self, _cid: &Cid, _opts: RetrieveOptions) -> Result<Bytes, BrokerError> {
        Err(BrokerError::Unsupported)
    }

    /// Tell the network this node holds `block`. Best effort.
    async fn announce(
        &self,
        _cid: &Cid,
        _block: &Bytes,
        _opts: &RequestOptions,
    ) -> Result<(), BrokerError> {
        Err(BrokerError::Unsupported)
    }

    /// Derive a broker scoped to the DAG under `root`
    fn create_session(
        &self,
        _root: &Cid,
        _opts: &SessionOptions,
    ) -> Result<Arc<dyn Broker>, BrokerError> {
        Err(BrokerError::Unsupported)
    }
}

/// A broker with its capabilities resolved at registration
#[derive(Clone)]
pub struct RegisteredBroker {
    broker: Arc<dyn Broker>,
    capabilities: Capabilities,
}

impl RegisteredBroker {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        let capabilities = broker.capabilities();
        Self {
            broker,
            capabilities,
        }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn name(&self) -> &str {
        self.broker.name()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}

impl fmt::Debug for RegisteredBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredBroker")
            .field("name", &self.name())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Ordered, shared set of registered brokers
#[derive(Debug, Clone, Default)]
pub struct Brokers {
    entries: Arc<Vec<RegisteredBroker>>,
}

impl Brokers {
    pub fn new(brokers: impl IntoIterator<Item = Arc<dyn Broker>>) -> Self {
        Self {
            entries: Arc::new(brokers.into_iter().map(RegisteredBroker::new).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredBroker> {
        self.entries.iter()
    }

    pub fn retrievers(&self) -> impl Iterator<Item = &RegisteredBroker> {
        self.iter().filter(|entry| entry.capabilities.retrieve)
    }

    pub fn announcers(&self) -> impl Iterator<Item = &RegisteredBroker> {
        self.iter().filter(|entry| entry.capabilities.announce)
    }
}

impl FromIterator<Arc<dyn Broker>> for Brokers {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Broker>>>(iter: I) -> Self {
        Self::new(iter)
    }
}
