//! Tessera Core
//!
//! Content-addressed block storage with verified network retrieval. A local
//! tier answers what it holds; misses are raced across pluggable brokers and
//! only bytes that hash to the requested CID are ever returned or stored.

pub mod broker;
pub mod config;
pub mod dnslink;
pub mod error;
pub mod gateway;
pub mod hashing;
pub mod identity;
pub mod metrics;
pub mod networked;
pub mod options;
pub mod progress;
pub mod retrieval;
pub mod rocksdb_store;
pub mod runtime;
pub mod session;
pub mod signal;
pub mod storage;
pub mod verify;

pub use broker::{Broker, BrokerError, Brokers, Capabilities, RegisteredBroker, RetrieveOptions};
pub use config::{Command, Config, ConfigError};
pub use dnslink::{DnsError, DnsEvent, DnsLinkResolver, DnsOptions};
pub use error::BlockError;
pub use gateway::GatewayBroker;
pub use hashing::{
    cid_for, identity_cid, parse_cid, parse_cid_str, sha256_cid, CidError, Hasher, Hashers,
    RAW_CODEC,
};
pub use identity::IdentityBlockstore;
pub use metrics::Metrics;
pub use networked::NetworkedBlockstore;
pub use options::{RequestOptions, SessionOptions};
pub use progress::{BlockEvent, OnProgress, Operation, Stage};
pub use retrieval::{AggregateRetrievalError, AttemptFailure};
pub use rocksdb_store::{BlockStoreStats, RocksBlockstore};
pub use runtime::{run, RuntimeError};
pub use signal::{AbortController, AbortSignal};
pub use storage::{Blockstore, BlockstoreError, MemoryBlockstore, Pair};
pub use verify::{BlockValidator, IntegrityError, TrackedValidator};

// Re-exported for broker and store implementors
pub use async_trait::async_trait;
pub use bytes::Bytes;
pub use cid::Cid;
