//! Root-scoped sessions
//!
//! A session is a facade over the same local tier whose session-capable
//! brokers have been swapped for instances scoped to one content root.

use cid::Cid;
use std::sync::Arc;
use tracing::debug;

use crate::broker::{Broker, Brokers};
use crate::error::BlockError;
use crate::networked::NetworkedBlockstore;
use crate::options::SessionOptions;

impl NetworkedBlockstore {
    /// Derive a facade whose retrievals go through brokers scoped to `root`.
    ///
    /// Blocks stored through either facade are visible to both, and metrics
    /// are shared.
    pub fn create_session(
        &self,
        root: Cid,
        opts: &SessionOptions,
    ) -> Result<NetworkedBlockstore, BlockError> {
        if opts.signal.is_aborted() {
            return Err(BlockError::Cancelled);
        }

        let mut scoped = 0;
        let brokers = self
            .brokers
            .iter()
            .map(|entry| {
                if !entry.capabilities().session {
                    return Ok(entry.broker().clone());
                }
                scoped += 1;
                entry
                    .broker()
                    .create_session(&root, opts)
                    .map_err(|error| BlockError::Session {
                        broker: entry.name().to_string(),
                        error,
                    })
            })
            .collect::<Result<Vec<Arc<dyn Broker>>, _>>()?;

        debug!(%root, brokers = brokers.len(), scoped, "Created session");

        Ok(NetworkedBlockstore {
            local: self.local.clone(),
            brokers: Brokers::new(brokers),
            hashers: self.hashers.clone(),
            metrics: self.metrics.clone(),
            root: Some(root),
        })
    }
}
