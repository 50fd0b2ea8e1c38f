//! Retrieval race
//!
//! A block missing locally is requested from every retrieving broker at once.
//! The first attempt that returns verified bytes wins and the rest are told to
//! stop through a race-scoped signal. Integrity failures count as ordinary
//! attempt failures, so an honest broker can still win after a faulty one.

use bytes::Bytes;
use cid::Cid;
use futures::stream::{FuturesUnordered, StreamExt};
use std::fmt;
use tracing::{debug, trace};

use crate::broker::{BrokerError, Brokers, RegisteredBroker, RetrieveOptions};
use crate::error::BlockError;
use crate::hashing::Hashers;
use crate::options::RequestOptions;
use crate::signal::{AbortController, AbortSignal};
use crate::verify::BlockValidator;

/// One broker's failed attempt
#[derive(Debug, thiserror::Error)]
#[error("{broker}: {error}")]
pub struct AttemptFailure {
    pub broker: String,
    #[source]
    pub error: BrokerError,
}

/// Every attempt failed, or no broker could retrieve at all
#[derive(Debug)]
pub struct AggregateRetrievalError {
    pub cid: Cid,
    pub failures: Vec<AttemptFailure>,
}

impl AggregateRetrievalError {
    pub fn new(cid: Cid, failures: Vec<AttemptFailure>) -> Self {
        Self { cid, failures }
    }
}

impl fmt::Display for AggregateRetrievalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "no broker can retrieve {}", self.cid);
        }
        write!(f, "all {} broker(s) failed to retrieve {}", self.failures.len(), self.cid)?;
        for failure in &self.failures {
            write!(f, "; {}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateRetrievalError {}

/// Owns the internal half of the race signal.
///
/// Dropping it fires the signal, which is what stops losing attempts on every
/// exit path: win, total failure, caller cancellation, or the race future
/// itself being dropped.
struct RaceScope {
    controller: AbortController,
    signal: AbortSignal,
}

impl RaceScope {
    fn new(caller: &AbortSignal) -> Self {
        let controller = AbortController::new();
        let signal = AbortSignal::any([caller, &controller.signal()]);
        Self { controller, signal }
    }

    fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }
}

impl Drop for RaceScope {
    fn drop(&mut self) {
        self.controller.abort();
    }
}

/// Race every retrieving broker for `cid` and return the first verified block
pub async fn retrieve(
    cid: &Cid,
    hashers: &Hashers,
    brokers: &Brokers,
    opts: &RequestOptions,
) -> Result<Bytes, BlockError> {
    let retrievers: Vec<&RegisteredBroker> = brokers.retrievers().collect();
    if retrievers.is_empty() {
        debug!(%cid, "No broker supports retrieval");
        return Err(AggregateRetrievalError::new(*cid, Vec::new()).into());
    }

    let validator = hashers.validator(cid)?;

    if opts.signal.is_aborted() {
        return Err(BlockError::Cancelled);
    }

    let scope = RaceScope::new(&opts.signal);
    debug!(%cid, brokers = retrievers.len(), "Racing brokers");

    let mut attempts: FuturesUnordered<_> = retrievers
        .into_iter()
        .map(|entry| attempt(entry, cid, scope.signal(), &validator))
        .collect();
    let mut failures = Vec::new();

    loop {
        tokio::select! {
            biased;
            _ = opts.signal.aborted() => {
                debug!(%cid, "Retrieval cancelled by caller");
                return Err(BlockError::Cancelled);
            }
            next = attempts.next() => match next {
                Some(Ok((broker, block))) => {
                    debug!(%cid, broker, size = block.len(), "Retrieval race won");
                    return Ok(block);
                }
                Some(Err(failure)) => {
                    debug!(%cid, broker = %failure.broker, error = %failure.error, "Retrieval attempt failed");
                    failures.push(failure);
                }
                None => {
                    return Err(AggregateRetrievalError::new(*cid, failures).into());
                }
            }
        }
    }
}

async fn attempt<'a>(
    entry: &'a RegisteredBroker,
    cid: &Cid,
    signal: AbortSignal,
    validator: &BlockValidator,
) -> Result<(&'a str, Bytes), AttemptFailure> {
    let failure = |error: BrokerError| AttemptFailure {
        broker: entry.name().to_string(),
        error,
    };

    let tracked = validator.track();
    let opts = RetrieveOptions {
        signal,
        validator: tracked.clone(),
    };

    let block = entry.broker().retrieve(cid, opts).await.map_err(failure)?;

    if !tracked.accepted(&block) {
        trace!(%cid, broker = entry.name(), invoked = tracked.was_invoked(), "Verifying block returned by broker");
        validator
            .validate(&block)
            .map_err(|e| failure(BrokerError::Integrity(e)))?;
    }

    Ok((entry.name(), block))
}
