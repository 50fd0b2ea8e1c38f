//! Cancellation signals
//!
//! An [`AbortController`] owns the firing side of a signal; any number of
//! [`AbortSignal`]s observe it. Signals compose: [`AbortSignal::any`] builds a
//! signal that fires as soon as one of its parents does. Subscriptions are
//! plain `watch` receivers, so they are released when the signal is dropped.

use futures::future::{self, FutureExt};
use std::future::Future;
use tokio::sync::watch;

/// Fires the signals handed out by [`AbortController::signal`]
#[derive(Debug)]
pub struct AbortController {
    tx: watch::Sender<bool>,
}

impl AbortController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// A signal observing this controller
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            receivers: vec![self.tx.subscribe()],
        }
    }

    /// Fire every signal derived from this controller. Idempotent.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

/// Observes one or more controllers.
///
/// The default signal has no parents and never fires.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    receivers: Vec<watch::Receiver<bool>>,
}

impl AbortSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        Self::default()
    }

    /// A signal that fires when any of `signals` fires
    pub fn any<'a>(signals: impl IntoIterator<Item = &'a AbortSignal>) -> Self {
        Self {
            receivers: signals
                .into_iter()
                .flat_map(|signal| signal.receivers.iter().cloned())
                .collect(),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.receivers.iter().any(|rx| *rx.borrow())
    }

    /// Resolves once the signal fires.
    ///
    /// A parent controller dropped without aborting never fires.
    pub async fn aborted(&self) {
        if self.receivers.is_empty() {
            return future::pending().await;
        }

        let waits = self.receivers.iter().cloned().map(|mut rx| {
            async move {
                let closed = rx.wait_for(|aborted| *aborted).await.is_err();
                if closed {
                    future::pending::<()>().await;
                }
            }
            .boxed()
        });

        future::select_all(waits).await;
    }

    /// Drive `fut` to completion unless the signal fires first.
    ///
    /// Returns `None` when aborted; `fut` is dropped at that point.
    pub async fn until_aborted<F: Future>(&self, fut: F) -> Option<F::Output> {
        if self.is_aborted() {
            return None;
        }

        tokio::select! {
            biased;
            _ = self.aborted() => None,
            output = fut => Some(output),
        }
    }
}
