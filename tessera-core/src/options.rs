//! Per-call options threaded through the facade, the local tier and brokers

use crate::progress::{BlockEvent, OnProgress};
use crate::signal::AbortSignal;

#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Aborts the call, including any in-flight broker attempts
    pub signal: AbortSignal,
    pub on_progress: Option<OnProgress<BlockEvent>>,
    /// Serve `get` from the local tier only
    pub offline: bool,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_progress(mut self, on_progress: OnProgress<BlockEvent>) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub(crate) fn emit(&self, event: BlockEvent) {
        if let Some(progress) = &self.on_progress {
            progress.emit(&event);
        }
    }
}

/// Options handed to brokers when deriving a session
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub signal: AbortSignal,
    /// Upper bound on providers a session broker should query, if it cares
    pub max_providers: Option<usize>,
}
