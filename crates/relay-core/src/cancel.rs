//! The one-shot cancellation signal shared by everything in a run.

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

/// Why a run was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The run's deadline elapsed.
    Deadline,
    /// The operator asked the process to shut down (SIGINT / SIGTERM).
    Interrupt,
}

/// A cooperative, idempotent stop flag.
///
/// Cloning shares the underlying signal. The first [`trigger`](Self::trigger)
/// records its reason and cancels; later triggers change nothing.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal. Returns `true` if this call was the first trigger.
    pub fn trigger(&self, reason: CancelReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The reason recorded by the first trigger, if any.
    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.get().copied()
    }

    /// Wait until the signal is set. Completes immediately if it already is.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}
