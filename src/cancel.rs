//! Cooperative cancellation handle shared by every session type.
//!
//! A [`CancelHandle`] is a boolean flag plus an `abort()` method. Sessions
//! check the flag at each suspension point (network read, timer tick,
//! speech engine event); nothing is preempted.

use tokio_util::sync::CancellationToken;

/// Clonable cancellation handle. All clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Create a fresh, un-canceled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn abort(&self) {
        self.token.cancel();
    }

    /// Whether cancellation has been requested.
    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn canceled(&self) {
        self.token.cancelled().await;
    }
}
