//! Cooperative cancellation for receive loops.

use tokio_util::sync::CancellationToken;

#[cfg(test)]
#[path = "cancellation_tests.rs"]
mod tests;

/// One-shot, externally triggered stop request.
///
/// A signal starts unset, can be set once and is never reset. Receive loops
/// sample it between full receive and acknowledge cycles; they never abandon
/// a cycle half way. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    token: CancellationToken,
}

impl CancellationSignal {
    /// Create an unset signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Later calls have no further effect.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve once cancellation has been requested
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Signal that is set whenever this one is, but can also be set on its own
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }
}
