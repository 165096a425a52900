use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Error returned when an operation observes a fired [`CancelToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Cooperative cancellation token.
///
/// Every blocking store operation takes a token as its first parameter and
/// checks it at I/O boundaries; CPU-only sections between I/O calls do not
/// poll it. Cloning is cheap and all clones observe the same state.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    fired: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a new, un-fired token.
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh token for callers that never cancel.
    pub fn never() -> Self {
        Self::default()
    }

    /// Fire the token. All clones observe the cancellation.
    pub fn cancel(&self) {
        self.fired.store(true, Ordering::SeqCst);
    }

    /// Returns `true` if the token has fired.
    pub fn is_cancelled(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` if the token has fired.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}
