//! Caller-driven cancellation.

use crate::error::{MirrorError, MirrorResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared cancellation flag.
///
/// The only blocking wait point in the engine is a bulk session's `finish`,
/// which polls in-flight requests in a loop; the token is checked on each
/// iteration so a caller-level interrupt can abort the wait from another
/// thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Fails with [`MirrorError::Cancelled`] if cancellation was requested.
    pub fn check(&self) -> MirrorResult<()> {
        if self.is_cancelled() {
            Err(MirrorError::Cancelled)
        } else {
            Ok(())
        }
    }
}
