use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::GcForestError;

/// Shared flag for aborting a running fit from another thread.
///
/// Clones observe the same flag. The trainer checks it before every scan
/// window and cascade layer, and at the start of every parallel training job.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Return `true` once [`CancellationToken::cancel`] has been called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Fail with a bare [`GcForestError::Cancelled`]; the trainer attaches the
    /// partial model on the way out.
    pub(crate) fn check(&self) -> Result<(), GcForestError> {
        if self.is_cancelled() {
            return Err(GcForestError::Cancelled {
                completed_layers: 0,
                partial: None,
            });
        }
        Ok(())
    }
}
