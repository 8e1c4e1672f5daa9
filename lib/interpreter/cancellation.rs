use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::Error;

/// A cooperative cancellation token.
///
/// Clones share the same flag, so a token handed to an interpreter can be
/// cancelled from another thread. The interpreter polls the token once per
/// processed state. A cancelled token makes `interpret` return
/// `Err(Error::Cancelled)`.
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    pub fn new() -> Cancellation {
        Cancellation::default()
    }

    /// A token which also counts as cancelled once `deadline` has passed.
    pub fn with_deadline(deadline: Instant) -> Cancellation {
        Cancellation {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
            || self
                .deadline
                .map(|deadline| Instant::now() >= deadline)
                .unwrap_or(false)
    }

    /// Returns `Err(Error::Cancelled)` if this token was cancelled.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
