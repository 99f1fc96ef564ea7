//! Background job tokens.
//!
//! Each prefetch run holds a [`JobToken`]. Beginning a new run bumps the
//! generation and cancels the previous token, so only the newest run keeps
//! writing. Cancellation is cooperative: workers poll
//! [`JobToken::is_current`] between items and race in-flight work against
//! [`JobToken::cancellation`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct JobToken {
    generation: u64,
    current: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl JobToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Still the newest run and not cancelled
    pub fn is_current(&self) -> bool {
        !self.cancel.is_cancelled() && self.current.load(Ordering::Acquire) == self.generation
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[derive(Debug)]
pub struct JobTracker {
    current: Arc<AtomicU64>,
    active: Mutex<CancellationToken>,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTracker {
    pub fn new() -> Self {
        Self {
            current: Arc::new(AtomicU64::new(0)),
            active: Mutex::new(CancellationToken::new()),
        }
    }

    /// Start a new run, invalidating whatever ran before
    pub fn begin(&self) -> JobToken {
        let mut active = self.active.lock();
        active.cancel();

        let cancel = CancellationToken::new();
        *active = cancel.clone();
        let generation = self.current.fetch_add(1, Ordering::AcqRel) + 1;

        JobToken {
            generation,
            current: Arc::clone(&self.current),
            cancel,
        }
    }

    /// Cancel the running job without starting another
    pub fn cancel_current(&self) {
        self.active.lock().cancel();
    }

    pub fn current_generation(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }
}
