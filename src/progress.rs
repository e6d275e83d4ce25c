//! Progress reporting and cancellation for long-running drivers.
//!
//! The library core reports progress through the [`ProgressMonitor`] trait so
//! it stays free of any terminal UI; the CLI provides an `indicatif`-backed
//! implementation. Cancellation is cooperative: drivers poll a
//! [`CancellationToken`] between chunks or files and return
//! [`crate::errors::GambitError::Cancelled`] when it has been triggered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Receiver for progress updates from distance and signature drivers.
///
/// Implementations must be cheap to call; drivers may invoke `advance` from
/// worker threads.
pub trait ProgressMonitor: Sync {
    /// Report that `n` more units of work have completed.
    fn advance(&self, n: u64);
}

/// Monitor that discards all updates.
pub struct NullProgress;

impl ProgressMonitor for NullProgress {
    fn advance(&self, _n: u64) {}
}

/// Cooperative cancellation flag, cheaply cloneable across threads.
#[derive(Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. All clones observe the change.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Return `Err(Cancelled)` if cancellation has been requested.
    pub fn check(&self) -> crate::errors::Result<()> {
        if self.is_cancelled() {
            Err(crate::errors::GambitError::Cancelled)
        } else {
            Ok(())
        }
    }
}
