//! Progress observation and cooperative cancellation

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, SyncError};

/// Phase being reported. Positions count bytes of the stream the phase
/// reads: the base for signatures, the new stream for hashing and delta
/// building, the encoded delta for applying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressOperation {
    HashingFile,
    BuildingSignatures,
    BuildingDelta,
    ApplyingDelta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressReport {
    pub operation: ProgressOperation,
    pub current_position: u64,
    /// Known only when the stream length was available up front
    pub total: Option<u64>,
}

/// Observer notified after each unit of work
pub trait ProgressReporter: Send + Sync {
    fn report(&self, report: ProgressReport);
}

impl<F> ProgressReporter for F
where
    F: Fn(ProgressReport) + Send + Sync,
{
    fn report(&self, report: ProgressReport) {
        self(report)
    }
}

/// Optional observer threaded through a phase
#[derive(Clone, Default)]
pub struct Progress {
    reporter: Option<Arc<dyn ProgressReporter>>,
}

impl Progress {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            reporter: Some(reporter),
        }
    }

    /// Notify the observer. A panicking observer is logged and ignored.
    pub fn report(&self, operation: ProgressOperation, current_position: u64, total: Option<u64>) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        let report = ProgressReport {
            operation,
            current_position,
            total,
        };
        if catch_unwind(AssertUnwindSafe(|| reporter.report(report))).is_err() {
            tracing::warn!(?operation, current_position, "progress observer panicked; ignoring");
        }
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("enabled", &self.reporter.is_some())
            .finish()
    }
}

/// Shared flag checked at every suspension point
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_reports_reach_closure() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress = Progress::new(Arc::new(move |r: ProgressReport| {
            sink.lock().unwrap().push(r);
        }));

        progress.report(ProgressOperation::ApplyingDelta, 10, Some(100));
        progress.report(ProgressOperation::ApplyingDelta, 100, Some(100));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].current_position, 100);
    }

    #[test]
    fn test_panicking_observer_does_not_propagate() {
        let progress = Progress::new(Arc::new(|_: ProgressReport| panic!("observer failure")));
        progress.report(ProgressOperation::HashingFile, 0, None);
    }

    #[test]
    fn test_none_is_noop() {
        Progress::none().report(ProgressOperation::BuildingDelta, 1, None);
    }

    #[test]
    fn test_cancellation_flag() {
        let flag = CancellationFlag::new();
        let shared = flag.clone();
        assert!(flag.check().is_ok());

        shared.cancel();
        assert!(flag.is_cancelled());
        assert!(matches!(flag.check(), Err(SyncError::Cancelled)));
    }
}
