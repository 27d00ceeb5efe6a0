//! Deferred cleanup owned by the caller's context.
//!
//! Every forward created by [`Connector`](crate::Connector) is registered on a
//! [`CleanupScope`] before the first dial. When the context ends the caller
//! runs the scope, removing whatever forwards were not already removed by
//! closing their connections.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::teardown::{TeardownGuard, TeardownOutcome};

/// Summary of a [`CleanupScope::run`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Forwards removed by this pass.
    pub removed: usize,
    /// Forwards whose removal failed in this pass.
    pub failed: usize,
    /// Guards that had already fired (connection closed explicitly).
    pub skipped: usize,
}

#[derive(Default)]
struct ScopeInner {
    guards: Mutex<Vec<Arc<TeardownGuard>>>,
}

impl ScopeInner {
    fn take(&self) -> Vec<Arc<TeardownGuard>> {
        std::mem::take(&mut *self.guards.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        let pending: Vec<_> = self
            .take()
            .into_iter()
            .filter(|g| !g.is_fired())
            .collect();
        if pending.is_empty() {
            return;
        }

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            debug!(
                pending = pending.len(),
                "Cleanup scope dropped, removing forwards in background"
            );
            handle.spawn(async move {
                for guard in pending {
                    guard.fire().await;
                }
            });
        } else {
            let ports: Vec<String> = pending.iter().map(|g| g.port().to_string()).collect();
            warn!(
                ports = ?ports,
                "Cleanup scope dropped outside a runtime, forwards left in place"
            );
        }
    }
}

/// Cloneable handle to the list of teardown actions of one context.
///
/// Clones share the same list. Call [`run`](Self::run) when the context ends;
/// if the last handle is dropped first, outstanding forwards are removed on
/// the current tokio runtime in the background.
#[derive(Clone, Default)]
pub struct CleanupScope {
    inner: Arc<ScopeInner>,
}

impl CleanupScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a guard to be fired when the scope runs.
    pub fn register(&self, guard: Arc<TeardownGuard>) {
        let mut guards = self
            .inner
            .guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Closed connections already fired their guards.
        guards.retain(|g| !g.is_fired());
        guards.push(guard);
    }

    /// Number of registered guards that have not fired yet.
    pub fn pending(&self) -> usize {
        self.inner
            .guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|g| !g.is_fired())
            .count()
    }

    /// Fire every registered guard and empty the scope.
    pub async fn run(&self) -> CleanupReport {
        let guards = self.inner.take();
        let mut report = CleanupReport::default();
        for guard in guards {
            match guard.fire().await {
                TeardownOutcome::Removed => report.removed += 1,
                TeardownOutcome::Failed(_) => report.failed += 1,
                TeardownOutcome::AlreadyFired => report.skipped += 1,
            }
        }
        if report.removed + report.failed > 0 {
            info!(
                removed = report.removed,
                failed = report.failed,
                skipped = report.skipped,
                "Cleanup scope ran"
            );
        }
        report
    }
}

impl std::fmt::Debug for CleanupScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupScope")
            .field("pending", &self.pending())
            .finish()
    }
}
