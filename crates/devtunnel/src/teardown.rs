//! Single-fire removal of a forward.
//!
//! A [`TeardownGuard`] is shared between the connection that owns the forward
//! and the [`CleanupScope`](crate::CleanupScope) it was registered on. Whichever
//! fires first runs `remove_forward`; every later call, from either side, is a
//! no-op.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::device::{Device, LocalPort};
use crate::error::TeardownError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GuardState {
    Armed,
    Fired,
}

/// Result of calling [`TeardownGuard::fire`].
#[derive(Debug)]
pub enum TeardownOutcome {
    /// This call removed the forward.
    Removed,
    /// This call attempted removal and the device reported an error.
    Failed(TeardownError),
    /// An earlier call already fired the guard.
    AlreadyFired,
}

/// One-shot gate around `device.remove_forward(port)`.
pub struct TeardownGuard {
    device: Arc<dyn Device>,
    port: LocalPort,
    /// Held across the removal so a concurrent caller waits for it to finish
    /// instead of returning while the forward still exists.
    state: Mutex<GuardState>,
    /// Mirror of `state` for synchronous observers.
    fired: AtomicBool,
}

impl TeardownGuard {
    pub fn new(device: Arc<dyn Device>, port: LocalPort) -> Self {
        Self {
            device,
            port,
            state: Mutex::new(GuardState::Armed),
            fired: AtomicBool::new(false),
        }
    }

    pub const fn port(&self) -> LocalPort {
        self.port
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Remove the forward unless some earlier call already did.
    ///
    /// The guard only counts as fired once `remove_forward` has returned. A
    /// failed removal still counts and is never retried. If this future is
    /// dropped mid-removal the guard stays armed and the next call removes.
    pub async fn fire(&self) -> TeardownOutcome {
        let mut state = self.state.lock().await;
        if *state == GuardState::Fired {
            return TeardownOutcome::AlreadyFired;
        }

        let result = self.device.remove_forward(self.port).await;
        *state = GuardState::Fired;
        self.fired.store(true, Ordering::Release);

        match result {
            Ok(()) => {
                debug!(port = %self.port, device = %self.device.serial(), "Removed forward");
                TeardownOutcome::Removed
            }
            Err(source) => {
                let err = TeardownError {
                    port: self.port,
                    source,
                };
                warn!(error = %err, device = %self.device.serial(), "Forward removal failed");
                TeardownOutcome::Failed(err)
            }
        }
    }
}

impl std::fmt::Debug for TeardownGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeardownGuard")
            .field("device", &self.device.serial())
            .field("port", &self.port)
            .field("fired", &self.is_fired())
            .finish()
    }
}
