//! Tunnel establishment error types.

use crate::device::{DeviceError, LocalPort, RemoteSocket};

/// Errors returned by [`Connector::connect`](crate::Connector::connect).
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// No local port could be bound. Nothing was created on the device.
    #[error("Failed to allocate a local TCP port: {0}")]
    PortAllocation(#[source] std::io::Error),

    /// The bridge daemon refused or failed the forward. Nothing was created
    /// on the device.
    #[error("Failed to forward {port} to {remote}: {source}")]
    ForwardSetup {
        port: LocalPort,
        remote: RemoteSocket,
        #[source]
        source: DeviceError,
    },

    /// Every attempt failed the readiness probe. The forward stays registered
    /// on the cleanup scope.
    #[error("Timeout connecting to service {remote} via {port} after {attempts} attempts")]
    ServiceTimeout {
        port: LocalPort,
        remote: RemoteSocket,
        attempts: u32,
    },

    /// The caller's shutdown signal fired mid-retry. The forward stays
    /// registered on the cleanup scope.
    #[error("Connecting to service {remote} via {port} was cancelled")]
    Cancelled { port: LocalPort, remote: RemoteSocket },
}

impl ConnectError {
    /// Whether trying again later may succeed (the remote service may still be
    /// starting up).
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ServiceTimeout { .. })
    }

    /// Local port of the forward, if one was created.
    pub const fn forwarded_port(&self) -> Option<LocalPort> {
        match self {
            Self::ServiceTimeout { port, .. } | Self::Cancelled { port, .. } => Some(*port),
            Self::PortAllocation(_) | Self::ForwardSetup { .. } => None,
        }
    }
}

/// Removing a forward failed. Reported and logged, never the primary result
/// of a connect or close.
#[derive(Debug, thiserror::Error)]
#[error("Failed to remove forward {port}: {source}")]
pub struct TeardownError {
    pub port: LocalPort,
    #[source]
    pub source: DeviceError,
}
