//! Device capability consumed by the tunnel.
//!
//! A [`Device`] is anything that can ask the bridge daemon to map a local TCP
//! port onto a socket on the device, and later drop that mapping.

use std::fmt;

use async_trait::async_trait;

/// A local TCP port on the host side of a forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalPort(u16);

impl LocalPort {
    pub const fn new(port: u16) -> Self {
        Self(port)
    }

    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for LocalPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp:{}", self.0)
    }
}

/// Device-side end of a forward, in the bridge daemon's vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemoteSocket {
    /// Socket in the abstract namespace, addressed by name only.
    Abstract(String),
    /// Filesystem-bound unix socket.
    Filesystem(String),
    /// TCP port on the device.
    Tcp(u16),
}

impl fmt::Display for RemoteSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abstract(name) => write!(f, "localabstract:{name}"),
            Self::Filesystem(path) => write!(f, "localfilesystem:{path}"),
            Self::Tcp(port) => write!(f, "tcp:{port}"),
        }
    }
}

/// Errors reported by a [`Device`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Failed to run bridge client {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Bridge command `{command}` failed ({status}): {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Device rejected request: {0}")]
    Rejected(String),
}

/// Port-forwarding capability of a device reachable through the bridge daemon.
///
/// Implementations must tolerate `remove_forward` on a port that is no longer
/// forwarded; the tunnel never calls it twice for one mapping, but the bridge
/// may have dropped the mapping on its own (device unplugged, daemon restart).
#[async_trait]
pub trait Device: Send + Sync {
    /// Identifier used in logs.
    fn serial(&self) -> &str;

    /// Map `local` on the host to `remote` on the device.
    async fn forward(&self, local: LocalPort, remote: &RemoteSocket) -> Result<(), DeviceError>;

    /// Drop the mapping for `local`.
    async fn remove_forward(&self, local: LocalPort) -> Result<(), DeviceError>;
}
