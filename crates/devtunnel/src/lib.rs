//! devtunnel
//!
//! Opens streams to abstract-named sockets on a device reachable through a
//! bridge daemon. The bridge accepts connections on a forwarded port before
//! the device-side service is ready, so connecting means retrying until the
//! stream actually carries data. Every forward created here is removed exactly
//! once, either when its connection closes or when the caller's
//! [`CleanupScope`] runs.

pub mod bridge;
pub mod config;
pub mod connection;
pub mod connector;
pub mod device;
pub mod dial;
pub mod error;
pub mod port;
pub mod scope;
pub mod teardown;

#[cfg(test)]
mod testing;

pub use bridge::BridgeCliDevice;
pub use config::{ConnectorConfig, RetryPolicy};
pub use connection::TunnelConnection;
pub use connector::{Connector, connect};
pub use device::{Device, DeviceError, LocalPort, RemoteSocket};
pub use dial::{Dialer, TcpDialer};
pub use error::{ConnectError, TeardownError};
pub use scope::{CleanupReport, CleanupScope};
pub use teardown::{TeardownGuard, TeardownOutcome};
