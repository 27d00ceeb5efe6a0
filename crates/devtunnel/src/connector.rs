//! Tunnel establishment.
//!
//! `connect` allocates a local port, asks the device to forward it to an
//! abstract-named socket, registers removal of that forward on the caller's
//! [`CleanupScope`], then dials the port until a connection passes the
//! readiness probe or the retry budget runs out.

use std::future::Future;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::ConnectorConfig;
use crate::connection::TunnelConnection;
use crate::device::{Device, LocalPort, RemoteSocket};
use crate::dial::{Dialer, ProbeError, TcpDialer, probe};
use crate::error::ConnectError;
use crate::scope::CleanupScope;
use crate::teardown::TeardownGuard;

/// Why one dial attempt did not yield a usable connection.
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("dial failed: {0}")]
    Dial(std::io::Error),

    #[error("not ready: {0}")]
    Probe(ProbeError),
}

/// Opens tunnels to device sockets.
#[derive(Debug, Clone)]
pub struct Connector<D = TcpDialer> {
    config: ConnectorConfig,
    dialer: D,
}

impl Connector<TcpDialer> {
    pub const fn new(config: ConnectorConfig) -> Self {
        Self {
            config,
            dialer: TcpDialer,
        }
    }
}

impl Default for Connector<TcpDialer> {
    fn default() -> Self {
        Self::new(ConnectorConfig::default())
    }
}

impl<D: Dialer> Connector<D> {
    pub const fn with_dialer(config: ConnectorConfig, dialer: D) -> Self {
        Self { config, dialer }
    }

    pub const fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub const fn dialer(&self) -> &D {
        &self.dialer
    }

    /// Forward `socket_name` on `device` to a fresh local port and connect to it.
    ///
    /// The forward is registered on `scope` before the first dial. On success
    /// the connection also holds the forward and removes it on close; on
    /// timeout the forward stays on `scope` until the scope runs.
    pub async fn connect(
        &self,
        device: Arc<dyn Device>,
        socket_name: &str,
        scope: &CleanupScope,
    ) -> Result<TunnelConnection<D::Stream>, ConnectError> {
        self.establish(device, socket_name, scope, std::future::pending())
            .await
    }

    /// Like [`connect`](Self::connect), but gives up with
    /// [`ConnectError::Cancelled`] once `shutdown` reads `true`.
    pub async fn connect_until(
        &self,
        device: Arc<dyn Device>,
        socket_name: &str,
        scope: &CleanupScope,
        shutdown: watch::Receiver<bool>,
    ) -> Result<TunnelConnection<D::Stream>, ConnectError> {
        self.establish(device, socket_name, scope, shutdown_signalled(shutdown))
            .await
    }

    async fn establish<C>(
        &self,
        device: Arc<dyn Device>,
        socket_name: &str,
        scope: &CleanupScope,
        cancelled: C,
    ) -> Result<TunnelConnection<D::Stream>, ConnectError>
    where
        C: Future<Output = ()>,
    {
        let port = self
            .dialer
            .allocate_port()
            .await
            .map_err(ConnectError::PortAllocation)?;
        let remote = RemoteSocket::Abstract(socket_name.to_owned());

        device
            .forward(port, &remote)
            .await
            .map_err(|source| ConnectError::ForwardSetup {
                port,
                remote: remote.clone(),
                source,
            })?;
        debug!(%port, %remote, device = %device.serial(), "Forward established");

        let guard = Arc::new(TeardownGuard::new(Arc::clone(&device), port));
        scope.register(Arc::clone(&guard));

        tokio::pin!(cancelled);
        let retry = self.config.retry;
        let attempts = retry.attempts();

        for attempt in 1..=attempts {
            let outcome = tokio::select! {
                biased;
                () = &mut cancelled => {
                    info!(%port, %remote, attempt, "Connect cancelled");
                    return Err(ConnectError::Cancelled { port, remote });
                }
                outcome = self.attempt(port) => outcome,
            };

            match outcome {
                Ok(reader) => {
                    info!(%port, %remote, attempt, device = %device.serial(), "Tunnel connected");
                    return Ok(TunnelConnection::new(reader, guard, remote));
                }
                Err(e) => {
                    debug!(%port, %remote, attempt, error = %e, "Connect attempt failed");
                }
            }

            if retry.sleeps_after(attempt) {
                tokio::select! {
                    biased;
                    () = &mut cancelled => {
                        info!(%port, %remote, attempt, "Connect cancelled");
                        return Err(ConnectError::Cancelled { port, remote });
                    }
                    () = sleep(retry.delay) => {}
                }
            }
        }

        warn!(
            %port,
            %remote,
            attempts,
            "Service did not become ready, forward left to cleanup scope"
        );
        Err(ConnectError::ServiceTimeout {
            port,
            remote,
            attempts,
        })
    }

    async fn attempt(&self, port: LocalPort) -> Result<BufReader<D::Stream>, AttemptError> {
        let stream = self.dialer.dial(port).await.map_err(AttemptError::Dial)?;
        // A stream that fails the probe is dropped here, closing the socket.
        probe(stream, self.config.probe_timeout)
            .await
            .map_err(AttemptError::Probe)
    }
}

/// Open a tunnel with the default configuration.
pub async fn connect(
    device: Arc<dyn Device>,
    socket_name: &str,
    scope: &CleanupScope,
) -> Result<TunnelConnection, ConnectError> {
    Connector::default().connect(device, socket_name, scope).await
}

/// Resolves once `shutdown` reads `true`. Never resolves if the sender is gone
/// without having signalled.
async fn shutdown_signalled(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
#[path = "connector_tests.rs"]
mod tests;
