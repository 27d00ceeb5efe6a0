//! The stream handed back by a successful connect.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::device::{LocalPort, RemoteSocket};
use crate::teardown::TeardownGuard;

/// A ready stream to a device socket, plus ownership of its forward.
///
/// Bytes seen by the readiness probe are still buffered and come out of the
/// first read. [`close`](Self::close) removes the forward (unless the cleanup
/// scope already did) and then shuts the stream down. Dropping without
/// closing leaves removal to the cleanup scope.
pub struct TunnelConnection<S = TcpStream> {
    reader: BufReader<S>,
    guard: Arc<TeardownGuard>,
    remote: RemoteSocket,
    closed: bool,
}

impl<S> TunnelConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) const fn new(
        reader: BufReader<S>,
        guard: Arc<TeardownGuard>,
        remote: RemoteSocket,
    ) -> Self {
        Self {
            reader,
            guard,
            remote,
            closed: false,
        }
    }

    pub fn local_port(&self) -> LocalPort {
        self.guard.port()
    }

    pub const fn remote(&self) -> &RemoteSocket {
        &self.remote
    }

    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Remove the forward, then shut the stream down.
    ///
    /// Removal failures are logged by the guard and do not fail the close.
    /// Calling `close` again is a no-op. A close dropped before the removal
    /// finished leaves the forward to the next close or the cleanup scope.
    pub async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }

        self.guard.fire().await;
        self.closed = true;

        match self.reader.get_mut().shutdown().await {
            Ok(()) => Ok(()),
            // Peer already gone; nothing left to shut.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl<S> Drop for TunnelConnection<S> {
    fn drop(&mut self) {
        if !self.closed && !self.guard.is_fired() {
            debug!(
                port = %self.guard.port(),
                remote = %self.remote,
                "Connection dropped without close, forward left to cleanup scope"
            );
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TunnelConnection<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl<S: AsyncRead + Unpin> AsyncBufRead for TunnelConnection<S> {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        Pin::new(&mut self.get_mut().reader).poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        Pin::new(&mut self.get_mut().reader).consume(amt);
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for TunnelConnection<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().reader).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_shutdown(cx)
    }
}

impl<S> std::fmt::Debug for TunnelConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelConnection")
            .field("port", &self.guard.port())
            .field("remote", &self.remote)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
