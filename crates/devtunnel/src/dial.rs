//! Dialing the forwarded port and probing it for readiness.
//!
//! The bridge daemon accepts TCP connections on a forwarded port as soon as
//! the forward is registered, before the device-side service is reachable.
//! Such connections are closed again without a byte. A connection only counts
//! once at least one byte is buffered, and that byte is left unread for the
//! caller.

use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;

use crate::device::LocalPort;
use crate::port::allocate_local_port;

/// Local side of a tunnel: picks the port to forward and opens byte streams
/// to it.
#[async_trait]
pub trait Dialer: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Pick a free local port for a new forward.
    async fn allocate_port(&self) -> io::Result<LocalPort> {
        allocate_local_port().await
    }

    async fn dial(&self, port: LocalPort) -> io::Result<Self::Stream>;
}

/// Dials `127.0.0.1:<port>`, where the bridge daemon listens for forwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self, port: LocalPort) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port.get())).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Why a connected stream failed the readiness probe.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("stream closed before the service wrote anything")]
    Closed,

    #[error("no data within {0:?}")]
    TimedOut(Duration),

    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

/// Wait until `stream` has at least one byte buffered, without consuming it.
///
/// On success the returned reader yields the peeked bytes on its first read.
pub async fn probe<S>(stream: S, timeout: Option<Duration>) -> Result<BufReader<S>, ProbeError>
where
    S: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let buffered = match timeout {
        Some(limit) => tokio::time::timeout(limit, reader.fill_buf())
            .await
            .map_err(|_| ProbeError::TimedOut(limit))?
            .map(<[u8]>::len)?,
        None => reader.fill_buf().await.map(<[u8]>::len)?,
    };
    if buffered == 0 {
        return Err(ProbeError::Closed);
    }
    Ok(reader)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn probe_leaves_bytes_unread() {
        let (near, mut far) = tokio::io::duplex(64);
        far.write_all(b"hello").await.unwrap();

        let mut reader = probe(near, None).await.unwrap();
        let mut buf = [0u8; 5];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn probe_fails_on_immediate_hangup() {
        let (near, far) = tokio::io::duplex(64);
        drop(far);
        assert!(matches!(probe(near, None).await, Err(ProbeError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_times_out_on_silent_stream() {
        let (near, _far) = tokio::io::duplex(64);
        let err = probe(near, Some(Duration::from_secs(5))).await.unwrap_err();
        assert!(matches!(err, ProbeError::TimedOut(d) if d == Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn tcp_dialer_reaches_loopback_listener() {
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let port = LocalPort::new(listener.local_addr().unwrap().port());
        let accept = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"x").await.unwrap();
        });

        let stream = TcpDialer.dial(port).await.unwrap();
        let reader = probe(stream, Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(reader.buffer(), b"x");
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn tcp_dialer_refused_without_listener() {
        let port = crate::port::allocate_local_port().await.unwrap();
        let err = TcpDialer.dial(port).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }
}
