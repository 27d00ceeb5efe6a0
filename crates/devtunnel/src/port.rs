//! Local port allocation.

use std::net::Ipv4Addr;

use tokio::net::TcpListener;

use crate::device::LocalPort;

/// Find a TCP port that is currently unbound on the loopback interface.
///
/// The port is released before returning, so another process may still grab
/// it; the bridge daemon reports that as a failed forward.
pub async fn allocate_local_port() -> std::io::Result<LocalPort> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(LocalPort::new(port))
}
