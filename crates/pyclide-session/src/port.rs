//! Loopback port allocation.

use std::net::{Ipv4Addr, TcpListener};

/// Ask the OS for a free loopback port.
///
/// The probe socket is closed before returning, so another process can take
/// the port before the worker binds it. Callers rely on the startup health
/// poll to notice.
pub fn allocate() -> std::io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    tracing::debug!(port, "Allocated loopback port");
    Ok(port)
}
