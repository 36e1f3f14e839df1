//! Local port allocation

use std::net::TcpListener;

use pb_core::error::ProxyError;

/// Ask the OS for any free TCP port on loopback.
///
/// The port is released again before this returns, so it is not reserved:
/// a retry attempt must re-acquire a fresh one if the prior allocation
/// raced with another local process.
pub fn find_free_port() -> Result<u16, ProxyError> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}
