//! Remote control surface.
//!
//! Port binding is always available so a caller can reserve its port (and fail
//! fast when it is taken) before the run directory is created. The gRPC
//! service itself needs the `transport-grpc` feature.

#[cfg(feature = "transport-grpc")]
mod grpc;

#[cfg(feature = "transport-grpc")]
pub use grpc::{proto, ReadSimServiceImpl};

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};

use log::info;

use crate::error::{SimResult, TransportError};

/// Binds a TCP listener on localhost.
///
/// Port 0 lets the OS pick a free port; the bound port is returned either way.
///
/// # Errors
///
/// `PortInUse` if the requested port is taken, `Bind` for other failures.
pub fn bind_listener(port: u16) -> SimResult<(TcpListener, u16)> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let listener = TcpListener::bind(addr).map_err(|source| {
        if source.kind() == ErrorKind::AddrInUse {
            TransportError::PortInUse { port }
        } else {
            TransportError::Bind { port, source }
        }
    })?;
    let bound = listener.local_addr()?.port();
    info!("Listening on 127.0.0.1:{bound}");
    Ok((listener, bound))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimError;

    #[test]
    fn test_port_zero_picks_free_port() {
        let (_listener, port) = bind_listener(0).unwrap();
        assert_ne!(port, 0);
    }

    #[test]
    fn test_taken_port_fails_fast() {
        let (_listener, port) = bind_listener(0).unwrap();
        let err = bind_listener(port).unwrap_err();
        assert!(matches!(err, SimError::Transport(TransportError::PortInUse { port: p }) if p == port));
        assert!(err.is_fatal_at_startup());
    }
}
