//! TCP listener.
//!
//! # Responsibilities
//! - Bind the configured port on all interfaces
//! - Accept incoming TCP connections
//! - Classify accept errors as transient or not
//!
//! # Design Decisions
//! - Bind failures are surfaced to the caller; the process decides to exit
//! - Accept errors never end the serve loop; they are retried after a pause

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

/// Pause after a failed accept before trying again.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(SocketAddr, std::io::Error),
    /// Failed to accept connection.
    Accept(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Bind(_, e) | ListenerError::Accept(e) => Some(e),
        }
    }
}

impl ListenerError {
    /// Returns true for accept errors that are worth retrying immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            ListenerError::Bind(..) => false,
            ListenerError::Accept(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::Interrupted
            ),
        }
    }
}

/// Address the server binds for `port`.
pub fn bind_address(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))
}

/// A bound TCP listener.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind to `port` on all interfaces.
    pub async fn bind(port: u16) -> Result<Self, ListenerError> {
        let addr = bind_address(port);
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|e| ListenerError::Bind(addr, e))?;
        let local_addr = inner
            .local_addr()
            .map_err(|e| ListenerError::Bind(addr, e))?;

        tracing::info!(address = %local_addr, "Listener bound");

        Ok(Self { inner, local_addr })
    }

    /// Accept a new connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ListenerError> {
        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        tracing::trace!(peer_addr = %addr, "Connection accepted");
        Ok((stream, addr))
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_all_interfaces() {
        assert_eq!(bind_address(8080).to_string(), "0.0.0.0:8080");
    }

    #[tokio::test]
    async fn second_bind_on_same_port_fails() {
        let first = Listener::bind(0).await.unwrap();
        let port = first.local_addr().port();

        let err = Listener::bind(port).await.unwrap_err();
        assert!(matches!(err, ListenerError::Bind(addr, _) if addr.port() == port));
        assert!(!err.is_transient());
    }

    #[test]
    fn reset_accept_is_transient() {
        let err = ListenerError::Accept(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(err.is_transient());
        let err = ListenerError::Accept(std::io::Error::from(std::io::ErrorKind::OutOfMemory));
        assert!(!err.is_transient());
    }
}
