//! Transport layer for the broker link
//!
//! The session driver only needs a byte stream. [`Connector`] is the seam
//! that produces one, so tests can hand the driver an in-memory pipe instead
//! of a TCP socket.

use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

pub mod tcp;

pub use tcp::TcpConnector;

/// Transport failures. All of them are recovered by closing the connection
/// and reconnecting on the next liveness tick.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection to {address} failed")]
    ConnectFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Connection to {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },
    #[error("Write failed: {0}")]
    WriteFailed(#[source] std::io::Error),
    #[error("Read failed: {0}")]
    ReadFailed(#[source] std::io::Error),
    #[error("Connection closed by peer")]
    Closed,
}

/// Byte stream handed to the protocol engine's driver.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Opens byte streams to the broker.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    type Stream: ByteStream;

    /// Open a stream to `host:port`.
    async fn connect(&self, host: &str, port: u16) -> Result<Self::Stream, TransportError>;
}

/// Format a `host:port` pair for logs and errors.
pub fn broker_address(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}
