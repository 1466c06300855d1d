//! Plain TCP connector

use super::{broker_address, Connector, TransportError};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Opens TCP connections with a bounded connect timeout.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

#[async_trait::async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> Result<TcpStream, TransportError> {
        let address = broker_address(host, port);
        debug!("Opening TCP connection to {}", address);

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                address: address.clone(),
                timeout: self.connect_timeout,
            })?
            .map_err(|source| TransportError::ConnectFailed {
                address: address.clone(),
                source,
            })?;

        // Frames are small and latency-sensitive.
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY on {}: {}", address, e);
        }
        Ok(stream)
    }
}
