//! Error types for the broker link
//!
//! Every failure the link can hit maps to one of these variants. None of them
//! are fatal to the process: the session driver logs them, tears the
//! connection down where needed and lets the next liveness tick reconnect.

use thiserror::Error;

/// Wire-level violations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Payload of {0} bytes does not fit a frame")]
    PayloadTooLarge(usize),

    #[error("Received message id 0 on a {message_type} frame")]
    ZeroMessageId { message_type: u8 },

    #[error("Invalid hardware payload: {0}")]
    InvalidPayload(String),
}

/// Main error type for link operations
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Authentication failed: status {status}, message id {message_id}")]
    AuthenticationFailed { status: u16, message_id: u16 },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Invalid endpoint '{0}', expected v<pin>")]
    InvalidEndpoint(String),

    #[error("Session is not running")]
    SessionClosed,
}

impl LinkError {
    pub fn authentication_failed(status: u16, message_id: u16) -> Self {
        Self::AuthenticationFailed { status, message_id }
    }

    /// Errors after which the connection must be torn down.
    pub fn requires_teardown(&self) -> bool {
        matches!(
            self,
            LinkError::Transport(_)
                | LinkError::AuthenticationFailed { .. }
                | LinkError::Protocol(ProtocolError::ZeroMessageId { .. })
        )
    }
}

/// Result type for link operations
pub type LinkResult<T> = Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;

    #[test]
    fn test_authentication_failed_constructor() {
        let error = LinkError::authentication_failed(401, 1);
        assert!(matches!(error, LinkError::AuthenticationFailed { .. }));
        assert_eq!(
            error.to_string(),
            "Authentication failed: status 401, message id 1"
        );
    }

    #[test]
    fn test_protocol_error_display() {
        let error = LinkError::from(ProtocolError::ZeroMessageId { message_type: 20 });
        assert_eq!(
            error.to_string(),
            "Protocol violation: Received message id 0 on a 20 frame"
        );
    }

    #[test]
    fn test_requires_teardown() {
        assert!(LinkError::authentication_failed(9, 0).requires_teardown());
        assert!(
            LinkError::from(ProtocolError::ZeroMessageId { message_type: 0 }).requires_teardown()
        );
        assert!(LinkError::from(TransportError::Closed).requires_teardown());

        assert!(!LinkError::from(ProtocolError::InvalidPayload("x".into())).requires_teardown());
        assert!(!LinkError::SessionClosed.requires_teardown());
    }
}
