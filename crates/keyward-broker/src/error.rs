//! Broker error types.

use keyward_proto::ProtocolError;
use thiserror::Error;

/// Errors that can occur in the broker.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Configuration error (invalid bind address, unreadable TLS files).
    ///
    /// Fatal at startup. Fix configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Network error (endpoint creation, handshake, stream failure).
    ///
    /// Fatal for the affected connection only, unless raised by `bind`.
    #[error("transport error: {0}")]
    Transport(String),

    /// A client sent malformed or out-of-order frames.
    ///
    /// The connection is closed; other clients are unaffected.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<ProtocolError> for BrokerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(msg) => Self::Transport(msg),
            other => Self::Protocol(other.to_string()),
        }
    }
}

impl From<std::io::Error> for BrokerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_io_maps_to_transport() {
        let err = BrokerError::from(ProtocolError::Io("reset".to_string()));
        assert!(matches!(err, BrokerError::Transport(_)));

        let err = BrokerError::from(ProtocolError::InvalidMagic);
        assert!(matches!(err, BrokerError::Protocol(_)));
    }
}
