//! Transport error types.

use std::time::Duration;

use keyward_proto::ProtocolError;
use thiserror::Error;

/// Errors surfaced by [`crate::Transport`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No broker acknowledgement within the connect timeout
    #[error("connect timed out after {elapsed:?}")]
    ConnectTimeout {
        /// Time spent waiting
        elapsed: Duration,
    },

    /// Connection could not be established
    #[error("connect failed: {0}")]
    ConnectError(String),

    /// Operation requires a live session
    #[error("not connected")]
    NotConnected,

    /// Broker rejected the operation, or the request was malformed
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Returns true if retrying (possibly after reconnecting) may succeed.
    ///
    /// Protocol errors are permanent: the same request is rejected again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectTimeout { .. } | Self::ConnectError(_) | Self::NotConnected)
    }

    pub(crate) fn from_link(err: LinkError) -> Self {
        match err {
            LinkError::Rejected(reason) => Self::Protocol(reason),
            LinkError::Protocol(e) => Self::Protocol(e.to_string()),
            LinkError::Closed | LinkError::Io(_) => Self::NotConnected,
            LinkError::Refused(reason) | LinkError::Tls(reason) => Self::ConnectError(reason),
        }
    }
}

/// Errors reported by a [`crate::Connector`] or [`crate::Link`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Broker or address refused the session
    #[error("connection refused: {0}")]
    Refused(String),

    /// Broker rejected a subscribe or unsubscribe
    #[error("rejected by broker: {0}")]
    Rejected(String),

    /// Session is gone
    #[error("session closed")]
    Closed,

    /// Network or stream failure
    #[error("I/O error: {0}")]
    Io(String),

    /// TLS configuration or handshake failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// Broker sent something that violates the protocol
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(TransportError::ConnectTimeout { elapsed: Duration::from_secs(1) }.is_transient());
        assert!(TransportError::NotConnected.is_transient());
        assert!(!TransportError::Protocol("bad topic".to_string()).is_transient());
    }

    #[test]
    fn link_errors_map_to_transport_errors() {
        assert_eq!(
            TransportError::from_link(LinkError::Rejected("no".to_string())),
            TransportError::Protocol("no".to_string())
        );
        assert_eq!(TransportError::from_link(LinkError::Closed), TransportError::NotConnected);
        assert!(matches!(
            TransportError::from_link(LinkError::Protocol(ProtocolError::InvalidMagic)),
            TransportError::Protocol(_)
        ));
    }
}
