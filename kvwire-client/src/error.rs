//! Client error types.

use crate::lifecycle::RequestState;
use kvwire_protocol::{ProtocolError, Status};
use thiserror::Error;

/// Client errors.
///
/// Every failed request surfaces exactly one of these.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A caller-supplied value was rejected before anything was encoded.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The server answered with a non-success status.
    #[error("server returned {status}")]
    ServerStatus { status: Status, cas: u64 },

    #[error("request timeout")]
    Timeout,

    #[error("transport failure: {0}")]
    TransportFailure(#[from] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("not connected")]
    NotConnected,

    #[error("too many requests in flight (limit {limit})")]
    TooManyInFlight { limit: usize },

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("invalid request state transition {from:?} -> {to:?}")]
    InvalidTransition { from: RequestState, to: RequestState },
}

impl ClientError {
    /// Returns whether this error may be offered to a retry strategy.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Timeout => true,
            ClientError::TransportFailure(_) => true,
            ClientError::ConnectionClosed => true,
            ClientError::ServerStatus { status, .. } => status.is_retryable(),
            _ => false,
        }
    }

    /// Returns the server status for [`ClientError::ServerStatus`].
    pub fn status(&self) -> Option<Status> {
        match self {
            ClientError::ServerStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the connection this error came from can no longer be used.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::TransportFailure(_) | ClientError::ConnectionClosed | ClientError::NotConnected
        )
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidArgument(msg) => ClientError::InvalidArgument(msg),
            other => ClientError::MalformedResponse(other.to_string()),
        }
    }
}
