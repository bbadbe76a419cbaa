/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

use crate::connection::ConnectionState;

/// Errors surfaced by the resilience layer.
///
/// Transient failures (single probe timeouts, single send failures, ordinary network
/// blips) are recovered locally and never reach the caller as an error. The variants
/// below are the ones that either cross the public API or the [`crate::transport`]
/// boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The transport could not open a connection. Triggers backoff.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),
    /// A write on an established connection failed. The payload is re-queued and
    /// the connection is replaced.
    #[error("send failed: {0}")]
    SendFailed(String),
    /// The reconnection strategist ran out of attempts. Returned by `send` until
    /// the user reconnects.
    #[error("reconnection exhausted after {attempts} attempts")]
    ReconnectionExhausted {
        /// Number of attempts made before giving up
        attempts: u32,
    },
    /// The requested operation is not valid in the current connection state.
    #[error("cannot run '{action}' while connection is {state}")]
    InvalidState {
        /// State the manager was in
        state: ConnectionState,
        /// Operation that was refused
        action: String,
    },
    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The durable session store failed.
    #[error("session storage error: {0}")]
    Storage(String),
    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
    /// The manager loop is no longer running.
    #[error("connection manager is closed")]
    ManagerClosed,
}

impl ChannelError {
    /// Build a standard invalid-state error.
    pub fn invalid_state(state: ConnectionState, action: impl Into<String>) -> Self {
        Self::InvalidState {
            state,
            action: action.into(),
        }
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        ChannelError::Codec(err.to_string())
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        ChannelError::Storage(err.to_string())
    }
}
