/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Transport adapter contract.
//!
//! A [`Transport`] opens one duplex connection per call and hands back a
//! [`TransportHandle`] for writing. Everything that happens on the connection after
//! it opened is reported through the [`EventSink`] passed to `open`, one
//! [`TransportEvent`] per underlying event. Adapters hold no retry or queueing logic;
//! that belongs to [`crate::connection::ConnectionManager`].

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::utils::ChannelError;

mod websocket;
pub mod wire;

pub use websocket::WebSocketTransport;

/// Close codes used by the connection layer.
pub mod close_code {
    /// Normal closure, used for user-initiated disconnects.
    pub const NORMAL: u16 = 1000;
    /// The client is going away (offline mode or lost reachability).
    pub const GOING_AWAY: u16 = 1001;
    /// The connection ended without a close frame.
    pub const ABNORMAL: u16 = 1006;
    /// Closed after consecutive heartbeat probe timeouts.
    pub const SUSPECTED_DEAD: u16 = 4000;
    /// Closed because an immediate reconnection was requested.
    pub const RECONNECT_REQUESTED: u16 = 4001;
    /// Closed because connection quality dropped below the repair threshold.
    pub const PREEMPTIVE_RECONNECT: u16 = 4002;
    /// A late open from a superseded attempt.
    pub const SUPERSEDED: u16 = 4003;
}

/// Session resumption metadata attached to every connection attempt.
///
/// A cooperating server uses it to skip redelivering messages the client already
/// acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeParams {
    /// Stable identifier of this installation
    pub client_id: String,
    /// Session to resume, if one was established before
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Highest inbound sequence number processed in that session
    pub last_message_seq: u64,
}

/// Events reported by an open connection.
///
/// The successful resolution of [`Transport::open`] is the *opened* event; these
/// variants cover the rest of the connection's life.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The peer closed the connection.
    Closed {
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
    },
    /// The connection failed.
    Errored(String),
    /// A frame arrived.
    MessageReceived(Vec<u8>),
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::Closed { code, reason } => write!(f, "closed ({code}): {reason}"),
            TransportEvent::Errored(detail) => write!(f, "errored: {detail}"),
            TransportEvent::MessageReceived(bytes) => {
                write!(f, "message received ({} bytes)", bytes.len())
            }
        }
    }
}

type EmitFn = dyn Fn(u64, TransportEvent) -> bool + Send + Sync;

/// Delivers [`TransportEvent`]s for one connection attempt back to its owner.
#[derive(Clone)]
pub struct EventSink {
    attempt: u64,
    emit: Arc<EmitFn>,
}

impl EventSink {
    /// Creates a sink tagged with `attempt`; `emit` returns `false` once the owner
    /// is gone.
    pub fn new<F>(attempt: u64, emit: F) -> Self
    where
        F: Fn(u64, TransportEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            attempt,
            emit: Arc::new(emit),
        }
    }

    /// The attempt this sink belongs to.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Forwards an event. Returns `false` if nobody is listening anymore, in which
    /// case the adapter should stop reading.
    pub fn emit(&self, event: TransportEvent) -> bool {
        (self.emit)(self.attempt, event)
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// Write side of an established connection.
pub trait TransportHandle: Send {
    /// Hands `bytes` to the connection without waiting for the network.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::SendFailed`] if the connection is no longer open.
    fn send(&mut self, bytes: Vec<u8>) -> Result<(), ChannelError>;

    /// Closes the connection. Closing twice is a no-op.
    fn close(&mut self, code: u16, reason: &str);
}

/// Opens duplex connections.
pub trait Transport: Send + Sync {
    /// Opens a connection to `target`, attaching `resume` as establishment metadata.
    ///
    /// # Errors
    ///
    /// The future resolves to [`ChannelError::TransportUnavailable`] when the
    /// connection cannot be established.
    fn open(
        &self,
        target: &str,
        resume: &ResumeParams,
        sink: EventSink,
    ) -> BoxFuture<'static, Result<Box<dyn TransportHandle>, ChannelError>>;
}
