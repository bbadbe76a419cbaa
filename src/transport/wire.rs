/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! JSON wire frames carried over the duplex channel.
//!
//! Every frame is a JSON object tagged by `type`:
//!
//! ```text
//! {"type":"ping","nonce":3,"sent_at_ms":15000}
//! {"type":"pong","nonce":3,"sent_at_ms":15000}
//! {"type":"data","payload":{...}}
//! {"type":"message","seq":42,"session_id":"s-1","payload":{...}}
//! ```
//!
//! `data` frames carry outbound application payloads; `message` frames carry inbound
//! ones, optionally sequenced for session resumption.

use serde::{Deserialize, Serialize};

use crate::utils::ChannelError;

/// Opaque application payload. The connection layer never inspects it.
pub type Payload = serde_json::Value;

/// A frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Liveness probe.
    Ping {
        /// Probe identifier echoed by the reply
        nonce: u64,
        /// Sender's monotonic clock in milliseconds
        sent_at_ms: u64,
    },
    /// Reply to a [`Frame::Ping`].
    Pong {
        /// Nonce of the probe being answered
        nonce: u64,
        /// Timestamp copied from the probe
        sent_at_ms: u64,
    },
    /// Outbound application payload.
    Data {
        /// Application payload
        payload: Payload,
    },
    /// Inbound application payload.
    Message {
        /// Server-assigned sequence number within the session
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        /// Session the message belongs to
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        /// Application payload
        payload: Payload,
    },
}

impl Frame {
    /// Serializes the frame to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Codec`] if the payload cannot be serialized.
    pub fn encode(&self) -> Result<Vec<u8>, ChannelError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a frame from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Codec`] for malformed or unknown frames.
    pub fn decode(bytes: &[u8]) -> Result<Self, ChannelError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Ping { .. } => "ping",
            Frame::Pong { .. } => "pong",
            Frame::Data { .. } => "data",
            Frame::Message { .. } => "message",
        }
    }
}
