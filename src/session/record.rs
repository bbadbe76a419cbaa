/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::transport::ResumeParams;

/// Durable record used to resume a server-side session after a reconnect or a
/// process restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Stable identifier of this installation
    pub client_id: String,
    /// Current server session, once one was announced
    #[serde(default)]
    pub session_id: Option<String>,
    /// Highest inbound sequence number processed in the session
    #[serde(default)]
    pub last_message_seq: u64,
    /// Unix time in milliseconds of the last successful open
    #[serde(default)]
    pub last_connected_at: Option<u64>,
}

impl SessionRecord {
    /// Creates a record for a new installation with a random client id.
    pub fn new_installation() -> Self {
        Self::with_client_id(generate_client_id())
    }

    /// Creates an empty record for `client_id`.
    pub fn with_client_id(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            session_id: None,
            last_message_seq: 0,
            last_connected_at: None,
        }
    }

    /// Parameters attached to the next connection attempt.
    pub fn resume_params(&self) -> ResumeParams {
        ResumeParams {
            client_id: self.client_id.clone(),
            session_id: self.session_id.clone(),
            last_message_seq: self.last_message_seq,
        }
    }
}

/// 128 random bits, hex encoded.
pub fn generate_client_id() -> String {
    let bits: u128 = rand::rng().random();
    format!("{bits:032x}")
}
