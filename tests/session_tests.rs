//! Tests for session resumption
//!
//! The manager tracks the last processed sequence number, persists it and hands
//! it to the transport on every connection attempt.

mod common;

use common::{Harness, TARGET, advance, settle, test_config};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use steadylink_rs::connection::{ConnectionEvent, InboundMessage};
use steadylink_rs::session::{FileSessionStore, MemorySessionStore, SessionRecord, SessionStore};
use steadylink_rs::transport::ResumeParams;
use steadylink_rs::transport::wire::Frame;

fn messages(events: Vec<ConnectionEvent>) -> Vec<InboundMessage> {
    events
        .into_iter()
        .filter_map(|event| match event {
            ConnectionEvent::Message(message) => Some(message),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A new installation gets a client id and no session on its first attempt
    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_creates_client_id() {
        let harness = Harness::new(test_config());
        harness.manager.connect(TARGET).await.unwrap();
        settle().await;

        let resume = harness.transport.opens()[0].resume.clone();
        assert_eq!(resume.client_id.len(), 32);
        assert_eq!(resume.session_id, None);
        assert_eq!(resume.last_message_seq, 0);

        let stored = harness.store.load_session().unwrap().unwrap();
        assert_eq!(stored.client_id, resume.client_id);
        assert!(stored.last_connected_at.is_some());
    }

    /// A stored record is offered on the first attempt
    #[tokio::test(start_paused = true)]
    async fn test_stored_record_is_resumed() {
        let record = SessionRecord {
            client_id: "device-1".to_string(),
            session_id: Some("s9".to_string()),
            last_message_seq: 42,
            last_connected_at: None,
        };
        let store = MemorySessionStore::with_record(record);
        let harness = Harness::with_store(test_config(), Arc::new(store));
        harness.manager.connect(TARGET).await.unwrap();
        settle().await;

        assert_eq!(
            harness.transport.opens()[0].resume,
            ResumeParams {
                client_id: "device-1".to_string(),
                session_id: Some("s9".to_string()),
                last_message_seq: 42,
            }
        );
    }

    /// Out-of-order messages are delivered but never move the sequence backwards
    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_seq_is_not_recorded() {
        let mut harness = Harness::new(test_config());
        harness.manager.connect(TARGET).await.unwrap();
        settle().await;
        harness.take_events();

        for seq in [5, 7, 6] {
            harness
                .transport
                .server_message("s1", seq, json!({ "n": seq }));
        }
        settle().await;

        let seqs: Vec<_> = messages(harness.take_events())
            .into_iter()
            .map(|message| message.seq)
            .collect();
        assert_eq!(seqs, vec![Some(5), Some(7), Some(6)]);

        harness.manager.reconnect_now().await.unwrap();
        settle().await;
        let resume = harness.transport.opens()[1].resume.clone();
        assert_eq!(resume.session_id.as_deref(), Some("s1"));
        assert_eq!(resume.last_message_seq, 7);
    }

    /// A different session id starts over from its own sequence number
    #[tokio::test(start_paused = true)]
    async fn test_new_session_resets_seq() {
        let harness = Harness::new(test_config());
        harness.manager.connect(TARGET).await.unwrap();
        settle().await;

        harness.transport.server_message("s1", 9, json!("a"));
        harness.transport.server_message("s2", 2, json!("b"));
        settle().await;

        let session = harness.manager.diagnostics().await.unwrap().session.unwrap();
        assert_eq!(session.session_id.as_deref(), Some("s2"));
        assert_eq!(session.last_message_seq, 2);
    }

    /// Unsequenced payloads reach listeners without touching the record
    #[tokio::test(start_paused = true)]
    async fn test_unsequenced_message_is_delivered() {
        let mut harness = Harness::new(test_config());
        harness.manager.connect(TARGET).await.unwrap();
        settle().await;
        harness.take_events();

        harness.transport.server_frame(&Frame::Data {
            payload: json!("plain"),
        });
        settle().await;

        let received = messages(harness.take_events());
        assert_eq!(
            received,
            vec![InboundMessage {
                seq: None,
                session_id: None,
                payload: json!("plain"),
            }]
        );
        let session = harness.manager.diagnostics().await.unwrap().session.unwrap();
        assert_eq!(session.last_message_seq, 0);
    }

    /// The record is written when the connection drops
    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_on_connection_loss() {
        let harness = Harness::new(test_config());
        harness.manager.connect(TARGET).await.unwrap();
        settle().await;

        harness.transport.server_message("s1", 11, json!("x"));
        settle().await;
        assert_eq!(harness.store.load_session().unwrap().unwrap().last_message_seq, 0);

        harness.transport.server_close();
        settle().await;
        let stored = harness.store.load_session().unwrap().unwrap();
        assert_eq!(stored.session_id.as_deref(), Some("s1"));
        assert_eq!(stored.last_message_seq, 11);
    }

    /// The record is written periodically while connected
    #[tokio::test(start_paused = true)]
    async fn test_periodic_checkpoint() {
        let harness = Harness::new(test_config());
        harness.manager.connect(TARGET).await.unwrap();
        settle().await;

        harness.transport.server_message("s1", 3, json!("x"));
        advance(Duration::from_secs(59)).await;
        assert_eq!(harness.store.load_session().unwrap().unwrap().last_message_seq, 0);

        advance(Duration::from_secs(2)).await;
        assert_eq!(harness.store.load_session().unwrap().unwrap().last_message_seq, 3);
    }

    /// A file-backed record survives a restart of the manager
    #[tokio::test(start_paused = true)]
    async fn test_file_store_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("session.json");

        let first = Harness::with_store(test_config(), Arc::new(FileSessionStore::new(&path)));
        first.manager.connect(TARGET).await.unwrap();
        settle().await;
        first.transport.server_message("s1", 4, json!("x"));
        settle().await;
        first.manager.shutdown().await.unwrap();
        settle().await;
        let client_id = first.transport.opens()[0].resume.client_id.clone();

        let second = Harness::with_store(test_config(), Arc::new(FileSessionStore::new(&path)));
        second.manager.connect(TARGET).await.unwrap();
        settle().await;

        assert_eq!(
            second.transport.opens()[0].resume,
            ResumeParams {
                client_id,
                session_id: Some("s1".to_string()),
                last_message_seq: 4,
            }
        );
    }

    /// forget_session() makes the next attempt a fresh installation
    #[tokio::test(start_paused = true)]
    async fn test_forget_session() {
        let harness = Harness::new(test_config());
        harness.manager.connect(TARGET).await.unwrap();
        settle().await;
        harness.transport.server_message("s1", 8, json!("x"));
        settle().await;
        let original = harness.transport.opens()[0].resume.client_id.clone();

        harness.manager.forget_session().await.unwrap();
        assert!(harness.manager.diagnostics().await.unwrap().session.is_none());

        harness.manager.reconnect_now().await.unwrap();
        settle().await;
        let resume = harness.transport.opens()[1].resume.clone();
        assert_ne!(resume.client_id, original);
        assert_eq!(resume.session_id, None);
        assert_eq!(resume.last_message_seq, 0);

        let stored = harness.store.load_session().unwrap().unwrap();
        assert_eq!(stored.client_id, resume.client_id);
    }
}
