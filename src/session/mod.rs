/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Session resumption.
//!
//! [`SessionTracker`] keeps the in-memory [`SessionRecord`] current as inbound
//! messages are processed and checkpoints it to a [`SessionStore`].

mod record;
mod store;

pub use record::{SessionRecord, generate_client_id};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::transport::ResumeParams;
use crate::utils::ChannelError;

/// Result of observing an inbound message's sequencing metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The message advanced the session.
    Recorded,
    /// The message started a new session.
    NewSession,
    /// The message carried no sequence number.
    Unsequenced,
    /// The sequence number was not above the last one processed.
    Stale,
}

/// Owns the current session record and its checkpoints.
pub struct SessionTracker {
    store: Arc<dyn SessionStore>,
    record: Option<SessionRecord>,
    persisted: Option<SessionRecord>,
    /// The store could not be read; the record is not written until it can.
    provisional: bool,
}

impl fmt::Debug for SessionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTracker")
            .field("record", &self.record)
            .field("persisted", &self.persisted)
            .field("provisional", &self.provisional)
            .finish()
    }
}

impl SessionTracker {
    /// Creates a tracker. Nothing is read until the first connection attempt.
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            record: None,
            persisted: None,
            provisional: false,
        }
    }

    /// Current record, if one was loaded or created.
    pub fn record(&self) -> Option<&SessionRecord> {
        self.record.as_ref()
    }

    /// Loads the stored record, or creates one for a new installation.
    ///
    /// A store that cannot be read yields a provisional record for this attempt.
    /// The load is retried on the next attempt and before every checkpoint, so the
    /// stored installation is never replaced because of a transient failure.
    pub fn ensure_loaded(&mut self) -> &SessionRecord {
        if self.record.is_none() {
            self.load_stored();
        }
        self.record.get_or_insert_with(SessionRecord::new_installation)
    }

    fn load_stored(&mut self) {
        match self.store.load_session() {
            Ok(Some(record)) => {
                info!(
                    "Resuming session {:?} at seq {}",
                    record.session_id, record.last_message_seq
                );
                self.persisted = Some(record.clone());
                self.record = Some(record);
                self.provisional = false;
            }
            Ok(None) => self.adopt_installation(),
            Err(ChannelError::Codec(e)) => {
                warn!("Replacing unparseable session record: {}", e);
                self.adopt_installation();
            }
            Err(e) => {
                warn!("Session store unreadable, using a provisional record: {}", e);
                self.provisional = true;
            }
        }
    }

    fn adopt_installation(&mut self) {
        self.provisional = false;
        let record = self.record.get_or_insert_with(SessionRecord::new_installation);
        info!("Created client id {}", record.client_id);
    }

    /// Parameters for the next connection attempt.
    pub fn resume_params(&mut self) -> ResumeParams {
        if self.provisional {
            self.load_stored();
        }
        self.ensure_loaded().resume_params()
    }

    /// Records the sequencing metadata of a processed inbound message.
    ///
    /// Sequence numbers never go backwards within a session; a message naming a
    /// different session starts over from its own sequence number.
    pub fn observe(&mut self, session_id: Option<&str>, seq: Option<u64>) -> Observation {
        self.ensure_loaded();
        let Some(record) = self.record.as_mut() else {
            return Observation::Unsequenced;
        };

        if let Some(session_id) = session_id
            && record.session_id.as_deref() != Some(session_id)
        {
            debug!("Adopting session {}", session_id);
            record.session_id = Some(session_id.to_string());
            record.last_message_seq = seq.unwrap_or(0);
            return Observation::NewSession;
        }

        match seq {
            None => Observation::Unsequenced,
            Some(seq) if seq > record.last_message_seq => {
                record.last_message_seq = seq;
                Observation::Recorded
            }
            Some(seq) => {
                debug!(
                    "Ignoring stale seq {} (last processed {})",
                    seq, record.last_message_seq
                );
                Observation::Stale
            }
        }
    }

    /// Stamps the record with the time of a successful open.
    pub fn mark_connected(&mut self, unix_millis: u64) {
        self.ensure_loaded();
        if let Some(record) = self.record.as_mut() {
            record.last_connected_at = Some(unix_millis);
        }
    }

    /// Persists the record if it changed since the last checkpoint. Returns whether
    /// anything was written.
    ///
    /// A record whose sequence number is below the persisted one for the same
    /// session is never written.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Storage`] if the store fails.
    pub fn checkpoint(&mut self) -> Result<bool, ChannelError> {
        if self.provisional {
            self.load_stored();
            if self.provisional {
                return Ok(false);
            }
        }
        let Some(record) = self.record.as_ref() else {
            return Ok(false);
        };
        if self.persisted.as_ref() == Some(record) {
            return Ok(false);
        }
        if let Some(persisted) = self.persisted.as_ref()
            && persisted.client_id == record.client_id
            && persisted.session_id == record.session_id
            && record.last_message_seq < persisted.last_message_seq
        {
            warn!(
                "Refusing to checkpoint seq {} below persisted {}",
                record.last_message_seq, persisted.last_message_seq
            );
            return Ok(false);
        }
        self.store.save_session(record)?;
        debug!(
            "Checkpointed session {:?} at seq {}",
            record.session_id, record.last_message_seq
        );
        self.persisted = Some(record.clone());
        Ok(true)
    }

    /// Destroys the record in memory and in the store. The next connection
    /// attempt starts a fresh installation.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Storage`] if the store fails; the in-memory record
    /// is dropped regardless.
    pub fn forget(&mut self) -> Result<(), ChannelError> {
        self.record = None;
        self.persisted = None;
        self.provisional = false;
        info!("Session record forgotten");
        self.store.clear_session()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with(store: &MemorySessionStore) -> SessionTracker {
        SessionTracker::new(Arc::new(store.clone()))
    }

    /// Memory store whose reads fail while `unreadable` is set.
    struct FlakyStore {
        inner: MemorySessionStore,
        unreadable: std::sync::atomic::AtomicBool,
    }

    impl FlakyStore {
        fn set_unreadable(&self, unreadable: bool) {
            self.unreadable
                .store(unreadable, std::sync::atomic::Ordering::SeqCst);
        }
    }

    impl SessionStore for FlakyStore {
        fn load_session(&self) -> Result<Option<SessionRecord>, ChannelError> {
            if self.unreadable.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(ChannelError::Storage("disk busy".to_string()));
            }
            self.inner.load_session()
        }

        fn save_session(&self, record: &SessionRecord) -> Result<(), ChannelError> {
            self.inner.save_session(record)
        }

        fn clear_session(&self) -> Result<(), ChannelError> {
            self.inner.clear_session()
        }
    }

    #[test]
    fn test_out_of_order_seq_is_ignored() {
        let store = MemorySessionStore::new();
        let mut tracker = tracker_with(&store);
        assert_eq!(tracker.observe(Some("s1"), Some(5)), Observation::NewSession);
        assert_eq!(tracker.observe(Some("s1"), Some(7)), Observation::Recorded);
        assert_eq!(tracker.observe(Some("s1"), Some(6)), Observation::Stale);
        assert_eq!(tracker.record().unwrap().last_message_seq, 7);
    }

    #[test]
    fn test_new_session_resets_seq() {
        let store = MemorySessionStore::new();
        let mut tracker = tracker_with(&store);
        tracker.observe(Some("s1"), Some(40));
        assert_eq!(tracker.observe(Some("s2"), Some(3)), Observation::NewSession);
        let record = tracker.record().unwrap();
        assert_eq!(record.session_id.as_deref(), Some("s2"));
        assert_eq!(record.last_message_seq, 3);
    }

    #[test]
    fn test_messages_without_session_id_use_current_session() {
        let store = MemorySessionStore::new();
        let mut tracker = tracker_with(&store);
        tracker.observe(Some("s1"), Some(1));
        assert_eq!(tracker.observe(None, Some(2)), Observation::Recorded);
        assert_eq!(tracker.observe(None, None), Observation::Unsequenced);
        assert_eq!(tracker.record().unwrap().last_message_seq, 2);
    }

    #[test]
    fn test_checkpoint_writes_only_changes() {
        let store = MemorySessionStore::new();
        let mut tracker = tracker_with(&store);
        tracker.observe(Some("s1"), Some(5));

        assert!(tracker.checkpoint().unwrap());
        assert!(!tracker.checkpoint().unwrap());
        assert_eq!(store.load_session().unwrap().unwrap().last_message_seq, 5);

        tracker.observe(Some("s1"), Some(9));
        assert!(tracker.checkpoint().unwrap());
        assert_eq!(store.load_session().unwrap().unwrap().last_message_seq, 9);
    }

    #[test]
    fn test_resume_from_stored_record() {
        let mut stored = SessionRecord::with_client_id("install-1");
        stored.session_id = Some("s9".to_string());
        stored.last_message_seq = 77;
        let store = MemorySessionStore::with_record(stored);
        let mut tracker = tracker_with(&store);

        let params = tracker.resume_params();
        assert_eq!(params.client_id, "install-1");
        assert_eq!(params.session_id.as_deref(), Some("s9"));
        assert_eq!(params.last_message_seq, 77);
        assert_eq!(tracker.observe(Some("s9"), Some(70)), Observation::Stale);
    }

    #[test]
    fn test_client_id_is_stable_until_forgotten() {
        let store = MemorySessionStore::new();
        let mut tracker = tracker_with(&store);
        let first = tracker.resume_params().client_id;
        assert_eq!(tracker.resume_params().client_id, first);
        tracker.checkpoint().unwrap();

        let mut restarted = tracker_with(&store);
        assert_eq!(restarted.resume_params().client_id, first);

        restarted.forget().unwrap();
        assert_eq!(store.load_session().unwrap(), None);
        assert_ne!(restarted.resume_params().client_id, first);
    }

    #[test]
    fn test_unreadable_store_keeps_installation() {
        let inner = MemorySessionStore::with_record(SessionRecord::with_client_id("install-1"));
        let store = Arc::new(FlakyStore {
            inner: inner.clone(),
            unreadable: std::sync::atomic::AtomicBool::new(true),
        });
        let mut tracker = SessionTracker::new(store.clone());

        let provisional = tracker.resume_params().client_id;
        assert_ne!(provisional, "install-1");
        tracker.observe(Some("s1"), Some(3));
        assert!(!tracker.checkpoint().unwrap());
        assert_eq!(inner.load_session().unwrap().unwrap().client_id, "install-1");

        store.set_unreadable(false);
        assert_eq!(tracker.resume_params().client_id, "install-1");
        assert_eq!(inner.load_session().unwrap().unwrap().client_id, "install-1");
    }

    #[test]
    fn test_corrupt_record_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = FileSessionStore::new(&path);
        let mut tracker = SessionTracker::new(Arc::new(store.clone()));

        let client_id = tracker.resume_params().client_id;
        assert!(tracker.checkpoint().unwrap());
        assert_eq!(store.load_session().unwrap().unwrap().client_id, client_id);
    }
}
