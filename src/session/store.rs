/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use super::record::SessionRecord;
use crate::utils::ChannelError;

/// Durable storage for the single [`SessionRecord`] of an installation.
pub trait SessionStore: Send + Sync {
    /// Loads the stored record, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Storage`] if the record exists but cannot be read,
    /// or [`ChannelError::Codec`] if it is not a valid record.
    fn load_session(&self) -> Result<Option<SessionRecord>, ChannelError>;

    /// Replaces the stored record.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Storage`] if the write fails.
    fn save_session(&self, record: &SessionRecord) -> Result<(), ChannelError>;

    /// Deletes the stored record. Clearing an empty store succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Storage`] if the record cannot be removed.
    fn clear_session(&self) -> Result<(), ChannelError>;
}

/// In-memory store, for tests and for clients that do not need resumption across
/// restarts. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    record: Arc<Mutex<Option<SessionRecord>>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `record`.
    pub fn with_record(record: SessionRecord) -> Self {
        Self {
            record: Arc::new(Mutex::new(Some(record))),
        }
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<SessionRecord>>, ChannelError> {
        self.record
            .lock()
            .map_err(|_| ChannelError::Storage("session store mutex poisoned".to_string()))
    }
}

impl SessionStore for MemorySessionStore {
    fn load_session(&self) -> Result<Option<SessionRecord>, ChannelError> {
        Ok(self.slot()?.clone())
    }

    fn save_session(&self, record: &SessionRecord) -> Result<(), ChannelError> {
        *self.slot()? = Some(record.clone());
        Ok(())
    }

    fn clear_session(&self) -> Result<(), ChannelError> {
        *self.slot()? = None;
        Ok(())
    }
}

/// JSON file store. Writes go to a temporary sibling file that is then renamed
/// over the target, so a crash never leaves a torn record behind.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Creates a store backed by `path`. Parent directories are created on the
    /// first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the record.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("session.json");
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or(0);
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        parent.join(format!(".{file_name}.{}.{nanos}.tmp", std::process::id()))
    }
}

impl SessionStore for FileSessionStore {
    fn load_session(&self) -> Result<Option<SessionRecord>, ChannelError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(ChannelError::Storage(format!(
                    "failed reading session {}: {err}",
                    self.path.display()
                )));
            }
        };
        let record = serde_json::from_str::<SessionRecord>(&raw).map_err(|err| {
            ChannelError::Codec(format!(
                "failed parsing session {}: {err}",
                self.path.display()
            ))
        })?;
        debug!("Loaded session record from {}", self.path.display());
        Ok(Some(record))
    }

    fn save_session(&self, record: &SessionRecord) -> Result<(), ChannelError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| {
                ChannelError::Storage(format!(
                    "failed creating session directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let encoded = serde_json::to_vec(record)?;
        let temp_path = self.temp_path();
        fs::write(&temp_path, encoded).map_err(|err| {
            ChannelError::Storage(format!(
                "failed writing temp session {}: {err}",
                temp_path.display()
            ))
        })?;

        if let Err(rename_err) = fs::rename(&temp_path, &self.path) {
            // Some platforms refuse to rename over an existing file.
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    let _ = fs::remove_file(&temp_path);
                    return Err(ChannelError::Storage(format!(
                        "failed replacing session {} after rename error ({rename_err}): {err}",
                        self.path.display()
                    )));
                }
            }
            fs::rename(&temp_path, &self.path).map_err(|err| {
                let _ = fs::remove_file(&temp_path);
                ChannelError::Storage(format!(
                    "failed writing session {} after temp write: {err}",
                    self.path.display()
                ))
            })?;
        }
        Ok(())
    }

    fn clear_session(&self) -> Result<(), ChannelError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                warn!("Failed removing session {}: {}", self.path.display(), err);
                Err(ChannelError::Storage(format!(
                    "failed removing session {}: {err}",
                    self.path.display()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(seq: u64) -> SessionRecord {
        SessionRecord {
            client_id: "c1".to_string(),
            session_id: Some("s1".to_string()),
            last_message_seq: seq,
            last_connected_at: None,
        }
    }

    #[test]
    fn test_memory_store_clones_share_state() {
        let store = MemorySessionStore::new();
        let view = store.clone();
        assert_eq!(store.load_session().unwrap(), None);

        store.save_session(&record(3)).unwrap();
        assert_eq!(view.load_session().unwrap(), Some(record(3)));

        view.clear_session().unwrap();
        assert_eq!(store.load_session().unwrap(), None);
    }

    #[test]
    fn test_file_store_replaces_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("nested").join("session.json"));

        assert_eq!(store.load_session().unwrap(), None);
        store.save_session(&record(1)).unwrap();
        store.save_session(&record(2)).unwrap();
        assert_eq!(store.load_session().unwrap(), Some(record(2)));

        let leftovers = fs::read_dir(store.path().parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_file_store_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("session.json"));
        store.save_session(&record(1)).unwrap();
        store.clear_session().unwrap();
        store.clear_session().unwrap();
        assert_eq!(store.load_session().unwrap(), None);
    }

    #[test]
    fn test_file_store_rejects_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, b"{not json").unwrap();
        let store = FileSessionStore::new(path);
        assert!(matches!(store.load_session(), Err(ChannelError::Codec(_))));
    }
}
