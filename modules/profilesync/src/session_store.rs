// Session persistence.
//
// Durable vs. ephemeral is picked once at startup from `PersistenceMode`;
// nothing else in the crate knows which environment it's running in.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use profilesync_common::{PersistenceMode, Result, SyncError};

use crate::session::Session;

pub trait SessionStore: Send + Sync {
    /// Save a session for later runs. Ephemeral stores accept and succeed.
    fn persist(&self, session: &Session) -> Result<()>;

    /// A previously persisted session, or `None` if there is none or it
    /// can't be read. Never an error.
    fn restore(&self) -> Option<Session>;

    /// Remove any persisted session. Idempotent.
    fn clear(&self) -> Result<()>;
}

pub fn for_mode(mode: PersistenceMode, path: &Path) -> Arc<dyn SessionStore> {
    match mode {
        PersistenceMode::Durable => Arc::new(FileSessionStore::new(path)),
        PersistenceMode::Ephemeral => Arc::new(EphemeralSessionStore::default()),
    }
}

// ---------------------------------------------------------------------------
// FileSessionStore
// ---------------------------------------------------------------------------

/// JSON blob on disk, replaced atomically on each persist.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn persist(&self, session: &Session) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let json = serde_json::to_vec_pretty(session)
            .map_err(|e| SyncError::Session(format!("serialize session: {e}")))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&json)?;
        tmp.persist(&self.path)
            .map_err(|e| SyncError::Session(format!("replace {}: {e}", self.path.display())))?;

        info!(path = %self.path.display(), account = session.account.as_str(), "Session persisted");
        Ok(())
    }

    fn restore(&self) -> Option<Session> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No persisted session");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Persisted session unreadable");
                return None;
            }
        };

        match serde_json::from_slice::<Session>(&raw) {
            Ok(session) => {
                info!(
                    account = session.account.as_str(),
                    issued_at = %session.issued_at,
                    "Restored persisted session"
                );
                Some(session)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Persisted session corrupt, ignoring");
                None
            }
        }
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Session cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// EphemeralSessionStore
// ---------------------------------------------------------------------------

/// In-memory only. Starts empty every run; nothing outlives the process.
#[derive(Default)]
pub struct EphemeralSessionStore {
    current: Mutex<Option<Session>>,
}

impl SessionStore for EphemeralSessionStore {
    fn persist(&self, session: &Session) -> Result<()> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(session.clone());
        Ok(())
    }

    fn restore(&self) -> Option<Session> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn clear(&self) -> Result<()> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use portal_client::CookieJar;

    fn session() -> Session {
        let mut cookies = CookieJar::new();
        cookies.insert("sessionid", "abc");
        Session::fresh("primary", cookies)
    }

    #[test]
    fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("nested/session.json"));

        assert!(store.restore().is_none());
        store.persist(&session()).unwrap();

        let restored = store.restore().unwrap();
        assert_eq!(restored.cookies.get("sessionid"), Some("abc"));
        assert_eq!(restored.state(), SessionState::Untested);
    }

    #[test]
    fn corrupt_blob_restores_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(FileSessionStore::new(&path).restore().is_none());
    }

    #[test]
    fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("session.json"));
        store.persist(&session()).unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.restore().is_none());
        assert!(!store.path().exists());
    }

    #[test]
    fn ephemeral_store_never_touches_disk() {
        let store = EphemeralSessionStore::default();
        assert!(store.restore().is_none());
        store.persist(&session()).unwrap();
        assert!(store.restore().is_some());
        store.clear().unwrap();
        assert!(store.restore().is_none());
    }

    #[test]
    fn mode_selects_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let durable = for_mode(PersistenceMode::Durable, &path);
        durable.persist(&session()).unwrap();
        assert!(path.exists());

        std::fs::remove_file(&path).unwrap();
        let ephemeral = for_mode(PersistenceMode::Ephemeral, &path);
        ephemeral.persist(&session()).unwrap();
        assert!(!path.exists());
    }
}
