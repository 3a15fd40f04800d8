//! Registry of live document sessions.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::acl::{Checker, PermissionStore};
use crate::broadcast::Broadcaster;
use crate::session::{Session, SessionConfig, SessionError};
use crate::storage::{SnapshotPolicy, Store};

/// Shared collaborators handed to every session the manager creates.
pub struct ManagerConfig {
    pub store: Arc<dyn Store>,
    pub perm_store: Option<Arc<dyn PermissionStore>>,
    pub broadcaster: Option<Arc<dyn Broadcaster>>,
    pub snapshot_policy: Option<Arc<SnapshotPolicy>>,
    /// Transform history window per session; 0 selects the session default.
    pub history_size: usize,
}

/// Maps document ids to live sessions with lazy creation.
///
/// Steady-state lookups take only the shared guard. Creation builds and
/// loads the session with no guard held, then takes the exclusive guard just
/// for insertion; a racing creator keeps whichever session was inserted
/// first and drops its own.
pub struct Manager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    store: Arc<dyn Store>,
    perm_store: Option<Arc<dyn PermissionStore>>,
    broadcaster: Option<Arc<dyn Broadcaster>>,
    snapshot_policy: Option<Arc<SnapshotPolicy>>,
    history_size: usize,
}

impl Manager {
    pub fn new(cfg: ManagerConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store: cfg.store,
            perm_store: cfg.perm_store,
            broadcaster: cfg.broadcaster,
            snapshot_policy: cfg.snapshot_policy,
            history_size: cfg.history_size,
        }
    }

    /// Return the live session for `doc_id`, creating and loading one if
    /// needed. A session that fails to load is not retained.
    pub fn get_or_create(&self, doc_id: &str) -> Result<Arc<Session>, SessionError> {
        if let Some(session) = self.sessions.read().get(doc_id) {
            return Ok(session.clone());
        }

        // Build and load with no guard held: loading replays storage and must
        // not block lookups of other documents.
        let session = Arc::new(Session::new(SessionConfig {
            doc_id: doc_id.to_string(),
            store: self.store.clone(),
            checker: self.perm_store.clone().map(Checker::new),
            broadcaster: self.broadcaster.clone(),
            snapshot_policy: self.snapshot_policy.clone(),
            history_size: self.history_size,
        }));
        session.load()?;

        let mut sessions = self.sessions.write();
        // Another caller may have inserted while we were loading; theirs wins.
        Ok(sessions
            .entry(doc_id.to_string())
            .or_insert(session)
            .clone())
    }

    /// The live session for `doc_id`, if any.
    pub fn get(&self, doc_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(doc_id).cloned()
    }

    /// Remove and close the session for `doc_id`. A missing session is fine.
    pub fn close_session(&self, doc_id: &str) -> Result<(), SessionError> {
        let session = self.sessions.write().remove(doc_id);
        match session {
            Some(session) => {
                log::debug!("closing session {doc_id}");
                session.close()
            }
            None => Ok(()),
        }
    }

    /// Drain and close every session, reporting the last close error.
    pub fn close_all(&self) -> Result<(), SessionError> {
        let sessions: Vec<Arc<Session>> = self.sessions.write().drain().map(|(_, s)| s).collect();

        let mut result = Ok(());
        for session in sessions {
            if let Err(err) = session.close() {
                log::warn!("closing session {} failed: {err}", session.doc_id());
                result = Err(err);
            }
        }
        result
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}
