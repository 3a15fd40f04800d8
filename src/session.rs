//! Per-document editing session.
//!
//! One session exists per live document and serializes everything that
//! changes its state:
//!
//! ```text
//! apply_operation:
//!   permission check ─► queue (transform + revision) ─► document apply
//!     ─► store append ─► snapshot policy (maybe checkpoint) ─► broadcast
//! ```
//!
//! All steps after the permission check run under the session's exclusive
//! guard, so revisions are assigned, persisted, and announced in one total
//! order per document. Snapshot write failures are logged and swallowed: the
//! operation is already durable in the log. Broadcast hand-off is a
//! non-blocking queue send, so the guard is never held across I/O.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::acl::{Action, AclError, Checker};
use crate::broadcast::Broadcaster;
use crate::ot::{Document, DocumentError, Operation, Queue, QueueError};
use crate::protocol::WsMessage;
use crate::storage::{DocumentLoader, LoadError, SnapshotPolicy, Store, StoreError};

/// History window used when the configuration leaves it unset.
pub const DEFAULT_HISTORY_SIZE: usize = 100;

/// Errors surfaced by session operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,
    #[error(transparent)]
    Acl(#[from] AclError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// A sequenced operation failed to apply: the queue and document have
    /// diverged, which is an internal invariant violation.
    #[error("applying sequenced operation failed: {0}")]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Everything a session needs, injected by the [`Manager`](crate::manager::Manager).
pub struct SessionConfig {
    pub doc_id: String,
    pub store: Arc<dyn Store>,
    pub checker: Option<Checker>,
    pub broadcaster: Option<Arc<dyn Broadcaster>>,
    pub snapshot_policy: Option<Arc<SnapshotPolicy>>,
    /// Transform history window; 0 selects [`DEFAULT_HISTORY_SIZE`].
    pub history_size: usize,
}

/// State guarded together so document content, queue revision, and the
/// closed flag can never be observed out of step.
struct SessionState {
    document: Document,
    queue: Queue,
    closed: bool,
}

/// Coordinates collaborative editing for a single document.
pub struct Session {
    doc_id: String,
    state: RwLock<SessionState>,
    store: Arc<dyn Store>,
    checker: Option<Checker>,
    broadcaster: Option<Arc<dyn Broadcaster>>,
    snapshot_policy: Option<Arc<SnapshotPolicy>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("doc_id", &self.doc_id).finish()
    }
}

/// Replay step used while loading: a one-shot document per operation keeps
/// the loader independent of live session state (correctness over
/// allocation).
fn replay_step(content: String, op: &Operation) -> Result<String, DocumentError> {
    let mut doc = Document::new(content);
    doc.apply(op)?;
    Ok(doc.into_content())
}

impl Session {
    pub fn new(cfg: SessionConfig) -> Self {
        let history_size = if cfg.history_size == 0 {
            DEFAULT_HISTORY_SIZE
        } else {
            cfg.history_size
        };

        Self {
            doc_id: cfg.doc_id,
            state: RwLock::new(SessionState {
                document: Document::new(""),
                queue: Queue::new(history_size),
                closed: false,
            }),
            store: cfg.store,
            checker: cfg.checker,
            broadcaster: cfg.broadcaster,
            snapshot_policy: cfg.snapshot_policy,
        }
    }

    /// Initialize document content and revision from storage.
    pub fn load(&self) -> Result<(), SessionError> {
        let mut state = self.state.write();
        if state.closed {
            return Err(SessionError::Closed);
        }

        let loader = DocumentLoader::new(self.store.as_ref());
        let result = loader.load(&self.doc_id, replay_step)?;

        log::debug!(
            "loaded document {} at revision {} ({} chars{})",
            self.doc_id,
            result.revision,
            result.content.len(),
            if result.is_new { ", new" } else { "" }
        );

        state.document = Document::new(result.content);
        state.queue = Queue::new(state.queue.capacity());
        state.queue.set_revision(result.revision);
        Ok(())
    }

    /// Apply one client edit: transform, sequence, persist, maybe snapshot,
    /// broadcast to the other subscribers, and return the assigned revision.
    ///
    /// `client_id` identifies the submitting connection so the broadcast can
    /// skip it; callers without a connection pass `None`.
    pub fn apply_operation(
        &self,
        client_id: Option<Uuid>,
        user_id: &str,
        op: Operation,
        base_revision: u64,
    ) -> Result<u64, SessionError> {
        if let Some(checker) = &self.checker {
            checker.require(&self.doc_id, user_id, Action::Write)?;
        }

        let mut state = self.state.write();
        if state.closed {
            return Err(SessionError::Closed);
        }

        let seq_op = state.queue.apply(op, base_revision)?;

        if let Err(err) = state.document.apply(&seq_op.operation) {
            log::error!(
                "document {} rejected sequenced operation at revision {}: {err}",
                self.doc_id,
                seq_op.revision
            );
            return Err(err.into());
        }

        self.store.append_operation(&self.doc_id, &seq_op)?;

        self.maybe_snapshot(&state);

        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.broadcast(
                &self.doc_id,
                WsMessage::broadcast(&self.doc_id, &seq_op),
                client_id,
            );
        }

        Ok(seq_op.revision)
    }

    /// Checkpoint when the policy says the document is due. Failures are
    /// logged and swallowed; the operation is already durable in the log.
    fn maybe_snapshot(&self, state: &SessionState) {
        let Some(policy) = &self.snapshot_policy else {
            return;
        };

        if policy.record_operation(&self.doc_id) {
            let revision = state.queue.revision();
            if let Err(err) = self
                .store
                .save_snapshot(&self.doc_id, revision, state.document.content())
            {
                log::warn!(
                    "snapshot of document {} at revision {revision} failed: {err}",
                    self.doc_id
                );
            }
            policy.reset(&self.doc_id);
        }
    }

    /// Current content and revision, after a read permission check.
    pub fn get_state(&self, user_id: &str) -> Result<(String, u64), SessionError> {
        if let Some(checker) = &self.checker {
            checker.require(&self.doc_id, user_id, Action::Read)?;
        }

        let state = self.state.read();
        if state.closed {
            return Err(SessionError::Closed);
        }

        Ok((state.document.content().to_string(), state.queue.revision()))
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// Current revision.
    pub fn revision(&self) -> u64 {
        self.state.read().queue.revision()
    }

    /// Mark the session closed and attempt a final snapshot. Idempotent.
    pub fn close(&self) -> Result<(), SessionError> {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        log::debug!("closing session for document {}", self.doc_id);
        self.store
            .save_snapshot(&self.doc_id, state.queue.revision(), state.document.content())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{MemoryPermissionStore, PermissionStore, Role};
    use crate::ot::SequencedOperation;
    use crate::storage::MemoryStore;
    use parking_lot::Mutex;

    /// Broadcaster double that records every delivery.
    #[derive(Default)]
    struct RecordingBroadcaster {
        sent: Mutex<Vec<(String, WsMessage, Option<Uuid>)>>,
    }

    impl Broadcaster for RecordingBroadcaster {
        fn broadcast(&self, doc_id: &str, msg: WsMessage, exclude_client: Option<Uuid>) {
            self.sent
                .lock()
                .push((doc_id.to_string(), msg, exclude_client));
        }
    }

    /// Store double whose snapshot writes always fail.
    struct SnapshotFailingStore {
        inner: MemoryStore,
    }

    impl Store for SnapshotFailingStore {
        fn create_document(&self, doc_id: &str) -> Result<(), StoreError> {
            self.inner.create_document(doc_id)
        }
        fn document_exists(&self, doc_id: &str) -> Result<bool, StoreError> {
            self.inner.document_exists(doc_id)
        }
        fn delete_document(&self, doc_id: &str) -> Result<(), StoreError> {
            self.inner.delete_document(doc_id)
        }
        fn save_snapshot(&self, _: &str, _: u64, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Backend("disk full".to_string()))
        }
        fn load_snapshot(&self, doc_id: &str) -> Result<crate::storage::Snapshot, StoreError> {
            self.inner.load_snapshot(doc_id)
        }
        fn append_operation(&self, doc_id: &str, op: &SequencedOperation) -> Result<(), StoreError> {
            self.inner.append_operation(doc_id, op)
        }
        fn load_operations(
            &self,
            doc_id: &str,
            since: u64,
        ) -> Result<Vec<SequencedOperation>, StoreError> {
            self.inner.load_operations(doc_id, since)
        }
        fn latest_revision(&self, doc_id: &str) -> Result<u64, StoreError> {
            self.inner.latest_revision(doc_id)
        }
    }

    fn session_with(store: Arc<dyn Store>, initial: &str) -> Session {
        store.create_document("doc").unwrap();
        if !initial.is_empty() {
            store.save_snapshot("doc", 0, initial).unwrap();
        }
        let session = Session::new(SessionConfig {
            doc_id: "doc".to_string(),
            store,
            checker: None,
            broadcaster: None,
            snapshot_policy: None,
            history_size: 0,
        });
        session.load().unwrap();
        session
    }

    fn new_session(initial: &str) -> Session {
        session_with(Arc::new(MemoryStore::new()), initial)
    }

    #[test]
    fn test_apply_assigns_and_persists_revisions() {
        let store = Arc::new(MemoryStore::new());
        let session = session_with(store.clone(), "");

        let r1 = session
            .apply_operation(None, "alice", Operation::insert("h", 0, "alice"), 0)
            .unwrap();
        let r2 = session
            .apply_operation(None, "alice", Operation::insert("i", 1, "alice"), 1)
            .unwrap();

        assert_eq!((r1, r2), (1, 2));
        assert_eq!(session.get_state("alice").unwrap(), ("hi".to_string(), 2));

        let logged = store.load_operations("doc", 0).unwrap();
        assert_eq!(logged.len(), 2);
        assert_eq!(logged[1].revision, 2);
    }

    #[test]
    fn test_concurrent_insert_delete_converge() {
        // HELLO with a concurrent insert and delete at position 2.
        let session = new_session("HELLO");

        session
            .apply_operation(None, "alice", Operation::insert("X", 2, "alice"), 0)
            .unwrap();
        session
            .apply_operation(None, "bob", Operation::delete(2, "bob"), 0)
            .unwrap();

        assert_eq!(session.get_state("anyone").unwrap().0, "HEXLO");
    }

    #[test]
    fn test_same_position_inserts_tie_break_on_user() {
        let session = new_session("");

        for user in ["alice", "bob", "carol"] {
            let ch = &user[..1];
            session
                .apply_operation(None, user, Operation::insert(ch, 0, user), 0)
                .unwrap();
        }

        assert_eq!(session.get_state("anyone").unwrap(), ("abc".to_string(), 3));
    }

    #[test]
    fn test_duplicate_delete_becomes_noop() {
        let session = new_session("ABC");

        session
            .apply_operation(None, "alice", Operation::delete(1, "alice"), 0)
            .unwrap();
        let revision = session
            .apply_operation(None, "bob", Operation::delete(1, "bob"), 0)
            .unwrap();

        assert_eq!(revision, 2, "the no-op still consumes a revision");
        assert_eq!(session.get_state("anyone").unwrap().0, "AC");
    }

    #[test]
    fn test_future_base_revision_rejected() {
        let session = new_session("");
        let err = session
            .apply_operation(None, "alice", Operation::insert("a", 0, "alice"), 3)
            .unwrap_err();
        assert!(matches!(err, SessionError::Queue(QueueError::FutureRevision { .. })));
    }

    #[test]
    fn test_snapshot_policy_checkpoints_and_resets() {
        let store = Arc::new(MemoryStore::new());
        store.create_document("doc").unwrap();
        let policy = Arc::new(SnapshotPolicy::new(2));

        let session = Session::new(SessionConfig {
            doc_id: "doc".to_string(),
            store: store.clone(),
            checker: None,
            broadcaster: None,
            snapshot_policy: Some(policy.clone()),
            history_size: 0,
        });
        session.load().unwrap();

        session
            .apply_operation(None, "alice", Operation::insert("a", 0, "alice"), 0)
            .unwrap();
        assert!(store.load_snapshot("doc").is_err(), "below threshold");

        session
            .apply_operation(None, "alice", Operation::insert("b", 1, "alice"), 1)
            .unwrap();
        let snapshot = store.load_snapshot("doc").unwrap();
        assert_eq!(snapshot.revision, 2);
        assert_eq!(snapshot.content, "ab");
        assert_eq!(policy.ops_since_snapshot("doc"), 0);

        // Covered operations were pruned from the log.
        assert!(store.load_operations("doc", 0).unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_failure_is_swallowed() {
        let store = Arc::new(SnapshotFailingStore {
            inner: MemoryStore::new(),
        });
        store.create_document("doc").unwrap();
        let policy = Arc::new(SnapshotPolicy::new(1));

        let session = Session::new(SessionConfig {
            doc_id: "doc".to_string(),
            store: store.clone(),
            checker: None,
            broadcaster: None,
            snapshot_policy: Some(policy.clone()),
            history_size: 0,
        });
        session.load().unwrap();

        // Every apply triggers a snapshot attempt that fails; the edit is
        // still acknowledged and the counter still resets.
        let revision = session
            .apply_operation(None, "alice", Operation::insert("a", 0, "alice"), 0)
            .unwrap();
        assert_eq!(revision, 1);
        assert_eq!(policy.ops_since_snapshot("doc"), 0);
        assert_eq!(store.load_operations("doc", 0).unwrap().len(), 1);
    }

    #[test]
    fn test_write_permission_enforced() {
        let perms = Arc::new(MemoryPermissionStore::new());
        perms.grant("doc", "viewer", Role::Viewer).unwrap();
        perms.grant("doc", "editor", Role::Editor).unwrap();

        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store.create_document("doc").unwrap();
        let session = Session::new(SessionConfig {
            doc_id: "doc".to_string(),
            store,
            checker: Some(Checker::new(perms)),
            broadcaster: None,
            snapshot_policy: None,
            history_size: 0,
        });
        session.load().unwrap();

        let err = session
            .apply_operation(None, "viewer", Operation::insert("a", 0, "viewer"), 0)
            .unwrap_err();
        assert_eq!(err, SessionError::Acl(AclError::AccessDenied));

        session
            .apply_operation(None, "editor", Operation::insert("a", 0, "editor"), 0)
            .unwrap();

        // Viewers may still read; strangers may not.
        assert_eq!(session.get_state("viewer").unwrap().0, "a");
        assert!(session.get_state("stranger").is_err());
    }

    #[test]
    fn test_broadcast_excludes_originating_client() {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store.create_document("doc").unwrap();

        let session = Session::new(SessionConfig {
            doc_id: "doc".to_string(),
            store,
            checker: None,
            broadcaster: Some(broadcaster.clone()),
            snapshot_policy: None,
            history_size: 0,
        });
        session.load().unwrap();

        let client = Uuid::new_v4();
        session
            .apply_operation(Some(client), "alice", Operation::insert("a", 0, "alice"), 0)
            .unwrap();

        let sent = broadcaster.sent.lock();
        assert_eq!(sent.len(), 1);
        let (doc_id, msg, excluded) = &sent[0];
        assert_eq!(doc_id, "doc");
        assert_eq!(*excluded, Some(client));
        match msg {
            WsMessage::Broadcast(payload) => {
                assert_eq!(payload.revision, 1);
                assert_eq!(payload.user_id, "alice");
                assert_eq!(payload.ch.as_deref(), Some("a"));
            }
            other => panic!("expected broadcast, got {other:?}"),
        }
    }

    #[test]
    fn test_load_restores_revision_and_content() {
        let store = Arc::new(MemoryStore::new());
        store.create_document("doc").unwrap();
        for (i, ch) in "hey".chars().enumerate() {
            store
                .append_operation(
                    "doc",
                    &SequencedOperation {
                        operation: Operation::insert(ch.to_string(), i as i64, "alice"),
                        revision: i as u64 + 1,
                    },
                )
                .unwrap();
        }

        let session = Session::new(SessionConfig {
            doc_id: "doc".to_string(),
            store,
            checker: None,
            broadcaster: None,
            snapshot_policy: None,
            history_size: 0,
        });
        session.load().unwrap();
        assert_eq!(session.revision(), 3);
        assert_eq!(session.get_state("anyone").unwrap().0, "hey");

        // New edits continue from the restored revision.
        let revision = session
            .apply_operation(None, "alice", Operation::insert("!", 3, "alice"), 3)
            .unwrap();
        assert_eq!(revision, 4);
    }

    #[test]
    fn test_close_is_terminal_and_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let session = session_with(store.clone(), "");
        session
            .apply_operation(None, "alice", Operation::insert("a", 0, "alice"), 0)
            .unwrap();

        session.close().unwrap();
        session.close().unwrap();

        // Closing checkpointed the final state.
        let snapshot = store.load_snapshot("doc").unwrap();
        assert_eq!(snapshot.revision, 1);
        assert_eq!(snapshot.content, "a");

        assert_eq!(
            session
                .apply_operation(None, "alice", Operation::insert("b", 1, "alice"), 1)
                .unwrap_err(),
            SessionError::Closed
        );
        assert_eq!(session.get_state("alice").unwrap_err(), SessionError::Closed);
    }

    #[test]
    fn test_ten_concurrent_writers_serialize() {
        let session = Arc::new(new_session(""));

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let session = session.clone();
                std::thread::spawn(move || {
                    let user = format!("user-{i}");
                    session
                        .apply_operation(None, &user, Operation::insert("x", 0, &user), 0)
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let (content, revision) = session.get_state("anyone").unwrap();
        assert_eq!(revision, 10, "every successful apply consumed a revision");
        assert_eq!(content.len(), 10, "ten non-no-op inserts landed");
    }
}
