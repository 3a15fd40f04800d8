//! Checkpoint policy and snapshot-plus-replay document loading.

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;

use super::{Store, StoreError};
use crate::ot::{DocumentError, Operation};

/// Decides when a document is due for a checkpoint.
///
/// Counts applied operations per document; once a document reaches the
/// threshold the caller snapshots and resets the counter. Tracks documents
/// independently and is safe to share between sessions.
#[derive(Debug)]
pub struct SnapshotPolicy {
    threshold: u64,
    ops_since_snapshot: Mutex<HashMap<String, u64>>,
}

impl SnapshotPolicy {
    /// Snapshot every `threshold` operations.
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            ops_since_snapshot: Mutex::new(HashMap::new()),
        }
    }

    /// Record one applied operation; returns true when the document is due
    /// for a snapshot.
    pub fn record_operation(&self, doc_id: &str) -> bool {
        let mut counters = self.ops_since_snapshot.lock();
        let count = counters.entry(doc_id.to_string()).or_insert(0);
        *count += 1;
        *count >= self.threshold
    }

    /// Zero the counter after a snapshot attempt.
    pub fn reset(&self, doc_id: &str) {
        self.ops_since_snapshot
            .lock()
            .insert(doc_id.to_string(), 0);
    }

    /// Operations recorded since the last reset.
    pub fn ops_since_snapshot(&self, doc_id: &str) -> u64 {
        self.ops_since_snapshot
            .lock()
            .get(doc_id)
            .copied()
            .unwrap_or(0)
    }
}

/// Result of reconstructing a document from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResult {
    pub content: String,
    pub revision: u64,
    /// True when neither a snapshot nor any operation was found.
    pub is_new: bool,
}

/// Errors raised while loading a document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A logged operation failed to re-apply; the log is inconsistent.
    #[error("replaying logged operation failed: {0}")]
    Replay(#[from] DocumentError),
}

/// Reconstructs document state as latest snapshot + replay of the log tail.
pub struct DocumentLoader<'a> {
    store: &'a dyn Store,
}

impl<'a> DocumentLoader<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Load `doc_id`, replaying each logged operation through `apply`.
    ///
    /// A missing snapshot is not an error: replay starts from empty content
    /// at revision 0. A missing document propagates.
    pub fn load<F>(&self, doc_id: &str, mut apply: F) -> Result<LoadResult, LoadError>
    where
        F: FnMut(String, &Operation) -> Result<String, DocumentError>,
    {
        let (mut content, start_revision) = match self.store.load_snapshot(doc_id) {
            Ok(snapshot) => (snapshot.content, snapshot.revision),
            Err(StoreError::SnapshotNotFound(_)) => (String::new(), 0),
            Err(err) => return Err(err.into()),
        };

        let ops = self.store.load_operations(doc_id, start_revision)?;

        let mut revision = start_revision;
        for op in &ops {
            content = apply(content, &op.operation)?;
            revision = op.revision;
        }

        Ok(LoadResult {
            content,
            revision,
            is_new: start_revision == 0 && ops.is_empty(),
        })
    }
}
