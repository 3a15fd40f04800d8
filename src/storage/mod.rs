//! Persistence for documents: an append-only operation log plus snapshots.
//!
//! ```text
//! ┌──────────┐  append_operation   ┌────────────────────────────┐
//! │ Session  │ ──────────────────► │ Store                      │
//! └────┬─────┘                     │   per-document:            │
//!      │ save_snapshot             │     snapshot?              │
//!      │ (every N ops)             │     operations[] (ordered) │
//!      ▼                           └────────────────────────────┘
//! snapshot at revision S prunes every logged operation with revision ≤ S;
//! the Loader restores state as snapshot + replay of the remaining tail.
//! ```
//!
//! The [`Store`] trait is the pluggable contract; [`MemoryStore`] is the
//! reference implementation and keeps everything in process memory.

pub mod memory;
pub mod snapshot;

use std::time::SystemTime;

use thiserror::Error;

use crate::ot::SequencedOperation;

pub use memory::MemoryStore;
pub use snapshot::{DocumentLoader, LoadError, LoadResult, SnapshotPolicy};

/// Errors raised by a [`Store`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("document {0} already exists")]
    DocumentExists(String),
    #[error("document {0} not found")]
    DocumentNotFound(String),
    #[error("document {0} has no snapshot")]
    SnapshotNotFound(String),
    /// Backend-specific failure (I/O, serialization) from pluggable stores.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A point-in-time capture of a document's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub doc_id: String,
    pub revision: u64,
    pub content: String,
    pub created_at: SystemTime,
}

/// Contract any persistence backend must honor.
///
/// Callers guarantee revision monotonicity on append; the store guarantees
/// that saving a snapshot at revision S prunes logged operations with
/// revision ≤ S and that `load_operations` returns ascending revisions.
pub trait Store: Send + Sync {
    /// Create a new document record. Fails with [`StoreError::DocumentExists`]
    /// if the id is taken.
    fn create_document(&self, doc_id: &str) -> Result<(), StoreError>;

    /// Whether a document record exists.
    fn document_exists(&self, doc_id: &str) -> Result<bool, StoreError>;

    /// Remove a document record and everything stored under it.
    fn delete_document(&self, doc_id: &str) -> Result<(), StoreError>;

    /// Persist a snapshot and prune the operations it covers.
    fn save_snapshot(&self, doc_id: &str, revision: u64, content: &str) -> Result<(), StoreError>;

    /// Latest snapshot for a document. [`StoreError::SnapshotNotFound`] means
    /// the document exists but has never been checkpointed; callers recover
    /// by starting from empty content at revision 0.
    fn load_snapshot(&self, doc_id: &str) -> Result<Snapshot, StoreError>;

    /// Append a sequenced operation to the document's log.
    fn append_operation(&self, doc_id: &str, op: &SequencedOperation) -> Result<(), StoreError>;

    /// All logged operations with revision greater than `since_revision`, in
    /// ascending revision order.
    fn load_operations(
        &self,
        doc_id: &str,
        since_revision: u64,
    ) -> Result<Vec<SequencedOperation>, StoreError>;

    /// Highest revision recorded for the document, across the log and the
    /// snapshot; 0 when nothing has been written.
    fn latest_revision(&self, doc_id: &str) -> Result<u64, StoreError>;
}
