//! In-memory reference implementation of the [`Store`] contract.

use std::collections::HashMap;
use std::time::SystemTime;

use parking_lot::RwLock;

use super::{Snapshot, Store, StoreError};
use crate::ot::SequencedOperation;

/// Everything persisted for a single document.
#[derive(Debug, Default)]
struct DocumentData {
    snapshot: Option<Snapshot>,
    operations: Vec<SequencedOperation>,
}

/// Process-local store. State lives until the process exits; useful for
/// development, testing, and as the semantic reference for real backends.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<String, DocumentData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn create_document(&self, doc_id: &str) -> Result<(), StoreError> {
        let mut docs = self.docs.write();
        if docs.contains_key(doc_id) {
            return Err(StoreError::DocumentExists(doc_id.to_string()));
        }
        docs.insert(doc_id.to_string(), DocumentData::default());
        Ok(())
    }

    fn document_exists(&self, doc_id: &str) -> Result<bool, StoreError> {
        Ok(self.docs.read().contains_key(doc_id))
    }

    fn delete_document(&self, doc_id: &str) -> Result<(), StoreError> {
        let mut docs = self.docs.write();
        docs.remove(doc_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::DocumentNotFound(doc_id.to_string()))
    }

    fn save_snapshot(&self, doc_id: &str, revision: u64, content: &str) -> Result<(), StoreError> {
        let mut docs = self.docs.write();
        let doc = docs
            .get_mut(doc_id)
            .ok_or_else(|| StoreError::DocumentNotFound(doc_id.to_string()))?;

        doc.snapshot = Some(Snapshot {
            doc_id: doc_id.to_string(),
            revision,
            content: content.to_string(),
            created_at: SystemTime::now(),
        });

        // The snapshot covers everything up to its revision.
        doc.operations.retain(|op| op.revision > revision);
        Ok(())
    }

    fn load_snapshot(&self, doc_id: &str) -> Result<Snapshot, StoreError> {
        let docs = self.docs.read();
        let doc = docs
            .get(doc_id)
            .ok_or_else(|| StoreError::DocumentNotFound(doc_id.to_string()))?;
        doc.snapshot
            .clone()
            .ok_or_else(|| StoreError::SnapshotNotFound(doc_id.to_string()))
    }

    fn append_operation(&self, doc_id: &str, op: &SequencedOperation) -> Result<(), StoreError> {
        let mut docs = self.docs.write();
        let doc = docs
            .get_mut(doc_id)
            .ok_or_else(|| StoreError::DocumentNotFound(doc_id.to_string()))?;
        doc.operations.push(op.clone());
        Ok(())
    }

    fn load_operations(
        &self,
        doc_id: &str,
        since_revision: u64,
    ) -> Result<Vec<SequencedOperation>, StoreError> {
        let docs = self.docs.read();
        let doc = docs
            .get(doc_id)
            .ok_or_else(|| StoreError::DocumentNotFound(doc_id.to_string()))?;
        Ok(doc
            .operations
            .iter()
            .filter(|op| op.revision > since_revision)
            .cloned()
            .collect())
    }

    fn latest_revision(&self, doc_id: &str) -> Result<u64, StoreError> {
        let docs = self.docs.read();
        let doc = docs
            .get(doc_id)
            .ok_or_else(|| StoreError::DocumentNotFound(doc_id.to_string()))?;

        // The log is newer than the snapshot when both exist.
        if let Some(last) = doc.operations.last() {
            return Ok(last.revision);
        }
        Ok(doc.snapshot.as_ref().map_or(0, |s| s.revision))
    }
}
