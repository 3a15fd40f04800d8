//! Sequencing of concurrent operations against a bounded history window.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::operation::Operation;
use super::transform::transform;

/// An operation together with the revision the queue assigned it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedOperation {
    pub operation: Operation,
    pub revision: u64,
}

/// Errors raised while sequencing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("base revision {base} is ahead of current revision {current}")]
    FutureRevision { base: u64, current: u64 },
    #[error("base revision {base} is too old; transform history starts at revision {oldest}")]
    RevisionTooOld { base: u64, oldest: u64 },
}

/// Assigns monotonic revisions and transforms incoming operations against the
/// operations that were accepted since the client's base revision.
///
/// The history window is bounded: clients whose base revision predates the
/// window by more than one revision are refused with [`QueueError::RevisionTooOld`]
/// and must resynchronize.
#[derive(Debug)]
pub struct Queue {
    revision: u64,
    history: VecDeque<SequencedOperation>,
    capacity: usize,
}

impl Queue {
    /// Create a queue keeping at most `capacity` operations for transforms.
    pub fn new(capacity: usize) -> Self {
        Self {
            revision: 0,
            history: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Current revision; 0 for a fresh document.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Set the revision after replaying persisted state.
    pub fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }

    /// Maximum history length.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Transform `op` against everything accepted after `base_revision`,
    /// assign it the next revision, and record it in history.
    ///
    /// The returned operation may have become a no-op; the revision is
    /// consumed either way.
    pub fn apply(
        &mut self,
        op: Operation,
        base_revision: u64,
    ) -> Result<SequencedOperation, QueueError> {
        if base_revision > self.revision {
            return Err(QueueError::FutureRevision {
                base: base_revision,
                current: self.revision,
            });
        }

        if base_revision < self.revision {
            if let Some(oldest) = self.history.front().map(|entry| entry.revision) {
                // base == oldest - 1 still transforms: that operation is
                // already materialized in the document tail that follows.
                if base_revision + 1 < oldest {
                    return Err(QueueError::RevisionTooOld {
                        base: base_revision,
                        oldest,
                    });
                }
            }
        }

        let mut transformed = op;
        for entry in &self.history {
            if entry.revision > base_revision {
                // The history side of the pair is discarded: those operations
                // are already materialized in the document.
                let (op_prime, _) = transform(&transformed, &entry.operation);
                transformed = op_prime;
            }
        }

        self.revision += 1;
        let sequenced = SequencedOperation {
            operation: transformed,
            revision: self.revision,
        };

        self.history.push_back(sequenced.clone());
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }

        Ok(sequenced)
    }

    /// Copy of the history entries with revision greater than `since_revision`,
    /// in ascending revision order.
    pub fn history(&self, since_revision: u64) -> Vec<SequencedOperation> {
        self.history
            .iter()
            .filter(|entry| entry.revision > since_revision)
            .cloned()
            .collect()
    }
}
