//! Edit operations: the unit of change exchanged between clients.

use serde::{Deserialize, Serialize};

/// Position marking an operation that has nothing left to do.
pub(crate) const NOOP_POSITION: i64 = -1;

/// Kind of edit an [`Operation`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    Insert,
    Delete,
}

/// A single character-level edit.
///
/// Positions count user-perceived characters (grapheme clusters), not bytes.
/// A negative position marks a no-op: transformation found the edit has
/// nothing left to do, but it still consumes a revision slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OpKind,
    /// Character position in the document; `-1` for no-ops.
    pub position: i64,
    /// Character to insert (one grapheme cluster; empty for deletes).
    pub ch: String,
    /// Originating user, used to tie-break concurrent inserts.
    pub user_id: String,
}

impl Operation {
    /// Create an insert of `ch` at `position`.
    pub fn insert(ch: impl Into<String>, position: i64, user_id: impl Into<String>) -> Self {
        Self {
            kind: OpKind::Insert,
            position,
            ch: ch.into(),
            user_id: user_id.into(),
        }
    }

    /// Create a delete of the character at `position`.
    pub fn delete(position: i64, user_id: impl Into<String>) -> Self {
        Self {
            kind: OpKind::Delete,
            position,
            ch: String::new(),
            user_id: user_id.into(),
        }
    }

    pub fn is_insert(&self) -> bool {
        self.kind == OpKind::Insert
    }

    pub fn is_delete(&self) -> bool {
        self.kind == OpKind::Delete
    }

    /// Whether the operation has been transformed into a no-op.
    pub fn is_noop(&self) -> bool {
        self.position < 0
    }
}
