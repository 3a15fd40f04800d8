//! Document content with grapheme-cluster position arithmetic.

use thiserror::Error;
use unicode_segmentation::UnicodeSegmentation;

use super::operation::{OpKind, Operation};

/// Errors raised when applying an operation to a document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("position {position} out of range for document of length {len}")]
    InvalidPosition { position: i64, len: usize },
}

/// The current state of a collaborative document.
///
/// Content is indexed by user-perceived characters (grapheme clusters), so a
/// multi-codepoint character such as a flag emoji occupies one position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    content: String,
}

impl Document {
    /// Create a document with the given initial content.
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            content: initial.into(),
        }
    }

    /// Apply an operation. No-ops (negative position) are silently ignored.
    pub fn apply(&mut self, op: &Operation) -> Result<(), DocumentError> {
        if op.is_noop() {
            return Ok(());
        }

        let position = op.position as usize;
        match op.kind {
            OpKind::Insert => self.insert(position, &op.ch, op.position),
            OpKind::Delete => self.delete(position, op.position),
        }
    }

    /// Insert `ch` before the character at `position`. Valid positions are
    /// `0..=len`.
    fn insert(&mut self, position: usize, ch: &str, raw: i64) -> Result<(), DocumentError> {
        let at = self.byte_offset(position).ok_or(DocumentError::InvalidPosition {
            position: raw,
            len: self.len(),
        })?;
        self.content.insert_str(at, ch);
        Ok(())
    }

    /// Remove the character at `position`. Valid positions are `0..len`.
    fn delete(&mut self, position: usize, raw: i64) -> Result<(), DocumentError> {
        let (start, end) = self.grapheme_span(position).ok_or(DocumentError::InvalidPosition {
            position: raw,
            len: self.len(),
        })?;
        self.content.replace_range(start..end, "");
        Ok(())
    }

    /// Byte offset of the boundary before character `position`; `len` maps to
    /// the end of the string.
    fn byte_offset(&self, position: usize) -> Option<usize> {
        let mut seen = 0;
        for (offset, _) in self.content.grapheme_indices(true) {
            if seen == position {
                return Some(offset);
            }
            seen += 1;
        }
        (seen == position).then_some(self.content.len())
    }

    /// Byte range covered by the character at `position`.
    fn grapheme_span(&self, position: usize) -> Option<(usize, usize)> {
        self.content
            .grapheme_indices(true)
            .nth(position)
            .map(|(start, g)| (start, start + g.len()))
    }

    /// Current content.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Consume the document, returning its content.
    pub fn into_content(self) -> String {
        self.content
    }

    /// Number of user-perceived characters.
    pub fn len(&self) -> usize {
        self.content.graphemes(true).count()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}
