//! Operational transformation engine.
//!
//! The pipeline for one edit:
//! ```text
//! ┌───────────┐   transform against    ┌───────────┐   apply    ┌──────────┐
//! │ Operation │ ─────────────────────► │   Queue   │ ─────────► │ Document │
//! │ (client)  │   concurrent history   │ (sequence)│  revision  │ (content)│
//! └───────────┘                        └───────────┘            └──────────┘
//! ```
//!
//! Concurrent operations created against the same base revision are rewritten
//! by [`transform`] so they commute; the [`Queue`] assigns each accepted
//! operation a strictly increasing revision and keeps a bounded history window
//! for transforming late arrivals.
//!
//! Reference: Ellis & Gibbs — Concurrency Control in Groupware Systems (1989)

pub mod document;
pub mod operation;
pub mod queue;
pub mod transform;

pub use document::{Document, DocumentError};
pub use operation::{OpKind, Operation};
pub use queue::{Queue, QueueError, SequencedOperation};
pub use transform::transform;
