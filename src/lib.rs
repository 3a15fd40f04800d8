//! # codocs — real-time collaborative text editing backend
//!
//! Accepts concurrent character-level edits from many clients against shared
//! documents and guarantees every client converges to the same content.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   WebSocket    ┌──────────┐      ┌─────────────────────┐
//! │ Client A │ ◄────────────► │          │      │ Session (per doc)   │
//! └──────────┘  JSON frames   │  Server  │ ───► │   Queue ── Document │
//! ┌──────────┐                │  (axum)  │      │   │                 │
//! │ Client B │ ◄────────────► │          │      │   └── Store (log +  │
//! └──────────┘                └────┬─────┘      │        snapshots)   │
//!      ▲                          │            └──────────┬──────────┘
//!      │         broadcast        ▼                       │
//!      └───────────────────────  Hub  ◄───────────────────┘
//! ```
//!
//! Each live document has one [`session::Session`] that serializes edits:
//! the [`ot::Queue`] transforms an incoming operation against the concurrent
//! history and assigns it a revision, the [`ot::Document`] applies it, the
//! [`storage::Store`] logs it (with periodic snapshots pruning the log), and
//! the [`broadcast::Hub`] fans it out to the other subscribers. The
//! [`manager::Manager`] creates sessions lazily and tears them down; the
//! [`acl`] module gates reads, writes, and deletes by role.
//!
//! ## Modules
//!
//! - [`ot`] — operations, pairwise transform, document, revision queue
//! - [`storage`] — store contract, in-memory store, snapshot policy, loader
//! - [`acl`] — roles, permission store, checker
//! - [`session`] / [`manager`] — per-document coordination and registry
//! - [`broadcast`] — client registry and fan-out
//! - [`protocol`] — JSON wire envelope
//! - [`server`] — axum REST + WebSocket adapter

pub mod acl;
pub mod broadcast;
pub mod manager;
pub mod ot;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;

pub use acl::{Action, AclError, Checker, MemoryPermissionStore, PermissionStore, Role};
pub use broadcast::{Broadcaster, ClientHandle, Hub};
pub use manager::{Manager, ManagerConfig};
pub use ot::{Document, DocumentError, OpKind, Operation, Queue, QueueError, SequencedOperation};
pub use protocol::WsMessage;
pub use server::{AppState, ServerConfig};
pub use session::{Session, SessionConfig, SessionError};
pub use storage::{
    DocumentLoader, LoadError, LoadResult, MemoryStore, Snapshot, SnapshotPolicy, Store, StoreError,
};
