//! Fan-out of applied operations to subscribed clients.
//!
//! The [`Hub`] keeps two indices over the same connection ids:
//! ```text
//! clients:   client id → handle (outbound queue, identity)
//! documents: doc id    → set of subscribed client ids
//! ```
//! A client is subscribed to at most one document; subscribing again moves
//! the subscription. Broadcasting enumerates the document's subscribers under
//! a shared guard, then hands each recipient its copy through that client's
//! unbounded outbound channel, so one slow connection never delays the
//! producer or the other recipients. Failed sends are dropped; the
//! connection's read loop observes the disconnect soon after.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::WsMessage;

/// Capability interface the session uses to publish applied operations.
/// Narrow by design so tests can observe broadcasts with a double.
pub trait Broadcaster: Send + Sync {
    /// Deliver `msg` to every client subscribed to `doc_id` except
    /// `exclude_client`.
    fn broadcast(&self, doc_id: &str, msg: WsMessage, exclude_client: Option<Uuid>);
}

/// A connected client as the hub sees it: identity plus an outbound queue.
///
/// The handle does not own the transport; the connection task drains the
/// paired receiver and writes frames to the socket.
#[derive(Debug)]
pub struct ClientHandle {
    id: Uuid,
    user_id: String,
    doc_id: Mutex<Option<String>>,
    outbound: mpsc::UnboundedSender<WsMessage>,
}

impl ClientHandle {
    /// Create a handle and the receiving half of its outbound queue.
    pub fn new(user_id: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<WsMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Arc::new(Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            doc_id: Mutex::new(None),
            outbound: tx,
        });
        (handle, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Document this client is currently subscribed to.
    pub fn doc_id(&self) -> Option<String> {
        self.doc_id.lock().clone()
    }

    fn set_doc_id(&self, doc_id: Option<String>) {
        *self.doc_id.lock() = doc_id;
    }

    /// Queue a message for the client. Returns false when the connection has
    /// gone away and the receiver was dropped.
    pub fn send(&self, msg: WsMessage) -> bool {
        self.outbound.send(msg).is_ok()
    }
}

#[derive(Debug, Default)]
struct HubInner {
    clients: HashMap<Uuid, Arc<ClientHandle>>,
    documents: HashMap<String, HashSet<Uuid>>,
}

impl HubInner {
    fn drop_subscription(&mut self, doc_id: &str, client_id: Uuid) {
        if let Some(subscribers) = self.documents.get_mut(doc_id) {
            subscribers.remove(&client_id);
            if subscribers.is_empty() {
                self.documents.remove(doc_id);
            }
        }
    }
}

/// Registry of connected clients and their document subscriptions.
#[derive(Debug, Default)]
pub struct Hub {
    inner: RwLock<HubInner>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client to the registry.
    pub fn register(&self, client: Arc<ClientHandle>) {
        self.inner.write().clients.insert(client.id(), client);
    }

    /// Remove a client and release its subscription.
    pub fn unregister(&self, client: &ClientHandle) {
        let mut inner = self.inner.write();
        if let Some(doc_id) = client.doc_id() {
            inner.drop_subscription(&doc_id, client.id());
        }
        inner.clients.remove(&client.id());
    }

    /// Subscribe a client to a document, moving any existing subscription.
    pub fn subscribe(&self, client: &ClientHandle, doc_id: &str) {
        let mut inner = self.inner.write();

        if let Some(previous) = client.doc_id() {
            if previous != doc_id {
                inner.drop_subscription(&previous, client.id());
            }
        }

        inner
            .documents
            .entry(doc_id.to_string())
            .or_default()
            .insert(client.id());
        client.set_doc_id(Some(doc_id.to_string()));
    }

    /// Remove a client's subscription to `doc_id`.
    pub fn unsubscribe(&self, client: &ClientHandle, doc_id: &str) {
        let mut inner = self.inner.write();
        inner.drop_subscription(doc_id, client.id());
        if client.doc_id().as_deref() == Some(doc_id) {
            client.set_doc_id(None);
        }
    }

    /// Number of clients subscribed to a document.
    pub fn client_count(&self, doc_id: &str) -> usize {
        self.inner
            .read()
            .documents
            .get(doc_id)
            .map_or(0, HashSet::len)
    }

    /// Total registered clients across all documents.
    pub fn total_clients(&self) -> usize {
        self.inner.read().clients.len()
    }
}

impl Broadcaster for Hub {
    fn broadcast(&self, doc_id: &str, msg: WsMessage, exclude_client: Option<Uuid>) {
        // Snapshot the recipients under the shared guard, dispatch after
        // releasing it.
        let recipients: Vec<Arc<ClientHandle>> = {
            let inner = self.inner.read();
            let Some(subscribers) = inner.documents.get(doc_id) else {
                return;
            };
            subscribers
                .iter()
                .filter(|id| Some(**id) != exclude_client)
                .filter_map(|id| inner.clients.get(id).cloned())
                .collect()
        };

        for client in recipients {
            if !client.send(msg.clone()) {
                log::debug!(
                    "dropping broadcast for disconnected client {} on {doc_id}",
                    client.id()
                );
            }
        }
    }
}
