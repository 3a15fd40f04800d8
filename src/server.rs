//! HTTP and WebSocket adapter.
//!
//! ```text
//! REST                                  WebSocket (/ws?docId={id})
//! ────                                  ──────────────────────────
//! POST   /documents        create       client ── operation ──► Session
//! GET    /documents/{id}   state             ◄── ack
//! DELETE /documents/{id}   delete            ◄── state (connect, sync)
//!                                            ◄── broadcast (other clients)
//! ```
//!
//! Identity travels in the `X-User-Id` header; requests without it are
//! rejected with 401 before any handler runs. The adapter owns nothing but
//! translation: core errors map to HTTP statuses on the REST side and to
//! `error` frames (`access_denied` / `invalid_message` / `internal_error`)
//! on the WebSocket side.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};

use crate::acl::{Action, AclError, Checker, PermissionStore, Role};
use crate::broadcast::{Broadcaster, ClientHandle, Hub};
use crate::manager::{Manager, ManagerConfig};
use crate::protocol::{
    OperationPayload, WsMessage, ERROR_CODE_ACCESS_DENIED, ERROR_CODE_INTERNAL_ERROR,
    ERROR_CODE_INVALID_MESSAGE,
};
use crate::session::{Session, SessionError};
use crate::storage::{LoadError, SnapshotPolicy, Store, StoreError};

/// Header carrying the caller's identity.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: String,
    /// Transform history window per document.
    pub history_size: usize,
    /// Snapshot every N applied operations.
    pub snapshot_threshold: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            history_size: 100,
            snapshot_threshold: 50,
        }
    }
}

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    manager: Arc<Manager>,
    store: Arc<dyn Store>,
    perm_store: Option<Arc<dyn PermissionStore>>,
    hub: Arc<Hub>,
}

impl AppState {
    /// Wire the core together: hub, snapshot policy, and session manager
    /// over the given stores.
    pub fn new(
        store: Arc<dyn Store>,
        perm_store: Option<Arc<dyn PermissionStore>>,
        config: &ServerConfig,
    ) -> Self {
        let hub = Arc::new(Hub::new());
        let manager = Arc::new(Manager::new(ManagerConfig {
            store: store.clone(),
            perm_store: perm_store.clone(),
            broadcaster: Some(hub.clone() as Arc<dyn Broadcaster>),
            snapshot_policy: Some(Arc::new(SnapshotPolicy::new(config.snapshot_threshold))),
            history_size: config.history_size,
        }));

        Self {
            manager,
            store,
            perm_store,
            hub,
        }
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }
}

/// Identity extracted by the auth middleware.
#[derive(Debug, Clone)]
pub struct UserId(pub String);

/// Reject requests without an `X-User-Id` header.
async fn require_user_id(mut req: Request, next: Next) -> Response {
    let user_id = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    match user_id {
        Some(user_id) => {
            req.extensions_mut().insert(UserId(user_id));
            next.run(req).await
        }
        None => (StatusCode::UNAUTHORIZED, "missing X-User-Id header").into_response(),
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/documents", post(create_document))
        .route("/documents/{id}", get(get_document).delete(delete_document))
        .route("/ws", get(ws_handler))
        .layer(middleware::from_fn(require_user_id))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(config: ServerConfig, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    log::info!("listening on {}", config.bind_addr);
    axum::serve(listener, router(state)).await
}

#[derive(Debug, Deserialize)]
struct CreateDocumentRequest {
    id: String,
}

#[derive(Debug, Serialize)]
struct CreateDocumentResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct GetDocumentResponse {
    id: String,
    content: String,
    revision: u64,
}

async fn create_document(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    Json(req): Json<CreateDocumentRequest>,
) -> Response {
    if req.id.is_empty() {
        return (StatusCode::BAD_REQUEST, "document id is required").into_response();
    }

    match state.store.create_document(&req.id) {
        Ok(()) => {}
        Err(StoreError::DocumentExists(_)) => {
            return (StatusCode::CONFLICT, "document already exists").into_response();
        }
        Err(err) => {
            log::error!("creating document {} failed: {err}", req.id);
            return internal_error();
        }
    }

    // The creator owns the document when permissions are enforced.
    if let Some(perms) = &state.perm_store {
        if let Err(err) = perms.grant(&req.id, &user_id, Role::Owner) {
            log::warn!("granting owner of {} to {user_id} failed: {err}", req.id);
        }
    }

    log::info!("document {} created by {user_id}", req.id);
    (StatusCode::CREATED, Json(CreateDocumentResponse { id: req.id })).into_response()
}

async fn get_document(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    Path(doc_id): Path<String>,
) -> Response {
    let session = match state.manager.get_or_create(&doc_id) {
        Ok(session) => session,
        Err(err) => return session_error_response(err),
    };

    match session.get_state(&user_id) {
        Ok((content, revision)) => Json(GetDocumentResponse {
            id: doc_id,
            content,
            revision,
        })
        .into_response(),
        Err(err) => session_error_response(err),
    }
}

async fn delete_document(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    Path(doc_id): Path<String>,
) -> Response {
    if let Some(perms) = &state.perm_store {
        match Checker::new(perms.clone()).require(&doc_id, &user_id, Action::Delete) {
            Ok(()) => {}
            Err(AclError::AccessDenied) => {
                return (StatusCode::FORBIDDEN, "access denied").into_response();
            }
            Err(err) => {
                log::error!("permission check for {doc_id} failed: {err}");
                return internal_error();
            }
        }
    }

    // The live session must be gone before the record is removed.
    if let Err(err) = state.manager.close_session(&doc_id) {
        log::error!("closing session {doc_id} failed: {err}");
        return internal_error();
    }

    match state.store.delete_document(&doc_id) {
        Ok(()) => {
            log::info!("document {doc_id} deleted by {user_id}");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(StoreError::DocumentNotFound(_)) => {
            (StatusCode::NOT_FOUND, "document not found").into_response()
        }
        Err(err) => {
            log::error!("deleting document {doc_id} failed: {err}");
            internal_error()
        }
    }
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
}

/// Map a session error to a REST status.
fn session_error_response(err: SessionError) -> Response {
    match err {
        SessionError::Acl(AclError::AccessDenied) => {
            (StatusCode::FORBIDDEN, "access denied").into_response()
        }
        SessionError::Load(LoadError::Store(StoreError::DocumentNotFound(_)))
        | SessionError::Store(StoreError::DocumentNotFound(_)) => {
            (StatusCode::NOT_FOUND, "document not found").into_response()
        }
        err => {
            log::error!("request failed: {err}");
            internal_error()
        }
    }
}

async fn ws_handler(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(doc_id) = params.get("docId").filter(|id| !id.is_empty()).cloned() else {
        return (StatusCode::BAD_REQUEST, "docId query parameter is required").into_response();
    };

    ws.on_upgrade(move |socket| handle_connection(socket, state, user_id, doc_id))
}

/// Run one WebSocket connection: register with the hub, send the initial
/// state, then pump frames until the peer goes away.
async fn handle_connection(socket: WebSocket, state: AppState, user_id: String, doc_id: String) {
    let (mut sink, mut stream) = socket.split();
    let (client, mut outbound) = ClientHandle::new(&user_id);

    state.hub.register(client.clone());
    state.hub.subscribe(&client, &doc_id);
    log::info!(
        "client {} connected as {user_id} on document {doc_id}",
        client.id()
    );

    let Some(session) = connect_session(&state, &client, &user_id, &doc_id) else {
        // Flush the queued error frame, then drop the connection so the
        // client does not linger subscribed without a session.
        while let Ok(msg) = outbound.try_recv() {
            if let Ok(text) = msg.encode() {
                let _ = sink.send(Message::Text(text.into())).await;
            }
        }
        state.hub.unregister(&client);
        return;
    };

    // Single writer: every frame, including direct replies, goes through the
    // client's outbound queue so subscriber ordering matches assignment order.
    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&session, &client, &user_id, text.as_str());
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary/ping/pong frames are ignored
                    Some(Err(err)) => {
                        log::debug!("websocket error for client {}: {err}", client.id());
                        break;
                    }
                }
            }
            queued = outbound.recv() => {
                let Some(msg) = queued else { break };
                let Ok(text) = msg.encode() else { continue };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.hub.unregister(&client);
    log::info!("client {} disconnected from {doc_id}", client.id());
}

/// Open the session for this connection and queue the initial `state` frame.
/// On failure an `error` frame is queued and no session is returned; the
/// caller flushes the frame and closes the connection.
fn connect_session(
    state: &AppState,
    client: &ClientHandle,
    user_id: &str,
    doc_id: &str,
) -> Option<Arc<Session>> {
    let session = match state.manager.get_or_create(doc_id) {
        Ok(session) => session,
        Err(err) => {
            client.send(session_error_frame(&err));
            return None;
        }
    };

    match session.get_state(user_id) {
        Ok((content, revision)) => {
            client.send(WsMessage::state(doc_id, content, revision));
            Some(session)
        }
        Err(err) => {
            client.send(session_error_frame(&err));
            None
        }
    }
}

/// Dispatch one inbound frame.
fn handle_frame(session: &Arc<Session>, client: &ClientHandle, user_id: &str, text: &str) {
    let msg = match WsMessage::decode(text) {
        Ok(msg) => msg,
        Err(err) => {
            client.send(WsMessage::error(
                ERROR_CODE_INVALID_MESSAGE,
                format!("malformed message: {err}"),
            ));
            return;
        }
    };

    match msg {
        WsMessage::Operation(payload) => handle_operation(session, client, user_id, payload),
        WsMessage::Sync(_) => handle_sync(session, client, user_id),
        // Server-to-client types have no business arriving here.
        WsMessage::State(_) | WsMessage::Ack(_) | WsMessage::Broadcast(_) | WsMessage::Error(_) => {
            client.send(WsMessage::error(
                ERROR_CODE_INVALID_MESSAGE,
                "unexpected message type",
            ));
        }
    }
}

fn handle_operation(
    session: &Arc<Session>,
    client: &ClientHandle,
    user_id: &str,
    payload: OperationPayload,
) {
    let Some(op) = payload.to_operation(user_id) else {
        client.send(WsMessage::error(
            ERROR_CODE_INVALID_MESSAGE,
            "invalid operation type",
        ));
        return;
    };

    match session.apply_operation(Some(client.id()), user_id, op, payload.base_revision) {
        Ok(revision) => {
            client.send(WsMessage::ack(revision));
        }
        Err(err) => {
            client.send(session_error_frame(&err));
        }
    }
}

fn handle_sync(session: &Arc<Session>, client: &ClientHandle, user_id: &str) {
    match session.get_state(user_id) {
        Ok((content, revision)) => {
            client.send(WsMessage::state(session.doc_id(), content, revision));
        }
        Err(err) => {
            client.send(session_error_frame(&err));
        }
    }
}

/// Map a session error to a wire `error` frame.
fn session_error_frame(err: &SessionError) -> WsMessage {
    match err {
        SessionError::Acl(AclError::AccessDenied) => {
            WsMessage::error(ERROR_CODE_ACCESS_DENIED, "access denied")
        }
        SessionError::Queue(queue_err) => {
            WsMessage::error(ERROR_CODE_INVALID_MESSAGE, queue_err.to_string())
        }
        SessionError::Load(LoadError::Store(StoreError::DocumentNotFound(_))) => {
            WsMessage::error(ERROR_CODE_INVALID_MESSAGE, "document not found")
        }
        err => {
            log::error!("websocket request failed: {err}");
            WsMessage::error(ERROR_CODE_INTERNAL_ERROR, err.to_string())
        }
    }
}
