//! JSON wire protocol for the WebSocket surface.
//!
//! Every frame is an envelope `{"type": ..., "payload": ...}`:
//!
//! ```text
//! client → server:  operation  {docId, baseRevision, opType, position, char?}
//!                   sync       {docId}
//! server → client:  state      {docId, content, revision}
//!                   ack        {revision}
//!                   broadcast  {docId, revision, opType, position, char?, userId}
//!                   error      {code, message}
//! ```
//!
//! `opType` is `0` for insert and `1` for delete.

use serde::{Deserialize, Serialize};

use crate::ot::{OpKind, Operation, SequencedOperation};

/// Error codes carried by [`ErrorPayload`].
pub const ERROR_CODE_ACCESS_DENIED: &str = "access_denied";
pub const ERROR_CODE_INVALID_MESSAGE: &str = "invalid_message";
pub const ERROR_CODE_INTERNAL_ERROR: &str = "internal_error";

/// Wire value for an insert operation.
pub const OP_TYPE_INSERT: u8 = 0;
/// Wire value for a delete operation.
pub const OP_TYPE_DELETE: u8 = 1;

/// Envelope for all WebSocket communication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum WsMessage {
    Operation(OperationPayload),
    Sync(SyncPayload),
    State(StatePayload),
    Ack(AckPayload),
    Broadcast(BroadcastPayload),
    Error(ErrorPayload),
}

/// A client-submitted edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationPayload {
    pub doc_id: String,
    pub base_revision: u64,
    pub op_type: u8,
    pub position: i64,
    #[serde(rename = "char", default, skip_serializing_if = "Option::is_none")]
    pub ch: Option<String>,
}

/// A client request for the current document state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    pub doc_id: String,
}

/// Full document state, sent on connect and on `sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePayload {
    pub doc_id: String,
    pub content: String,
    pub revision: u64,
}

/// Confirmation that a submitted operation was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    pub revision: u64,
}

/// An applied operation pushed to the other subscribers of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastPayload {
    pub doc_id: String,
    pub revision: u64,
    pub op_type: u8,
    pub position: i64,
    #[serde(rename = "char", default, skip_serializing_if = "Option::is_none")]
    pub ch: Option<String>,
    pub user_id: String,
}

/// An error reported to one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl WsMessage {
    /// Build a `state` message.
    pub fn state(doc_id: impl Into<String>, content: impl Into<String>, revision: u64) -> Self {
        WsMessage::State(StatePayload {
            doc_id: doc_id.into(),
            content: content.into(),
            revision,
        })
    }

    /// Build an `ack` message.
    pub fn ack(revision: u64) -> Self {
        WsMessage::Ack(AckPayload { revision })
    }

    /// Build a `broadcast` message for an applied operation.
    pub fn broadcast(doc_id: impl Into<String>, seq_op: &SequencedOperation) -> Self {
        let op = &seq_op.operation;
        WsMessage::Broadcast(BroadcastPayload {
            doc_id: doc_id.into(),
            revision: seq_op.revision,
            op_type: op_type_code(op.kind),
            position: op.position,
            ch: op.is_insert().then(|| op.ch.clone()),
            user_id: op.user_id.clone(),
        })
    }

    /// Build an `error` message.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        WsMessage::Error(ErrorPayload {
            code: code.to_string(),
            message: message.into(),
        })
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a frame received from the wire.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Wire code for an operation kind.
pub fn op_type_code(kind: OpKind) -> u8 {
    match kind {
        OpKind::Insert => OP_TYPE_INSERT,
        OpKind::Delete => OP_TYPE_DELETE,
    }
}

impl OperationPayload {
    /// Convert to a core operation attributed to `user_id`.
    ///
    /// Returns `None` when `opType` is not a known code; the caller reports
    /// `invalid_message`.
    pub fn to_operation(&self, user_id: &str) -> Option<Operation> {
        match self.op_type {
            OP_TYPE_INSERT => Some(Operation::insert(
                self.ch.clone().unwrap_or_default(),
                self.position,
                user_id,
            )),
            OP_TYPE_DELETE => Some(Operation::delete(self.position, user_id)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let msg = WsMessage::ack(7);
        let json: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "ack");
        assert_eq!(json["payload"]["revision"], 7);
    }

    #[test]
    fn test_operation_payload_roundtrip() {
        let text = r#"{"type":"operation","payload":{"docId":"d1","baseRevision":3,"opType":0,"position":2,"char":"x"}}"#;
        let msg = WsMessage::decode(text).unwrap();
        match &msg {
            WsMessage::Operation(payload) => {
                assert_eq!(payload.doc_id, "d1");
                assert_eq!(payload.base_revision, 3);
                assert_eq!(payload.op_type, OP_TYPE_INSERT);
                assert_eq!(payload.position, 2);
                assert_eq!(payload.ch.as_deref(), Some("x"));
            }
            other => panic!("expected operation, got {other:?}"),
        }

        let reencoded = msg.encode().unwrap();
        assert_eq!(WsMessage::decode(&reencoded).unwrap(), msg);
    }

    #[test]
    fn test_delete_payload_omits_char() {
        let msg = WsMessage::broadcast(
            "d1",
            &SequencedOperation {
                operation: Operation::delete(4, "bob"),
                revision: 9,
            },
        );
        let text = msg.encode().unwrap();
        assert!(!text.contains("char"));

        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["payload"]["opType"], 1);
        assert_eq!(json["payload"]["userId"], "bob");
        assert_eq!(json["payload"]["revision"], 9);
    }

    #[test]
    fn test_sync_payload() {
        let msg = WsMessage::decode(r#"{"type":"sync","payload":{"docId":"notes"}}"#).unwrap();
        assert_eq!(msg, WsMessage::Sync(SyncPayload { doc_id: "notes".into() }));
    }

    #[test]
    fn test_to_operation() {
        let insert = OperationPayload {
            doc_id: "d".into(),
            base_revision: 0,
            op_type: OP_TYPE_INSERT,
            position: 1,
            ch: Some("a".into()),
        };
        let op = insert.to_operation("alice").unwrap();
        assert!(op.is_insert());
        assert_eq!(op.ch, "a");
        assert_eq!(op.user_id, "alice");

        let delete = OperationPayload {
            op_type: OP_TYPE_DELETE,
            ch: None,
            ..insert.clone()
        };
        assert!(delete.to_operation("alice").unwrap().is_delete());

        let bogus = OperationPayload {
            op_type: 7,
            ..insert
        };
        assert!(bogus.to_operation("alice").is_none());
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(WsMessage::decode("{not json").is_err());
        assert!(WsMessage::decode(r#"{"type":"bogus","payload":{}}"#).is_err());
    }

    #[test]
    fn test_error_message() {
        let msg = WsMessage::error(ERROR_CODE_ACCESS_DENIED, "write access denied");
        let json: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["payload"]["code"], "access_denied");
    }
}
