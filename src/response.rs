use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::RpcError;
use crate::notification::JsonRpcNotification;
use crate::request::JsonRpcRequest;
use crate::types::{JsonRpcVersion, RequestId};
use crate::JSONRPC_VERSION;

/// A successful JSON-RPC response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub id: RequestId,
    pub result: Value,
}

impl JsonRpcResponse {
    pub fn new(id: RequestId, result: Value) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            result,
        }
    }

    /// Render as the wire-level JSON value. The `result` member is emitted
    /// even when null.
    pub fn to_value(&self) -> Value {
        json!({
            "jsonrpc": JSONRPC_VERSION,
            "result": &self.result,
            "id": &self.id,
        })
    }
}

/// A JSON-RPC error response.
///
/// The id echoes the failed request's id, or is null when the request never
/// carried a usable one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub id: Option<RequestId>,
    pub error: RpcError,
}

impl JsonRpcError {
    pub fn new(id: Option<RequestId>, error: RpcError) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            error,
        }
    }

    /// Render as the wire-level JSON value. Both `id` and `error.data` are
    /// emitted even when null.
    pub fn to_value(&self) -> Value {
        json!({
            "jsonrpc": JSONRPC_VERSION,
            "error": {
                "code": self.error.code,
                "message": &self.error.message,
                "data": &self.error.data,
            },
            "id": &self.id,
        })
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for JsonRpcError {}

/// Union type covering every JSON-RPC message this endpoint speaks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
    Error(JsonRpcError),
    /// A non-empty sequence of messages framed as one unit; never nested.
    Batch(Vec<JsonRpcMessage>),
}

impl JsonRpcMessage {
    /// Check if this is an error response
    pub fn is_error(&self) -> bool {
        matches!(self, JsonRpcMessage::Error(_))
    }

    /// Get the request ID, if the message carries one
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            JsonRpcMessage::Request(req) => Some(&req.id),
            JsonRpcMessage::Notification(_) => None,
            JsonRpcMessage::Response(resp) => Some(&resp.id),
            JsonRpcMessage::Error(err) => err.id.as_ref(),
            JsonRpcMessage::Batch(_) => None,
        }
    }

    /// Render as the wire-level JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            JsonRpcMessage::Request(req) => req.to_value(),
            JsonRpcMessage::Notification(notif) => notif.to_value(),
            JsonRpcMessage::Response(resp) => resp.to_value(),
            JsonRpcMessage::Error(err) => err.to_value(),
            JsonRpcMessage::Batch(entries) => {
                Value::Array(entries.iter().map(JsonRpcMessage::to_value).collect())
            }
        }
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(request: JsonRpcRequest) -> Self {
        Self::Request(request)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(notification: JsonRpcNotification) -> Self {
        Self::Notification(notification)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(response: JsonRpcResponse) -> Self {
        Self::Response(response)
    }
}

impl From<JsonRpcError> for JsonRpcMessage {
    fn from(error: JsonRpcError) -> Self {
        Self::Error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{from_str, to_string};

    #[test]
    fn test_response_serialization() {
        let response = JsonRpcResponse::new(RequestId::Number(1), json!({"result": "success"}));

        let json_str = to_string(&response).unwrap();
        let parsed: JsonRpcResponse = from_str(&json_str).unwrap();

        assert_eq!(parsed.id, RequestId::Number(1));
        assert_eq!(parsed.result, json!({"result": "success"}));
    }

    #[test]
    fn test_error_response_wire_shape() {
        let error = JsonRpcError::new(
            Some(RequestId::Number(2)),
            RpcError::new(1, "Cannot divide by zero."),
        );
        assert_eq!(
            error.to_value(),
            json!({
                "jsonrpc": "2.0",
                "error": {"code": 1, "message": "Cannot divide by zero.", "data": null},
                "id": 2,
            })
        );
    }

    #[test]
    fn test_null_id_error_response() {
        let error = JsonRpcError::new(None, RpcError::new(-32600, "nope"));
        let value = error.to_value();
        assert_eq!(value["id"], Value::Null);
    }

    #[test]
    fn test_message_classification() {
        let request: JsonRpcMessage =
            from_str(r#"{"jsonrpc":"2.0","method":"foo","id":0}"#).unwrap();
        assert!(matches!(request, JsonRpcMessage::Request(_)));

        let notification: JsonRpcMessage =
            from_str(r#"{"jsonrpc":"2.0","method":"foo"}"#).unwrap();
        assert!(matches!(notification, JsonRpcMessage::Notification(_)));

        let response: JsonRpcMessage =
            from_str(r#"{"jsonrpc":"2.0","result":"qux","id":0}"#).unwrap();
        assert!(matches!(response, JsonRpcMessage::Response(_)));

        let error: JsonRpcMessage = from_str(
            r#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"nope"},"id":null}"#,
        )
        .unwrap();
        assert!(error.is_error());

        let batch: JsonRpcMessage =
            from_str(r#"[{"jsonrpc":"2.0","method":"foo","id":0}]"#).unwrap();
        assert!(matches!(batch, JsonRpcMessage::Batch(entries) if entries.len() == 1));
    }

    #[test]
    fn test_round_trip() {
        let message = JsonRpcMessage::Batch(vec![
            JsonRpcRequest::new_no_params(RequestId::Number(0), "foo".to_string()).into(),
            JsonRpcNotification::new_no_params("tick".to_string()).into(),
        ]);
        let decoded: JsonRpcMessage = from_str(&to_string(&message).unwrap()).unwrap();
        assert_eq!(decoded, message);
    }
}
