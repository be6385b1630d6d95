use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::request::RequestParams;
use crate::types::JsonRpcVersion;
use crate::JSONRPC_VERSION;

/// A JSON-RPC notification (request without an id).
///
/// No response is ever produced for a notification, even when handling fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<RequestParams>,
}

impl JsonRpcNotification {
    pub fn new(method: String, params: Option<RequestParams>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            method,
            params,
        }
    }

    /// Create a new notification with no parameters
    pub fn new_no_params(method: String) -> Self {
        Self::new(method, None)
    }

    /// Render as the wire-level JSON value.
    pub fn to_value(&self) -> Value {
        let mut value = json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": &self.method,
        });
        if let Some(params) = &self.params {
            value["params"] = params.to_value();
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{from_str, to_string};

    #[test]
    fn test_notification_serialization() {
        let notification = JsonRpcNotification::new_no_params("test_notification".to_string());

        let json_str = to_string(&notification).unwrap();
        let parsed: JsonRpcNotification = from_str(&json_str).unwrap();

        assert_eq!(parsed.method, "test_notification");
        assert!(parsed.params.is_none());
    }

    #[test]
    fn test_notification_json_format() {
        let notification = JsonRpcNotification::new_no_params("ping".to_string());
        let json_str = to_string(&notification).unwrap();

        // Must not contain an "id" field
        assert!(!json_str.contains("\"id\""));
        assert!(json_str.contains("\"jsonrpc\":\"2.0\""));
        assert!(json_str.contains("\"method\":\"ping\""));
    }
}
