//! JSON text framing: the text ⇄ decoded-value stage.
//!
//! Structural validation of decoded values belongs to the server engine; the
//! codec's only protocol duty is turning undecodable text into a ready-made
//! PARSE_ERROR response instead of a stream error.

use serde_json::Value;

use crate::error::{ChannelError, RpcError};
use crate::response::JsonRpcError;

/// Decode one frame of JSON text into a value.
///
/// On failure the returned error response carries the original text under
/// `data.request` and must be written back to the remote.
pub fn decode_text(text: &str) -> Result<Value, JsonRpcError> {
    serde_json::from_str(text).map_err(|err| {
        JsonRpcError::new(
            None,
            RpcError::parse_error(format!("Invalid JSON: {}", err), text),
        )
    })
}

/// Encode one decoded value as a frame of compact JSON text.
pub fn encode_value(value: &Value) -> Result<String, ChannelError> {
    serde_json::to_string(value).map_err(|err| ChannelError::Transport(err.to_string()))
}
