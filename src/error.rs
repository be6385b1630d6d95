use std::error::Error as _;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::error_codes;

/// Boxed error type carried by [`HandlerError::Other`].
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// A JSON-RPC error value: the `error` member of an error response.
///
/// Handlers return this (wrapped in [`HandlerError::Rpc`]) to shape the exact
/// error response the remote receives, `code`, `message`, and `data` intact.
/// `data` is always present on the wire; an unset `data` serializes as null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// The remote does not define the requested method.
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("Unknown method \"{}\".", method),
        )
    }

    /// The request parameters fail handler or type validation.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_PARAMS, message)
    }

    /// The message is not a well-formed request. `data` carries the decoded
    /// value that failed validation.
    pub fn invalid_request(message: impl Into<String>, request: Value) -> Self {
        Self::new(error_codes::INVALID_REQUEST, message).with_data(json!({ "request": request }))
    }

    /// Inbound text was not valid JSON. `data` carries the original text.
    pub fn parse_error(message: impl Into<String>, request_text: &str) -> Self {
        Self::new(error_codes::PARSE_ERROR, message).with_data(json!({ "request": request_text }))
    }

    /// An uncaught handler failure. `data` carries the full string form and
    /// the stringified cause chain.
    pub fn server_error(message: impl Into<String>, full: &str, stack: &str) -> Self {
        Self::new(error_codes::SERVER_ERROR, message)
            .with_data(json!({ "full": full, "stack": stack }))
    }

    pub fn is_method_not_found(&self) -> bool {
        self.code == error_codes::METHOD_NOT_FOUND
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC Error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// Failure of the duplex channel an endpoint is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Channel closed")]
    Closed,
}

/// Errors surfaced to callers of the client engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    /// The remote answered with an error response.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The client shut down while this request was still pending.
    #[error("The client closed with request \"{0}\" pending")]
    ClosedPending(String),

    /// The request was submitted after the client closed.
    #[error("The client is closed")]
    Closed,
}

/// Failure returned by a registered handler.
///
/// An [`RpcError`] travels to the remote verbatim. Anything else becomes a
/// SERVER_ERROR response and is also delivered to the server's
/// unhandled-error sink when one is configured.
#[derive(Debug)]
pub enum HandlerError {
    Rpc(RpcError),
    Other(BoxedError),
}

impl HandlerError {
    pub fn other(err: impl Into<BoxedError>) -> Self {
        HandlerError::Other(err.into())
    }
}

impl From<RpcError> for HandlerError {
    fn from(err: RpcError) -> Self {
        HandlerError::Rpc(err)
    }
}

/// Result type returned by registered handlers.
pub type HandlerResult = Result<Value, HandlerError>;

/// Strip a leading `SomethingError: ` style prefix from an error's string
/// form. Cosmetic only; the unstripped form still travels in `data.full`.
pub(crate) fn error_message(err: &BoxedError) -> String {
    let rendered = err.to_string();
    if let Some((head, rest)) = rendered.split_once(": ") {
        let looks_like_type_name = !head.is_empty()
            && !head.contains(char::is_whitespace)
            && head.chars().next().is_some_and(char::is_uppercase);
        if looks_like_type_name && !rest.is_empty() {
            return rest.to_string();
        }
    }
    rendered
}

/// Render an error and its `source` chain as a single string, outermost
/// first.
pub(crate) fn error_chain(err: &BoxedError) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
