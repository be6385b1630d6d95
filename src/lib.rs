//! # JSON-RPC 2.0 Endpoints
//!
//! A transport-agnostic JSON-RPC 2.0 implementation exposing three composable
//! endpoint roles over a caller-supplied duplex message channel.
//!
//! ## Features
//! - **JSON-RPC 2.0 Compliance**: Full specification support with proper error handling
//! - **Three Endpoint Roles**: [`JsonRpcClient`], [`JsonRpcServer`], and [`JsonRpcPeer`]
//!   (client and server composed on one channel)
//! - **Transport Agnostic**: Endpoints bind to a [`MessageChannel`] of decoded JSON
//!   values; TCP, WebSocket, pipes, and in-memory channels all plug in the same way
//! - **Batch Semantics**: Concurrent batch dispatch on the server, scoped batch
//!   accumulation on the client
//! - **Orderly Shutdown**: Idempotent `close`, a `done` future per endpoint, and no
//!   output after shutdown starts
//!
//! ## Architecture
//!
//! ```text
//! channel ──▶ channel manager ──▶ (peer router) ──▶ server engine ──▶ handler
//!                   ▲                          └──▶ client engine ──▶ pending slot
//!                   └──────────────── responses ◀──┘
//! ```
//!
//! Handlers return domain values or [`RpcError`]; the dispatcher owns the
//! protocol conversion:
//!
//! ```rust,ignore
//! let server = JsonRpcServer::new(channel);
//! server.register_method("divide", |params: Params| async move {
//!     let dividend = params.get("dividend").as_f64()?;
//!     let divisor = params.get("divisor").as_f64()?;
//!     if divisor == 0.0 {
//!         return Err(RpcError::new(1, "Cannot divide by zero.").into());
//!     }
//!     Ok(json!(dividend / divisor))
//! });
//! server.listen().await?;
//! ```

pub mod channel;
pub mod client;
pub mod codec;
pub mod error;
pub mod notification;
pub mod params;
pub mod peer;
pub mod prelude;
pub mod request;
pub mod response;
pub mod server;
pub mod types;

// Re-export main types
pub use channel::MessageChannel;
pub use client::{JsonRpcClient, ResponseFuture};
pub use error::{BoxedError, ChannelError, ClientError, HandlerError, HandlerResult, RpcError};
pub use notification::JsonRpcNotification;
pub use params::{Param, Params};
pub use peer::{JsonRpcPeer, PeerBuilder};
pub use request::{JsonRpcRequest, RequestParams};
pub use response::{JsonRpcError, JsonRpcMessage, JsonRpcResponse};
pub use server::{JsonRpcServer, RpcMethod, RpcZeroArgMethod, ServerBuilder};
pub use types::{JsonRpcVersion, RequestId};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    /// Uncaught handler failure.
    pub const SERVER_ERROR: i64 = -32000;
}
