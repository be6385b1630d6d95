//! # Endpoint Prelude
//!
//! Convenient re-exports of the most commonly used types.
//!
//! ```rust
//! use jsonrpc_endpoint::prelude::*;
//! ```

// Endpoints and their building blocks
pub use crate::channel::MessageChannel;
pub use crate::client::{JsonRpcClient, ResponseFuture};
pub use crate::peer::{JsonRpcPeer, PeerBuilder};
pub use crate::server::{JsonRpcServer, RpcMethod, RpcZeroArgMethod, ServerBuilder};

// Message model
pub use crate::notification::JsonRpcNotification;
pub use crate::request::{JsonRpcRequest, RequestParams};
pub use crate::response::{JsonRpcError, JsonRpcMessage, JsonRpcResponse};
pub use crate::types::{JsonRpcVersion, RequestId};

// Parameters and errors
pub use crate::error::{ChannelError, ClientError, HandlerError, HandlerResult, RpcError};
pub use crate::params::{Param, Params};

// Standard error codes
pub use crate::error_codes::*;
