//! The server engine: method registry, fallback chain, request validation,
//! dispatch, and batch handling.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::channel::{ChannelManager, MessageChannel};
use crate::error::{
    error_chain, error_message, BoxedError, ChannelError, HandlerError, HandlerResult, RpcError,
};
use crate::params::Params;
use crate::response::JsonRpcError;
use crate::types::RequestId;
use crate::JSONRPC_VERSION;

/// Sink for handler failures that are not [`RpcError`]s: receives the error
/// and the stringified cause chain.
pub type UnhandledErrorSink = Arc<dyn Fn(&BoxedError, &str) + Send + Sync>;

/// A registered method handler taking a parameters view.
///
/// Implemented for any `Fn(Params) -> Future<Output = HandlerResult>`
/// closure, so plain async closures register directly.
#[async_trait]
pub trait RpcMethod: Send + Sync {
    async fn call(&self, params: Params) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> RpcMethod for F
where
    F: Fn(Params) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn call(&self, params: Params) -> HandlerResult {
        (self)(params).await
    }
}

/// A registered method handler that accepts no parameters. A request that
/// carries `params` for such a method is answered with INVALID_PARAMS.
#[async_trait]
pub trait RpcZeroArgMethod: Send + Sync {
    async fn call(&self) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> RpcZeroArgMethod for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn call(&self) -> HandlerResult {
        (self)().await
    }
}

#[derive(Clone)]
enum RegisteredMethod {
    Handler(Arc<dyn RpcMethod>),
    ZeroArg(Arc<dyn RpcZeroArgMethod>),
}

/// A validated single request, ready for dispatch.
///
/// `id` holds the raw id value when the request carried the key at all;
/// replies echo it (null included), while ids of illegal type normalize to
/// null on the error path.
struct ValidRequest {
    method: String,
    params: Option<Value>,
    id: Option<Value>,
}

/// Builder for a [`JsonRpcServer`] (and the server half of a peer).
pub struct ServerBuilder {
    channel: MessageChannel,
    strict_protocol_checks: bool,
    on_unhandled_error: Option<UnhandledErrorSink>,
}

impl ServerBuilder {
    /// Enforce the presence of `jsonrpc: "2.0"` on every request (default
    /// true). When relaxed, a missing `jsonrpc` key is tolerated; a wrong
    /// value is still rejected.
    pub fn strict_protocol_checks(mut self, strict: bool) -> Self {
        self.strict_protocol_checks = strict;
        self
    }

    /// Receive handler failures that are routed to the caller rather than
    /// the remote. Without a sink such failures are logged and swallowed.
    pub fn on_unhandled_error<F>(mut self, sink: F) -> Self
    where
        F: Fn(&BoxedError, &str) + Send + Sync + 'static,
    {
        self.on_unhandled_error = Some(Arc::new(sink));
        self
    }

    pub fn build(self) -> JsonRpcServer {
        JsonRpcServer {
            inner: Arc::new(ServerInner {
                manager: ChannelManager::new(self.channel),
                methods: RwLock::new(HashMap::new()),
                fallbacks: RwLock::new(Vec::new()),
                strict_protocol_checks: self.strict_protocol_checks,
                on_unhandled_error: self.on_unhandled_error,
            }),
        }
    }
}

/// A JSON-RPC server bound to one duplex message channel.
#[derive(Clone)]
pub struct JsonRpcServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    manager: ChannelManager,
    methods: RwLock<HashMap<String, RegisteredMethod>>,
    fallbacks: RwLock<Vec<Arc<dyn RpcMethod>>>,
    strict_protocol_checks: bool,
    on_unhandled_error: Option<UnhandledErrorSink>,
}

impl JsonRpcServer {
    pub fn new(channel: MessageChannel) -> Self {
        Self::builder(channel).build()
    }

    pub fn builder(channel: MessageChannel) -> ServerBuilder {
        ServerBuilder {
            channel,
            strict_protocol_checks: true,
            on_unhandled_error: None,
        }
    }

    /// Register a handler for `method`. Registration is permitted before or
    /// during `listen`; registering the same name twice panics.
    pub fn register_method(&self, method: impl Into<String>, handler: impl RpcMethod + 'static) {
        self.inner
            .insert(method.into(), RegisteredMethod::Handler(Arc::new(handler)));
    }

    /// Register a handler for `method` that accepts no parameters.
    pub fn register_zero_arg_method(
        &self,
        method: impl Into<String>,
        handler: impl RpcZeroArgMethod + 'static,
    ) {
        self.inner
            .insert(method.into(), RegisteredMethod::ZeroArg(Arc::new(handler)));
    }

    /// Register a fallback, tried in registration order when no named method
    /// matches. A fallback declines by returning a METHOD_NOT_FOUND error.
    pub fn register_fallback(&self, handler: impl RpcMethod + 'static) {
        self.inner
            .fallbacks
            .write()
            .unwrap()
            .push(Arc::new(handler));
    }

    /// Process inbound requests until the channel closes. May be called at
    /// most once.
    pub async fn listen(&self) -> Result<(), ChannelError> {
        let inner = self.inner.clone();
        self.inner
            .manager
            .listen(move |value| {
                let inner = inner.clone();
                tokio::spawn(async move {
                    inner.handle_message(value).await;
                });
            })
            .await
    }

    /// Close the channel and resolve `done`. Idempotent. In-flight handlers
    /// run to completion but their responses are suppressed.
    pub async fn close(&self) -> Result<(), ChannelError> {
        self.inner.manager.close();
        self.inner.manager.done().await
    }

    /// Resolves when the server has shut down.
    pub async fn done(&self) -> Result<(), ChannelError> {
        self.inner.manager.done().await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.manager.is_closed()
    }
}

impl ServerInner {
    fn insert(&self, method: String, handler: RegisteredMethod) {
        let mut methods = self.methods.write().unwrap();
        assert!(
            !methods.contains_key(&method),
            "method \"{}\" is already registered",
            method
        );
        methods.insert(method, handler);
    }

    async fn handle_message(&self, value: Value) {
        let reply = match value {
            Value::Array(entries) => self.handle_batch(entries).await,
            single => self.handle_single(single).await,
        };
        if let Some(reply) = reply {
            if self.manager.is_closed() {
                debug!("discarding response: server closed");
                return;
            }
            self.manager.add(reply);
        }
    }

    async fn handle_batch(&self, entries: Vec<Value>) -> Option<Value> {
        if entries.is_empty() {
            let error = RpcError::invalid_request(
                "A batch must contain at least one request.",
                Value::Array(Vec::new()),
            );
            return Some(JsonRpcError::new(None, error).to_value());
        }
        let replies: Vec<Value> = join_all(entries.into_iter().map(|entry| self.handle_single(entry)))
            .await
            .into_iter()
            .flatten()
            .collect();
        if replies.is_empty() {
            // every entry was a notification
            None
        } else {
            Some(Value::Array(replies))
        }
    }

    /// Handle one request or notification; `None` means nothing is sent
    /// back.
    async fn handle_single(&self, value: Value) -> Option<Value> {
        let request = match self.validate(value) {
            Ok(request) => request,
            Err(reply) => return Some(reply),
        };
        debug!(method = %request.method, "dispatching request");
        let outcome = self.dispatch(&request.method, request.params).await;

        let Some(id) = request.id else {
            // A notification never produces a response, but local
            // observability still sees uncaught failures.
            if let Err(HandlerError::Other(err)) = outcome {
                self.deliver_unhandled(&err);
            }
            return None;
        };

        let reply = match outcome {
            Ok(result) => serde_json::json!({
                "jsonrpc": JSONRPC_VERSION,
                "result": result,
                "id": id,
            }),
            Err(HandlerError::Rpc(error)) => {
                JsonRpcError::new(RequestId::from_value(&id), error).to_value()
            }
            Err(HandlerError::Other(err)) => {
                let stack = self.deliver_unhandled(&err);
                let error = RpcError::server_error(error_message(&err), &err.to_string(), &stack);
                JsonRpcError::new(RequestId::from_value(&id), error).to_value()
            }
        };
        Some(reply)
    }

    /// Forward an uncaught handler failure to the configured sink, or log
    /// it. Returns the stringified cause chain.
    fn deliver_unhandled(&self, err: &BoxedError) -> String {
        let stack = error_chain(err);
        match &self.on_unhandled_error {
            Some(sink) => sink(err, &stack),
            None => warn!(error = %stack, "unhandled error in handler"),
        }
        stack
    }

    fn validate(&self, value: Value) -> Result<ValidRequest, Value> {
        let Some(request) = value.as_object() else {
            return Err(Self::validation_reply(
                &value,
                "Request must be an Array or an Object.".to_string(),
            ));
        };

        match request.get("jsonrpc") {
            Some(Value::String(version)) if version == JSONRPC_VERSION => {}
            Some(version) => {
                return Err(Self::validation_reply(
                    &value,
                    format!("Invalid JSON-RPC version {}, expected \"2.0\".", version),
                ))
            }
            None if self.strict_protocol_checks => {
                return Err(Self::validation_reply(
                    &value,
                    "Request must contain a \"jsonrpc\" key.".to_string(),
                ))
            }
            None => {}
        }

        let method = match request.get("method") {
            Some(Value::String(method)) => method.clone(),
            Some(other) => {
                return Err(Self::validation_reply(
                    &value,
                    format!("Request method must be a string, but was {}.", other),
                ))
            }
            None => {
                return Err(Self::validation_reply(
                    &value,
                    "Request must contain a \"method\" key with a string value.".to_string(),
                ))
            }
        };

        let params = match request.get("params") {
            None => None,
            Some(params @ (Value::Array(_) | Value::Object(_))) => Some(params.clone()),
            Some(other) => {
                return Err(Self::validation_reply(
                    &value,
                    format!(
                        "Request params must be an Array or an Object, but was {}.",
                        other
                    ),
                ))
            }
        };

        let id = match request.get("id") {
            None => None,
            Some(id) if id.is_string() || id.is_number() || id.is_null() => Some(id.clone()),
            Some(other) => {
                return Err(Self::validation_reply(
                    &value,
                    format!(
                        "Request id must be a string, number, or null, but was {}.",
                        other
                    ),
                ))
            }
        };

        Ok(ValidRequest { method, params, id })
    }

    /// Build an INVALID_REQUEST reply echoing the request's id when it has a
    /// legal one.
    fn validation_reply(request: &Value, message: String) -> Value {
        let id = request.get("id").and_then(RequestId::from_value);
        JsonRpcError::new(id, RpcError::invalid_request(message, request.clone())).to_value()
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> HandlerResult {
        let registered = self.methods.read().unwrap().get(method).cloned();
        match registered {
            Some(RegisteredMethod::Handler(handler)) => {
                handler.call(Params::new(method, params)).await
            }
            Some(RegisteredMethod::ZeroArg(handler)) => {
                if params.is_some() {
                    return Err(RpcError::invalid_params(format!(
                        "No parameters are allowed for method \"{}\".",
                        method
                    ))
                    .into());
                }
                handler.call().await
            }
            None => {
                let fallbacks: Vec<_> = self.fallbacks.read().unwrap().clone();
                for fallback in fallbacks {
                    match fallback.call(Params::new(method, params.clone())).await {
                        Err(HandlerError::Rpc(error)) if error.is_method_not_found() => continue,
                        outcome => return outcome,
                    }
                }
                Err(RpcError::method_not_found(method).into())
            }
        }
    }
}
