//! The client engine: id allocation, the pending-request table, batch
//! accumulation, and inbound response routing.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::channel::{ChannelManager, MessageChannel};
use crate::error::{ChannelError, ClientError, RpcError};
use crate::notification::JsonRpcNotification;
use crate::request::{JsonRpcRequest, RequestParams};
use crate::types::RequestId;

struct PendingRequest {
    method: String,
    tx: oneshot::Sender<Result<Value, ClientError>>,
}

struct BatchScope {
    depth: usize,
    buffer: Vec<Value>,
}

/// A JSON-RPC client bound to one duplex message channel.
#[derive(Clone)]
pub struct JsonRpcClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    manager: ChannelManager,
    pending: Mutex<HashMap<i64, PendingRequest>>,
    next_id: AtomicI64,
    batch: Mutex<Option<BatchScope>>,
}

impl JsonRpcClient {
    pub fn new(channel: MessageChannel) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                manager: ChannelManager::new(channel),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicI64::new(0),
                batch: Mutex::new(None),
            }),
        }
    }

    /// Send a request and return a future for the remote's answer.
    ///
    /// The request id is allocated and the message queued synchronously, so
    /// calls made inside [`with_batch`](Self::with_batch) land in the batch
    /// in call order. The future resolves with the `result` value or fails
    /// with the error response's [`RpcError`]; if the client closes first it
    /// fails with a state error instead.
    pub fn send_request(
        &self,
        method: impl Into<String>,
        params: impl Into<Option<RequestParams>>,
    ) -> ResponseFuture {
        let method = method.into();
        if self.is_closed() {
            return ResponseFuture::failed(ClientError::Closed);
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .unwrap()
            .insert(id, PendingRequest { method: method.clone(), tx });

        let request = JsonRpcRequest::new(RequestId::Number(id), method, params.into());
        self.inner.send_or_buffer(request.to_value());

        // A close racing the insert above would leave the slot dangling.
        if self.is_closed() {
            self.inner.fail_pending();
        }
        ResponseFuture::waiting(rx)
    }

    /// Send a notification. The remote never answers, by design.
    pub fn send_notification(
        &self,
        method: impl Into<String>,
        params: impl Into<Option<RequestParams>>,
    ) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        let notification = JsonRpcNotification::new(method.into(), params.into());
        self.inner.send_or_buffer(notification.to_value());
        Ok(())
    }

    /// Buffer every message sent inside `body` and flush them as one batch
    /// when the outermost scope exits. Nested calls flatten into the
    /// outermost buffer. Requests still resolve through their own futures.
    pub fn with_batch<T>(&self, body: impl FnOnce() -> T) -> T {
        {
            let mut batch = self.inner.batch.lock().unwrap();
            batch
                .get_or_insert_with(|| BatchScope {
                    depth: 0,
                    buffer: Vec::new(),
                })
                .depth += 1;
        }
        let _guard = BatchGuard {
            inner: self.inner.as_ref(),
        };
        body()
    }

    /// Route inbound responses until the channel closes. May be called at
    /// most once. Any request still pending when the channel closes fails
    /// with a state error.
    pub async fn listen(&self) -> Result<(), ChannelError> {
        let inner = self.inner.clone();
        let result = self
            .inner
            .manager
            .listen(move |value| inner.handle_response(value))
            .await;
        self.inner.fail_pending();
        result
    }

    /// Close the channel, fail all pending requests, and resolve `done`.
    /// Idempotent.
    pub async fn close(&self) -> Result<(), ChannelError> {
        self.inner.manager.close();
        self.inner.fail_pending();
        self.inner.manager.done().await
    }

    /// Resolves when the client has shut down.
    pub async fn done(&self) -> Result<(), ChannelError> {
        self.inner.manager.done().await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.manager.is_closed()
    }
}

impl ClientInner {
    fn send_or_buffer(&self, message: Value) {
        let mut batch = self.batch.lock().unwrap();
        match batch.as_mut() {
            Some(scope) => scope.buffer.push(message),
            None => self.manager.add(message),
        }
    }

    /// Route one inbound message; anything that does not correlate with a
    /// pending request is dropped.
    fn handle_response(&self, value: Value) {
        match value {
            Value::Array(entries) => {
                for entry in entries {
                    self.handle_response(entry);
                }
            }
            Value::Object(response) => {
                let outcome = if let Some(error) = response.get("error") {
                    let code = error.get("code").and_then(Value::as_i64);
                    let message = error.get("message").and_then(Value::as_str);
                    match (code, message) {
                        (Some(code), Some(message)) => Err(ClientError::Rpc(RpcError {
                            code,
                            message: message.to_string(),
                            data: error.get("data").cloned().unwrap_or(Value::Null),
                        })),
                        _ => {
                            debug!("dropping malformed error response");
                            return;
                        }
                    }
                } else if let Some(result) = response.get("result") {
                    Ok(result.clone())
                } else {
                    debug!("dropping message with neither result nor error");
                    return;
                };

                let Some(id) = response.get("id").and_then(Value::as_i64) else {
                    debug!("dropping response without a usable id");
                    return;
                };
                let Some(pending) = self.pending.lock().unwrap().remove(&id) else {
                    debug!(id, "dropping response with no pending request");
                    return;
                };
                let _ = pending.tx.send(outcome);
            }
            _ => debug!("dropping non-object inbound message"),
        }
    }

    fn fail_pending(&self) {
        let swept: Vec<PendingRequest> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain().map(|(_, request)| request).collect()
        };
        for request in swept {
            let _ = request
                .tx
                .send(Err(ClientError::ClosedPending(request.method)));
        }
    }
}

/// Decrements the batch depth when a `with_batch` scope exits (normally or
/// by panic); the outermost exit flushes.
struct BatchGuard<'a> {
    inner: &'a ClientInner,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        let flushed = {
            let mut batch = self.inner.batch.lock().unwrap();
            let exhausted = match batch.as_mut() {
                Some(scope) => {
                    scope.depth -= 1;
                    scope.depth == 0
                }
                None => false,
            };
            if exhausted {
                batch.take().map(|scope| scope.buffer)
            } else {
                None
            }
        };
        if let Some(buffer) = flushed {
            if !buffer.is_empty() {
                self.inner.manager.add(Value::Array(buffer));
            }
        }
    }
}

/// The eventual outcome of a [`JsonRpcClient::send_request`] call.
pub struct ResponseFuture {
    state: ResponseState,
}

enum ResponseState {
    Failed(Option<ClientError>),
    Waiting(oneshot::Receiver<Result<Value, ClientError>>),
}

impl ResponseFuture {
    fn failed(error: ClientError) -> Self {
        Self {
            state: ResponseState::Failed(Some(error)),
        }
    }

    fn waiting(rx: oneshot::Receiver<Result<Value, ClientError>>) -> Self {
        Self {
            state: ResponseState::Waiting(rx),
        }
    }
}

impl Future for ResponseFuture {
    type Output = Result<Value, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            ResponseState::Failed(error) => {
                Poll::Ready(Err(error.take().unwrap_or(ClientError::Closed)))
            }
            ResponseState::Waiting(rx) => Pin::new(rx).poll(cx).map(|received| match received {
                Ok(outcome) => outcome,
                Err(_) => Err(ClientError::Closed),
            }),
        }
    }
}
