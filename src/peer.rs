//! The peer composer: a client and a server sharing one channel.
//!
//! Inbound traffic is demultiplexed by shape: anything response-shaped goes
//! to the co-hosted client, everything else to the co-hosted server. Both
//! engines write through one shared outbound sink.

use std::sync::{Arc, Mutex};

use futures::channel::mpsc as futures_mpsc;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tracing::debug;

use crate::channel::{ChannelManager, MessageChannel};
use crate::client::{JsonRpcClient, ResponseFuture};
use crate::error::{BoxedError, ChannelError, ClientError};
use crate::request::RequestParams;
use crate::server::{JsonRpcServer, RpcMethod, RpcZeroArgMethod};

/// Builder for a [`JsonRpcPeer`]; the options configure the server half.
pub struct PeerBuilder {
    channel: MessageChannel,
    strict_protocol_checks: bool,
    on_unhandled_error: Option<Box<dyn Fn(&BoxedError, &str) + Send + Sync>>,
}

impl PeerBuilder {
    /// See [`ServerBuilder::strict_protocol_checks`](crate::ServerBuilder::strict_protocol_checks).
    pub fn strict_protocol_checks(mut self, strict: bool) -> Self {
        self.strict_protocol_checks = strict;
        self
    }

    /// See [`ServerBuilder::on_unhandled_error`](crate::ServerBuilder::on_unhandled_error).
    pub fn on_unhandled_error<F>(mut self, sink: F) -> Self
    where
        F: Fn(&BoxedError, &str) + Send + Sync + 'static,
    {
        self.on_unhandled_error = Some(Box::new(sink));
        self
    }

    pub fn build(self) -> JsonRpcPeer {
        let manager = ChannelManager::new(self.channel);

        // Both inner engines share one outbound queue; the peer's listen
        // loop forwards it into the real sink, so writes stay serialized.
        let (shared_tx, shared_rx) = futures_mpsc::unbounded::<Value>();
        let (server_tx, server_rx) = futures_mpsc::unbounded::<Value>();
        let (client_tx, client_rx) = futures_mpsc::unbounded::<Value>();

        let server_channel = MessageChannel::from_parts(
            server_rx.map(Ok),
            shared_tx.clone().sink_map_err(|_| ChannelError::Closed),
        );
        let client_channel = MessageChannel::from_parts(
            client_rx.map(Ok),
            shared_tx.sink_map_err(|_| ChannelError::Closed),
        );

        let mut server = JsonRpcServer::builder(server_channel)
            .strict_protocol_checks(self.strict_protocol_checks);
        if let Some(sink) = self.on_unhandled_error {
            server = server.on_unhandled_error(move |err, stack| sink(err, stack));
        }

        JsonRpcPeer {
            inner: Arc::new(PeerInner {
                manager,
                server: server.build(),
                client: JsonRpcClient::new(client_channel),
                conduits: Mutex::new(Some(Conduits {
                    server_tx,
                    client_tx,
                    shared_rx,
                })),
            }),
        }
    }
}

struct Conduits {
    server_tx: futures_mpsc::UnboundedSender<Value>,
    client_tx: futures_mpsc::UnboundedSender<Value>,
    shared_rx: futures_mpsc::UnboundedReceiver<Value>,
}

/// A bidirectional JSON-RPC endpoint: simultaneously client and server on
/// the same channel.
#[derive(Clone)]
pub struct JsonRpcPeer {
    inner: Arc<PeerInner>,
}

struct PeerInner {
    manager: ChannelManager,
    server: JsonRpcServer,
    client: JsonRpcClient,
    conduits: Mutex<Option<Conduits>>,
}

impl JsonRpcPeer {
    pub fn new(channel: MessageChannel) -> Self {
        Self::builder(channel).build()
    }

    pub fn builder(channel: MessageChannel) -> PeerBuilder {
        PeerBuilder {
            channel,
            strict_protocol_checks: true,
            on_unhandled_error: None,
        }
    }

    /// See [`JsonRpcServer::register_method`].
    pub fn register_method(&self, method: impl Into<String>, handler: impl RpcMethod + 'static) {
        self.inner.server.register_method(method, handler);
    }

    /// See [`JsonRpcServer::register_zero_arg_method`].
    pub fn register_zero_arg_method(
        &self,
        method: impl Into<String>,
        handler: impl RpcZeroArgMethod + 'static,
    ) {
        self.inner.server.register_zero_arg_method(method, handler);
    }

    /// See [`JsonRpcServer::register_fallback`].
    pub fn register_fallback(&self, handler: impl RpcMethod + 'static) {
        self.inner.server.register_fallback(handler);
    }

    /// See [`JsonRpcClient::send_request`].
    pub fn send_request(
        &self,
        method: impl Into<String>,
        params: impl Into<Option<RequestParams>>,
    ) -> ResponseFuture {
        self.inner.client.send_request(method, params)
    }

    /// See [`JsonRpcClient::send_notification`].
    pub fn send_notification(
        &self,
        method: impl Into<String>,
        params: impl Into<Option<RequestParams>>,
    ) -> Result<(), ClientError> {
        self.inner.client.send_notification(method, params)
    }

    /// See [`JsonRpcClient::with_batch`].
    pub fn with_batch<T>(&self, body: impl FnOnce() -> T) -> T {
        self.inner.client.with_batch(body)
    }

    /// Drive the router and both inner engines until the channel closes.
    /// May be called at most once.
    pub async fn listen(&self) -> Result<(), ChannelError> {
        let conduits = self.inner.conduits.lock().unwrap().take();
        let Some(Conduits {
            server_tx,
            client_tx,
            mut shared_rx,
        }) = conduits
        else {
            panic!("listen may only be called once");
        };

        let router = self
            .inner
            .manager
            .listen(move |value| route(value, &server_tx, &client_tx));
        let forward = async {
            while let Some(message) = shared_rx.next().await {
                self.inner.manager.add(message);
            }
        };
        let (router_result, server_result, client_result, ()) = tokio::join!(
            router,
            self.inner.server.listen(),
            self.inner.client.listen(),
            forward,
        );
        router_result.and(server_result).and(client_result)
    }

    /// Close both inner engines and the channel. Idempotent.
    pub async fn close(&self) -> Result<(), ChannelError> {
        self.inner.manager.close();
        let client_result = self.inner.client.close().await;
        let server_result = self.inner.server.close().await;
        server_result.and(client_result)
    }

    /// Resolves when both inner engines are done.
    pub async fn done(&self) -> Result<(), ChannelError> {
        let (server_result, client_result) =
            tokio::join!(self.inner.server.done(), self.inner.client.done());
        server_result.and(client_result)
    }

    /// True as soon as either inner engine has closed.
    pub fn is_closed(&self) -> bool {
        self.inner.server.is_closed() || self.inner.client.is_closed()
    }
}

/// Route one inbound message to the client or server conduit by shape.
///
/// A batch is routed wholesale by its first element. A remote must not mix
/// requests and responses in one batch; such a batch gets uniform treatment.
fn route(
    value: Value,
    server_tx: &futures_mpsc::UnboundedSender<Value>,
    client_tx: &futures_mpsc::UnboundedSender<Value>,
) {
    let response_shaped = |entry: &Value| {
        entry
            .as_object()
            .is_some_and(|obj| obj.contains_key("result") || obj.contains_key("error"))
    };
    let to_client = match &value {
        Value::Object(_) => response_shaped(&value),
        Value::Array(entries) => entries.first().map(response_shaped).unwrap_or(false),
        _ => false,
    };
    if to_client {
        debug!("routing inbound message to the client half");
        let _ = client_tx.unbounded_send(value);
    } else {
        let _ = server_tx.unbounded_send(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_routing_table() {
        let (server_tx, mut server_rx) = futures_mpsc::unbounded::<Value>();
        let (client_tx, mut client_rx) = futures_mpsc::unbounded::<Value>();
        let drain = |rx: &mut futures_mpsc::UnboundedReceiver<Value>| {
            let mut seen = Vec::new();
            while let Ok(Some(value)) = rx.try_next() {
                seen.push(value);
            }
            seen
        };

        // result / error objects go to the client
        route(json!({"jsonrpc": "2.0", "result": "qux", "id": 0}), &server_tx, &client_tx);
        route(
            json!({"jsonrpc": "2.0", "error": {"code": 1, "message": "x"}, "id": 0}),
            &server_tx,
            &client_tx,
        );
        assert_eq!(drain(&mut client_rx).len(), 2);
        assert!(drain(&mut server_rx).is_empty());

        // request objects and request batches go to the server
        route(json!({"jsonrpc": "2.0", "method": "foo", "id": 0}), &server_tx, &client_tx);
        route(json!([{"jsonrpc": "2.0", "method": "foo", "id": 0}]), &server_tx, &client_tx);
        assert_eq!(drain(&mut server_rx).len(), 2);
        assert!(drain(&mut client_rx).is_empty());

        // response batches go to the client, wholesale
        route(
            json!([{"jsonrpc": "2.0", "result": 1, "id": 0}, {"jsonrpc": "2.0", "result": 2, "id": 1}]),
            &server_tx,
            &client_tx,
        );
        assert_eq!(drain(&mut client_rx).len(), 1);

        // anything else (including an empty batch) goes to the server
        route(json!([]), &server_tx, &client_tx);
        route(json!("garbage"), &server_tx, &client_tx);
        assert_eq!(drain(&mut server_rx).len(), 2);
    }

    #[tokio::test]
    async fn test_peer_serves_and_calls_on_one_channel() {
        let (near, far) = MessageChannel::pair();
        let peer = JsonRpcPeer::new(near);
        let remote = JsonRpcPeer::new(far);

        peer.register_zero_arg_method("near_name", || async { Ok(json!("near")) });
        remote.register_zero_arg_method("far_name", || async { Ok(json!("far")) });

        let peer_task = peer.clone();
        tokio::spawn(async move {
            let _ = peer_task.listen().await;
        });
        let remote_task = remote.clone();
        tokio::spawn(async move {
            let _ = remote_task.listen().await;
        });

        // Requests flow both directions over the same channel.
        assert_eq!(
            peer.send_request("far_name", None).await.unwrap(),
            json!("far")
        );
        assert_eq!(
            remote.send_request("near_name", None).await.unwrap(),
            json!("near")
        );

        peer.close().await.unwrap();
        assert!(peer.is_closed());
    }

    #[tokio::test]
    async fn test_peer_done_resolves_after_close() {
        let (near, _far) = MessageChannel::pair();
        let peer = JsonRpcPeer::new(near);
        peer.close().await.unwrap();
        assert_eq!(peer.done().await, Ok(()));
        assert!(peer.is_closed());
    }
}
