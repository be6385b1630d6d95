//! End-to-end scenarios driving paired endpoints over in-memory channels.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc as futures_mpsc;
use futures::{SinkExt as _, StreamExt as _};
use serde_json::{json, Value};

use jsonrpc_endpoint::prelude::*;

/// A connected client/server pair with both listen loops running.
fn connected() -> (JsonRpcClient, JsonRpcServer) {
    let (near, far) = MessageChannel::pair();
    let client = JsonRpcClient::new(near);
    let server = JsonRpcServer::new(far);
    spawn_listeners(&client, &server);
    (client, server)
}

fn spawn_listeners(client: &JsonRpcClient, server: &JsonRpcServer) {
    let client_task = client.clone();
    tokio::spawn(async move {
        let _ = client_task.listen().await;
    });
    let server_task = server.clone();
    tokio::spawn(async move {
        let _ = server_task.listen().await;
    });
}

/// A server wired to a raw value channel, for asserting exact wire frames.
fn raw_server(
    configure: impl FnOnce(ServerBuilder) -> ServerBuilder,
) -> (
    JsonRpcServer,
    futures_mpsc::UnboundedSender<Value>,
    futures_mpsc::UnboundedReceiver<Value>,
) {
    let (in_tx, in_rx) = futures_mpsc::unbounded::<Value>();
    let (out_tx, out_rx) = futures_mpsc::unbounded::<Value>();
    let channel = MessageChannel::from_parts(
        in_rx.map(Ok),
        out_tx.sink_map_err(|_| ChannelError::Closed),
    );
    let server = configure(JsonRpcServer::builder(channel)).build();
    let server_task = server.clone();
    tokio::spawn(async move {
        let _ = server_task.listen().await;
    });
    (server, in_tx, out_rx)
}

async fn next_frame(rx: &mut futures_mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(Duration::from_secs(5), rx.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("channel ended without a frame")
}

#[tokio::test]
async fn count_increments_across_calls() {
    let (client, server) = connected();
    let counter = Arc::new(AtomicI64::new(0));
    server.register_zero_arg_method("count", move || {
        let counter = counter.clone();
        async move { Ok(json!(counter.fetch_add(1, Ordering::SeqCst) + 1)) }
    });

    assert_eq!(client.send_request("count", None).await.unwrap(), json!(1));
    assert_eq!(client.send_request("count", None).await.unwrap(), json!(2));
}

#[tokio::test]
async fn echo_returns_typed_param_and_names_missing_one() {
    let (client, server) = connected();
    server.register_method("echo", |params: Params| async move {
        Ok(json!(params.get("message").as_str()?))
    });

    let mut params = serde_json::Map::new();
    params.insert("message".to_string(), json!("hello"));
    let result = client
        .send_request("echo", RequestParams::Object(params))
        .await
        .unwrap();
    assert_eq!(result, json!("hello"));

    let err = client
        .send_request("echo", RequestParams::Object(serde_json::Map::new()))
        .await
        .unwrap_err();
    let ClientError::Rpc(err) = err else {
        panic!("expected an rpc error, got {err:?}");
    };
    assert_eq!(err.code, INVALID_PARAMS);
    assert_eq!(err.message, "Required parameter \"message\" not provided.");
}

#[tokio::test]
async fn divide_by_zero_surfaces_the_handler_error() {
    let (client, server) = connected();
    server.register_method("divide", |params: Params| async move {
        let dividend = params.get("dividend").as_f64()?;
        let divisor = params.get("divisor").as_f64()?;
        if divisor == 0.0 {
            return Err(RpcError::new(1, "Cannot divide by zero.").into());
        }
        Ok(json!(dividend / divisor))
    });

    let mut params = serde_json::Map::new();
    params.insert("dividend".to_string(), json!(2));
    params.insert("divisor".to_string(), json!(0));
    let err = client
        .send_request("divide", RequestParams::Object(params))
        .await
        .unwrap_err();
    assert_eq!(err, ClientError::Rpc(RpcError::new(1, "Cannot divide by zero.")));
}

#[tokio::test]
async fn malformed_json_text_gets_a_parse_error_reply() {
    let (in_tx, in_rx) = futures_mpsc::unbounded::<String>();
    let (out_tx, mut out_rx) = futures_mpsc::unbounded::<String>();
    let channel = MessageChannel::json_text(
        in_rx.map(Ok),
        out_tx.sink_map_err(|_| ChannelError::Closed),
    );
    let server = JsonRpcServer::new(channel);
    let server_task = server.clone();
    tokio::spawn(async move {
        let _ = server_task.listen().await;
    });

    in_tx.unbounded_send("{invalid".to_string()).unwrap();
    let reply: Value = serde_json::from_str(
        &tokio::time::timeout(Duration::from_secs(5), out_rx.next())
            .await
            .expect("timed out")
            .expect("channel ended"),
    )
    .unwrap();

    assert_eq!(reply["error"]["code"], json!(PARSE_ERROR));
    assert!(reply["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Invalid JSON: "));
    assert_eq!(reply["error"]["data"], json!({"request": "{invalid"}));
    assert_eq!(reply["id"], Value::Null);
}

#[tokio::test]
async fn missing_jsonrpc_key_is_rejected_in_strict_mode() {
    let (_server, in_tx, mut out_rx) = raw_server(|builder| builder);
    in_tx
        .unbounded_send(json!({"completely": "wrong"}))
        .unwrap();
    assert_eq!(
        next_frame(&mut out_rx).await,
        json!({
            "jsonrpc": "2.0",
            "error": {
                "code": -32600,
                "message": "Request must contain a \"jsonrpc\" key.",
                "data": {"request": {"completely": "wrong"}},
            },
            "id": null,
        })
    );
}

#[tokio::test]
async fn missing_jsonrpc_key_is_tolerated_when_relaxed() {
    let (server, in_tx, mut out_rx) = raw_server(|builder| builder.strict_protocol_checks(false));
    server.register_zero_arg_method("ping", || async { Ok(json!("pong")) });

    in_tx
        .unbounded_send(json!({"method": "ping", "id": 4}))
        .unwrap();
    assert_eq!(
        next_frame(&mut out_rx).await,
        json!({"jsonrpc": "2.0", "result": "pong", "id": 4})
    );
}

#[tokio::test]
async fn batched_requests_resolve_their_own_futures() {
    let (client, server) = connected();
    server.register_zero_arg_method("foo", || async { Ok(json!("qux")) });
    server.register_zero_arg_method("a", || async { Ok(json!("d")) });
    server.register_zero_arg_method("w", || async { Ok(json!("z")) });

    let (foo, a, w) = client.with_batch(|| {
        (
            client.send_request("foo", None),
            client.send_request("a", None),
            client.send_request("w", None),
        )
    });
    assert_eq!(foo.await.unwrap(), json!("qux"));
    assert_eq!(a.await.unwrap(), json!("d"));
    assert_eq!(w.await.unwrap(), json!("z"));
}

#[tokio::test]
async fn failing_notification_emits_nothing_but_reaches_the_sink() {
    let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
    let (server, in_tx, mut out_rx) = raw_server(move |builder| {
        builder.on_unhandled_error(move |err, _stack| {
            let _ = seen_tx.send(err.to_string());
        })
    });
    server.register_method("boom", |_params: Params| async move {
        Err::<Value, _>(HandlerError::other("exploded"))
    });
    server.register_zero_arg_method("ping", || async { Ok(json!("pong")) });

    in_tx
        .unbounded_send(json!({"jsonrpc": "2.0", "method": "boom", "params": {}}))
        .unwrap();
    assert_eq!(seen_rx.recv().await.unwrap(), "exploded");

    // The next outbound frame is the ping reply: the notification emitted
    // nothing.
    in_tx
        .unbounded_send(json!({"jsonrpc": "2.0", "method": "ping", "id": 1}))
        .unwrap();
    assert_eq!(next_frame(&mut out_rx).await["id"], json!(1));
}

#[tokio::test]
async fn peer_routes_requests_and_responses_by_shape() {
    let (in_tx, in_rx) = futures_mpsc::unbounded::<Value>();
    let (out_tx, mut out_rx) = futures_mpsc::unbounded::<Value>();
    let channel = MessageChannel::from_parts(
        in_rx.map(Ok),
        out_tx.sink_map_err(|_| ChannelError::Closed),
    );
    let peer = JsonRpcPeer::new(channel);
    peer.register_zero_arg_method("foo", || async { Ok(json!("bar")) });
    let peer_task = peer.clone();
    tokio::spawn(async move {
        let _ = peer_task.listen().await;
    });

    // An inbound request reaches the server half.
    in_tx
        .unbounded_send(json!({"jsonrpc": "2.0", "method": "foo", "id": 0}))
        .unwrap();
    assert_eq!(
        next_frame(&mut out_rx).await,
        json!({"jsonrpc": "2.0", "result": "bar", "id": 0})
    );

    // An inbound response completes the client half's pending future.
    let pending = peer.send_request("frob", None);
    let sent = next_frame(&mut out_rx).await;
    assert_eq!(sent["method"], json!("frob"));
    in_tx
        .unbounded_send(json!({"jsonrpc": "2.0", "result": "qux", "id": sent["id"]}))
        .unwrap();
    assert_eq!(pending.await.unwrap(), json!("qux"));
}

#[tokio::test]
async fn every_request_future_resolves_on_shutdown() {
    let (client, server) = connected();
    // No handler ever answers; the close sweep must still resolve both.
    server.register_method("hang", |_params: Params| async move {
        futures::future::pending::<HandlerResult>().await
    });

    let first = client.send_request("hang", None);
    let second = client.send_request("hang", None);
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.close().await.unwrap();

    assert_eq!(
        first.await.unwrap_err(),
        ClientError::ClosedPending("hang".to_string())
    );
    assert_eq!(
        second.await.unwrap_err(),
        ClientError::ClosedPending("hang".to_string())
    );
}

#[tokio::test]
async fn emitted_messages_survive_a_decode_round_trip() {
    let request = JsonRpcRequest::new(
        RequestId::Number(3),
        "echo".to_string(),
        Some(RequestParams::Array(vec![json!("x"), json!(2)])),
    );
    let text = serde_json::to_string(&request.to_value()).unwrap();
    let decoded: JsonRpcMessage = serde_json::from_str(&text).unwrap();
    assert_eq!(decoded, JsonRpcMessage::Request(request));

    let error = JsonRpcError::new(None, RpcError::new(-32600, "nope"));
    let text = serde_json::to_string(&error.to_value()).unwrap();
    let decoded: JsonRpcMessage = serde_json::from_str(&text).unwrap();
    assert_eq!(decoded, JsonRpcMessage::Error(error));
}

#[tokio::test]
async fn double_close_returns_the_resolved_done_future() {
    let (client, server) = connected();
    assert_eq!(server.close().await, Ok(()));
    assert_eq!(server.close().await, Ok(()));
    assert_eq!(client.close().await, Ok(()));
    assert_eq!(client.close().await, Ok(()));
    assert_eq!(client.done().await, Ok(()));
    assert_eq!(server.done().await, Ok(()));
}
